use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use mailroom_db::Database;
use mailroom_db::sessions::PruneStats;

/// Background task that prunes orphaned and stale sessions.
///
/// The first tick fires immediately, so a sweep also runs at startup.
pub async fn run_session_sweep(db: Arc<Database>, window: chrono::Duration, every: Duration) {
    let mut interval = tokio::time::interval(every);

    loop {
        interval.tick().await;

        match sweep_once(db.clone(), window).await {
            Ok(stats) if stats.orphaned + stats.stale > 0 => info!(
                "Session sweep: pruned {} orphaned and {} stale session(s)",
                stats.orphaned, stats.stale
            ),
            Ok(_) => debug!("Session sweep: nothing to prune"),
            Err(e) => warn!("Session sweep error: {}", e),
        }
    }
}

async fn sweep_once(db: Arc<Database>, window: chrono::Duration) -> anyhow::Result<PruneStats> {
    let stats = tokio::task::spawn_blocking(move || db.prune_sessions(window)).await??;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use mailroom_db::users::NewUser;
    use mailroom_types::models::UserProfile;
    use mailroom_types::roles::Role;

    use super::*;

    fn user(db: &Database, name: &str) -> UserProfile {
        db.create_user(NewUser {
            username: name.into(),
            email: format!("{}@mailroom.example", name),
            display_name: String::new(),
            role: Role::Agent,
            department: None,
            password_hash: "hash".into(),
        })
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_prunes_stale_sessions() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let (idle, busy) = (user(&db, "idle"), user(&db, "busy"));
        db.upsert_session(idle.id, None).unwrap();
        db.upsert_session(busy.id, None).unwrap();
        db.with_conn(|conn| {
            conn.execute(
                "UPDATE sessions SET last_activity_at = '2000-01-01T00:00:00.000Z' WHERE user_id = ?1",
                [idle.id.to_string()],
            )?;
            Ok(())
        })
        .unwrap();

        let sweep = tokio::spawn(run_session_sweep(
            db.clone(),
            chrono::Duration::minutes(30),
            Duration::from_secs(15 * 60),
        ));

        // The prune itself runs on a blocking thread, outside paused time
        let mut pruned = false;
        for _ in 0..200 {
            tokio::task::yield_now().await;
            if db.get_session(idle.id).unwrap().is_none() {
                pruned = true;
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        sweep.abort();

        assert!(pruned, "stale session survived the startup sweep");
        assert!(db.get_session(busy.id).unwrap().is_some());
    }
}
