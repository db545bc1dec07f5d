//! User directory backed by the `users` table.

use std::collections::HashSet;

use rusqlite::{Connection, OptionalExtension, ToSql, TransactionBehavior};
use tracing::{info, warn};
use uuid::Uuid;

use mailroom_types::models::UserProfile;
use mailroom_types::roles::Role;

use crate::error::{MailError, Result};
use crate::models::UserRow;
use crate::{Database, format_timestamp, now, parse_timestamp, parse_uuid};

/// Read-only view of the user directory used for session validation,
/// role-gating and read-receipt resolution.
pub trait UserDirectory: Send + Sync {
    fn resolve(&self, id: Uuid) -> Result<Option<UserProfile>>;

    /// Case-insensitive lookup by email address.
    fn resolve_by_email(&self, email: &str) -> Result<Option<UserProfile>>;

    /// Every user whose role is in `roles`, ordered by display name.
    fn list_by_role(&self, roles: &[Role]) -> Result<Vec<UserProfile>>;

    fn all_ids(&self) -> Result<HashSet<Uuid>>;
}

/// Fields needed to register a directory user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub display_name: String,
    pub role: Role,
    pub department: Option<String>,
    pub password_hash: String,
}

/// A profile together with its stored password hash.
pub struct UserCredentials {
    pub profile: UserProfile,
    pub password_hash: String,
}

const USER_COLUMNS: &str =
    "id, username, email, display_name, role, department, attachments_override, password, created_at";

impl Database {
    pub fn create_user(&self, new: NewUser) -> Result<UserProfile> {
        self.insert_user(new, false)
    }

    /// Like [`Database::create_user`], except the first account in an empty
    /// directory becomes an admin. The count and the insert share one
    /// transaction, so concurrent first registrations yield a single admin.
    pub fn create_user_bootstrapping(&self, new: NewUser) -> Result<UserProfile> {
        self.insert_user(new, true)
    }

    fn insert_user(&self, new: NewUser, bootstrap: bool) -> Result<UserProfile> {
        if new.username.trim().is_empty() {
            return Err(MailError::validation("username is required"));
        }
        if !new.email.contains('@') {
            return Err(MailError::validation("a valid email is required"));
        }

        let mut profile = UserProfile {
            id: Uuid::new_v4(),
            username: new.username.trim().to_string(),
            email: new.email.trim().to_string(),
            display_name: if new.display_name.trim().is_empty() {
                new.username.trim().to_string()
            } else {
                new.display_name.trim().to_string()
            },
            role: new.role,
            department: new.department,
            attachments_override: false,
            created_at: now(),
        };
        let password_hash = new.password_hash;

        let profile = self
            .with_conn_mut(|conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                if bootstrap && count_users(&tx)? == 0 {
                    profile.role = Role::Admin;
                }
                tx.execute(
                    "INSERT INTO users (id, username, email, display_name, role, department, password, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    rusqlite::params![
                        profile.id.to_string(),
                        profile.username,
                        profile.email,
                        profile.display_name,
                        profile.role.as_str(),
                        profile.department,
                        password_hash,
                        format_timestamp(profile.created_at),
                    ],
                )?;
                tx.commit()?;
                Ok(profile)
            })
            .map_err(|e| match e {
                MailError::Conflict(_) => MailError::conflict("username or email already registered"),
                other => other,
            })?;

        info!("Registered user {} ({}) as {}", profile.username, profile.id, profile.role);
        Ok(profile)
    }

    pub fn get_credentials_by_username(&self, username: &str) -> Result<Option<UserCredentials>> {
        self.with_conn(|conn| {
            let row = query_user(conn, "username = ?1", &[&username])?;
            row.map(|r| {
                let password_hash = r.password.clone();
                Ok(UserCredentials {
                    profile: row_to_profile(r)?,
                    password_hash,
                })
            })
            .transpose()
        })
    }

    pub fn update_password(&self, user_id: Uuid, password_hash: &str) -> Result<()> {
        let changed = self.with_conn_mut(|conn| {
            Ok(conn.execute(
                "UPDATE users SET password = ?1 WHERE id = ?2",
                (password_hash, user_id.to_string()),
            )?)
        })?;
        if changed == 0 {
            return Err(MailError::not_found(format!("user {}", user_id)));
        }
        Ok(())
    }

    pub fn update_role(&self, user_id: Uuid, role: Role) -> Result<UserProfile> {
        let changed = self.with_conn_mut(|conn| {
            Ok(conn.execute(
                "UPDATE users SET role = ?1 WHERE id = ?2",
                (role.as_str(), user_id.to_string()),
            )?)
        })?;
        if changed == 0 {
            return Err(MailError::not_found(format!("user {}", user_id)));
        }
        info!("User {} is now {}", user_id, role);
        self.resolve(user_id)?
            .ok_or_else(|| MailError::not_found(format!("user {}", user_id)))
    }

    pub fn user_count(&self) -> Result<u64> {
        self.with_conn(count_users)
    }

    pub fn set_attachments_override(&self, user_id: Uuid, allowed: bool) -> Result<()> {
        let changed = self.with_conn_mut(|conn| {
            Ok(conn.execute(
                "UPDATE users SET attachments_override = ?1 WHERE id = ?2",
                (allowed, user_id.to_string()),
            )?)
        })?;
        if changed == 0 {
            return Err(MailError::not_found(format!("user {}", user_id)));
        }
        Ok(())
    }
}

impl UserDirectory for Database {
    fn resolve(&self, id: Uuid) -> Result<Option<UserProfile>> {
        self.with_conn(|conn| query_profile_by_id(conn, id))
    }

    fn resolve_by_email(&self, email: &str) -> Result<Option<UserProfile>> {
        self.with_conn(|conn| {
            query_user(conn, "email = ?1 COLLATE NOCASE", &[&email.trim()])?
                .map(row_to_profile)
                .transpose()
        })
    }

    fn list_by_role(&self, roles: &[Role]) -> Result<Vec<UserProfile>> {
        if roles.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=roles.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT {} FROM users WHERE role IN ({}) ORDER BY display_name COLLATE NOCASE",
                USER_COLUMNS,
                placeholders.join(", ")
            );
            let names: Vec<&str> = roles.iter().map(|r| r.as_str()).collect();
            let params: Vec<&dyn ToSql> = names.iter().map(|n| n as &dyn ToSql).collect();

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params.as_slice(), map_user_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter().map(row_to_profile).collect()
        })
    }

    fn all_ids(&self) -> Result<HashSet<Uuid>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id FROM users")?;
            let ids = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            ids.iter().map(|id| parse_uuid(id)).collect()
        })
    }
}

fn count_users(conn: &Connection) -> Result<u64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get::<_, i64>(0))? as u64)
}

pub(crate) fn query_profile_by_id(conn: &Connection, id: Uuid) -> Result<Option<UserProfile>> {
    query_user(conn, "id = ?1", &[&id.to_string()])?
        .map(row_to_profile)
        .transpose()
}

fn query_user(conn: &Connection, filter: &str, params: &[&dyn ToSql]) -> Result<Option<UserRow>> {
    let sql = format!("SELECT {} FROM users WHERE {}", USER_COLUMNS, filter);
    let mut stmt = conn.prepare(&sql)?;
    Ok(stmt.query_row(params, map_user_row).optional()?)
}

fn map_user_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        display_name: row.get(3)?,
        role: row.get(4)?,
        department: row.get(5)?,
        attachments_override: row.get(6)?,
        password: row.get(7)?,
        created_at: row.get(8)?,
    })
}

fn row_to_profile(row: UserRow) -> Result<UserProfile> {
    let role = row.role.parse::<Role>().unwrap_or_else(|e| {
        warn!("{} on user '{}', treating as external", e, row.id);
        Role::External
    });
    Ok(UserProfile {
        id: parse_uuid(&row.id)?,
        username: row.username,
        email: row.email,
        display_name: row.display_name,
        role,
        department: row.department,
        attachments_override: row.attachments_override,
        created_at: parse_timestamp(&row.created_at),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn register(db: &Database, username: &str, role: Role) -> UserProfile {
        db.create_user(NewUser {
            username: username.into(),
            email: format!("{}@mailroom.example", username),
            display_name: String::new(),
            role,
            department: Some("Support".into()),
            password_hash: "not-a-real-hash".into(),
        })
        .unwrap()
    }

    #[test]
    fn resolve_by_id_and_email() {
        let db = Database::open_in_memory().unwrap();
        let alice = register(&db, "alice", Role::Agent);

        assert_eq!(db.resolve(alice.id).unwrap(), Some(alice.clone()));
        assert_eq!(db.resolve_by_email("ALICE@mailroom.example").unwrap(), Some(alice.clone()));
        assert_eq!(db.resolve(Uuid::new_v4()).unwrap(), None);
        assert_eq!(alice.display_name, "alice");
    }

    #[test]
    fn duplicate_username_conflicts() {
        let db = Database::open_in_memory().unwrap();
        register(&db, "bob", Role::Agent);
        let again = db.create_user(NewUser {
            username: "bob".into(),
            email: "other@mailroom.example".into(),
            display_name: "Bob".into(),
            role: Role::Agent,
            department: None,
            password_hash: "x".into(),
        });
        assert!(matches!(again, Err(MailError::Conflict(_))));
    }

    #[test]
    fn list_by_role_filters() {
        let db = Database::open_in_memory().unwrap();
        register(&db, "carol", Role::Manager);
        register(&db, "dave", Role::Agent);
        register(&db, "erin", Role::Bde);

        let names: Vec<String> = db
            .list_by_role(&[Role::Agent, Role::Bde])
            .unwrap()
            .into_iter()
            .map(|u| u.username)
            .collect();
        assert_eq!(names, vec!["dave".to_string(), "erin".to_string()]);
        assert_eq!(db.all_ids().unwrap().len(), 3);
    }

    #[test]
    fn password_update_requires_existing_user() {
        let db = Database::open_in_memory().unwrap();
        let frank = register(&db, "frank", Role::Agent);
        db.update_password(frank.id, "new-hash").unwrap();
        let creds = db.get_credentials_by_username("frank").unwrap().unwrap();
        assert_eq!(creds.password_hash, "new-hash");

        assert!(matches!(
            db.update_password(Uuid::new_v4(), "x"),
            Err(MailError::NotFound(_))
        ));
    }

    #[test]
    fn role_and_override_updates() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.user_count().unwrap(), 0);
        let gina = register(&db, "gina", Role::Agent);
        assert_eq!(db.user_count().unwrap(), 1);

        let promoted = db.update_role(gina.id, Role::TeamLeader).unwrap();
        assert_eq!(promoted.role, Role::TeamLeader);

        db.set_attachments_override(gina.id, true).unwrap();
        assert!(db.resolve(gina.id).unwrap().unwrap().attachments_override);
        assert!(matches!(
            db.update_role(Uuid::new_v4(), Role::Admin),
            Err(MailError::NotFound(_))
        ));
    }
    fn applicant(username: &str) -> NewUser {
        NewUser {
            username: username.into(),
            email: format!("{}@mailroom.example", username),
            display_name: String::new(),
            role: Role::Agent,
            department: None,
            password_hash: "not-a-real-hash".into(),
        }
    }

    #[test]
    fn only_the_first_bootstrapped_user_is_admin() {
        let db = Database::open_in_memory().unwrap();
        let first = db.create_user_bootstrapping(applicant("hana")).unwrap();
        let second = db.create_user_bootstrapping(applicant("ivan")).unwrap();
        assert_eq!(first.role, Role::Admin);
        assert_eq!(second.role, Role::Agent);
        assert_eq!(db.resolve(first.id).unwrap().unwrap().role, Role::Admin);
    }

    #[test]
    fn concurrent_bootstrap_yields_one_admin() {
        let db = std::sync::Arc::new(Database::open_in_memory().unwrap());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let db = db.clone();
                std::thread::spawn(move || db.create_user_bootstrapping(applicant(&format!("user{}", i))))
            })
            .collect();
        for h in handles {
            h.join().unwrap().unwrap();
        }

        assert_eq!(db.user_count().unwrap(), 8);
        assert_eq!(db.list_by_role(&[Role::Admin]).unwrap().len(), 1);
    }
}
