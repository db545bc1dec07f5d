use std::path::PathBuf;

use anyhow::{Context, bail};

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub attachment_dir: PathBuf,
    pub max_attachment_bytes: usize,
    pub session_window: chrono::Duration,
    pub sweep_interval: std::time::Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let jwt_secret = get("MAILROOM_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("MAILROOM_JWT_SECRET is unset or still a placeholder; set it in your .env file");
        }

        let parse = |key: &str, default: u64| -> anyhow::Result<u64> {
            match get(key) {
                Some(raw) => raw
                    .trim()
                    .parse()
                    .with_context(|| format!("{} must be a non-negative integer, got '{}'", key, raw)),
                None => Ok(default),
            }
        };

        let port = u16::try_from(parse("MAILROOM_PORT", 3000)?).context("MAILROOM_PORT out of range")?;
        let max_attachment_mb = parse("MAILROOM_MAX_ATTACHMENT_MB", 25)?;
        let window_minutes = parse("MAILROOM_SESSION_WINDOW_MINUTES", 30)?;
        let sweep_minutes = parse("MAILROOM_SESSION_SWEEP_MINUTES", 15)?;
        if window_minutes == 0 || sweep_minutes == 0 {
            bail!("session window and sweep interval must be at least one minute");
        }

        Ok(Self {
            jwt_secret,
            db_path: get("MAILROOM_DB_PATH").unwrap_or_else(|| "mailroom.db".into()).into(),
            host: get("MAILROOM_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            attachment_dir: get("MAILROOM_ATTACHMENT_DIR")
                .unwrap_or_else(|| "./attachments".into())
                .into(),
            max_attachment_bytes: (max_attachment_mb * 1024 * 1024) as usize,
            session_window: chrono::Duration::minutes(window_minutes as i64),
            sweep_interval: std::time::Duration::from_secs(sweep_minutes * 60),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply() {
        let cfg = config(&[("MAILROOM_JWT_SECRET", "s3cret")]).unwrap();
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.db_path, PathBuf::from("mailroom.db"));
        assert_eq!(cfg.max_attachment_bytes, 25 * 1024 * 1024);
        assert_eq!(cfg.session_window, chrono::Duration::minutes(30));
        assert_eq!(cfg.sweep_interval, std::time::Duration::from_secs(15 * 60));
    }

    #[test]
    fn placeholder_secret_is_rejected() {
        assert!(config(&[]).is_err());
        assert!(config(&[("MAILROOM_JWT_SECRET", "dev-secret-change-me")]).is_err());
    }

    #[test]
    fn bad_numbers_are_errors() {
        assert!(config(&[("MAILROOM_JWT_SECRET", "s"), ("MAILROOM_PORT", "70000")]).is_err());
        assert!(config(&[("MAILROOM_JWT_SECRET", "s"), ("MAILROOM_PORT", "abc")]).is_err());
        assert!(config(&[("MAILROOM_JWT_SECRET", "s"), ("MAILROOM_SESSION_SWEEP_MINUTES", "0")]).is_err());
    }
}
