use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Organisational role of a directory user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    Admin,
    Manager,
    TeamLeader,
    Agent,
    Bde,
    External,
}

impl Role {
    pub const ALL: [Role; 6] = [
        Role::Admin,
        Role::Manager,
        Role::TeamLeader,
        Role::Agent,
        Role::Bde,
        Role::External,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::TeamLeader => "team-leader",
            Role::Agent => "agent",
            Role::Bde => "bde",
            Role::External => "external",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownRole(pub String);

impl fmt::Display for UnknownRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown role '{}'", self.0)
    }
}

impl std::error::Error for UnknownRole {}

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownRole(s.to_string()))
    }
}

// -- Capability predicates --

/// Operations that act on another user's account or activity.
pub fn can_manage_others(role: Role) -> bool {
    matches!(role, Role::Admin | Role::Manager)
}

pub fn is_admin(role: Role) -> bool {
    role == Role::Admin
}

/// Attachment upload is limited to leadership roles unless the user has a
/// per-account override.
pub fn can_send_attachments(role: Role, attachments_override: bool) -> bool {
    attachments_override || matches!(role, Role::Admin | Role::Manager | Role::TeamLeader)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_kebab_case_names() {
        assert_eq!("team-leader".parse::<Role>().unwrap(), Role::TeamLeader);
        assert_eq!("BDE".parse::<Role>().unwrap(), Role::Bde);
        assert!("superuser".parse::<Role>().is_err());
    }

    #[test]
    fn serde_matches_display() {
        for role in Role::ALL {
            let json = serde_json::to_string(&role).unwrap();
            assert_eq!(json, format!("\"{}\"", role));
        }
    }

    #[test]
    fn manage_others_is_admin_or_manager() {
        let allowed: Vec<Role> = Role::ALL.into_iter().filter(|r| can_manage_others(*r)).collect();
        assert_eq!(allowed, vec![Role::Admin, Role::Manager]);
    }

    #[test]
    fn attachment_override_wins() {
        assert!(!can_send_attachments(Role::Agent, false));
        assert!(can_send_attachments(Role::Agent, true));
        assert!(can_send_attachments(Role::TeamLeader, false));
        assert!(!can_send_attachments(Role::External, false));
    }
}
