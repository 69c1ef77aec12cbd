//! Roles carried in access tokens issued by the identity provider.

use serde::{Deserialize, Serialize};

pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_USER: &str = "user";

/// What a caller may do beyond their own generations and credits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Sees and spends only their own jobs and balance.
    User,
    /// Support staff: reads any user's jobs, media and ledger, and grants
    /// credits.
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => ROLE_USER,
            Role::Admin => ROLE_ADMIN,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            ROLE_USER => Some(Role::User),
            ROLE_ADMIN => Some(Role::Admin),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_match_token_values() {
        assert_eq!(serde_json::to_string(&Role::Admin).unwrap(), "\"admin\"");
        assert_eq!(Role::parse("user"), Some(Role::User));
        assert_eq!(Role::Admin.to_string(), ROLE_ADMIN);
    }

    #[test]
    fn unknown_roles_are_rejected() {
        assert_eq!(Role::parse("superuser"), None);
        assert_eq!(Role::parse("Admin"), None);
        assert!(serde_json::from_str::<Role>("\"moderator\"").is_err());
    }
}
