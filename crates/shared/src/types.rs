//! Shared domain types

use serde::{Deserialize, Serialize};

/// Platform roles. Tenants (huurders) are the only subscribing role today;
/// the other roles exist for authorization checks on admin endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Tenant,
    Landlord,
    Reviewer,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Tenant => "tenant",
            UserRole::Landlord => "landlord",
            UserRole::Reviewer => "reviewer",
            UserRole::Admin => "admin",
        }
    }

    /// Parse a stored role string. Unknown values map to the least
    /// privileged role.
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "admin" => UserRole::Admin,
            "reviewer" => UserRole::Reviewer,
            "landlord" => UserRole::Landlord,
            _ => UserRole::Tenant,
        }
    }

    /// Whether users with this role purchase a subscription at all.
    pub fn subscribes(&self) -> bool {
        matches!(self, UserRole::Tenant)
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips() {
        for role in [
            UserRole::Tenant,
            UserRole::Landlord,
            UserRole::Reviewer,
            UserRole::Admin,
        ] {
            assert_eq!(UserRole::from_str_lossy(role.as_str()), role);
        }
    }

    #[test]
    fn unknown_role_defaults_to_tenant() {
        assert_eq!(UserRole::from_str_lossy("superuser"), UserRole::Tenant);
    }

    #[test]
    fn only_tenants_subscribe() {
        assert!(UserRole::Tenant.subscribes());
        assert!(!UserRole::Landlord.subscribes());
        assert!(!UserRole::Admin.subscribes());
    }
}
