//! Identity model - an account that can authenticate and hold roles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use ulid::Ulid;

use super::{Permission, Role};

/// Identity entity.
///
/// Roles are not embedded here; identity-to-role edges live in the store and
/// are resolved into a [`ResolvedIdentity`] per request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub id: Ulid,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub is_verified: bool,
    #[serde(skip_serializing)]
    pub verification_code: Option<String>,
    #[serde(skip_serializing)]
    pub reset_code: Option<String>,
    #[serde(skip_serializing)]
    pub reset_code_expires_utc: Option<DateTime<Utc>>,
    /// Wrong guesses against the current verification code.
    #[serde(skip_serializing, default)]
    pub verification_attempts: u32,
    /// Wrong guesses against the current reset code.
    #[serde(skip_serializing, default)]
    pub reset_attempts: u32,
    /// Confirmed second-factor secret (base32). Only set once possession was proven.
    #[serde(skip_serializing)]
    pub two_factor_secret: Option<String>,
    /// Secret issued by setup but not yet confirmed with a valid code.
    #[serde(skip_serializing)]
    pub pending_two_factor_secret: Option<String>,
    pub two_factor_enabled: bool,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_utc: Option<DateTime<Utc>>,
}

impl Identity {
    /// Create a new, unverified identity.
    pub fn new(name: String, email: String, password_hash: String) -> Self {
        let now = Utc::now();
        Self {
            id: Ulid::new(),
            name,
            email,
            password_hash,
            is_verified: false,
            verification_code: None,
            reset_code: None,
            reset_code_expires_utc: None,
            verification_attempts: 0,
            reset_attempts: 0,
            two_factor_secret: None,
            pending_two_factor_secret: None,
            two_factor_enabled: false,
            created_utc: now,
            updated_utc: now,
            deleted_utc: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_utc.is_some()
    }

    pub fn touch(&mut self) {
        self.updated_utc = Utc::now();
    }
}

/// A role together with every permission granted to it.
#[derive(Debug, Clone)]
pub struct ResolvedRole {
    pub role: Role,
    pub permissions: Vec<Permission>,
}

/// Identity plus its full role/permission closure, loaded as one snapshot.
///
/// This is the request-scoped view of the caller: it is built once by the
/// gate and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct ResolvedIdentity {
    pub identity: Identity,
    pub roles: Vec<ResolvedRole>,
}

impl ResolvedIdentity {
    pub fn id(&self) -> Ulid {
        self.identity.id
    }

    /// Exact, case-sensitive match against assigned role names.
    pub fn has_role(&self, role_name: &str) -> bool {
        self.roles.iter().any(|r| r.role.name == role_name)
    }

    /// True iff some assigned role grants `permission_name`.
    pub fn has_permission(&self, permission_name: &str) -> bool {
        self.roles
            .iter()
            .flat_map(|r| r.permissions.iter())
            .any(|p| p.name == permission_name)
    }

    pub fn role_names(&self) -> BTreeSet<String> {
        self.roles.iter().map(|r| r.role.name.clone()).collect()
    }

    /// Union of permissions over all assigned roles.
    pub fn permission_names(&self) -> BTreeSet<String> {
        self.roles
            .iter()
            .flat_map(|r| r.permissions.iter().map(|p| p.name.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved(roles: Vec<(&str, Vec<&str>)>) -> ResolvedIdentity {
        ResolvedIdentity {
            identity: Identity::new("Test".into(), "t@example.com".into(), "hash".into()),
            roles: roles
                .into_iter()
                .map(|(role, perms)| ResolvedRole {
                    role: Role::new(role.to_string()),
                    permissions: perms
                        .into_iter()
                        .map(|p| Permission::new(p.to_string()))
                        .collect(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_has_role_is_exact_match() {
        let identity = resolved(vec![("admin", vec![])]);
        assert!(identity.has_role("admin"));
        assert!(!identity.has_role("Admin"));
        assert!(!identity.has_role("manager"));
    }

    #[test]
    fn test_permission_closure_is_union_over_roles() {
        let identity = resolved(vec![
            ("editor", vec!["edit_post", "view_post"]),
            ("moderator", vec!["delete_post", "view_post"]),
        ]);

        assert!(identity.has_permission("edit_post"));
        assert!(identity.has_permission("delete_post"));
        assert!(!identity.has_permission("manage_users"));

        let names: Vec<_> = identity.permission_names().into_iter().collect();
        assert_eq!(names, vec!["delete_post", "edit_post", "view_post"]);
    }

    #[test]
    fn test_no_roles_means_no_permissions() {
        let identity = resolved(vec![]);
        assert!(identity.permission_names().is_empty());
        assert!(!identity.has_permission("view_reports"));
    }

    #[test]
    fn test_secrets_are_not_serialized() {
        let mut identity = Identity::new("T".into(), "t@example.com".into(), "hash".into());
        identity.two_factor_secret = Some("JBSWY3DPEHPK3PXP".into());
        let json = serde_json::to_string(&identity).unwrap();
        assert!(!json.contains("hash"));
        assert!(!json.contains("JBSWY3DPEHPK3PXP"));
    }
}
