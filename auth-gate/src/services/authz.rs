//! Role-based authorization over an identity's resolved role/permission closure.
//!
//! Decisions are pure functions of a [`ResolvedIdentity`]; only loading and the
//! assignment operations touch the store.

use std::sync::Arc;
use ulid::Ulid;

use crate::db::IdentityStore;
use crate::models::{Permission, PolicyAction, ResolvedIdentity, Role};
use crate::services::error::GateError;

#[derive(Clone)]
pub struct AuthorizationEngine {
    store: Arc<dyn IdentityStore>,
}

impl AuthorizationEngine {
    pub fn new(store: Arc<dyn IdentityStore>) -> Self {
        Self { store }
    }

    /// Identity plus every role and each role's permissions, as one snapshot.
    pub async fn load_identity(&self, id: Ulid) -> Result<ResolvedIdentity, GateError> {
        Ok(self.store.find_identity_with_roles(id).await?)
    }

    pub fn has_role(identity: &ResolvedIdentity, role: &str) -> bool {
        identity.has_role(role)
    }

    pub fn has_permission(identity: &ResolvedIdentity, permission: &str) -> bool {
        identity.has_permission(permission)
    }

    /// True if the identity holds at least one of `roles`.
    pub fn authorize_any_role<S: AsRef<str>>(identity: &ResolvedIdentity, roles: &[S]) -> bool {
        roles.iter().any(|r| identity.has_role(r.as_ref()))
    }

    /// True if the identity holds at least one of `permissions`.
    pub fn authorize_any_permission<S: AsRef<str>>(
        identity: &ResolvedIdentity,
        permissions: &[S],
    ) -> bool {
        permissions.iter().any(|p| identity.has_permission(p.as_ref()))
    }

    /// `<action>_<module>` permission check.
    pub fn authorize(identity: &ResolvedIdentity, action: PolicyAction, module: &str) -> bool {
        identity.has_permission(&Permission::name_for(action, module))
    }

    pub fn can_view(identity: &ResolvedIdentity, module: &str) -> bool {
        Self::authorize(identity, PolicyAction::View, module)
    }

    pub fn can_create(identity: &ResolvedIdentity, module: &str) -> bool {
        Self::authorize(identity, PolicyAction::Create, module)
    }

    pub fn can_edit(identity: &ResolvedIdentity, module: &str) -> bool {
        Self::authorize(identity, PolicyAction::Edit, module)
    }

    pub fn can_delete(identity: &ResolvedIdentity, module: &str) -> bool {
        Self::authorize(identity, PolicyAction::Delete, module)
    }

    /// Rejects with `AlreadyHasRole` instead of silently accepting a repeat.
    pub async fn assign_role(&self, identity_id: Ulid, role_name: &str) -> Result<(), GateError> {
        let identity = self.load_identity(identity_id).await?;
        let role = self.store.find_role_by_name(role_name).await?;

        if identity.has_role(&role.name) {
            return Err(GateError::AlreadyHasRole);
        }

        // A concurrent assignment can still land between the check and the append.
        if !self.store.append_role_to_identity(identity_id, role.id).await? {
            return Err(GateError::AlreadyHasRole);
        }

        tracing::info!(identity_id = %identity_id, role = %role.name, "Role assigned");
        Ok(())
    }

    /// Adding a permission the role already has is a no-op.
    pub async fn assign_permission(
        &self,
        role_name: &str,
        permission_name: &str,
    ) -> Result<(), GateError> {
        let role = self.store.find_role_by_name(role_name).await?;
        let permission = self.store.find_permission_by_name(permission_name).await?;

        let added = self
            .store
            .append_permission_to_role(role.id, permission.id)
            .await?;

        tracing::info!(
            role = %role.name,
            permission = %permission.name,
            added,
            "Permission assigned"
        );
        Ok(())
    }

    pub async fn create_role(&self, name: &str) -> Result<Role, GateError> {
        let name = normalize_name(name, "Role")?;
        let role = self.store.create_role(name).await.map_err(|e| match e {
            crate::db::StoreError::Conflict(_) => GateError::DuplicateName(format!("Role '{}'", name)),
            other => other.into(),
        })?;
        tracing::info!(role = %role.name, "Role created");
        Ok(role)
    }

    pub async fn create_permission(&self, name: &str) -> Result<Permission, GateError> {
        let name = normalize_name(name, "Permission")?;
        let permission = self.store.create_permission(name).await.map_err(|e| match e {
            crate::db::StoreError::Conflict(_) => {
                GateError::DuplicateName(format!("Permission '{}'", name))
            }
            other => other.into(),
        })?;
        tracing::info!(permission = %permission.name, "Permission created");
        Ok(permission)
    }
}

fn normalize_name<'a>(name: &'a str, what: &str) -> Result<&'a str, GateError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(GateError::App(service_core::error::AppError::BadRequest(
            anyhow::anyhow!("{} name must not be empty", what),
        )));
    }
    Ok(trimmed)
}
