//! In-process [`IdentityStore`] used by the binary and the test suite.

use async_trait::async_trait;
use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};
use tokio::sync::RwLock;
use ulid::Ulid;

use super::{Entity, IdentityStore, IdentityUpdate, StoreError};
use crate::services::GateError;
use crate::models::{Identity, Permission, ResolvedIdentity, ResolvedRole, Role};

#[derive(Debug, Default)]
struct Tables {
    identities: HashMap<Ulid, Identity>,
    roles: HashMap<Ulid, Role>,
    permissions: HashMap<Ulid, Permission>,
    /// (identity_id, role_id)
    identity_roles: BTreeSet<(Ulid, Ulid)>,
    /// (role_id, permission_id)
    role_permissions: BTreeSet<(Ulid, Ulid)>,
}

impl Tables {
    fn live_identity(&self, id: Ulid) -> Result<&Identity, StoreError> {
        self.identities
            .get(&id)
            .filter(|i| !i.is_deleted())
            .ok_or(StoreError::NotFound(Entity::Identity))
    }

    fn resolve_role(&self, role_id: Ulid) -> Option<ResolvedRole> {
        let role = self.roles.get(&role_id)?.clone();
        let permissions = self
            .role_permissions
            .range((role_id, Ulid::nil())..=(role_id, Ulid::from(u128::MAX)))
            .filter_map(|(_, permission_id)| self.permissions.get(permission_id).cloned())
            .collect();
        Some(ResolvedRole { role, permissions })
    }
}

/// Thread-safe storage that keeps every table behind one async lock, so a
/// closure read never observes a half-applied write.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore(Arc<RwLock<Tables>>);

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn find_identity_by_id(&self, id: Ulid) -> Result<Identity, StoreError> {
        let tables = self.0.read().await;
        tables.live_identity(id).cloned()
    }

    async fn find_identity_by_email(&self, email: &str) -> Result<Identity, StoreError> {
        let tables = self.0.read().await;
        tables
            .identities
            .values()
            .find(|i| !i.is_deleted() && i.email.eq_ignore_ascii_case(email))
            .cloned()
            .ok_or(StoreError::NotFound(Entity::Identity))
    }

    async fn find_identity_with_roles(&self, id: Ulid) -> Result<ResolvedIdentity, StoreError> {
        let tables = self.0.read().await;
        let identity = tables.live_identity(id)?.clone();
        let roles = tables
            .identity_roles
            .range((id, Ulid::nil())..=(id, Ulid::from(u128::MAX)))
            .filter_map(|(_, role_id)| tables.resolve_role(*role_id))
            .collect();
        Ok(ResolvedIdentity { identity, roles })
    }

    async fn find_role_by_name(&self, name: &str) -> Result<Role, StoreError> {
        let tables = self.0.read().await;
        tables
            .roles
            .values()
            .find(|r| r.name == name)
            .cloned()
            .ok_or(StoreError::NotFound(Entity::Role))
    }

    async fn find_permission_by_name(&self, name: &str) -> Result<Permission, StoreError> {
        let tables = self.0.read().await;
        tables
            .permissions
            .values()
            .find(|p| p.name == name)
            .cloned()
            .ok_or(StoreError::NotFound(Entity::Permission))
    }

    async fn insert_identity(&self, identity: &Identity) -> Result<(), StoreError> {
        let mut tables = self.0.write().await;
        if tables.identities.contains_key(&identity.id) {
            return Err(StoreError::Conflict(format!(
                "identity {} already exists",
                identity.id
            )));
        }
        let email_taken = tables
            .identities
            .values()
            .any(|i| i.email.eq_ignore_ascii_case(&identity.email));
        if email_taken {
            return Err(StoreError::Conflict(format!(
                "email {} already registered",
                identity.email
            )));
        }
        tables.identities.insert(identity.id, identity.clone());
        Ok(())
    }

    async fn update_identity(
        &self,
        id: Ulid,
        update: IdentityUpdate<'_>,
    ) -> Result<Identity, GateError> {
        let mut tables = self.0.write().await;
        let identity = tables
            .identities
            .get_mut(&id)
            .filter(|i| !i.is_deleted())
            .ok_or(StoreError::NotFound(Entity::Identity))?;

        update(&mut *identity)?;
        Ok(identity.clone())
    }

    async fn create_role(&self, name: &str) -> Result<Role, StoreError> {
        let mut tables = self.0.write().await;
        if tables.roles.values().any(|r| r.name == name) {
            return Err(StoreError::Conflict(format!("role {} already exists", name)));
        }
        let role = Role::new(name.to_string());
        tables.roles.insert(role.id, role.clone());
        Ok(role)
    }

    async fn create_permission(&self, name: &str) -> Result<Permission, StoreError> {
        let mut tables = self.0.write().await;
        if tables.permissions.values().any(|p| p.name == name) {
            return Err(StoreError::Conflict(format!(
                "permission {} already exists",
                name
            )));
        }
        let permission = Permission::new(name.to_string());
        tables.permissions.insert(permission.id, permission.clone());
        Ok(permission)
    }

    async fn append_role_to_identity(
        &self,
        identity_id: Ulid,
        role_id: Ulid,
    ) -> Result<bool, StoreError> {
        let mut tables = self.0.write().await;
        tables.live_identity(identity_id)?;
        if !tables.roles.contains_key(&role_id) {
            return Err(StoreError::NotFound(Entity::Role));
        }
        Ok(tables.identity_roles.insert((identity_id, role_id)))
    }

    async fn append_permission_to_role(
        &self,
        role_id: Ulid,
        permission_id: Ulid,
    ) -> Result<bool, StoreError> {
        let mut tables = self.0.write().await;
        if !tables.roles.contains_key(&role_id) {
            return Err(StoreError::NotFound(Entity::Role));
        }
        if !tables.permissions.contains_key(&permission_id) {
            return Err(StoreError::NotFound(Entity::Permission));
        }
        Ok(tables.role_permissions.insert((role_id, permission_id)))
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
