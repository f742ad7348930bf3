//! Persistence collaborator used by the gate.
//!
//! The gate never issues queries itself; everything goes through the narrow
//! [`IdentityStore`] lookups below. Role and permission relationships are plain
//! edge sets keyed by id, resolved on demand.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use thiserror::Error;
use ulid::Ulid;

use crate::models::{Identity, Permission, ResolvedIdentity, Role};
use crate::services::GateError;

/// In-place change to one identity, applied by [`IdentityStore::update_identity`].
pub type IdentityUpdate<'a> = Box<dyn FnOnce(&mut Identity) -> Result<(), GateError> + Send + 'a>;

/// Entity kinds that a lookup can fail to find.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Identity,
    Role,
    Permission,
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Entity::Identity => write!(f, "identity"),
            Entity::Role => write!(f, "role"),
            Entity::Permission => write!(f, "permission"),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(Entity),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Store backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn find_identity_by_id(&self, id: Ulid) -> Result<Identity, StoreError>;

    async fn find_identity_by_email(&self, email: &str) -> Result<Identity, StoreError>;

    /// Identity plus roles plus each role's permissions, read as one consistent snapshot.
    async fn find_identity_with_roles(&self, id: Ulid) -> Result<ResolvedIdentity, StoreError>;

    async fn find_role_by_name(&self, name: &str) -> Result<Role, StoreError>;

    async fn find_permission_by_name(&self, name: &str) -> Result<Permission, StoreError>;

    /// Fails with `Conflict` if the id exists or another identity owns the email.
    async fn insert_identity(&self, identity: &Identity) -> Result<(), StoreError>;

    /// Applies `update` to the live identity with no other write in between,
    /// then returns the stored result.
    ///
    /// Whatever `update` changed is kept even when it returns an error, so a
    /// rejected attempt can still be recorded. It must not change the id or email.
    async fn update_identity(
        &self,
        id: Ulid,
        update: IdentityUpdate<'_>,
    ) -> Result<Identity, GateError>;

    /// Fails with `Conflict` if the name is taken.
    async fn create_role(&self, name: &str) -> Result<Role, StoreError>;

    /// Fails with `Conflict` if the name is taken.
    async fn create_permission(&self, name: &str) -> Result<Permission, StoreError>;

    /// Adds the identity-role edge. Returns `false` if it already existed.
    async fn append_role_to_identity(
        &self,
        identity_id: Ulid,
        role_id: Ulid,
    ) -> Result<bool, StoreError>;

    /// Adds the role-permission edge. Returns `false` if it already existed.
    async fn append_permission_to_role(
        &self,
        role_id: Ulid,
        permission_id: Ulid,
    ) -> Result<bool, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}
