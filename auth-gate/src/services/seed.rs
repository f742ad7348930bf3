//! Idempotent bootstrap of the default roles, permissions, and admin identity.

use secrecy::{ExposeSecret, SecretString};

use crate::config::SeedConfig;
use crate::db::{IdentityStore, StoreError};
use crate::models::Identity;
use crate::services::authz::AuthorizationEngine;
use crate::services::error::GateError;
use crate::utils::{hash_password, Password};

pub const DEFAULT_PERMISSIONS: [&str; 3] = ["manage_users", "manage_roles", "view_reports"];
pub const DEFAULT_ROLES: [&str; 3] = ["admin", "user", "manager"];
pub const ADMIN_ROLE: &str = "admin";

/// Safe to run on every start: existing entries and edges are left alone.
pub async fn seed_defaults(
    store: &dyn IdentityStore,
    engine: &AuthorizationEngine,
    config: &SeedConfig,
) -> Result<(), GateError> {
    for name in DEFAULT_PERMISSIONS {
        ensure_created(store.create_permission(name).await)?;
    }
    for name in DEFAULT_ROLES {
        ensure_created(store.create_role(name).await)?;
    }
    for permission in DEFAULT_PERMISSIONS {
        engine.assign_permission(ADMIN_ROLE, permission).await?;
    }
    tracing::info!("Roles and permissions seeded");

    if let (Some(email), Some(password)) = (&config.admin_email, &config.admin_password) {
        seed_admin(store, engine, email, password).await?;
    }

    Ok(())
}

async fn seed_admin(
    store: &dyn IdentityStore,
    engine: &AuthorizationEngine,
    email: &str,
    password: &SecretString,
) -> Result<(), GateError> {
    let email = email.trim().to_lowercase();
    let identity = match store.find_identity_by_email(&email).await {
        Ok(existing) => existing,
        Err(StoreError::NotFound(_)) => {
            let hash = hash_password(&Password::new(password.expose_secret().clone()))?;
            let mut identity = Identity::new("Administrator".to_string(), email, hash.into_string());
            identity.is_verified = true;
            store.insert_identity(&identity).await?;
            tracing::info!(identity_id = %identity.id, "Admin identity seeded");
            identity
        }
        Err(e) => return Err(e.into()),
    };

    for role in [ADMIN_ROLE, "manager"] {
        match engine.assign_role(identity.id, role).await {
            Ok(()) | Err(GateError::AlreadyHasRole) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn ensure_created<T>(result: Result<T, StoreError>) -> Result<(), GateError> {
    match result {
        Ok(_) | Err(StoreError::Conflict(_)) => Ok(()),
        Err(e) => Err(e.into()),
    }
}
