//! TOTP second factor: enrollment, confirmation, and the login-time challenge.
//!
//! Setup only stages a pending secret. The identity keeps its confirmed secret
//! (if any) until a code from the pending one verifies, so an abandoned setup
//! never locks anyone out.

use serde::Serialize;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use totp_rs::{Algorithm, Secret, TOTP};
use ulid::Ulid;

use crate::db::IdentityStore;
use crate::models::Identity;
use crate::services::error::GateError;
use crate::utils::qr_data_uri;

pub const CODE_DIGITS: usize = 6;
pub const STEP_SECONDS: u64 = 30;
/// Steps accepted on either side of the current one.
pub const SKEW_STEPS: u8 = 1;

#[derive(Debug, Clone, Serialize)]
pub struct TwoFactorSetup {
    /// Base32 secret for manual entry.
    pub secret: String,
    pub provisioning_uri: String,
    /// `data:image/png;base64,...`
    pub qr_code: String,
}

#[derive(Clone)]
pub struct TwoFactorService {
    store: Arc<dyn IdentityStore>,
    issuer: String,
}

impl TwoFactorService {
    pub fn new(store: Arc<dyn IdentityStore>, issuer: impl Into<String>) -> Self {
        Self {
            store,
            issuer: issuer.into(),
        }
    }

    pub async fn setup(&self, identity_id: Ulid) -> Result<TwoFactorSetup, GateError> {
        let identity = self.store.find_identity_by_id(identity_id).await?;

        let secret_bytes = Secret::generate_secret()
            .to_bytes()
            .map_err(|e| anyhow::anyhow!("Secret gen error: {:?}", e))?;
        let totp = self.totp(secret_bytes, &identity.email)?;

        let secret = totp.get_secret_base32();
        let provisioning_uri = totp.get_url();
        let qr_code = qr_data_uri(&provisioning_uri)?;

        let pending = secret.clone();
        self.store
            .update_identity(
                identity_id,
                Box::new(move |identity: &mut Identity| {
                    identity.pending_two_factor_secret = Some(pending);
                    identity.touch();
                    Ok(())
                }),
            )
            .await?;

        tracing::info!(identity_id = %identity_id, "Two-factor setup started");

        Ok(TwoFactorSetup {
            secret,
            provisioning_uri,
            qr_code,
        })
    }

    pub async fn verify(&self, identity_id: Ulid, code: &str) -> Result<(), GateError> {
        self.verify_at(identity_id, code, unix_now()).await
    }

    /// Confirms possession of the pending secret and enables the second factor.
    ///
    /// A code from the confirmed secret is also accepted; that path keeps the
    /// flag on and leaves any pending secret staged.
    pub async fn verify_at(&self, identity_id: Ulid, code: &str, time: u64) -> Result<(), GateError> {
        self.store
            .update_identity(
                identity_id,
                Box::new(|identity: &mut Identity| {
                    if identity.pending_two_factor_secret.is_none()
                        && identity.two_factor_secret.is_none()
                    {
                        return Err(GateError::TwoFactorNotSetup);
                    }

                    let pending_matches = match identity.pending_two_factor_secret.as_deref() {
                        Some(pending) => self.check(pending, &identity.email, code, time)?,
                        None => false,
                    };
                    if pending_matches {
                        identity.two_factor_secret = identity.pending_two_factor_secret.take();
                    } else {
                        let confirmed_matches = match identity.two_factor_secret.as_deref() {
                            Some(confirmed) => self.check(confirmed, &identity.email, code, time)?,
                            None => false,
                        };
                        if !confirmed_matches {
                            tracing::warn!(identity_id = %identity.id, "Two-factor verification failed");
                            return Err(GateError::TwoFactorInvalid);
                        }
                    }

                    identity.two_factor_enabled = true;
                    identity.touch();
                    Ok(())
                }),
            )
            .await?;

        tracing::info!(identity_id = %identity_id, "Two-factor enabled");
        Ok(())
    }

    pub fn challenge(&self, identity: &Identity, code: Option<&str>) -> Result<(), GateError> {
        self.challenge_at(identity, code, unix_now())
    }

    /// Login-time check. Passes straight through when the second factor is off.
    pub fn challenge_at(
        &self,
        identity: &Identity,
        code: Option<&str>,
        time: u64,
    ) -> Result<(), GateError> {
        if !identity.two_factor_enabled {
            return Ok(());
        }

        let code = match code.map(str::trim) {
            Some(c) if !c.is_empty() => c,
            _ => return Err(GateError::TwoFactorRequired),
        };

        let secret = identity
            .two_factor_secret
            .as_deref()
            .ok_or(GateError::TwoFactorNotSetup)?;

        if self.check(secret, &identity.email, code, time)? {
            Ok(())
        } else {
            Err(GateError::TwoFactorInvalid)
        }
    }

    fn check(&self, secret: &str, account: &str, code: &str, time: u64) -> Result<bool, GateError> {
        let bytes = Secret::Encoded(secret.to_string())
            .to_bytes()
            .map_err(|e| anyhow::anyhow!("Stored two-factor secret is unreadable: {:?}", e))?;
        let totp = self.totp(bytes, account)?;
        Ok(totp.check(code.trim(), time))
    }

    fn totp(&self, secret: Vec<u8>, account: &str) -> Result<TOTP, GateError> {
        TOTP::new(
            Algorithm::SHA1,
            CODE_DIGITS,
            SKEW_STEPS,
            STEP_SECONDS,
            secret,
            Some(self.issuer.clone()),
            account.to_string(),
        )
        .map_err(|e| GateError::from(anyhow::anyhow!("TOTP init error: {}", e)))
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
