//! Self-service account flows: registration, email verification, password
//! reset and login.

use chrono::{Duration, Utc};
use rand::Rng;
use std::sync::Arc;

use crate::db::{IdentityStore, StoreError};
use crate::models::Identity;
use crate::services::email::EmailProvider;
use crate::services::error::GateError;
use crate::services::token::{IssuedToken, TokenService};
use crate::services::two_factor::TwoFactorService;
use crate::utils::{hash_password, verify_password, Password};

pub const RESET_CODE_TTL_MINUTES: i64 = 15;
/// Wrong guesses tolerated before a verification or reset code is discarded.
pub const MAX_CODE_ATTEMPTS: u32 = 5;

#[derive(Clone)]
pub struct AccountService {
    store: Arc<dyn IdentityStore>,
    tokens: TokenService,
    two_factor: TwoFactorService,
    email: Arc<dyn EmailProvider>,
}

impl AccountService {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        tokens: TokenService,
        two_factor: TwoFactorService,
        email: Arc<dyn EmailProvider>,
    ) -> Self {
        Self {
            store,
            tokens,
            two_factor,
            email,
        }
    }

    #[tracing::instrument(skip(self, name, password))]
    pub async fn register(
        &self,
        name: &str,
        email: &str,
        password: Password,
    ) -> Result<Identity, GateError> {
        let email = normalize_email(email);
        let hash = hash_password(&password)?;

        let mut identity = Identity::new(name.trim().to_string(), email, hash.into_string());
        let code = generate_code();
        identity.verification_code = Some(code.clone());

        self.store
            .insert_identity(&identity)
            .await
            .map_err(|e| match e {
                StoreError::Conflict(_) => GateError::EmailAlreadyRegistered,
                other => other.into(),
            })?;

        tracing::info!(identity_id = %identity.id, "Identity registered");
        self.deliver_verification(&identity.email, code);

        Ok(identity)
    }

    #[tracing::instrument(skip(self, code))]
    pub async fn verify_email(&self, email: &str, code: &str) -> Result<(), GateError> {
        let id = self.find_by_email(email).await?.id;
        let code = code.trim();

        self.store
            .update_identity(
                id,
                Box::new(move |identity: &mut Identity| {
                    if identity.is_verified {
                        return Err(GateError::EmailAlreadyVerified);
                    }
                    if identity.verification_code.as_deref() != Some(code) {
                        identity.verification_attempts += 1;
                        if identity.verification_attempts >= MAX_CODE_ATTEMPTS {
                            tracing::warn!(identity_id = %identity.id, "Verification code burned after repeated failures");
                            identity.verification_code = None;
                            identity.verification_attempts = 0;
                        }
                        identity.touch();
                        return Err(GateError::InvalidVerificationCode);
                    }

                    identity.is_verified = true;
                    identity.verification_code = None;
                    identity.verification_attempts = 0;
                    identity.touch();
                    Ok(())
                }),
            )
            .await?;

        tracing::info!(identity_id = %id, "Email verified");
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub async fn resend_verification_code(&self, email: &str) -> Result<(), GateError> {
        let id = self.find_by_email(email).await?.id;
        let code = generate_code();

        let issued = code.clone();
        let identity = self
            .store
            .update_identity(
                id,
                Box::new(move |identity: &mut Identity| {
                    if identity.is_verified {
                        return Err(GateError::EmailAlreadyVerified);
                    }
                    identity.verification_code = Some(issued);
                    identity.verification_attempts = 0;
                    identity.touch();
                    Ok(())
                }),
            )
            .await?;

        self.deliver_verification(&identity.email, code);
        Ok(())
    }

    /// Issues a fresh reset code, replacing any earlier one.
    #[tracing::instrument(skip(self))]
    pub async fn forgot_password(&self, email: &str) -> Result<(), GateError> {
        let id = self.find_by_email(email).await?.id;
        let code = generate_code();
        let expires = Utc::now() + Duration::minutes(RESET_CODE_TTL_MINUTES);

        let issued = code.clone();
        let identity = self
            .store
            .update_identity(
                id,
                Box::new(move |identity: &mut Identity| {
                    identity.reset_code = Some(issued);
                    identity.reset_code_expires_utc = Some(expires);
                    identity.reset_attempts = 0;
                    identity.touch();
                    Ok(())
                }),
            )
            .await?;

        let provider = Arc::clone(&self.email);
        let to = identity.email;
        tokio::spawn(async move {
            if let Err(e) = provider.send_password_reset_code(&to, &code).await {
                tracing::error!(error = %e, to = %to, "Failed to send password reset email");
            }
        });

        Ok(())
    }

    pub async fn resend_reset_code(&self, email: &str) -> Result<(), GateError> {
        self.forgot_password(email).await
    }

    #[tracing::instrument(skip(self, code, new_password))]
    pub async fn reset_password(
        &self,
        email: &str,
        code: &str,
        new_password: Password,
    ) -> Result<(), GateError> {
        let code = code.trim();
        let snapshot = self.find_by_email(email).await?;

        // Hashing is slow, so only pay for it once the code looks right. The
        // check is repeated under the update in case the code changed meanwhile.
        let hash = if check_reset_code(&snapshot, code).is_ok() {
            Some(hash_password(&new_password)?.into_string())
        } else {
            None
        };

        self.store
            .update_identity(
                snapshot.id,
                Box::new(move |identity: &mut Identity| {
                    if let Err(e) = check_reset_code(identity, code) {
                        if matches!(e, GateError::InvalidResetCode) && identity.reset_code.is_some() {
                            identity.reset_attempts += 1;
                            if identity.reset_attempts >= MAX_CODE_ATTEMPTS {
                                tracing::warn!(identity_id = %identity.id, "Reset code burned after repeated failures");
                                identity.reset_code = None;
                                identity.reset_code_expires_utc = None;
                                identity.reset_attempts = 0;
                            }
                            identity.touch();
                        }
                        return Err(e);
                    }
                    let hash = hash.ok_or(GateError::InvalidResetCode)?;

                    identity.password_hash = hash;
                    identity.reset_code = None;
                    identity.reset_code_expires_utc = None;
                    identity.reset_attempts = 0;
                    identity.touch();
                    Ok(())
                }),
            )
            .await?;

        tracing::info!(identity_id = %snapshot.id, "Password reset");
        Ok(())
    }

    /// Credentials, then verification state, then the second factor, then a token.
    #[tracing::instrument(skip(self, password, two_factor_code))]
    pub async fn login(
        &self,
        email: &str,
        password: Password,
        two_factor_code: Option<&str>,
    ) -> Result<IssuedToken, GateError> {
        let identity = match self.store.find_identity_by_email(&normalize_email(email)).await {
            Ok(identity) => identity,
            Err(StoreError::NotFound(_)) => return Err(GateError::InvalidCredentials),
            Err(e) => return Err(e.into()),
        };

        if !verify_password(&password, &identity.password_hash) {
            tracing::warn!(identity_id = %identity.id, "Login rejected: bad password");
            return Err(GateError::InvalidCredentials);
        }

        if !identity.is_verified {
            return Err(GateError::EmailNotVerified);
        }

        self.two_factor.challenge(&identity, two_factor_code)?;

        let token = self.tokens.issue(identity.id)?;
        tracing::info!(identity_id = %identity.id, "Login succeeded");
        Ok(token)
    }

    async fn find_by_email(&self, email: &str) -> Result<Identity, GateError> {
        Ok(self
            .store
            .find_identity_by_email(&normalize_email(email))
            .await?)
    }

    fn deliver_verification(&self, to: &str, code: String) {
        let provider = Arc::clone(&self.email);
        let to = to.to_string();
        tokio::spawn(async move {
            if let Err(e) = provider.send_verification_code(&to, &code).await {
                tracing::error!(error = %e, to = %to, "Failed to send verification email");
            }
        });
    }
}

/// The code must match and still be inside its validity window.
fn check_reset_code(identity: &Identity, code: &str) -> Result<(), GateError> {
    if identity.reset_code.as_deref() != Some(code) {
        return Err(GateError::InvalidResetCode);
    }
    match identity.reset_code_expires_utc {
        Some(expires) if Utc::now() <= expires => Ok(()),
        _ => Err(GateError::ResetCodeExpired),
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Six random decimal digits, zero-padded.
fn generate_code() -> String {
    format!("{:06}", rand::thread_rng().gen_range(0..1_000_000))
}
