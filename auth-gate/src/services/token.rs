use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::config::{validate_signing_key, JwtConfig};
use crate::services::error::GateError;

/// Issues and validates HS256 bearer tokens bound to an identity id.
#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl_minutes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (identity id)
    pub sub: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
}

/// Token returned to clients after a successful login.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedToken {
    pub token: String,
    pub token_type: &'static str,
    pub expires_at: DateTime<Utc>,
}

impl TokenService {
    /// Fails when the signing key is missing or too short; callers treat this as fatal.
    pub fn new(config: &JwtConfig) -> Result<Self, anyhow::Error> {
        validate_signing_key(&config.secret).map_err(|e| anyhow::anyhow!("{}", e))?;
        if config.ttl_minutes <= 0 {
            anyhow::bail!("Token lifetime must be positive");
        }

        let key = config.secret.expose_secret().as_bytes();

        tracing::info!(ttl_minutes = config.ttl_minutes, "Token service initialized with HS256");

        Ok(Self {
            encoding_key: EncodingKey::from_secret(key),
            decoding_key: DecodingKey::from_secret(key),
            ttl_minutes: config.ttl_minutes,
        })
    }

    pub fn ttl(&self) -> Duration {
        Duration::minutes(self.ttl_minutes)
    }

    pub fn issue(&self, identity_id: Ulid) -> Result<IssuedToken, GateError> {
        self.issue_at(identity_id, Utc::now())
    }

    pub fn issue_at(&self, identity_id: Ulid, now: DateTime<Utc>) -> Result<IssuedToken, GateError> {
        let expires_at = now + self.ttl();
        let claims = Claims {
            sub: identity_id.to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| anyhow::anyhow!("Failed to encode token: {}", e))?;

        Ok(IssuedToken {
            token,
            token_type: "Bearer",
            expires_at,
        })
    }

    pub fn validate(&self, token: &str) -> Result<Ulid, GateError> {
        self.validate_at(token, Utc::now())
    }

    /// Returns the subject id, or `TokenExpired` once `now` reaches the expiry claim.
    pub fn validate_at(&self, token: &str, now: DateTime<Utc>) -> Result<Ulid, GateError> {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is compared against the caller's clock below.
        validation.validate_exp = false;
        validation.leeway = 0;

        let data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(|e| {
            tracing::debug!(error = %e, "Token rejected");
            GateError::TokenMalformed
        })?;

        if now.timestamp() >= data.claims.exp {
            return Err(GateError::TokenExpired);
        }

        data.claims
            .sub
            .parse::<Ulid>()
            .map_err(|_| GateError::TokenMalformed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn config(secret: &str) -> JwtConfig {
        JwtConfig {
            secret: SecretString::new(secret.to_string()),
            ttl_minutes: 60,
        }
    }

    fn service() -> TokenService {
        TokenService::new(&config("test-signing-key-that-is-long-enough!!")).unwrap()
    }

    #[test]
    fn test_short_key_refuses_to_start() {
        assert!(TokenService::new(&config("short")).is_err());
    }

    #[test]
    fn test_round_trip_before_expiry() {
        let service = service();
        let id = Ulid::new();
        let now = Utc::now();
        let issued = service.issue_at(id, now).unwrap();

        assert_eq!(service.validate_at(&issued.token, now).unwrap(), id);
        let just_before = issued.expires_at - Duration::seconds(1);
        assert_eq!(service.validate_at(&issued.token, just_before).unwrap(), id);
    }

    #[test]
    fn test_expired_at_and_after_expiry() {
        let service = service();
        let now = Utc::now();
        let issued = service.issue_at(Ulid::new(), now).unwrap();

        assert!(matches!(
            service.validate_at(&issued.token, issued.expires_at),
            Err(GateError::TokenExpired)
        ));
        assert!(matches!(
            service.validate_at(&issued.token, issued.expires_at + Duration::hours(1)),
            Err(GateError::TokenExpired)
        ));
    }

    #[test]
    fn test_garbage_and_foreign_signatures_are_malformed() {
        let service = service();
        assert!(matches!(
            service.validate("not-a-token"),
            Err(GateError::TokenMalformed)
        ));

        let other = TokenService::new(&config("another-signing-key-also-long-enough")).unwrap();
        let issued = other.issue(Ulid::new()).unwrap();
        assert!(matches!(
            service.validate(&issued.token),
            Err(GateError::TokenMalformed)
        ));
    }

    #[test]
    fn test_non_ulid_subject_is_malformed() {
        let service = service();
        let claims = Claims {
            sub: "user_123".to_string(),
            iat: Utc::now().timestamp(),
            exp: (Utc::now() + Duration::minutes(5)).timestamp(),
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"test-signing-key-that-is-long-enough!!"),
        )
        .unwrap();

        assert!(matches!(
            service.validate(&token),
            Err(GateError::TokenMalformed)
        ));
    }
}
