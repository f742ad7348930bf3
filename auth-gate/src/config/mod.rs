use secrecy::{ExposeSecret, SecretString};
use service_core::config as core_config;
use service_core::error::AppError;
use service_core::middleware::rate_limit::BucketConfig;
use std::env;

/// Minimum signing key length for HS256, in bytes.
pub const MIN_SIGNING_KEY_BYTES: usize = 32;

#[derive(Debug, Clone)]
pub struct GateConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub jwt: JwtConfig,
    pub two_factor: TwoFactorConfig,
    pub rate_limit: RateLimitConfig,
    pub security: SecurityConfig,
    pub seed: SeedConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: SecretString,
    pub ttl_minutes: i64,
}

#[derive(Debug, Clone)]
pub struct TwoFactorConfig {
    pub issuer: String,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub ip_per_second: u32,
    pub ip_burst: u32,
    pub identity_per_second: u32,
    pub identity_burst: u32,
    pub trust_forwarded_for: bool,
}

impl RateLimitConfig {
    pub fn ip_bucket(&self) -> Result<BucketConfig, AppError> {
        BucketConfig::new(self.ip_per_second, self.ip_burst)
    }

    pub fn identity_bucket(&self) -> Result<BucketConfig, AppError> {
        BucketConfig::new(self.identity_per_second, self.identity_burst)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            ip_per_second: 5,
            ip_burst: 10,
            identity_per_second: 10,
            identity_burst: 15,
            trust_forwarded_for: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SeedConfig {
    pub enabled: bool,
    pub admin_email: Option<String>,
    pub admin_password: Option<SecretString>,
}

impl GateConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let config = GateConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("auth-gate"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|v| !v.is_empty()),
            jwt: JwtConfig {
                // No default in any environment: the service must not start without a key.
                secret: SecretString::new(get_env("JWT_SECRET", None, is_prod)?),
                ttl_minutes: parse_env("JWT_TTL_MINUTES", "1440", is_prod)?,
            },
            two_factor: TwoFactorConfig {
                issuer: get_env("TWO_FACTOR_ISSUER", Some("AuthGate"), is_prod)?,
            },
            rate_limit: RateLimitConfig {
                ip_per_second: parse_env("RATE_LIMIT_IP_PER_SECOND", "5", is_prod)?,
                ip_burst: parse_env("RATE_LIMIT_IP_BURST", "10", is_prod)?,
                identity_per_second: parse_env("RATE_LIMIT_IDENTITY_PER_SECOND", "10", is_prod)?,
                identity_burst: parse_env("RATE_LIMIT_IDENTITY_BURST", "15", is_prod)?,
                trust_forwarded_for: parse_env("TRUST_FORWARDED_FOR", "false", is_prod)?,
            },
            security: SecurityConfig {
                allowed_origins: get_env("ALLOWED_ORIGINS", Some("http://localhost:3000"), is_prod)?
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            },
            seed: SeedConfig {
                enabled: parse_env("SEED_DEFAULTS", if is_prod { "false" } else { "true" }, false)?,
                admin_email: env::var("SEED_ADMIN_EMAIL").ok(),
                admin_password: env::var("SEED_ADMIN_PASSWORD").ok().map(SecretString::new),
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        validate_signing_key(&self.jwt.secret)?;

        if self.jwt.ttl_minutes <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_TTL_MINUTES must be positive"
            )));
        }

        self.rate_limit.ip_bucket()?;
        self.rate_limit.identity_bucket()?;

        if self.environment == Environment::Prod
            && self.security.allowed_origins.iter().any(|o| o == "*")
        {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "Wildcard CORS origin not allowed in production"
            )));
        }

        Ok(())
    }
}

pub fn validate_signing_key(secret: &SecretString) -> Result<(), AppError> {
    let len = secret.expose_secret().len();
    if len < MIN_SIGNING_KEY_BYTES {
        return Err(AppError::ConfigError(anyhow::anyhow!(
            "JWT_SECRET must be at least {} bytes (got {})",
            MIN_SIGNING_KEY_BYTES,
            len
        )));
    }
    Ok(())
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: &str, is_prod: bool) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), is_prod)?
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{}: {}", key, e)))
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_parse() {
        assert_eq!("PROD".parse::<Environment>(), Ok(Environment::Prod));
        assert_eq!("dev".parse::<Environment>(), Ok(Environment::Dev));
        assert!("staging".parse::<Environment>().is_err());
    }

    #[test]
    fn test_short_signing_key_is_rejected() {
        let short = SecretString::new("too-short".to_string());
        assert!(validate_signing_key(&short).is_err());

        let ok = SecretString::new("0123456789abcdef0123456789abcdef".to_string());
        assert!(validate_signing_key(&ok).is_ok());
    }

    #[test]
    fn test_default_rate_limits_match_documented_values() {
        let limits = RateLimitConfig::default();
        let ip = limits.ip_bucket().unwrap();
        let identity = limits.identity_bucket().unwrap();
        assert_eq!((ip.per_second(), ip.burst()), (5, 10));
        assert_eq!((identity.per_second(), identity.burst()), (10, 15));
    }
}
