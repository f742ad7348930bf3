use async_trait::async_trait;
use service_core::error::AppError;

/// Outbound delivery of account codes.
#[async_trait]
pub trait EmailProvider: Send + Sync {
    async fn send_verification_code(&self, to_email: &str, code: &str) -> Result<(), AppError>;

    async fn send_password_reset_code(&self, to_email: &str, code: &str) -> Result<(), AppError>;
}

/// Provider that records deliveries in the log instead of sending mail.
#[derive(Debug, Clone, Default)]
pub struct LogEmailProvider;

#[async_trait]
impl EmailProvider for LogEmailProvider {
    async fn send_verification_code(&self, to_email: &str, code: &str) -> Result<(), AppError> {
        tracing::info!(to = %to_email, "Verification email queued");
        tracing::debug!(to = %to_email, code = %code, "Verification code");
        Ok(())
    }

    async fn send_password_reset_code(&self, to_email: &str, code: &str) -> Result<(), AppError> {
        tracing::info!(to = %to_email, "Password reset email queued");
        tracing::debug!(to = %to_email, code = %code, "Password reset code");
        Ok(())
    }
}
