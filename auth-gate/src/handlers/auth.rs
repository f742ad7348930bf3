use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};

use crate::{
    dtos::{
        auth::{
            EmailRequest, LoginRequest, LoginResponse, RegisterRequest, RegisterResponse,
            ResetPasswordRequest, VerifyEmailRequest,
        },
        MessageResponse,
    },
    services::GateError,
    utils::{Password, ValidatedJson},
    AppState,
};

pub async fn register(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RegisterRequest>,
) -> Result<impl IntoResponse, GateError> {
    let identity = state
        .accounts
        .register(&req.name, &req.email, Password::new(req.password))
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            id: identity.id.to_string(),
            name: identity.name,
            email: identity.email,
            message: "Registration successful. Check your email for the verification code."
                .to_string(),
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<Json<LoginResponse>, GateError> {
    let issued = state
        .accounts
        .login(
            &req.email,
            Password::new(req.password),
            req.two_fa_code.as_deref(),
        )
        .await?;

    Ok(Json(issued.into()))
}

pub async fn verify_email(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<VerifyEmailRequest>,
) -> Result<Json<MessageResponse>, GateError> {
    state.accounts.verify_email(&req.email, &req.code).await?;
    Ok(Json(MessageResponse::new("Email verified successfully")))
}

pub async fn resend_verification(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<EmailRequest>,
) -> Result<Json<MessageResponse>, GateError> {
    state.accounts.resend_verification_code(&req.email).await?;
    Ok(Json(MessageResponse::new("Verification code sent")))
}

pub async fn forgot_password(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<EmailRequest>,
) -> Result<Json<MessageResponse>, GateError> {
    state.accounts.forgot_password(&req.email).await?;
    Ok(Json(MessageResponse::new("Password reset code sent")))
}

pub async fn resend_reset_code(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<EmailRequest>,
) -> Result<Json<MessageResponse>, GateError> {
    state.accounts.resend_reset_code(&req.email).await?;
    Ok(Json(MessageResponse::new("Password reset code sent")))
}

pub async fn reset_password(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, GateError> {
    state
        .accounts
        .reset_password(&req.email, &req.code, Password::new(req.new_password))
        .await?;
    Ok(Json(MessageResponse::new("Password has been reset")))
}
