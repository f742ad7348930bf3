use axum::{extract::State, Json};

use crate::{
    dtos::{
        auth::{TwoFactorSetupResponse, TwoFactorVerifyRequest},
        MessageResponse,
    },
    middleware::CurrentIdentity,
    services::GateError,
    utils::ValidatedJson,
    AppState,
};

pub async fn setup(
    State(state): State<AppState>,
    current: CurrentIdentity,
) -> Result<Json<TwoFactorSetupResponse>, GateError> {
    let setup = state.two_factor.setup(current.id()).await?;
    Ok(Json(setup.into()))
}

pub async fn verify(
    State(state): State<AppState>,
    current: CurrentIdentity,
    ValidatedJson(req): ValidatedJson<TwoFactorVerifyRequest>,
) -> Result<Json<MessageResponse>, GateError> {
    state.two_factor.verify(current.id(), &req.code).await?;
    Ok(Json(MessageResponse::new("Two-factor authentication enabled")))
}
