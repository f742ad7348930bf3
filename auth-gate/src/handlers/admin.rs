use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use service_core::error::AppError;
use ulid::Ulid;

use crate::{
    dtos::{
        admin::{
            AssignPermissionRequest, AssignRoleRequest, CreatePermissionRequest,
            CreateRoleRequest, NamedEntityResponse,
        },
        MessageResponse,
    },
    middleware::CurrentIdentity,
    services::GateError,
    utils::ValidatedJson,
    AppState,
};

pub async fn create_role(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<CreateRoleRequest>,
) -> Result<impl IntoResponse, GateError> {
    let role = state.authz.create_role(&req.name).await?;
    Ok((StatusCode::CREATED, Json(NamedEntityResponse::from(role))))
}

pub async fn create_permission(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<CreatePermissionRequest>,
) -> Result<impl IntoResponse, GateError> {
    let permission = state.authz.create_permission(&req.name).await?;
    Ok((StatusCode::CREATED, Json(NamedEntityResponse::from(permission))))
}

pub async fn assign_role(
    State(state): State<AppState>,
    current: CurrentIdentity,
    ValidatedJson(req): ValidatedJson<AssignRoleRequest>,
) -> Result<Json<MessageResponse>, GateError> {
    let identity_id: Ulid = req.identity_id.parse().map_err(|_| {
        GateError::App(AppError::BadRequest(anyhow::anyhow!(
            "Invalid identity id: {}",
            req.identity_id
        )))
    })?;

    state.authz.assign_role(identity_id, &req.role_name).await?;

    tracing::info!(
        admin_id = %current.id(),
        identity_id = %identity_id,
        role = %req.role_name,
        "Admin assigned role"
    );
    Ok(Json(MessageResponse::new("Role assigned successfully")))
}

pub async fn assign_permission(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<AssignPermissionRequest>,
) -> Result<Json<MessageResponse>, GateError> {
    state
        .authz
        .assign_permission(&req.role_name, &req.permission_name)
        .await?;
    Ok(Json(MessageResponse::new("Permission assigned successfully")))
}
