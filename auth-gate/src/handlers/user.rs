use axum::Json;

use crate::{dtos::auth::MeResponse, middleware::CurrentIdentity};

/// Profile of the caller, as resolved by the gate for this request.
pub async fn me(current: CurrentIdentity) -> Json<MeResponse> {
    Json(MeResponse::from(&*current))
}
