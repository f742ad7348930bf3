pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use service_core::axum::{
    extract::State,
    http::{header, HeaderValue, Method, Request},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Json, Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    security_headers::security_headers_middleware, tracing::request_id_middleware,
};
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::config::GateConfig;
use crate::db::IdentityStore;
use crate::middleware::{ip_rate_limit, require, Guard, IpGate, Requirement, RequestPipeline};
use crate::services::{
    seed::ADMIN_ROLE, AccountService, AuthorizationEngine, EmailProvider, RateLimiter,
    TokenService, TwoFactorService,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GateConfig>,
    pub store: Arc<dyn IdentityStore>,
    pub tokens: TokenService,
    pub authz: AuthorizationEngine,
    pub two_factor: TwoFactorService,
    pub accounts: AccountService,
    pub pipeline: Arc<RequestPipeline>,
}

impl AppState {
    /// Wires every service from config. Fails if the signing key or limits are invalid.
    pub fn new(
        config: GateConfig,
        store: Arc<dyn IdentityStore>,
        email: Arc<dyn EmailProvider>,
    ) -> Result<Self, AppError> {
        let tokens = TokenService::new(&config.jwt).map_err(AppError::ConfigError)?;
        let authz = AuthorizationEngine::new(store.clone());
        let two_factor = TwoFactorService::new(store.clone(), config.two_factor.issuer.clone());
        let accounts = AccountService::new(store.clone(), tokens.clone(), two_factor.clone(), email);
        let limiter = RateLimiter::new(&config.rate_limit)?;
        let pipeline = Arc::new(RequestPipeline::new(tokens.clone(), authz.clone(), limiter));

        Ok(Self {
            config: Arc::new(config),
            store,
            tokens,
            authz,
            two_factor,
            accounts,
            pipeline,
        })
    }

    fn guard(&self, requirement: Requirement) -> Guard {
        Guard::new(self.pipeline.clone(), requirement)
    }
}

pub fn build_router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/api/register", post(handlers::auth::register))
        .route("/api/login", post(handlers::auth::login))
        .route("/api/verify-email", post(handlers::auth::verify_email))
        .route(
            "/api/resend-verification",
            post(handlers::auth::resend_verification),
        )
        .route("/api/forgot-password", post(handlers::auth::forgot_password))
        .route(
            "/api/resend-reset-code",
            post(handlers::auth::resend_reset_code),
        )
        .route("/api/reset-password", post(handlers::auth::reset_password));

    let authenticated_routes = Router::new()
        .route("/api/me", get(handlers::user::me))
        .route("/api/2fa/setup", post(handlers::two_factor::setup))
        .route("/api/2fa/verify", post(handlers::two_factor::verify))
        .layer(from_fn_with_state(
            state.guard(Requirement::authenticated()),
            require,
        ));

    let admin_routes = Router::new()
        .route("/api/admin/roles", post(handlers::admin::create_role))
        .route(
            "/api/admin/permissions",
            post(handlers::admin::create_permission),
        )
        .route("/api/admin/assign-role", post(handlers::admin::assign_role))
        .route(
            "/api/admin/assign-permission",
            post(handlers::admin::assign_permission),
        )
        .layer(from_fn_with_state(
            state.guard(Requirement::any_role([ADMIN_ROLE])),
            require,
        ));

    let ip_gate = IpGate {
        pipeline: state.pipeline.clone(),
        trust_forwarded_for: state.config.rate_limit.trust_forwarded_for,
    };

    Router::new()
        .route("/health", get(health_check))
        .merge(public_routes)
        .merge(authenticated_routes)
        .merge(admin_routes)
        .with_state(state.clone())
        // Every request is throttled by address before anything else runs
        .layer(from_fn_with_state(ip_gate, ip_rate_limit))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                )
            }),
        )
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(cors_layer(&state.config.security.allowed_origins))
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins = if allowed_origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(allowed_origins.iter().filter_map(|o| {
            o.parse::<HeaderValue>()
                .map_err(|e| tracing::error!("Invalid CORS origin '{}': {}. Skipping.", o, e))
                .ok()
        }))
    };

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}

pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.store.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Identity store health check failed");
        AppError::ServiceUnavailable
    })?;

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "environment": format!("{:?}", state.config.environment),
        "checks": {
            "identity_store": "up"
        }
    })))
}
