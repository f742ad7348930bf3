#![allow(dead_code)]

use auth_gate::{
    build_router,
    config::{
        Environment, GateConfig, JwtConfig, RateLimitConfig, SecurityConfig, SeedConfig,
        TwoFactorConfig,
    },
    db::{IdentityStore, MemoryStore},
    services::{seed::seed_defaults, LogEmailProvider},
    AppState,
};
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use secrecy::SecretString;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::util::ServiceExt;
use ulid::Ulid;

pub const PASSWORD: &str = "password123";

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<MemoryStore>,
}

pub fn test_config(rate_limit: RateLimitConfig) -> GateConfig {
    GateConfig {
        common: service_core::config::Config::default(),
        environment: Environment::Dev,
        service_name: "auth-gate-test".to_string(),
        service_version: "test".to_string(),
        log_level: "error".to_string(),
        otlp_endpoint: None,
        jwt: JwtConfig {
            secret: SecretString::new("integration-test-signing-key-0123456789".to_string()),
            ttl_minutes: 60,
        },
        two_factor: TwoFactorConfig {
            issuer: "AuthGate".to_string(),
        },
        rate_limit,
        security: SecurityConfig {
            allowed_origins: vec!["http://localhost:3000".to_string()],
        },
        seed: SeedConfig::default(),
    }
}

/// Limits high enough that multi-step flows never trip them.
pub fn relaxed_limits() -> RateLimitConfig {
    RateLimitConfig {
        ip_per_second: 1000,
        ip_burst: 1000,
        identity_per_second: 1000,
        identity_burst: 1000,
        trust_forwarded_for: false,
    }
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with(relaxed_limits()).await
}

pub async fn spawn_app_with(rate_limit: RateLimitConfig) -> TestApp {
    let store = Arc::new(MemoryStore::new());
    let state = AppState::new(
        test_config(rate_limit),
        store.clone(),
        Arc::new(LogEmailProvider),
    )
    .expect("Failed to build app state");

    seed_defaults(store.as_ref(), &state.authz, &SeedConfig::default())
        .await
        .expect("Failed to seed defaults");

    TestApp {
        router: build_router(state.clone()),
        state,
        store,
    }
}

impl TestApp {
    pub async fn send(
        &self,
        method: &str,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .unwrap();

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    pub async fn post(&self, uri: &str, body: Value, token: Option<&str>) -> (StatusCode, Value) {
        self.send("POST", uri, Some(body), token).await
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        self.send("GET", uri, None, token).await
    }

    /// Registers and verifies an identity through the public endpoints.
    pub async fn verified_identity(&self, email: &str) -> Ulid {
        let (status, body) = self
            .post(
                "/api/register",
                json!({ "name": "Test User", "email": email, "password": PASSWORD }),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        let id: Ulid = body["id"].as_str().unwrap().parse().unwrap();

        let code = self
            .store
            .find_identity_by_id(id)
            .await
            .unwrap()
            .verification_code
            .unwrap();
        let (status, _) = self
            .post(
                "/api/verify-email",
                json!({ "email": email, "code": code }),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        id
    }

    pub async fn login(&self, email: &str) -> String {
        let (status, body) = self
            .post(
                "/api/login",
                json!({ "email": email, "password": PASSWORD }),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        body["token"].as_str().unwrap().to_string()
    }

    /// Verified identity holding the seeded `admin` role, plus its token.
    pub async fn admin(&self) -> (Ulid, String) {
        let id = self.verified_identity("admin@example.com").await;
        self.state.authz.assign_role(id, "admin").await.unwrap();
        (id, self.login("admin@example.com").await)
    }
}
