//! Per-request gate: throttling, bearer authentication, identity resolution
//! and route-level authorization, run as one ordered pipeline.
//!
//! [`RequestPipeline`] knows nothing about HTTP beyond the raw header value;
//! the axum functions at the bottom adapt it to middleware.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::Response,
};
use governor::clock::{Clock, DefaultClock};
use service_core::error::AppError;
use service_core::middleware::rate_limit::client_ip;
use std::{net::IpAddr, sync::Arc};

use crate::models::ResolvedIdentity;
use crate::services::{AuthorizationEngine, GateError, RateLimiter, Scope, TokenService};

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateStage {
    IpRateLimit,
    Credentials,
    Token,
    Identity,
    IdentityRateLimit,
    Authorization,
}

impl GateStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateStage::IpRateLimit => "ip_rate_limit",
            GateStage::Credentials => "credentials",
            GateStage::Token => "token",
            GateStage::Identity => "identity",
            GateStage::IdentityRateLimit => "identity_rate_limit",
            GateStage::Authorization => "authorization",
        }
    }
}

/// What a route demands of the caller beyond a valid token.
///
/// Passes when the caller holds any listed role or any listed permission.
/// An empty requirement only demands authentication.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Requirement {
    roles: Vec<String>,
    permissions: Vec<String>,
}

impl Requirement {
    pub fn authenticated() -> Self {
        Self::default()
    }

    pub fn any_role<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::default().or_roles(roles)
    }

    pub fn any_permission<I, S>(permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::default().or_permissions(permissions)
    }

    pub fn or_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles.extend(roles.into_iter().map(Into::into));
        self
    }

    pub fn or_permissions<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions.extend(permissions.into_iter().map(Into::into));
        self
    }

    pub fn is_open(&self) -> bool {
        self.roles.is_empty() && self.permissions.is_empty()
    }

    pub fn is_satisfied_by(&self, identity: &ResolvedIdentity) -> bool {
        self.is_open()
            || AuthorizationEngine::authorize_any_role(identity, self.roles.as_slice())
            || AuthorizationEngine::authorize_any_permission(identity, self.permissions.as_slice())
    }
}

/// The authenticated caller, attached to the request once the gate passes.
#[derive(Debug, Clone)]
pub struct CurrentIdentity(pub Arc<ResolvedIdentity>);

impl std::ops::Deref for CurrentIdentity {
    type Target = ResolvedIdentity;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for CurrentIdentity
where
    S: Send + Sync,
{
    type Rejection = GateError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<CurrentIdentity>().cloned().ok_or_else(|| {
            GateError::App(AppError::InternalError(anyhow::anyhow!(
                "Identity missing from request extensions"
            )))
        })
    }
}

pub struct RequestPipeline<C: Clock = DefaultClock> {
    tokens: TokenService,
    authz: AuthorizationEngine,
    limiter: RateLimiter<C>,
}

impl<C: Clock> RequestPipeline<C> {
    pub fn new(tokens: TokenService, authz: AuthorizationEngine, limiter: RateLimiter<C>) -> Self {
        Self {
            tokens,
            authz,
            limiter,
        }
    }

    pub fn limiter(&self) -> &RateLimiter<C> {
        &self.limiter
    }

    /// Every stage in order, stopping at the first rejection.
    pub async fn evaluate(
        &self,
        ip: Option<IpAddr>,
        authorization: Option<&str>,
        requirement: &Requirement,
    ) -> Result<CurrentIdentity, GateError> {
        self.check_ip(ip)?;
        self.authenticate(authorization, requirement).await
    }

    pub fn check_ip(&self, ip: Option<IpAddr>) -> Result<(), GateError> {
        let key = ip.map(|ip| ip.to_string());
        let key = key.as_deref().unwrap_or("unknown");
        self.limiter
            .check(Scope::Ip, key)
            .map_err(|e| rejected(GateStage::IpRateLimit, e))
    }

    /// Stages after the IP check: credentials through authorization.
    pub async fn authenticate(
        &self,
        authorization: Option<&str>,
        requirement: &Requirement,
    ) -> Result<CurrentIdentity, GateError> {
        let token = bearer_token(authorization).ok_or_else(|| {
            rejected(
                GateStage::Credentials,
                GateError::Unauthenticated("Missing or invalid Authorization header".to_string()),
            )
        })?;

        let subject = self
            .tokens
            .validate(token)
            .map_err(|e| rejected(GateStage::Token, e.into_unauthenticated()))?;

        let identity = self
            .authz
            .load_identity(subject)
            .await
            .map_err(|e| rejected(GateStage::Identity, e.into_unauthenticated()))?;

        self.limiter
            .check(Scope::Identity, &identity.id().to_string())
            .map_err(|e| rejected(GateStage::IdentityRateLimit, e))?;

        if !requirement.is_satisfied_by(&identity) {
            return Err(rejected(
                GateStage::Authorization,
                GateError::Forbidden("Insufficient role or permission".to_string()),
            ));
        }

        Ok(CurrentIdentity(Arc::new(identity)))
    }
}

fn rejected(stage: GateStage, err: GateError) -> GateError {
    tracing::warn!(stage = stage.as_str(), kind = err.kind(), "Request rejected");
    err
}

/// `Bearer <token>`, with exactly one non-empty token after the scheme.
fn bearer_token(header_value: Option<&str>) -> Option<&str> {
    let mut parts = header_value?.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("Bearer"), Some(token), None) if !token.is_empty() => Some(token),
        _ => None,
    }
}

/// State for [`ip_rate_limit`].
#[derive(Clone)]
pub struct IpGate {
    pub pipeline: Arc<RequestPipeline>,
    pub trust_forwarded_for: bool,
}

/// Outermost layer: throttles every request by remote address.
pub async fn ip_rate_limit(
    State(gate): State<IpGate>,
    request: Request,
    next: Next,
) -> Result<Response, GateError> {
    let ip = client_ip(&request, gate.trust_forwarded_for);
    gate.pipeline.check_ip(ip)?;
    Ok(next.run(request).await)
}

/// State for [`require`]: the pipeline plus the route's requirement.
#[derive(Clone)]
pub struct Guard {
    pipeline: Arc<RequestPipeline>,
    requirement: Arc<Requirement>,
}

impl Guard {
    pub fn new(pipeline: Arc<RequestPipeline>, requirement: Requirement) -> Self {
        Self {
            pipeline,
            requirement: Arc::new(requirement),
        }
    }
}

/// Authenticates and authorizes, then hands the request on with a [`CurrentIdentity`].
pub async fn require(
    State(guard): State<Guard>,
    mut request: Request,
    next: Next,
) -> Result<Response, GateError> {
    let authorization = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);

    let current = guard
        .pipeline
        .authenticate(authorization.as_deref(), &guard.requirement)
        .await?;

    tracing::debug!(identity_id = %current.id(), "Request authenticated");
    request.extensions_mut().insert(current);

    Ok(next.run(request).await)
}
