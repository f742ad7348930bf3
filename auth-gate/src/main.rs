use auth_gate::{
    build_router,
    config::GateConfig,
    db::{IdentityStore, MemoryStore},
    services::{seed::seed_defaults, LogEmailProvider},
    AppState,
};
use service_core::error::AppError;
use service_core::observability::logging::init_tracing;
use std::{net::SocketAddr, sync::Arc};
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Missing or short signing key aborts here, before anything listens.
    let config = GateConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting auth gate"
    );

    let store: Arc<dyn IdentityStore> = Arc::new(MemoryStore::new());
    let addr = config.common.socket_addr();
    let seed = config.seed.clone();

    let state = AppState::new(config, store.clone(), Arc::new(LogEmailProvider))?;

    if seed.enabled {
        seed_defaults(store.as_ref(), &state.authz, &seed)
            .await
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("Seeding failed: {}", e)))?;
    }

    let service_span = tracing::info_span!(
        "service",
        service = %state.config.service_name,
        version = %state.config.service_version,
    );
    let _guard = service_span.enter();

    let app = build_router(state);

    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    service_core::axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
