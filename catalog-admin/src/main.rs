use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{routing::get, Router};
use catalog_admin_api::lifecycle::{ShutdownSignal, TaskSupervisor};
use catalog_admin_api::observability::{init_logging, init_metrics, metrics_handler};
use catalog_admin_api::security::JwtSessionResolver;
use catalog_admin_api::SecurityState;
use tower_http::trace::TraceLayer;

mod config;

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::Config::load().context("Failed to load configuration")?;

    init_logging(&config.log)?;
    tracing::info!(
        environment = ?config.security.environment,
        "Starting catalog admin server"
    );

    init_metrics()?;

    let sessions = JwtSessionResolver::new(&config.jwt).context("Invalid JWT configuration")?;
    let state = SecurityState::new(config.security.clone(), Arc::new(sessions));

    let supervisor = TaskSupervisor::new();
    state.spawn_background_tasks(&supervisor);

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .nest("/api/v1", catalog_admin_api::routes(state))
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", config.host, config.port))?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let shutdown = ShutdownSignal::new();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.wait().await })
    .await?;

    tracing::info!("Server stopped, waiting for background tasks");
    supervisor
        .shutdown(Duration::from_secs(config.shutdown_timeout_secs))
        .await?;

    Ok(())
}

async fn health_check() -> &'static str {
    "OK"
}
