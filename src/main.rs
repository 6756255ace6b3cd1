//! Event ingestion pipeline entry point.

use anyhow::{Context, Result};
use axum::routing::{get, post};
use axum::Router;
use clap::Parser;
use databuddy_ingest::config::Config;
use databuddy_ingest::routes::{health, intake_batch, intake_single};
use databuddy_ingest::state::AppState;
use databuddy_ingest::tenant::{Tenant, TenantRegistry};
use std::net::SocketAddr;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::prelude::*;

#[derive(Parser, Debug)]
#[command(name = "databuddy-ingest")]
struct Cli {
    /// Path to the tenant registry SQLite database.
    #[arg(long, env = "TENANT_DB_PATH", default_value = "./tenants.db")]
    tenant_db_path: String,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "databuddy_ingest=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = Config::from_env().context("loading configuration")?;
    info!(port = config.port, broker_enabled = config.broker_enabled(), "starting ingestion pipeline");

    let tenants = TenantRegistry::open(&cli.tenant_db_path).context("opening tenant registry")?;
    seed_dev_tenant_if_absent(&tenants)?;

    let state = AppState::build(config.clone(), tenants).await.context("building application state")?;

    let app = Router::new()
        .route("/", post(intake_single))
        .route("/batch", post(intake_batch))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(databuddy_ingest::middleware::request_logging))
        .with_state(state.clone());

    spawn_buffer_flush_loop(state.clone(), config.buffer_interval);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await.context("binding listener")?;
    info!(%addr, "ingestion pipeline listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(state))
    .await
    .context("server error")?;

    Ok(())
}

/// A permissive default tenant so the pipeline is runnable standalone without
/// a pre-seeded registry (SPEC_FULL.md §4.K).
fn seed_dev_tenant_if_absent(tenants: &TenantRegistry) -> Result<()> {
    if tenants.resolve("dev")?.is_none() {
        tenants.upsert(&Tenant {
            client_id: "dev".to_string(),
            name: "Development".to_string(),
            active: true,
            allowed_origins: vec![],
        })?;
    }
    Ok(())
}

fn spawn_buffer_flush_loop(state: AppState, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            state.buffer.flush(state.store.as_ref()).await;
        }
    });
}

async fn shutdown_signal(state: AppState) {
    tokio::signal::ctrl_c().await.expect("failed to install ctrl-c handler");
    info!("shutdown signal received, draining fallback buffer");
    state.buffer.drain(state.store.as_ref()).await;
}
