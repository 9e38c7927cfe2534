//! Server setup and initialization
//!
//! Wires together storage, registry, engines, and HTTP routes, and provides
//! the application factory used by both the binary and the tests.

use crate::{
    api::{chains, flows, AppState},
    chain::stepper::ChainStepper,
    config::Config,
    flow::{registry::FlowRegistry, storage::DefinitionStorage},
    runtime::{
        invoker::HttpAgentInvoker, processor::NodeProcessor, records::ExecutionRecords,
        scheduler::FlowScheduler,
    },
};
use anyhow::Result;
use axum::{routing::get, Router};
use std::sync::Arc;
use tokio::net::TcpListener;

/// Create the main Axum application with all routes.
pub async fn create_app(config: Config) -> Result<Router> {
    tracing::info!("opening definition storage in {}", config.storage.data_dir);
    let storage = DefinitionStorage::open(&config.storage.data_dir).await?;

    let registry = Arc::new(FlowRegistry::new(storage.clone()));
    registry.init_from_storage().await?;

    let invoker = Arc::new(HttpAgentInvoker::new(config.gateway.base_url.clone()));
    let processor = Arc::new(NodeProcessor::new(invoker.clone()));

    let state = AppState {
        storage: storage.clone(),
        registry,
        scheduler: Arc::new(FlowScheduler::new(processor)),
        stepper: Arc::new(ChainStepper::new(invoker)),
        records: Arc::new(ExecutionRecords::new(storage)),
    };

    let app = Router::new()
        .route("/healthz", get(health_check))
        .merge(flows::routes().with_state(state.clone()))
        .merge(chains::routes().with_state(state));

    Ok(app)
}

/// Start the HTTP server with the given configuration.
pub async fn start_server(config: Config) -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("starting agentway server");

    let app = create_app(config.clone()).await?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;
    tracing::info!("server listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

/// Health check endpoint handler
async fn health_check() -> &'static str {
    "ok"
}
