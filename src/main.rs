//! Agentway server entry point
//!
//! Initializes configuration and starts the HTTP server providing:
//! - Flow management and execution at /agent-apps/*
//! - Chain management and execution at /agent-chains/*
//! - Chain run polling at /chain-executions/{id}
//! - Health check at /healthz

use agentway::{config::Config, server::start_server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::default();
    start_server(config).await?;
    Ok(())
}
