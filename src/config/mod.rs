//! Configuration for the agentway engine
//!
//! Handles server binding, storage location, and the agent gateway endpoint.

use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Storage configuration
    pub storage: StorageConfig,
    /// Agent gateway configuration
    pub gateway: GatewayConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
}

/// SQLite storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding agentway.db (default: "data")
    pub data_dir: String,
}

/// External agent gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Base URL the HTTP invoker posts agent calls to
    pub base_url: String,
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for container deployment
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: std::env::var("AGENTWAY_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: std::env::var("AGENTWAY_PORT")
                    .unwrap_or_else(|_| "3004".to_string())
                    .parse()
                    .unwrap_or(3004),
            },
            storage: StorageConfig {
                data_dir: std::env::var("AGENTWAY_DATA_DIR")
                    .unwrap_or_else(|_| "data".to_string()),
            },
            gateway: GatewayConfig {
                base_url: std::env::var("AGENTWAY_GATEWAY_URL")
                    .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            },
        }
    }
}
