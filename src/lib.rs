//! Agentway: hyperminimalist LLM agent workflow and chain execution engine
//!
//! Flows are directed graphs of typed nodes executed by a deterministic
//! depth-first scheduler; chains are linear agent pipelines with JSONPath
//! mappings, timeouts, and retries. Definitions hot-reload through a
//! lock-free ArcSwap registry and persist to SQLite.

// Core configuration and setup
pub mod config;

// Error taxonomy shared by both engines
pub mod error;

// Restricted expression evaluator for conditions, transforms, and edge gates
pub mod expr;

// Flow management layer - definitions, validation, storage, and registry
pub mod flow;

// Chain management layer - linear agent pipelines
pub mod chain;

// Runtime execution engine - node processors, scheduler, records
pub mod runtime;

// HTTP API layer - REST endpoints for definitions and execution
pub mod api;

// Server setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use chain::{Chain, ChainExecution, ChainStep};
pub use error::EngineError;
pub use flow::{Edge, Flow, Node, NodeKind};
pub use server::start_server;
