//! Flow management layer
//!
//! Flow definitions, structural validation, SQLite persistence, and the
//! lock-free hot-reload registry using ArcSwap.

// Core flow type definitions
pub mod types;

// Structural validation for flow and chain definitions
pub mod validate;

// SQLite persistence layer for definitions and execution records
pub mod storage;

// Hot-reload registry using ArcSwap for zero-downtime updates
pub mod registry;

// Re-export commonly used types
pub use registry::{CompiledFlow, FlowRegistry};
pub use types::{Edge, Flow, Node, NodeKind};
