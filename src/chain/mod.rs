//! Chain management layer
//!
//! Linear agent pipelines: type definitions and the single-step advancement
//! engine with JSONPath mappings, timeouts, and retries.

// Core chain type definitions
pub mod types;

// Single-step chain advancement
pub mod stepper;

// Re-export commonly used types
pub use stepper::ChainStepper;
pub use types::{Chain, ChainExecution, ChainStep};
