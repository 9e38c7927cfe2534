//! Runtime execution layer
//!
//! Node processors, the deterministic flow scheduler, the agent invocation
//! boundary, and execution record management.

// Agent invocation boundary (the engine's only I/O)
pub mod invoker;

// Per-kind node execution handlers
pub mod processor;

// Execution record lifecycle and cancellation
pub mod records;

// Deterministic graph traversal
pub mod scheduler;

// Re-export main types
pub use invoker::{AgentInvoker, HttpAgentInvoker};
pub use processor::NodeProcessor;
pub use records::{CancelHandle, ExecutionRecords};
pub use scheduler::FlowScheduler;
