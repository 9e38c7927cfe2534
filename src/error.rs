//! Error taxonomy for the flow and chain engines
//!
//! Structural errors (`Validation`) are raised at create/update time and never
//! produce an execution record. Everything else is a runtime error captured
//! into the record's `error` field with status "failed".

use thiserror::Error;

/// Errors produced by the engine core.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Malformed flow or chain definition (bad edge reference, missing
    /// Input/Output node, empty step list, ...)
    #[error("validation error: {0}")]
    Validation(String),

    /// The external agent invoker failed. Aborts a flow run; in a chain run
    /// it counts against the step's retry budget.
    #[error("agent invocation failed for '{agent_ref}': {message}")]
    AgentInvocation { agent_ref: String, message: String },

    /// A chain step exceeded its timeout_ms deadline.
    #[error("step '{step_id}' timed out after {timeout_ms}ms")]
    Timeout { step_id: String, timeout_ms: u64 },

    /// A condition expression failed to evaluate. Swallowed to `false` by the
    /// condition paths; only surfaced where the caller wants diagnostics.
    #[error("condition evaluation failed: {0}")]
    ConditionEvaluation(String),

    /// A transform expression failed to evaluate. Swallowed to an
    /// `{"error": ..}` result by the transform processor.
    #[error("transform evaluation failed: {0}")]
    TransformEvaluation(String),

    /// The run was cancelled between node/step boundaries.
    #[error("execution cancelled")]
    Cancelled,

    /// A referenced definition or execution record does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    /// Short machine-readable kind, stored alongside the message in
    /// execution records.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation",
            EngineError::AgentInvocation { .. } => "agent_invocation",
            EngineError::Timeout { .. } => "timeout",
            EngineError::ConditionEvaluation(_) => "condition_evaluation",
            EngineError::TransformEvaluation(_) => "transform_evaluation",
            EngineError::Cancelled => "cancelled",
            EngineError::NotFound { .. } => "not_found",
            EngineError::Storage(_) => "storage",
            EngineError::Serialization(_) => "serialization",
        }
    }
}
