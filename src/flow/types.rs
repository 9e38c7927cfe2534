//! Core flow type definitions
//!
//! A Flow ("agent app") is a directed graph of heterogeneous nodes. These
//! types are serialized/deserialized from JSON for persistence and for the
//! HTTP API, so wire field names are camelCase.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// A complete flow definition containing nodes and their connections.
///
/// Flows are stored as JSON in SQLite and compiled into an indexed form for
/// execution. Cyclic graphs are accepted: termination is guaranteed by the
/// scheduler's execute-once-per-node memoization, not by validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flow {
    /// Unique flow identifier; generated server-side when a create request
    /// omits it
    #[serde(default)]
    pub id: String,
    /// Human-readable flow name
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Nodes of the graph
    pub nodes: Vec<Node>,
    /// Directed edges connecting nodes
    pub edges: Vec<Edge>,
    /// Free-form flow configuration, e.g. {"joinStrategy": "wait-all"}
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub is_public: bool,
}

/// Fan-in semantics for a flow run.
///
/// `FirstArrival` replicates the engine's historical behavior: a node with
/// multiple incoming edges executes on the first predecessor path that
/// reaches it, later paths see it memoized and skip. `WaitAll` is the opt-in
/// join mode: a node is dispatched only after every predecessor has settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinStrategy {
    #[default]
    FirstArrival,
    WaitAll,
}

impl Flow {
    /// Read the join strategy out of the flow config. Anything other than an
    /// explicit "wait-all" keeps the compatible first-arrival behavior.
    pub fn join_strategy(&self) -> JoinStrategy {
        match self.config.get("joinStrategy").and_then(|v| v.as_str()) {
            Some("wait-all") => JoinStrategy::WaitAll,
            _ => JoinStrategy::FirstArrival,
        }
    }
}

/// A single node in the flow graph, typed by `kind`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Unique node identifier within the flow (e.g. "in", "summarize")
    pub id: String,
    /// The kind of node, which determines execution behavior
    pub kind: NodeKind,
    /// Canvas position, carried for UI round-trips and ignored by the engine
    #[serde(default)]
    pub position: Value,
    /// Kind-specific configuration:
    /// - input/output: {"keys": ["topic", ...]} projection (absent = pass-through)
    /// - agent: {"agentRef": "agent-id"}
    /// - condition: {"condition": "score > 5"}
    /// - transform: {"expression": "score * 2"} (optionally {"key": "scaled"})
    #[serde(default)]
    pub data: Value,
}

/// Available node kinds for the flow engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// Projects run input into the graph (entry data shaping)
    Input,
    /// Calls the external agent invoker (the only I/O in the engine)
    Agent,
    /// Evaluates a condition expression, result gates downstream edges
    Condition,
    /// Evaluates a transform expression over the run state
    Transform,
    /// Projects final state down to the declared output keys
    Output,
}

/// Directed connection between two nodes.
///
/// `gate` is an optional condition expression; when absent the edge is always
/// taken. Both endpoints must reference nodes of the same flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    #[serde(default)]
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub gate: Option<String>,
}

/// Lifecycle status of a flow or chain run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }
}

/// Error captured into a failed execution record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionError {
    /// Machine-readable kind ("agent_invocation", "timeout", "cancelled", ...)
    pub kind: String,
    pub message: String,
}

/// Persisted record of one flow run.
///
/// Created when a run starts, mutated exactly once at completion. Each run
/// owns its record exclusively; results completed before a failure are
/// retained for diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub id: String,
    pub flow_id: String,
    pub input_data: Value,
    pub context: Value,
    pub status: ExecutionStatus,
    /// Per-node results keyed by node id
    #[serde(default)]
    pub results: HashMap<String, Value>,
    #[serde(default)]
    pub error: Option<ExecutionError>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Execution {
    /// Open a fresh "running" record for a flow run.
    pub fn start(flow_id: &str, input_data: Value, context: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            flow_id: flow_id.to_string(),
            input_data,
            context,
            status: ExecutionStatus::Running,
            results: HashMap::new(),
            error: None,
            started_at: chrono::Utc::now(),
            completed_at: None,
        }
    }
}

/// Build the initial run state: input data merged with context, context keys
/// winning on clash. Non-object payloads land under a single key so scalar
/// inputs still flow through expressions.
pub fn seed_state(input_data: &Value, context: &Value) -> Map<String, Value> {
    let mut state = Map::new();
    merge_into(&mut state, input_data, "input");
    merge_into(&mut state, context, "context");
    state
}

fn merge_into(state: &mut Map<String, Value>, value: &Value, fallback_key: &str) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                state.insert(k.clone(), v.clone());
            }
        }
        Value::Null => {}
        other => {
            state.insert(fallback_key.to_string(), other.clone());
        }
    }
}
