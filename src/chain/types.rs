//! Chain type definitions
//!
//! A Chain is the linear analogue of a Flow: an ordered list of agent steps
//! with JSONPath-style input/output mappings, a per-step gating condition,
//! timeout and retry count. Wire field names are camelCase.

use crate::flow::types::{ExecutionError, ExecutionStatus};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;

fn default_timeout_ms() -> u64 {
    30_000
}

/// An ordered agent pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chain {
    /// Generated server-side when a create request omits it
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub steps: Vec<ChainStep>,
}

/// One stage of a chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainStep {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Opaque reference handed to the agent invoker
    pub agent_ref: String,
    /// Gating condition over prior chain state; absent means always run
    #[serde(default)]
    pub condition: Option<String>,
    /// local key -> JSONPath over the chain state ($.steps.s1.output.x style)
    #[serde(default)]
    pub input_mapping: HashMap<String, String>,
    /// local key -> JSONPath over {"output": step_output}; results merge into
    /// the chain variables under the local keys
    #[serde(default)]
    pub output_mapping: HashMap<String, String>,
    /// Deadline for one invocation attempt
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Extra attempts after the first failure before the execution fails
    #[serde(default)]
    pub retry_count: u32,
}

#[cfg(test)]
impl ChainStep {
    pub fn test_step(id: &str, agent_ref: &str) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            agent_ref: agent_ref.to_string(),
            condition: None,
            input_mapping: HashMap::new(),
            output_mapping: HashMap::new(),
            timeout_ms: default_timeout_ms(),
            retry_count: 0,
        }
    }
}

/// Terminal classification of one step within a chain run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Success,
    Failed,
    Skipped,
}

/// Recorded outcome of one chain step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepOutcome {
    pub status: StepStatus,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    /// Invocation attempts actually made (0 for skipped steps)
    pub attempts: u32,
}

impl StepOutcome {
    pub fn skipped() -> Self {
        Self {
            status: StepStatus::Skipped,
            output: None,
            error: None,
            attempts: 0,
        }
    }

    pub fn success(output: Value, attempts: u32) -> Self {
        Self {
            status: StepStatus::Success,
            output: Some(output),
            error: None,
            attempts,
        }
    }

    pub fn failed(error: String, attempts: u32) -> Self {
        Self {
            status: StepStatus::Failed,
            output: None,
            error: Some(error),
            attempts,
        }
    }
}

/// Persisted record of one chain run.
///
/// Created at the execute call, advanced one step at a time by the stepper,
/// terminal after the last step or an unrecoverable step failure. Prior step
/// outcomes are never rolled back.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainExecution {
    pub id: String,
    pub chain_id: String,
    pub current_step_index: usize,
    pub status: ExecutionStatus,
    /// Per-step outcomes keyed by step id
    #[serde(default)]
    pub per_step_result: HashMap<String, StepOutcome>,
    pub input: Value,
    /// Accumulated variables: seeded by the caller, extended by output mappings
    #[serde(default)]
    pub variables: Map<String, Value>,
    #[serde(default)]
    pub error: Option<ExecutionError>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl ChainExecution {
    /// Open a fresh "running" record for a chain run.
    pub fn start(chain_id: &str, input: Value, variables: Map<String, Value>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            chain_id: chain_id.to_string(),
            current_step_index: 0,
            status: ExecutionStatus::Running,
            per_step_result: HashMap::new(),
            input,
            variables,
            error: None,
            started_at: chrono::Utc::now(),
            completed_at: None,
        }
    }

    /// The chain state document JSONPath mappings are resolved against:
    /// `{"input": .., "variables": {..}, "steps": {stepId: {"output": ..}}}`.
    pub fn state_document(&self) -> Value {
        let mut steps = Map::new();
        for (step_id, outcome) in &self.per_step_result {
            steps.insert(
                step_id.clone(),
                json!({ "output": outcome.output.clone().unwrap_or(Value::Null) }),
            );
        }
        json!({
            "input": self.input,
            "variables": Value::Object(self.variables.clone()),
            "steps": Value::Object(steps),
        })
    }

    /// Snapshot for step condition expressions: variables at the top level
    /// plus `input` and `steps` for path-style lookups.
    pub fn condition_state(&self) -> Map<String, Value> {
        let mut state = self.variables.clone();
        state.insert("input".to_string(), self.input.clone());
        let mut steps = Map::new();
        for (step_id, outcome) in &self.per_step_result {
            steps.insert(
                step_id.clone(),
                json!({ "output": outcome.output.clone().unwrap_or(Value::Null) }),
            );
        }
        state.insert("steps".to_string(), Value::Object(steps));
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_defaults_apply() {
        let step: ChainStep = serde_json::from_value(json!({
            "id": "s1",
            "agentRef": "writer"
        }))
        .unwrap();
        assert_eq!(step.timeout_ms, 30_000);
        assert_eq!(step.retry_count, 0);
        assert!(step.condition.is_none());
        assert!(step.input_mapping.is_empty());
    }

    #[test]
    fn state_document_shape() {
        let mut exec = ChainExecution::start("c1", json!({"q": "hi"}), Map::new());
        exec.per_step_result.insert(
            "s1".to_string(),
            StepOutcome::success(json!({"text": "draft"}), 1),
        );
        let doc = exec.state_document();
        assert_eq!(doc["input"]["q"], json!("hi"));
        assert_eq!(doc["steps"]["s1"]["output"]["text"], json!("draft"));
    }

    #[test]
    fn condition_state_flattens_variables() {
        let mut vars = Map::new();
        vars.insert("summary".to_string(), json!("ok"));
        let exec = ChainExecution::start("c1", json!({}), vars);
        let state = exec.condition_state();
        assert_eq!(state.get("summary"), Some(&json!("ok")));
        assert!(state.contains_key("steps"));
    }
}
