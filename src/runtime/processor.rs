//! Node execution handlers, one per node kind
//!
//! Every processor is a pure function of `(node, state)` except Agent, which
//! performs the one I/O call in the whole engine. Condition and Transform
//! failures are captured into the node result instead of aborting the run;
//! an Agent failure aborts.

use crate::error::EngineError;
use crate::expr;
use crate::flow::types::{Node, NodeKind};
use crate::runtime::invoker::AgentInvoker;
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// Dispatches node execution based on kind.
pub struct NodeProcessor {
    invoker: Arc<dyn AgentInvoker>,
}

impl NodeProcessor {
    pub fn new(invoker: Arc<dyn AgentInvoker>) -> Self {
        Self { invoker }
    }

    /// Execute a single node against the current run state and produce its
    /// result. The scheduler owns merging object results back into state.
    pub async fn process(
        &self,
        node: &Node,
        state: &Map<String, Value>,
    ) -> Result<Value, EngineError> {
        tracing::debug!("processing node '{}' ({:?})", node.id, node.kind);
        match node.kind {
            NodeKind::Input | NodeKind::Output => Ok(self.project(node, state)),
            NodeKind::Agent => self.process_agent(node, state).await,
            NodeKind::Condition => Ok(self.process_condition(node, state)),
            NodeKind::Transform => Ok(self.process_transform(node, state)),
        }
    }

    /// Input/Output nodes project state down to the keys declared in the
    /// node's schema; without a schema the full state passes through.
    fn project(&self, node: &Node, state: &Map<String, Value>) -> Value {
        match node.data.get("keys").and_then(|k| k.as_array()) {
            Some(keys) => {
                let mut projected = Map::new();
                for key in keys.iter().filter_map(|k| k.as_str()) {
                    if let Some(value) = state.get(key) {
                        projected.insert(key.to_string(), value.clone());
                    }
                }
                Value::Object(projected)
            }
            None => Value::Object(state.clone()),
        }
    }

    /// The single I/O call: delegate to the external invoker with the full
    /// run state. Invoker failures abort the whole flow run.
    async fn process_agent(
        &self,
        node: &Node,
        state: &Map<String, Value>,
    ) -> Result<Value, EngineError> {
        let agent_ref = node
            .data
            .get("agentRef")
            .and_then(|r| r.as_str())
            .ok_or_else(|| EngineError::AgentInvocation {
                agent_ref: node.id.clone(),
                message: "agent node is missing 'agentRef'".to_string(),
            })?;

        let output = self
            .invoker
            .invoke(agent_ref, &Value::Object(state.clone()))
            .await?;

        Ok(json!({
            "agentResponse": output,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }))
    }

    /// Condition nodes never throw: an evaluation failure is recorded as
    /// `{"result": false, "error": ..}`.
    fn process_condition(&self, node: &Node, state: &Map<String, Value>) -> Value {
        let condition = node
            .data
            .get("condition")
            .and_then(|c| c.as_str())
            .unwrap_or("");

        match expr::eval_condition_checked(condition, state) {
            Ok(result) => json!({ "result": result }),
            Err(error) => {
                tracing::debug!("condition node '{}' failed: {}", node.id, error);
                json!({ "result": false, "error": error.to_string() })
            }
        }
    }

    /// Transform nodes are best effort: a failure becomes `{"error": ..}`
    /// without aborting the run. A scalar result is wrapped under the
    /// declared `key` (when present) so it can merge into state.
    fn process_transform(&self, node: &Node, state: &Map<String, Value>) -> Value {
        let expression = node
            .data
            .get("expression")
            .and_then(|e| e.as_str())
            .unwrap_or("");

        match expr::eval_transform(expression, state) {
            Ok(value) => match node.data.get("key").and_then(|k| k.as_str()) {
                Some(key) if !value.is_object() => json!({ key: value }),
                _ => value,
            },
            Err(error) => {
                tracing::debug!("transform node '{}' failed: {}", node.id, error);
                json!({ "error": error.to_string() })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::invoker::mock::{FailingInvoker, ScriptedInvoker};

    fn node(id: &str, kind: NodeKind, data: Value) -> Node {
        Node {
            id: id.to_string(),
            kind,
            position: Value::Null,
            data,
        }
    }

    fn state(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn processor(invoker: Arc<dyn AgentInvoker>) -> NodeProcessor {
        NodeProcessor::new(invoker)
    }

    #[tokio::test]
    async fn input_projects_declared_keys() {
        let p = processor(Arc::new(ScriptedInvoker::new(vec![])));
        let n = node("in", NodeKind::Input, json!({"keys": ["topic"]}));
        let s = state(json!({"topic": "rust", "noise": true}));
        let result = p.process(&n, &s).await.unwrap();
        assert_eq!(result, json!({"topic": "rust"}));
    }

    #[tokio::test]
    async fn input_without_schema_passes_full_state() {
        let p = processor(Arc::new(ScriptedInvoker::new(vec![])));
        let n = node("in", NodeKind::Input, json!({}));
        let s = state(json!({"a": 1, "b": 2}));
        assert_eq!(p.process(&n, &s).await.unwrap(), json!({"a": 1, "b": 2}));
    }

    #[tokio::test]
    async fn agent_returns_response_envelope() {
        let invoker = Arc::new(ScriptedInvoker::new(vec![(
            "writer",
            json!({"text": "draft"}),
        )]));
        let p = processor(invoker.clone());
        let n = node("a", NodeKind::Agent, json!({"agentRef": "writer"}));
        let result = p.process(&n, &state(json!({"topic": "x"}))).await.unwrap();
        assert_eq!(result["agentResponse"], json!({"text": "draft"}));
        assert!(result["timestamp"].is_string());
        assert_eq!(invoker.call_count(), 1);
    }

    #[tokio::test]
    async fn agent_failure_aborts() {
        let p = processor(Arc::new(FailingInvoker::new()));
        let n = node("a", NodeKind::Agent, json!({"agentRef": "writer"}));
        let err = p.process(&n, &Map::new()).await.unwrap_err();
        assert_eq!(err.kind(), "agent_invocation");
    }

    #[tokio::test]
    async fn condition_node_never_throws() {
        let p = processor(Arc::new(ScriptedInvoker::new(vec![])));
        let n = node("c", NodeKind::Condition, json!({"condition": "score > 5"}));
        let result = p.process(&n, &state(json!({"score": 3}))).await.unwrap();
        assert_eq!(result, json!({"result": false}));

        // type error inside the expression: result false plus error message
        let n = node("c", NodeKind::Condition, json!({"condition": "score - 'x' > 0"}));
        let result = p.process(&n, &state(json!({"score": 3}))).await.unwrap();
        assert_eq!(result["result"], json!(false));
        assert!(result["error"].is_string());
    }

    #[tokio::test]
    async fn transform_wraps_scalar_under_key() {
        let p = processor(Arc::new(ScriptedInvoker::new(vec![])));
        let n = node(
            "t",
            NodeKind::Transform,
            json!({"expression": "score * 2", "key": "scaled"}),
        );
        let result = p.process(&n, &state(json!({"score": 4}))).await.unwrap();
        assert_eq!(result, json!({"scaled": 8}));
    }

    #[tokio::test]
    async fn transform_failure_is_captured_not_thrown() {
        let p = processor(Arc::new(ScriptedInvoker::new(vec![])));
        let n = node("t", NodeKind::Transform, json!({"expression": "a * 'b'"}));
        let result = p.process(&n, &Map::new()).await.unwrap();
        assert!(result["error"].is_string());
    }
}
