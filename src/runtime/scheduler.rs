//! Flow scheduler: deterministic graph traversal with cycle safety
//!
//! Walks the graph from its entry nodes sequentially and depth-first,
//! memoizing per-node results. Membership in the results map is the engine's
//! ONLY cycle guard: a node executes at most once per run, which both
//! terminates cyclic graphs and gives fan-in nodes first-arrival semantics
//! (a node with several incoming edges runs on the first predecessor path
//! that reaches it; later paths see it memoized and skip). The opt-in
//! wait-all mode gives fan-in nodes join semantics instead.

use crate::error::EngineError;
use crate::expr;
use crate::flow::registry::CompiledFlow;
use crate::flow::types::{seed_state, JoinStrategy};
use crate::runtime::processor::NodeProcessor;
use crate::runtime::records::CancelHandle;
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use petgraph::visit::EdgeRef;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Executes one flow run over a private state snapshot.
pub struct FlowScheduler {
    processor: Arc<NodeProcessor>,
}

impl FlowScheduler {
    pub fn new(processor: Arc<NodeProcessor>) -> Self {
        Self { processor }
    }

    /// Run the flow against `(input_data, context)`, filling the
    /// caller-owned `results` map with per-node results. The map is written
    /// as nodes settle, so on failure it holds everything that completed
    /// before the error; the caller keeps those partials for the record.
    /// Each run owns its own state; nothing is shared across concurrent runs
    /// of the same definition.
    pub async fn run(
        &self,
        flow: &CompiledFlow,
        input_data: &Value,
        context: &Value,
        cancel: &CancelHandle,
        results: &mut HashMap<String, Value>,
    ) -> Result<(), EngineError> {
        if flow.entry_node_ids.is_empty() {
            return Err(EngineError::Validation(
                "flow has no entry points".to_string(),
            ));
        }

        let state = seed_state(input_data, context);
        match flow.flow.join_strategy() {
            JoinStrategy::FirstArrival => self.run_first_arrival(flow, state, cancel, results).await,
            JoinStrategy::WaitAll => self.run_wait_all(flow, state, cancel, results).await,
        }
    }

    async fn run_first_arrival(
        &self,
        flow: &CompiledFlow,
        mut state: Map<String, Value>,
        cancel: &CancelHandle,
        results: &mut HashMap<String, Value>,
    ) -> Result<(), EngineError> {
        // Entry nodes run sequentially in declaration order, never in
        // parallel, so the output is deterministic.
        for entry in &flow.entry_node_ids {
            self.visit(flow, entry, &mut state, results, cancel).await?;
        }
        Ok(())
    }

    /// Depth-first recursive step. Boxed because async recursion needs an
    /// explicitly sized future.
    fn visit<'a>(
        &'a self,
        flow: &'a CompiledFlow,
        node_id: &'a str,
        state: &'a mut Map<String, Value>,
        results: &'a mut HashMap<String, Value>,
        cancel: &'a CancelHandle,
    ) -> Pin<Box<dyn Future<Output = Result<(), EngineError>> + Send + 'a>> {
        Box::pin(async move {
            // The memoization check doubles as the cycle guard.
            if results.contains_key(node_id) {
                return Ok(());
            }
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            let node = flow
                .node(node_id)
                .ok_or_else(|| EngineError::Validation(format!("unknown node '{}'", node_id)))?;
            let result = self.processor.process(node, state).await?;
            results.insert(node_id.to_string(), result.clone());

            // Object results merge into the shared run state, later writers
            // win.
            if let Value::Object(map) = &result {
                for (key, value) in map {
                    state.insert(key.clone(), value.clone());
                }
            }

            // Outgoing edges in declaration order; the gate sees the state
            // plus this node's result under "nodeResult".
            for edge in flow.outgoing(node_id) {
                if gate_open(edge.gate.as_deref(), state, &result) {
                    self.visit(flow, &edge.target, state, results, cancel)
                        .await?;
                } else {
                    tracing::debug!("edge {} -> {} gated off", edge.source, edge.target);
                }
            }
            Ok(())
        })
    }

    /// Opt-in join mode: dispatch over a topological order, so a fan-in node
    /// only runs after every predecessor has settled and sees the state
    /// contributions of all branches that reached it.
    async fn run_wait_all(
        &self,
        flow: &CompiledFlow,
        mut state: Map<String, Value>,
        cancel: &CancelHandle,
        results: &mut HashMap<String, Value>,
    ) -> Result<(), EngineError> {
        let mut graph = DiGraph::<&str, usize>::new();
        let mut index_of = HashMap::new();
        for node in &flow.flow.nodes {
            let idx = graph.add_node(node.id.as_str());
            index_of.insert(node.id.as_str(), idx);
        }
        for (edge_index, edge) in flow.flow.edges.iter().enumerate() {
            graph.add_edge(
                index_of[edge.source.as_str()],
                index_of[edge.target.as_str()],
                edge_index,
            );
        }

        let order = toposort(&graph, None).map_err(|_| {
            EngineError::Validation("wait-all join requires an acyclic flow".to_string())
        })?;

        let entries: HashSet<&str> = flow.entry_node_ids.iter().map(String::as_str).collect();

        for idx in order {
            let node_id = graph[idx];
            // A non-entry node runs when at least one incoming edge comes
            // from an executed source with an open gate.
            let reachable = entries.contains(node_id)
                || graph
                    .edges_directed(idx, petgraph::Direction::Incoming)
                    .any(|e| {
                        let edge = &flow.flow.edges[*e.weight()];
                        match results.get(edge.source.as_str()) {
                            Some(source_result) => {
                                gate_open(edge.gate.as_deref(), &state, source_result)
                            }
                            None => false,
                        }
                    });
            if !reachable {
                continue;
            }
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            let node = flow
                .node(node_id)
                .ok_or_else(|| EngineError::Validation(format!("unknown node '{}'", node_id)))?;
            let result = self.processor.process(node, &state).await?;
            if let Value::Object(map) = &result {
                for (key, value) in map {
                    state.insert(key.clone(), value.clone());
                }
            }
            results.insert(node_id.to_string(), result);
        }

        Ok(())
    }
}

/// Evaluate an edge gate against the state extended with the source node's
/// result. An absent or empty gate is always open; evaluation failures close
/// the edge rather than aborting the run.
fn gate_open(gate: Option<&str>, state: &Map<String, Value>, node_result: &Value) -> bool {
    let gate = gate.unwrap_or("");
    if gate.trim().is_empty() {
        return true;
    }
    let mut gate_state = state.clone();
    gate_state.insert("nodeResult".to_string(), node_result.clone());
    expr::eval_condition(gate, &gate_state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::types::{Edge, Flow, Node, NodeKind};
    use crate::runtime::invoker::mock::{FailingInvoker, ScriptedInvoker};
    use crate::runtime::invoker::AgentInvoker;
    use serde_json::json;

    fn node(id: &str, kind: NodeKind, data: Value) -> Node {
        Node {
            id: id.to_string(),
            kind,
            position: Value::Null,
            data,
        }
    }

    fn edge(source: &str, target: &str) -> Edge {
        Edge {
            id: format!("{}-{}", source, target),
            source: source.to_string(),
            target: target.to_string(),
            gate: None,
        }
    }

    fn gated_edge(source: &str, target: &str, gate: &str) -> Edge {
        Edge {
            gate: Some(gate.to_string()),
            ..edge(source, target)
        }
    }

    fn compile(nodes: Vec<Node>, edges: Vec<Edge>, config: Value) -> CompiledFlow {
        CompiledFlow::compile(Flow {
            id: "f1".to_string(),
            name: "test".to_string(),
            description: String::new(),
            nodes,
            edges,
            config,
            is_public: false,
        })
        .unwrap()
    }

    fn scheduler(invoker: Arc<dyn AgentInvoker>) -> FlowScheduler {
        FlowScheduler::new(Arc::new(NodeProcessor::new(invoker)))
    }

    fn no_agents() -> FlowScheduler {
        scheduler(Arc::new(ScriptedInvoker::new(vec![])))
    }

    async fn run(
        s: &FlowScheduler,
        flow: &CompiledFlow,
        input: Value,
    ) -> Result<HashMap<String, Value>, EngineError> {
        let mut results = HashMap::new();
        s.run(flow, &input, &json!(null), &CancelHandle::new(), &mut results)
            .await?;
        Ok(results)
    }

    #[tokio::test]
    async fn rejects_flow_without_entry_points() {
        // every node has an incoming edge
        let flow = compile(
            vec![
                node("in", NodeKind::Input, json!({})),
                node("out", NodeKind::Output, json!({})),
            ],
            vec![edge("in", "out"), edge("out", "in")],
            json!(null),
        );
        let err = run(&no_agents(), &flow, json!({})).await.unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[tokio::test]
    async fn terminates_on_cyclic_flow() {
        let flow = compile(
            vec![
                node("in", NodeKind::Input, json!({})),
                node("a", NodeKind::Transform, json!({"expression": "1", "key": "a"})),
                node("b", NodeKind::Transform, json!({"expression": "2", "key": "b"})),
                node("out", NodeKind::Output, json!({})),
            ],
            vec![
                edge("in", "a"),
                edge("a", "b"),
                edge("b", "a"),
                edge("b", "out"),
            ],
            json!(null),
        );
        let results = run(&no_agents(), &flow, json!({})).await.unwrap();
        assert_eq!(results.len(), 4);
    }

    #[tokio::test]
    async fn end_to_end_input_agent_output() {
        let invoker = Arc::new(ScriptedInvoker::new(vec![(
            "writer",
            json!({"text": "an essay"}),
        )]));
        let flow = compile(
            vec![
                node("in", NodeKind::Input, json!({})),
                node("a", NodeKind::Agent, json!({"agentRef": "writer"})),
                node("out", NodeKind::Output, json!({"keys": ["agentResponse"]})),
            ],
            vec![edge("in", "a"), edge("a", "out")],
            json!(null),
        );
        let results = run(&scheduler(invoker), &flow, json!({"topic": "x"}))
            .await
            .unwrap();
        assert_eq!(results["out"]["agentResponse"], json!({"text": "an essay"}));
    }

    #[tokio::test]
    async fn runs_are_deterministic() {
        let invoker = Arc::new(ScriptedInvoker::new(vec![("writer", json!({"n": 1}))]));
        let flow = compile(
            vec![
                node("in", NodeKind::Input, json!({})),
                node("a", NodeKind::Agent, json!({"agentRef": "writer"})),
                node("out", NodeKind::Output, json!({"keys": ["agentResponse"]})),
            ],
            vec![edge("in", "a"), edge("a", "out")],
            json!(null),
        );
        let s = scheduler(invoker);
        let first = run(&s, &flow, json!({"topic": "x"})).await.unwrap();
        let second = run(&s, &flow, json!({"topic": "x"})).await.unwrap();
        // agent timestamps differ between runs; compare the stable parts
        assert_eq!(first["out"], second["out"]);
        assert_eq!(first.len(), second.len());
    }

    #[tokio::test]
    async fn false_condition_gates_off_downstream_branch() {
        let flow = compile(
            vec![
                node("in", NodeKind::Input, json!({})),
                node("c", NodeKind::Condition, json!({"condition": "score > 5"})),
                node("yes", NodeKind::Transform, json!({"expression": "1", "key": "won"})),
                node("out", NodeKind::Output, json!({})),
            ],
            vec![
                edge("in", "c"),
                gated_edge("c", "yes", "nodeResult.result"),
                gated_edge("c", "out", "!nodeResult.result"),
            ],
            json!(null),
        );
        let results = run(&no_agents(), &flow, json!({"score": 3})).await.unwrap();
        assert_eq!(results["c"], json!({"result": false}));
        assert!(!results.contains_key("yes"));
        assert!(results.contains_key("out"));
    }

    #[tokio::test]
    async fn edge_without_gate_is_always_taken() {
        let flow = compile(
            vec![
                node("in", NodeKind::Input, json!({})),
                node("out", NodeKind::Output, json!({})),
            ],
            vec![edge("in", "out")],
            json!(null),
        );
        let results = run(&no_agents(), &flow, json!({"a": 1})).await.unwrap();
        assert!(results.contains_key("out"));
    }

    // A -> B -> D, A -> C -> D; B and C write disjoint state keys
    fn diamond(config: Value) -> CompiledFlow {
        compile(
            vec![
                node("a", NodeKind::Input, json!({})),
                node("b", NodeKind::Transform, json!({"expression": "'from-b'", "key": "left"})),
                node("c", NodeKind::Transform, json!({"expression": "'from-c'", "key": "right"})),
                node("d", NodeKind::Output, json!({"keys": ["left", "right"]})),
            ],
            vec![
                edge("a", "b"),
                edge("a", "c"),
                edge("b", "d"),
                edge("c", "d"),
            ],
            config,
        )
    }

    #[tokio::test]
    async fn fan_in_first_writer_wins_by_default() {
        let results = run(&no_agents(), &diamond(json!(null)), json!({}))
            .await
            .unwrap();
        // d executed on the first-arriving branch (through b, declared
        // first): it sees b's write but not c's, and never re-executes.
        assert_eq!(results["d"], json!({"left": "from-b"}));
    }

    #[tokio::test]
    async fn wait_all_join_sees_every_branch() {
        let results = run(
            &no_agents(),
            &diamond(json!({"joinStrategy": "wait-all"})),
            json!({}),
        )
        .await
        .unwrap();
        assert_eq!(results["d"], json!({"left": "from-b", "right": "from-c"}));
    }

    #[tokio::test]
    async fn wait_all_rejects_cycles() {
        let flow = compile(
            vec![
                node("in", NodeKind::Input, json!({})),
                node("a", NodeKind::Transform, json!({"expression": "1"})),
                node("b", NodeKind::Transform, json!({"expression": "2"})),
                node("out", NodeKind::Output, json!({})),
            ],
            vec![edge("in", "a"), edge("a", "b"), edge("b", "a"), edge("b", "out")],
            json!({"joinStrategy": "wait-all"}),
        );
        let err = run(&no_agents(), &flow, json!({})).await.unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[tokio::test]
    async fn cancellation_stops_before_dispatch() {
        let flow = compile(
            vec![
                node("in", NodeKind::Input, json!({})),
                node("out", NodeKind::Output, json!({})),
            ],
            vec![edge("in", "out")],
            json!(null),
        );
        let cancel = CancelHandle::new();
        cancel.cancel();
        let mut results = HashMap::new();
        let err = no_agents()
            .run(&flow, &json!({}), &json!(null), &cancel, &mut results)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "cancelled");
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn agent_failure_aborts_but_keeps_settled_results() {
        let flow = compile(
            vec![
                node("in", NodeKind::Input, json!({})),
                node("a", NodeKind::Agent, json!({"agentRef": "writer"})),
                node("out", NodeKind::Output, json!({})),
            ],
            vec![edge("in", "a"), edge("a", "out")],
            json!(null),
        );
        let mut results = HashMap::new();
        let err = scheduler(Arc::new(FailingInvoker::new()))
            .run(
                &flow,
                &json!({"topic": "x"}),
                &json!(null),
                &CancelHandle::new(),
                &mut results,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "agent_invocation");
        // the input node settled before the agent failed
        assert!(results.contains_key("in"));
        assert!(!results.contains_key("out"));
    }
}
