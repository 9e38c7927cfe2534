//! Structural validation for flow and chain definitions
//!
//! Validation runs at create/update time and rejects malformed definitions
//! before any execution record exists. Cycles are deliberately NOT rejected:
//! the scheduler's visited-set makes cyclic graphs terminate, and stricter
//! validation here would break previously-valid definitions.

use crate::chain::types::Chain;
use crate::error::EngineError;
use crate::flow::types::{Flow, NodeKind};
use std::collections::HashSet;

/// Validate a flow definition.
///
/// Rejects: zero nodes, duplicate node ids, edges whose endpoints do not
/// resolve, and flows without at least one Input and one Output node.
pub fn validate_flow(flow: &Flow) -> Result<(), EngineError> {
    if flow.nodes.is_empty() {
        return Err(EngineError::Validation(
            "flow must contain at least one node".to_string(),
        ));
    }

    let mut node_ids = HashSet::new();
    for node in &flow.nodes {
        if !node_ids.insert(node.id.as_str()) {
            return Err(EngineError::Validation(format!(
                "duplicate node id '{}'",
                node.id
            )));
        }
    }

    for edge in &flow.edges {
        if !node_ids.contains(edge.source.as_str()) {
            return Err(EngineError::Validation(format!(
                "edge '{}' references unknown source node '{}'",
                edge.id, edge.source
            )));
        }
        if !node_ids.contains(edge.target.as_str()) {
            return Err(EngineError::Validation(format!(
                "edge '{}' references unknown target node '{}'",
                edge.id, edge.target
            )));
        }
    }

    if !flow.nodes.iter().any(|n| n.kind == NodeKind::Input) {
        return Err(EngineError::Validation(
            "flow must contain at least one input node".to_string(),
        ));
    }
    if !flow.nodes.iter().any(|n| n.kind == NodeKind::Output) {
        return Err(EngineError::Validation(
            "flow must contain at least one output node".to_string(),
        ));
    }

    Ok(())
}

/// Validate a chain definition: a non-empty ordered step list with unique
/// step ids.
pub fn validate_chain(chain: &Chain) -> Result<(), EngineError> {
    if chain.steps.is_empty() {
        return Err(EngineError::Validation(
            "chain must contain at least one step".to_string(),
        ));
    }

    let mut step_ids = HashSet::new();
    for step in &chain.steps {
        if step.id.is_empty() {
            return Err(EngineError::Validation(
                "chain step id must not be empty".to_string(),
            ));
        }
        if !step_ids.insert(step.id.as_str()) {
            return Err(EngineError::Validation(format!(
                "duplicate step id '{}'",
                step.id
            )));
        }
        if step.agent_ref.is_empty() {
            return Err(EngineError::Validation(format!(
                "step '{}' is missing an agent reference",
                step.id
            )));
        }
    }

    Ok(())
}
