//! Single-step chain advancement
//!
//! The stepper advances a chain execution exactly one step per call, so the
//! driver can publish a fresh live snapshot between steps. Conditions gate a
//! step to "skipped" without consuming the retry budget; invocation failures
//! and timeouts both count against it, and retries are immediate (the agent
//! gateway owns backoff).

use crate::chain::types::{Chain, ChainStep, StepOutcome};
use crate::error::EngineError;
use crate::flow::types::{ExecutionError, ExecutionStatus};
use crate::runtime::invoker::AgentInvoker;
use crate::runtime::records::CancelHandle;
use crate::{chain::types::ChainExecution, expr};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;

/// Advances chain executions one step at a time.
pub struct ChainStepper {
    invoker: Arc<dyn AgentInvoker>,
}

impl ChainStepper {
    pub fn new(invoker: Arc<dyn AgentInvoker>) -> Self {
        Self { invoker }
    }

    /// Execute (or skip) the current step and advance the index. Sets the
    /// terminal status on the execution itself; the only error this returns
    /// is `Cancelled`, everything step-level lands in the step outcome.
    pub async fn advance(
        &self,
        chain: &Chain,
        execution: &mut ChainExecution,
        cancel: &CancelHandle,
    ) -> Result<(), EngineError> {
        if execution.status.is_terminal() {
            return Ok(());
        }
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let index = execution.current_step_index;
        let Some(step) = chain.steps.get(index) else {
            complete(execution);
            return Ok(());
        };

        // Empty or absent condition always runs; evaluation failures skip.
        let should_run = match step.condition.as_deref() {
            Some(condition) => expr::eval_condition(condition, &execution.condition_state()),
            None => true,
        };
        if !should_run {
            tracing::debug!("chain step '{}' skipped by condition", step.id);
            execution
                .per_step_result
                .insert(step.id.clone(), StepOutcome::skipped());
            return advance_index(chain, execution);
        }

        let input = resolve_input(step, &execution.state_document());
        match self.invoke_with_retries(step, &input).await {
            Ok((output, attempts)) => {
                apply_output_mapping(step, &output, &mut execution.variables);
                execution
                    .per_step_result
                    .insert(step.id.clone(), StepOutcome::success(output, attempts));
                advance_index(chain, execution)
            }
            Err((error, attempts)) => {
                tracing::warn!(
                    "chain step '{}' failed after {} attempts: {}",
                    step.id,
                    attempts,
                    error
                );
                execution
                    .per_step_result
                    .insert(step.id.clone(), StepOutcome::failed(error.to_string(), attempts));
                execution.status = ExecutionStatus::Failed;
                execution.error = Some(ExecutionError {
                    kind: error.kind().to_string(),
                    message: error.to_string(),
                });
                execution.completed_at = Some(chrono::Utc::now());
                Ok(())
            }
        }
    }

    /// One deadline-bounded invocation per attempt, `retry_count + 1`
    /// attempts total, retried back to back.
    async fn invoke_with_retries(
        &self,
        step: &ChainStep,
        input: &Value,
    ) -> Result<(Value, u32), (EngineError, u32)> {
        let max_attempts = step.retry_count + 1;
        let deadline = Duration::from_millis(step.timeout_ms);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            match tokio::time::timeout(deadline, self.invoker.invoke(&step.agent_ref, input)).await
            {
                Ok(Ok(output)) => return Ok((output, attempt)),
                Ok(Err(error)) => {
                    tracing::debug!(
                        "chain step '{}' attempt {}/{} failed: {}",
                        step.id,
                        attempt,
                        max_attempts,
                        error
                    );
                    last_error = Some(error);
                }
                Err(_) => {
                    last_error = Some(EngineError::Timeout {
                        step_id: step.id.clone(),
                        timeout_ms: step.timeout_ms,
                    });
                }
            }
        }
        // max_attempts >= 1, so last_error is always set here
        let error = last_error.unwrap_or(EngineError::Cancelled);
        Err((error, max_attempts))
    }
}

fn advance_index(chain: &Chain, execution: &mut ChainExecution) -> Result<(), EngineError> {
    execution.current_step_index += 1;
    if execution.current_step_index >= chain.steps.len() {
        complete(execution);
    }
    Ok(())
}

fn complete(execution: &mut ChainExecution) {
    execution.status = ExecutionStatus::Completed;
    execution.completed_at = Some(chrono::Utc::now());
    tracing::debug!("chain execution {} ran out of steps", execution.id);
}

/// Resolve the step's input mapping against the chain state document. Each
/// mapping takes the first JSONPath match, or null when nothing matches. A
/// step with no mapping receives the whole state document.
fn resolve_input(step: &ChainStep, state_document: &Value) -> Value {
    if step.input_mapping.is_empty() {
        return state_document.clone();
    }
    let mut input = Map::new();
    for (key, path) in &step.input_mapping {
        input.insert(key.clone(), select_first(state_document, path));
    }
    Value::Object(input)
}

/// Merge the step's output mapping into the chain variables, resolved
/// against `{"output": step_output}`.
fn apply_output_mapping(step: &ChainStep, output: &Value, variables: &mut Map<String, Value>) {
    if step.output_mapping.is_empty() {
        return;
    }
    let document = json!({ "output": output });
    for (key, path) in &step.output_mapping {
        variables.insert(key.clone(), select_first(&document, path));
    }
}

fn select_first(document: &Value, path: &str) -> Value {
    match jsonpath_lib::select(document, path) {
        Ok(matches) => matches.first().map(|v| (*v).clone()).unwrap_or(Value::Null),
        Err(error) => {
            tracing::debug!("jsonpath '{}' failed: {}", path, error);
            Value::Null
        }
    }
}
