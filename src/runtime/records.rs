//! Execution record lifecycle
//!
//! The only writers of persisted run records. Each run calls `start_*`
//! exactly once and then exactly one of the terminal transitions; partial
//! results accumulated before a failure are retained for diagnostics, never
//! discarded. Live chain executions are additionally held in memory so the
//! polling endpoint can see progress between the start and terminal writes.

use crate::chain::types::ChainExecution;
use crate::error::EngineError;
use crate::flow::storage::DefinitionStorage;
use crate::flow::types::{Execution, ExecutionError, ExecutionStatus};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Cooperative cancellation flag checked between node/step boundaries.
/// Cancellation never interrupts an in-flight agent call; the invoker's own
/// deadline covers that.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Manager for flow and chain execution records.
#[derive(Debug)]
pub struct ExecutionRecords {
    storage: DefinitionStorage,
    live_chains: RwLock<HashMap<String, ChainExecution>>,
}

impl ExecutionRecords {
    pub fn new(storage: DefinitionStorage) -> Self {
        Self {
            storage,
            live_chains: RwLock::new(HashMap::new()),
        }
    }

    /// Open a "running" flow record. Called exactly once per run, before any
    /// node executes.
    pub async fn start_flow(
        &self,
        flow_id: &str,
        input_data: Value,
        context: Value,
    ) -> Result<Execution, EngineError> {
        let execution = Execution::start(flow_id, input_data, context);
        self.storage.save_execution(&execution).await?;
        tracing::info!("execution {} started for flow {}", execution.id, flow_id);
        Ok(execution)
    }

    /// Terminal success transition for a flow run.
    pub async fn complete_flow(
        &self,
        mut execution: Execution,
        results: HashMap<String, Value>,
    ) -> Result<Execution, EngineError> {
        execution.status = ExecutionStatus::Completed;
        execution.results = results;
        execution.completed_at = Some(chrono::Utc::now());
        self.storage.save_execution(&execution).await?;
        tracing::info!("execution {} completed", execution.id);
        Ok(execution)
    }

    /// Terminal failure transition for a flow run. Node results settled
    /// before the failure stay on the record.
    pub async fn fail_flow(
        &self,
        mut execution: Execution,
        error: &EngineError,
        partial_results: HashMap<String, Value>,
    ) -> Result<Execution, EngineError> {
        execution.status = ExecutionStatus::Failed;
        execution.results = partial_results;
        execution.error = Some(ExecutionError {
            kind: error.kind().to_string(),
            message: error.to_string(),
        });
        execution.completed_at = Some(chrono::Utc::now());
        self.storage.save_execution(&execution).await?;
        tracing::warn!("execution {} failed: {}", execution.id, error);
        Ok(execution)
    }

    /// Open a "running" chain record and make it visible to pollers.
    pub async fn start_chain(
        &self,
        chain_id: &str,
        input: Value,
        variables: Map<String, Value>,
    ) -> Result<ChainExecution, EngineError> {
        let execution = ChainExecution::start(chain_id, input, variables);
        self.storage.save_chain_execution(&execution).await?;
        self.live_chains
            .write()
            .await
            .insert(execution.id.clone(), execution.clone());
        tracing::info!(
            "chain execution {} started for chain {}",
            execution.id,
            chain_id
        );
        Ok(execution)
    }

    /// Refresh the in-memory snapshot between steps. Not a persisted write:
    /// the stored record only changes at start and at the terminal
    /// transition.
    pub async fn update_live_chain(&self, execution: &ChainExecution) {
        self.live_chains
            .write()
            .await
            .insert(execution.id.clone(), execution.clone());
    }

    /// Terminal transition for a chain run (status already set by the
    /// stepper). Persists the record and drops the live entry.
    pub async fn finish_chain(&self, execution: &ChainExecution) -> Result<(), EngineError> {
        self.storage.save_chain_execution(execution).await?;
        self.live_chains.write().await.remove(&execution.id);
        match execution.status {
            ExecutionStatus::Completed => {
                tracing::info!("chain execution {} completed", execution.id)
            }
            _ => tracing::warn!(
                "chain execution {} finished with status {:?}",
                execution.id,
                execution.status
            ),
        }
        Ok(())
    }

    /// Poll a chain execution: the live snapshot wins while the run is in
    /// flight, storage serves terminal records.
    pub async fn get_chain_execution(
        &self,
        id: &str,
    ) -> Result<Option<ChainExecution>, EngineError> {
        if let Some(live) = self.live_chains.read().await.get(id) {
            return Ok(Some(live.clone()));
        }
        self.storage.get_chain_execution(id).await
    }

    pub async fn get_execution(&self, id: &str) -> Result<Option<Execution>, EngineError> {
        self.storage.get_execution(id).await
    }
}
