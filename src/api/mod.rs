//! REST API surface
//!
//! Flow definitions live under /agent-apps, chains under /agent-chains, and
//! chain run polling under /chain-executions. Both route modules share one
//! application state.

pub mod chains;
pub mod flows;

use crate::chain::stepper::ChainStepper;
use crate::flow::registry::FlowRegistry;
use crate::flow::storage::DefinitionStorage;
use crate::runtime::records::ExecutionRecords;
use crate::runtime::scheduler::FlowScheduler;
use std::sync::Arc;

/// Shared resources behind every endpoint.
#[derive(Clone)]
pub struct AppState {
    pub storage: DefinitionStorage,
    pub registry: Arc<FlowRegistry>,
    pub scheduler: Arc<FlowScheduler>,
    pub stepper: Arc<ChainStepper>,
    pub records: Arc<ExecutionRecords>,
}
