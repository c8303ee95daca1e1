// crates/flowspec-core/src/interfaces/mod.rs
// ============================================================================
// Module: FlowSpec Interfaces
// Description: Backend-agnostic interfaces for truth storage, groups, and hooks.
// Purpose: Define the contract surfaces used by the FlowSpec runtime.
// Dependencies: crate::core
// ============================================================================

//! ## Overview
//! Interfaces define how FlowSpec integrates with persistence and host
//! observers without embedding backend-specific details. Store
//! implementations must serialize writes per flow and fail closed on missing
//! or corrupt data. Hook sinks are best-effort: failures never mutate truth.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::identifiers::CompanyId;
use crate::core::identifiers::FlowGroupId;
use crate::core::identifiers::FlowId;
use crate::core::identifiers::NodeId;
use crate::core::identifiers::OutcomeName;
use crate::core::identifiers::TaskExecutionId;
use crate::core::identifiers::TaskId;
use crate::core::identifiers::WorkflowId;
use crate::core::identifiers::WorkflowVersionId;
use crate::core::spec::WorkflowVersion;
use crate::core::truth::Flow;
use crate::core::truth::FlowGroup;
use crate::core::truth::FlowState;
use crate::core::truth::GroupOutcome;
use crate::core::truth::GroupScope;

// ============================================================================
// SECTION: Store Errors
// ============================================================================

/// Truth store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Store I/O error.
    #[error("truth store io error: {0}")]
    Io(String),
    /// Store data is corrupted or fails integrity checks.
    #[error("truth store corruption: {0}")]
    Corrupt(String),
    /// Store data version is incompatible.
    #[error("truth store version mismatch: {0}")]
    VersionMismatch(String),
    /// Store data is invalid.
    #[error("truth store invalid data: {0}")]
    Invalid(String),
    /// Concurrent writer holds the per-flow lock; the caller may retry.
    #[error("truth store conflict: {0}")]
    Conflict(String),
    /// Store reported an error.
    #[error("truth store error: {0}")]
    Store(String),
}

// ============================================================================
// SECTION: Truth Store
// ============================================================================

/// Persistence surface for flow truth logs.
///
/// Writes must be strongly serialized within a flow; `save_flow` is the
/// atomic commit point for one engine transaction. Concurrent writes across
/// different flows may proceed in parallel.
pub trait TruthStore {
    /// Loads a flow with its complete truth log.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when loading fails.
    fn load_flow(&self, flow_id: &FlowId) -> Result<Option<FlowState>, StoreError>;

    /// Persists a flow state atomically.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when saving fails.
    fn save_flow(&self, state: &FlowState) -> Result<(), StoreError>;

    /// Lists flow headers belonging to a group.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    fn flows_in_group(&self, flow_group_id: &FlowGroupId) -> Result<Vec<Flow>, StoreError>;

    /// Computes the valid, stamped outcomes visible to cross-flow evaluation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    fn group_outcomes(&self, flow_group_id: &FlowGroupId)
    -> Result<Vec<GroupOutcome>, StoreError>;

    /// Counts non-completed flows bound to any version of a workflow.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    fn active_flow_count(&self, workflow_id: &WorkflowId) -> Result<u64, StoreError>;

    /// Verifies the store is reachable.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store is unavailable.
    fn readiness(&self) -> Result<(), StoreError>;
}

// ============================================================================
// SECTION: Flow Group Directory
// ============================================================================

/// Directory of flow groups keyed by `(company, scope)`.
pub trait FlowGroupDirectory {
    /// Finds a group by its unique `(company, scope)` key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    fn find_group(
        &self,
        company_id: &CompanyId,
        scope: &GroupScope,
    ) -> Result<Option<FlowGroup>, StoreError>;

    /// Loads a group by identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    fn load_group(&self, flow_group_id: &FlowGroupId) -> Result<Option<FlowGroup>, StoreError>;

    /// Creates a group, enforcing `(company, scope)` uniqueness.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when the key already exists.
    fn create_group(&self, group: &FlowGroup) -> Result<(), StoreError>;

    /// Saves group mutations such as the provisioned job.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when saving fails.
    fn save_group(&self, group: &FlowGroup) -> Result<(), StoreError>;
}

// ============================================================================
// SECTION: Workflow Registry
// ============================================================================

/// Registry of published, immutable workflow versions.
pub trait WorkflowRegistry {
    /// Returns the latest published version of a workflow.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    fn latest_published(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<Option<WorkflowVersion>, StoreError>;

    /// Loads a specific published version.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    fn version(
        &self,
        version_id: &WorkflowVersionId,
    ) -> Result<Option<WorkflowVersion>, StoreError>;

    /// Stores a newly published version.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when saving fails.
    fn store_version(&self, version: &WorkflowVersion) -> Result<(), StoreError>;
}

// ============================================================================
// SECTION: Hooks
// ============================================================================

/// Best-effort engine event emitted after a successful commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A task execution was started.
    TaskStarted {
        /// Flow identifier.
        flow_id: FlowId,
        /// Task identifier.
        task_id: TaskId,
        /// Execution identifier.
        execution_id: TaskExecutionId,
    },
    /// A task outcome was stamped.
    TaskDone {
        /// Flow identifier.
        flow_id: FlowId,
        /// Task identifier.
        task_id: TaskId,
        /// Execution identifier.
        execution_id: TaskExecutionId,
        /// Recorded outcome name.
        outcome: OutcomeName,
    },
    /// A node was activated.
    NodeActivated {
        /// Flow identifier.
        flow_id: FlowId,
        /// Node identifier.
        node_id: NodeId,
        /// Activation iteration.
        iteration: u32,
    },
    /// A flow reached completion.
    FlowCompleted {
        /// Flow identifier.
        flow_id: FlowId,
    },
}

/// Hook sink errors.
#[derive(Debug, Error)]
pub enum HookError {
    /// Hook sink reported an error.
    #[error("hook sink error: {0}")]
    Sink(String),
}

/// Best-effort observer of engine events.
///
/// Failures are counted and dropped; they never mutate truth.
pub trait HookSink {
    /// Receives an engine event after the triggering commit.
    ///
    /// # Errors
    ///
    /// Returns [`HookError`] when the sink fails; the registry drops the error.
    fn on_event(&self, event: &EngineEvent) -> Result<(), HookError>;
}
