// crates/flowspec-core/src/core/truth.rs
// ============================================================================
// Module: FlowSpec Truth Log
// Description: Flows, flow groups, and append-only execution truth records.
// Purpose: Capture deterministic flow evolution as the sole source of execution state.
// Dependencies: crate::core::{evidence, hashing, identifiers, time}, serde
// ============================================================================

//! ## Overview
//! Truth is the append-only event log owned by each flow: node activations,
//! task executions, evidence attachments, validity events, detour records,
//! and fan-out failures. Records are never mutated after append except to
//! stamp an outcome onto a previously open task execution; once stamped, the
//! outcome tuple is final. All derived predicates are computed from snapshot
//! plus truth and never persisted.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::evidence::EvidenceBody;
use crate::core::hashing::HashDigest;
use crate::core::identifiers::CompanyId;
use crate::core::identifiers::DetourId;
use crate::core::identifiers::EvidenceId;
use crate::core::identifiers::FlowGroupId;
use crate::core::identifiers::FlowId;
use crate::core::identifiers::IdempotencyKey;
use crate::core::identifiers::JobId;
use crate::core::identifiers::NodeActivationId;
use crate::core::identifiers::NodeId;
use crate::core::identifiers::OutcomeName;
use crate::core::identifiers::ScopeId;
use crate::core::identifiers::TaskExecutionId;
use crate::core::identifiers::TaskId;
use crate::core::identifiers::UserId;
use crate::core::identifiers::WorkflowId;
use crate::core::identifiers::WorkflowVersionId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Flow Groups
// ============================================================================

/// Scope key qualifying a flow group within a company.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupScope {
    /// Scope discriminator (for example `deal` or `site`).
    pub scope_type: String,
    /// Scope identifier within the discriminator.
    pub scope_id: ScopeId,
}

/// Unit-of-work aggregate owning zero or more flows.
///
/// # Invariants
/// - `(company_id, scope)` is unique across all groups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowGroup {
    /// Flow group identifier.
    pub flow_group_id: FlowGroupId,
    /// Owning company identifier.
    pub company_id: CompanyId,
    /// Scope key for the group.
    pub scope: GroupScope,
    /// Job provisioned by the coordinator, if any.
    pub job: Option<JobRecord>,
}

/// Job provisioned on a flow group by the fan-out coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Job identifier.
    pub job_id: JobId,
    /// Customer identifier verified against the anchor identity.
    pub customer_id: String,
    /// Creation timestamp.
    pub created_at: Timestamp,
}

/// Outcome visible to cross-flow dependency evaluation.
///
/// One row per stamped, valid outcome anywhere in a flow group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupOutcome {
    /// Workflow the outcome was recorded under.
    pub workflow_id: WorkflowId,
    /// Task the outcome was recorded for.
    pub task_id: TaskId,
    /// Recorded outcome name.
    pub outcome: OutcomeName,
}

// ============================================================================
// SECTION: Flows
// ============================================================================

/// Flow lifecycle status.
///
/// # Invariants
/// - `Completed` is terminal; `Blocked` is recoverable only by administrative
///   intervention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStatus {
    /// Flow is active and accepting progression commands.
    Active,
    /// Flow has completed.
    Completed,
    /// Flow is suspended by the caller; the engine attaches no semantics.
    Suspended,
    /// Flow is blocked after an iteration-limit or fan-out failure.
    Blocked,
}

/// Running instance permanently bound to one workflow version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    /// Flow identifier.
    pub flow_id: FlowId,
    /// Owning company identifier.
    pub company_id: CompanyId,
    /// Workflow identifier, denormalized for duplicate checks in the group.
    pub workflow_id: WorkflowId,
    /// Bound workflow version identifier.
    pub workflow_version_id: WorkflowVersionId,
    /// Canonical digest of the bound snapshot.
    pub snapshot_hash: HashDigest,
    /// Owning flow group identifier.
    pub flow_group_id: FlowGroupId,
    /// Flow lifecycle status.
    pub status: FlowStatus,
    /// Creation timestamp.
    pub created_at: Timestamp,
    /// Completion timestamp, set when status becomes `Completed`.
    pub completed_at: Option<Timestamp>,
}

// ============================================================================
// SECTION: Truth Records
// ============================================================================

/// Node activation record; one per `(node, iteration)` entry.
///
/// # Invariants
/// - `iteration` starts at 1 and increments on re-entry through a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeActivation {
    /// Activation identifier.
    pub activation_id: NodeActivationId,
    /// Monotonic per-flow sequence in the activation stream.
    pub seq: u64,
    /// Activated node identifier.
    pub node_id: NodeId,
    /// Activation iteration, starting at 1.
    pub iteration: u32,
    /// Activation timestamp.
    pub activated_at: Timestamp,
}

/// Task execution record with a stamp-once outcome.
///
/// # Invariants
/// - Once `outcome` is set, `(outcome, outcome_at, outcome_by)` is final.
/// - Among executions of one `(task, iteration)`, at most one is open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskExecution {
    /// Execution identifier.
    pub execution_id: TaskExecutionId,
    /// Monotonic per-flow sequence in the execution stream.
    pub seq: u64,
    /// Executed task identifier.
    pub task_id: TaskId,
    /// Node activation the start was recorded under.
    pub node_activation_id: NodeActivationId,
    /// Iteration the execution belongs to.
    pub iteration: u32,
    /// Start timestamp.
    pub started_at: Timestamp,
    /// User who started the task.
    pub started_by: UserId,
    /// Recorded outcome name, if stamped.
    pub outcome: Option<OutcomeName>,
    /// Outcome timestamp, if stamped.
    pub outcome_at: Option<Timestamp>,
    /// User who recorded the outcome, if stamped.
    pub outcome_by: Option<UserId>,
    /// Detour resolved by this execution's outcome, if any.
    pub resolved_detour_id: Option<DetourId>,
}

impl TaskExecution {
    /// Returns true while no outcome has been stamped.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.outcome.is_none()
    }
}

/// Evidence attachment bound to exactly one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceAttachment {
    /// Evidence identifier.
    pub evidence_id: EvidenceId,
    /// Monotonic per-flow sequence in the evidence stream.
    pub seq: u64,
    /// Task the evidence is bound to.
    pub task_id: TaskId,
    /// Current-iteration execution at attach time, if one existed.
    pub task_execution_id: Option<TaskExecutionId>,
    /// Evidence payload body.
    pub body: EvidenceBody,
    /// User who attached the evidence.
    pub attached_by: UserId,
    /// Attachment timestamp.
    pub attached_at: Timestamp,
    /// Optional idempotency key deduplicating retries.
    pub idempotency_key: Option<IdempotencyKey>,
}

/// Validity overlay state for a task execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ValidityState {
    /// Execution outcome counts toward completion.
    #[default]
    Valid,
    /// Execution is tainted by an open detour.
    Provisional,
    /// Execution outcome is void.
    Invalid,
}

/// Validity event; latest per execution wins by `(created_at, seq)` descending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidityEvent {
    /// Monotonic per-flow sequence in the validity stream.
    pub seq: u64,
    /// Execution the event applies to.
    pub task_execution_id: TaskExecutionId,
    /// Validity state asserted by the event.
    pub state: ValidityState,
    /// Event timestamp.
    pub created_at: Timestamp,
    /// User who created the event.
    pub created_by: UserId,
    /// Optional reason, usually citing a detour id.
    pub reason: Option<String>,
}

/// Detour kind controlling the blocked-node overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetourType {
    /// Checkpoint is re-opened without blocking downstream nodes.
    NonBlocking,
    /// Checkpoint plus all transitive successors are blocked.
    Blocking,
}

/// Detour lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetourStatus {
    /// Detour is open and awaiting resolution.
    Active,
    /// Detour was resolved by a checkpoint outcome.
    Resolved,
    /// Detour was converted to a remediation workflow.
    Converted,
}

/// Rework scope anchored at a checkpoint node.
///
/// # Invariants
/// - At most one detour per flow is `Active` at any instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetourRecord {
    /// Detour identifier.
    pub detour_id: DetourId,
    /// Monotonic per-flow sequence in the detour stream.
    pub seq: u64,
    /// Checkpoint node being reworked.
    pub checkpoint_node_id: NodeId,
    /// Checkpoint execution tainted as provisional.
    pub checkpoint_task_execution_id: TaskExecutionId,
    /// Node activated directly on resolution, bypassing gate routing.
    pub resume_target_node_id: NodeId,
    /// Detour kind.
    pub detour_type: DetourType,
    /// Detour lifecycle status.
    pub status: DetourStatus,
    /// Count of prior detours at the same checkpoint.
    pub repeat_index: u32,
    /// Optional caller-supplied category label.
    pub category: Option<String>,
    /// User who opened the detour.
    pub opened_by: UserId,
    /// Open timestamp.
    pub opened_at: Timestamp,
    /// Escalation timestamp, if escalated to blocking.
    pub escalated_at: Option<Timestamp>,
    /// User who escalated, if escalated.
    pub escalated_by: Option<UserId>,
    /// Resolution timestamp, if resolved.
    pub resolved_at: Option<Timestamp>,
    /// Conversion timestamp, if converted to remediation.
    pub converted_at: Option<Timestamp>,
    /// User who converted, if converted.
    pub converted_by: Option<UserId>,
}

/// Persistent record of a failed fan-out dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanOutFailure {
    /// Monotonic per-flow sequence in the failure stream.
    pub seq: u64,
    /// Source node whose completion triggered the dispatch.
    pub node_id: NodeId,
    /// Trigger outcome name.
    pub outcome: OutcomeName,
    /// Target workflow of the failing rule, when known.
    pub target_workflow_id: Option<WorkflowId>,
    /// Failure description.
    pub message: String,
    /// Failure timestamp.
    pub failed_at: Timestamp,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Truth log mutation errors.
#[derive(Debug, Error)]
pub enum TruthError {
    /// Outcome is already stamped on the execution.
    #[error("outcome already recorded for execution: {0}")]
    OutcomeAlreadyRecorded(String),
    /// Referenced execution does not exist in this flow.
    #[error("unknown task execution: {0}")]
    ExecutionNotFound(String),
}

// ============================================================================
// SECTION: Flow State Aggregate
// ============================================================================

/// A flow plus its complete, append-only truth log.
///
/// Loaded and saved as a unit; a save is the atomic commit point for every
/// state-changing engine operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowState {
    /// Flow header.
    pub flow: Flow,
    /// Node activation log.
    pub activations: Vec<NodeActivation>,
    /// Task execution log.
    pub executions: Vec<TaskExecution>,
    /// Evidence attachment log.
    pub evidence: Vec<EvidenceAttachment>,
    /// Validity event log.
    pub validity_events: Vec<ValidityEvent>,
    /// Detour record log.
    pub detours: Vec<DetourRecord>,
    /// Fan-out failure log.
    pub fan_out_failures: Vec<FanOutFailure>,
}

impl FlowState {
    /// Creates an empty truth log for a new flow.
    #[must_use]
    pub const fn new(flow: Flow) -> Self {
        Self {
            flow,
            activations: Vec::new(),
            executions: Vec::new(),
            evidence: Vec::new(),
            validity_events: Vec::new(),
            detours: Vec::new(),
            fan_out_failures: Vec::new(),
        }
    }

    /// Appends a node activation record unconditionally.
    pub fn record_node_activation(
        &mut self,
        node_id: NodeId,
        iteration: u32,
        now: Timestamp,
    ) -> NodeActivationId {
        let seq = next_seq(&self.activations);
        let activation_id = NodeActivationId::new(format!("activation-{seq}"));
        self.activations.push(NodeActivation {
            activation_id: activation_id.clone(),
            seq,
            node_id,
            iteration,
            activated_at: now,
        });
        activation_id
    }

    /// Returns the latest activation for a node, highest iteration last.
    #[must_use]
    pub fn latest_activation(&self, node_id: &NodeId) -> Option<&NodeActivation> {
        self.activations
            .iter()
            .filter(|activation| &activation.node_id == node_id)
            .max_by_key(|activation| (activation.iteration, activation.seq))
    }

    /// Appends a new open task execution.
    ///
    /// The caller guarantees no open execution exists for `(task, iteration)`.
    pub fn record_task_start(
        &mut self,
        task_id: TaskId,
        user: UserId,
        node_activation_id: NodeActivationId,
        iteration: u32,
        now: Timestamp,
    ) -> TaskExecutionId {
        let seq = next_seq(&self.executions);
        let execution_id = TaskExecutionId::new(format!("execution-{seq}"));
        self.executions.push(TaskExecution {
            execution_id: execution_id.clone(),
            seq,
            task_id,
            node_activation_id,
            iteration,
            started_at: now,
            started_by: user,
            outcome: None,
            outcome_at: None,
            outcome_by: None,
            resolved_detour_id: None,
        });
        execution_id
    }

    /// Returns the open execution for `(task, iteration)`, if any.
    #[must_use]
    pub fn open_execution(&self, task_id: &TaskId, iteration: u32) -> Option<&TaskExecution> {
        self.executions.iter().find(|execution| {
            &execution.task_id == task_id
                && execution.iteration == iteration
                && execution.is_open()
        })
    }

    /// Returns the most recent execution for `(task, iteration)` by
    /// `(started_at, seq)` descending.
    #[must_use]
    pub fn latest_execution(&self, task_id: &TaskId, iteration: u32) -> Option<&TaskExecution> {
        self.executions
            .iter()
            .filter(|execution| {
                &execution.task_id == task_id && execution.iteration == iteration
            })
            .max_by_key(|execution| (execution.started_at, execution.seq))
    }

    /// Returns the execution with the provided identifier.
    #[must_use]
    pub fn execution(&self, execution_id: &TaskExecutionId) -> Option<&TaskExecution> {
        self.executions.iter().find(|execution| &execution.execution_id == execution_id)
    }

    /// Stamps an outcome onto an open execution.
    ///
    /// # Errors
    ///
    /// Returns [`TruthError::OutcomeAlreadyRecorded`] when the execution is
    /// already stamped and [`TruthError::ExecutionNotFound`]
    /// when the execution does not exist.
    pub fn record_outcome(
        &mut self,
        execution_id: &TaskExecutionId,
        outcome: OutcomeName,
        user: UserId,
        now: Timestamp,
    ) -> Result<(), TruthError> {
        let execution = self
            .executions
            .iter_mut()
            .find(|execution| &execution.execution_id == execution_id)
            .ok_or_else(|| TruthError::ExecutionNotFound(execution_id.to_string()))?;
        if execution.outcome.is_some() {
            return Err(TruthError::OutcomeAlreadyRecorded(execution_id.to_string()));
        }
        execution.outcome = Some(outcome);
        execution.outcome_at = Some(now);
        execution.outcome_by = Some(user);
        Ok(())
    }

    /// Stamps the resolving detour link onto an execution.
    ///
    /// # Errors
    ///
    /// Returns [`TruthError::ExecutionNotFound`] when the execution does not
    /// exist.
    pub fn record_resolved_detour(
        &mut self,
        execution_id: &TaskExecutionId,
        detour_id: DetourId,
    ) -> Result<(), TruthError> {
        let execution = self
            .executions
            .iter_mut()
            .find(|execution| &execution.execution_id == execution_id)
            .ok_or_else(|| TruthError::ExecutionNotFound(execution_id.to_string()))?;
        execution.resolved_detour_id = Some(detour_id);
        Ok(())
    }

    /// Appends an evidence attachment, honouring the idempotency key.
    ///
    /// A duplicate key returns the original attachment id without appending.
    pub fn attach_evidence(
        &mut self,
        task_id: TaskId,
        task_execution_id: Option<TaskExecutionId>,
        body: EvidenceBody,
        user: UserId,
        now: Timestamp,
        idempotency_key: Option<IdempotencyKey>,
    ) -> EvidenceId {
        if let Some(key) = &idempotency_key
            && let Some(existing) = self
                .evidence
                .iter()
                .find(|attachment| attachment.idempotency_key.as_ref() == Some(key))
        {
            return existing.evidence_id.clone();
        }
        let seq = next_seq(&self.evidence);
        let evidence_id = EvidenceId::new(format!("evidence-{seq}"));
        self.evidence.push(EvidenceAttachment {
            evidence_id: evidence_id.clone(),
            seq,
            task_id,
            task_execution_id,
            body,
            attached_by: user,
            attached_at: now,
            idempotency_key,
        });
        evidence_id
    }

    /// Returns all evidence attachments bound to a task.
    pub fn evidence_for_task<'a>(
        &'a self,
        task_id: &'a TaskId,
    ) -> impl Iterator<Item = &'a EvidenceAttachment> {
        self.evidence.iter().filter(move |attachment| &attachment.task_id == task_id)
    }

    /// Appends a validity event.
    pub fn record_validity(
        &mut self,
        task_execution_id: TaskExecutionId,
        state: ValidityState,
        user: UserId,
        now: Timestamp,
        reason: Option<String>,
    ) {
        let seq = next_seq(&self.validity_events);
        self.validity_events.push(ValidityEvent {
            seq,
            task_execution_id,
            state,
            created_at: now,
            created_by: user,
            reason,
        });
    }

    /// Appends a detour record.
    pub fn record_detour(&mut self, record: DetourRecord) {
        self.detours.push(record);
    }

    /// Returns the next sequence number for the detour stream.
    #[must_use]
    pub fn next_detour_seq(&self) -> u64 {
        next_seq(&self.detours)
    }

    /// Returns the detour with the provided identifier.
    #[must_use]
    pub fn detour(&self, detour_id: &DetourId) -> Option<&DetourRecord> {
        self.detours.iter().find(|detour| &detour.detour_id == detour_id)
    }

    /// Returns a mutable reference to the detour with the provided identifier.
    #[must_use]
    pub fn detour_mut(&mut self, detour_id: &DetourId) -> Option<&mut DetourRecord> {
        self.detours.iter_mut().find(|detour| &detour.detour_id == detour_id)
    }

    /// Returns the active detour for the flow, if any.
    #[must_use]
    pub fn active_detour(&self) -> Option<&DetourRecord> {
        self.detours.iter().find(|detour| detour.status == DetourStatus::Active)
    }

    /// Appends a fan-out failure record.
    pub fn record_fan_out_failure(
        &mut self,
        node_id: NodeId,
        outcome: OutcomeName,
        target_workflow_id: Option<WorkflowId>,
        message: String,
        now: Timestamp,
    ) {
        let seq = next_seq(&self.fan_out_failures);
        self.fan_out_failures.push(FanOutFailure {
            seq,
            node_id,
            outcome,
            target_workflow_id,
            message,
            failed_at: now,
        });
    }

    /// Updates the flow status, stamping `completed_at` on completion.
    pub fn update_status(&mut self, status: FlowStatus, now: Timestamp) {
        self.flow.status = status;
        if status == FlowStatus::Completed {
            self.flow.completed_at = Some(now);
        }
    }
}

/// Computes the next sequence number for an append-only list.
const fn next_seq<T>(items: &[T]) -> u64 {
    items.len() as u64 + 1
}
