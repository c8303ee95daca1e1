// crates/flowspec-core/src/runtime/detour.rs
// ============================================================================
// Module: FlowSpec Detour Overlay
// Description: Open, escalate, and convert rework scopes on a flow.
// Purpose: Taint checkpoint outcomes and steer resolution through stable resume.
// Dependencies: crate::{core, interfaces, runtime::engine}
// ============================================================================

//! ## Overview
//! A detour re-opens a checkpoint task by tainting its stamped execution as
//! provisional. At most one detour per flow may be active at a time. Blocking
//! detours additionally block the checkpoint's transitive successors, with
//! the checkpoint itself exempt so its own resolution stays actionable.
//! Resolution happens through `record_outcome` with the detour id: gate
//! routing is skipped and the resume target is activated directly.

// ============================================================================
// SECTION: Imports
// ============================================================================

use crate::core::errors::EngineError;
use crate::core::identifiers::DetourId;
use crate::core::identifiers::FlowId;
use crate::core::identifiers::NodeId;
use crate::core::identifiers::TaskExecutionId;
use crate::core::identifiers::UserId;
use crate::core::time::Timestamp;
use crate::core::truth::DetourRecord;
use crate::core::truth::DetourStatus;
use crate::core::truth::DetourType;
use crate::core::truth::ValidityState;
use crate::interfaces::FlowGroupDirectory;
use crate::interfaces::TruthStore;
use crate::interfaces::WorkflowRegistry;
use crate::runtime::derived;
use crate::runtime::engine::ProgressionEngine;

// ============================================================================
// SECTION: Detour Operations
// ============================================================================

impl<S, G, R> ProgressionEngine<S, G, R>
where
    S: TruthStore,
    G: FlowGroupDirectory,
    R: WorkflowRegistry,
{
    /// Opens a detour anchored at a checkpoint execution.
    ///
    /// The checkpoint execution is tainted provisional, which makes the
    /// checkpoint task actionable again under the re-open rules.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NestedDetourForbidden`] when another detour is
    /// active, and [`EngineError::InvalidDetour`] when the checkpoint, resume
    /// target, or execution reference is not part of this flow.
    #[allow(
        clippy::too_many_arguments,
        reason = "The open-detour contract names every field explicitly."
    )]
    pub fn open_detour(
        &self,
        flow_id: &FlowId,
        checkpoint_node_id: &NodeId,
        resume_target_node_id: &NodeId,
        checkpoint_task_execution_id: &TaskExecutionId,
        detour_type: DetourType,
        category: Option<String>,
        user: &UserId,
        now: Timestamp,
    ) -> Result<DetourId, EngineError> {
        let lock = self.flow_guard(flow_id)?;
        let _held = lock.lock().map_err(|_| {
            EngineError::Store(crate::interfaces::StoreError::Conflict(format!(
                "flow lock unavailable: {flow_id}"
            )))
        })?;

        let mut state = self.load_state(flow_id)?;
        if state.flow.status == crate::core::truth::FlowStatus::Blocked {
            return Err(EngineError::FlowBlocked(flow_id.to_string()));
        }
        let version = self.snapshot_for(&state.flow)?;
        let spec = &version.snapshot;

        if let Some(active) = state.active_detour() {
            return Err(EngineError::NestedDetourForbidden {
                active_detour_id: active.detour_id.to_string(),
            });
        }

        let Some(checkpoint) = spec.node(checkpoint_node_id) else {
            return Err(EngineError::InvalidDetour(format!(
                "unknown checkpoint node: {checkpoint_node_id}"
            )));
        };
        if spec.node(resume_target_node_id).is_none() {
            return Err(EngineError::InvalidDetour(format!(
                "unknown resume target: {resume_target_node_id}"
            )));
        }
        let Some(execution) = state.execution(checkpoint_task_execution_id) else {
            return Err(EngineError::InvalidDetour(format!(
                "unknown checkpoint execution: {checkpoint_task_execution_id}"
            )));
        };
        if !checkpoint.tasks.iter().any(|task| task.task_id == execution.task_id) {
            return Err(EngineError::InvalidDetour(format!(
                "execution {checkpoint_task_execution_id} does not belong to node \
                 {checkpoint_node_id}"
            )));
        }

        let repeat_index = derived::detour_repeat_index(&state, checkpoint_node_id);
        let seq = state.next_detour_seq();
        let detour_id = DetourId::new(format!("detour-{seq}"));
        state.record_detour(DetourRecord {
            detour_id: detour_id.clone(),
            seq,
            checkpoint_node_id: checkpoint_node_id.clone(),
            checkpoint_task_execution_id: checkpoint_task_execution_id.clone(),
            resume_target_node_id: resume_target_node_id.clone(),
            detour_type,
            status: DetourStatus::Active,
            repeat_index,
            category,
            opened_by: user.clone(),
            opened_at: now,
            escalated_at: None,
            escalated_by: None,
            resolved_at: None,
            converted_at: None,
            converted_by: None,
        });
        state.record_validity(
            checkpoint_task_execution_id.clone(),
            ValidityState::Provisional,
            user.clone(),
            now,
            Some(format!("tainted by detour {detour_id}")),
        );

        self.store.save_flow(&state)?;
        Ok(detour_id)
    }

    /// Escalates an active detour to blocking.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidDetour`] when the detour is unknown or
    /// not active.
    pub fn escalate_detour(
        &self,
        flow_id: &FlowId,
        detour_id: &DetourId,
        user: &UserId,
        now: Timestamp,
    ) -> Result<(), EngineError> {
        self.mutate_active_detour(flow_id, detour_id, |record| {
            record.detour_type = DetourType::Blocking;
            record.escalated_at = Some(now);
            record.escalated_by = Some(user.clone());
        })
    }

    /// Converts an active detour to a remediation workflow.
    ///
    /// A converted detour can no longer be resolved with its id.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidDetour`] when the detour is unknown or
    /// not active.
    pub fn trigger_remediation(
        &self,
        flow_id: &FlowId,
        detour_id: &DetourId,
        user: &UserId,
        now: Timestamp,
    ) -> Result<(), EngineError> {
        self.mutate_active_detour(flow_id, detour_id, |record| {
            record.status = DetourStatus::Converted;
            record.converted_at = Some(now);
            record.converted_by = Some(user.clone());
        })
    }

    /// Applies a mutation to an active detour inside one transaction.
    fn mutate_active_detour(
        &self,
        flow_id: &FlowId,
        detour_id: &DetourId,
        apply: impl FnOnce(&mut DetourRecord),
    ) -> Result<(), EngineError> {
        let lock = self.flow_guard(flow_id)?;
        let _held = lock.lock().map_err(|_| {
            EngineError::Store(crate::interfaces::StoreError::Conflict(format!(
                "flow lock unavailable: {flow_id}"
            )))
        })?;

        let mut state = self.load_state(flow_id)?;
        let Some(record) = state.detour_mut(detour_id) else {
            return Err(EngineError::InvalidDetour(detour_id.to_string()));
        };
        if record.status != DetourStatus::Active {
            return Err(EngineError::InvalidDetour(detour_id.to_string()));
        }
        apply(record);
        self.store.save_flow(&state)?;
        Ok(())
    }
}
