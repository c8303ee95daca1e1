// crates/flowspec-core/src/runtime/coordinator.rs
// ============================================================================
// Module: FlowSpec Fan-Out Coordinator
// Description: Post-commit fan-out dispatch and cross-flow job provisioning.
// Purpose: Spawn child flows in the same group from triggering outcomes.
// Dependencies: crate::{core, interfaces, runtime::engine}
// ============================================================================

//! ## Overview
//! After a node-completing outcome commits, the coordinator matches fan-out
//! rules `(source node, trigger outcome)` and instantiates the target
//! workflows' latest published versions inside the same flow group. Dispatch
//! is idempotent per `(group, workflow)` and eventual: failures block the
//! triggering flow and persist a failure record, but the stamped outcome is
//! never rolled back. The sale-closed trigger additionally provisions the
//! group job from sale-details and anchor-identity evidence.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::errors::EngineError;
use crate::core::evidence::EvidenceBody;
use crate::core::identifiers::CompanyId;
use crate::core::identifiers::FlowGroupId;
use crate::core::identifiers::FlowId;
use crate::core::identifiers::JobId;
use crate::core::identifiers::NodeId;
use crate::core::identifiers::OutcomeName;
use crate::core::identifiers::TaskId;
use crate::core::identifiers::WorkflowId;
use crate::core::spec::WorkflowSpec;
use crate::core::time::Timestamp;
use crate::core::truth::FlowState;
use crate::core::truth::JobRecord;
use crate::interfaces::FlowGroupDirectory;
use crate::interfaces::StoreError;
use crate::interfaces::TruthStore;
use crate::interfaces::WorkflowRegistry;
use crate::runtime::engine::ProgressionEngine;

// ============================================================================
// SECTION: Coordinator Configuration
// ============================================================================

/// Configuration for the fan-out coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CoordinatorConfig {
    /// Trigger outcome that additionally provisions the group job.
    #[serde(default = "default_sale_closed_outcome")]
    pub sale_closed_outcome: OutcomeName,
    /// Task carrying the group's anchor-identity evidence.
    #[serde(default)]
    pub anchor_task_id: Option<TaskId>,
    /// Deterministic bundle of downstream workflows provisioned with the job.
    #[serde(default)]
    pub job_bundle: Vec<WorkflowId>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            sale_closed_outcome: default_sale_closed_outcome(),
            anchor_task_id: None,
            job_bundle: Vec::new(),
        }
    }
}

/// Returns the default sale-closed trigger outcome name.
fn default_sale_closed_outcome() -> OutcomeName {
    OutcomeName::new("SALE_CLOSED")
}

// ============================================================================
// SECTION: Fan-Out Intent
// ============================================================================

/// Fan-out intent snapshotted inside the triggering transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanOutIntent {
    /// Triggering flow identifier.
    pub flow_id: FlowId,
    /// Group the child flows are created in.
    pub flow_group_id: FlowGroupId,
    /// Owning company identifier.
    pub company_id: CompanyId,
    /// Completed source node.
    pub node_id: NodeId,
    /// Task that recorded the triggering outcome.
    pub task_id: TaskId,
    /// Triggering outcome name.
    pub outcome: OutcomeName,
}

/// Failure captured while dispatching one fan-out intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FanOutProblem {
    /// Target workflow of the failing rule, when known.
    pub target_workflow_id: Option<WorkflowId>,
    /// Failure description.
    pub message: String,
}

// ============================================================================
// SECTION: Dispatch
// ============================================================================

impl<S, G, R> ProgressionEngine<S, G, R>
where
    S: TruthStore,
    G: FlowGroupDirectory,
    R: WorkflowRegistry,
{
    /// Dispatches one fan-out intent post-commit.
    ///
    /// Matching rules run in specification order; the first failure stops
    /// processing and is reported back for failure recording. The sale-closed
    /// trigger additionally runs job provisioning.
    pub(crate) fn dispatch_fan_out(
        &self,
        spec: &WorkflowSpec,
        intent: &FanOutIntent,
        now: Timestamp,
    ) -> Result<Vec<FlowId>, FanOutProblem> {
        let group = self
            .groups
            .load_group(&intent.flow_group_id)
            .map_err(|err| FanOutProblem {
                target_workflow_id: None,
                message: err.to_string(),
            })?
            .ok_or_else(|| FanOutProblem {
                target_workflow_id: None,
                message: format!("unknown flow group: {}", intent.flow_group_id),
            })?;

        let mut spawned = Vec::new();
        for rule in spec.fan_out_rules_for(&intent.node_id, &intent.outcome) {
            match self.create_flow(
                &rule.target_workflow_id,
                &intent.company_id,
                &group.scope,
                Some(&intent.flow_group_id),
                now,
            ) {
                Ok(flow) => spawned.push(flow.flow_id),
                Err(error) => {
                    return Err(FanOutProblem {
                        target_workflow_id: Some(rule.target_workflow_id.clone()),
                        message: error.to_string(),
                    });
                }
            }
        }

        if intent.outcome == self.coordinator.sale_closed_outcome {
            let provisioned = self.provision_job(intent, now).map_err(|error| FanOutProblem {
                target_workflow_id: None,
                message: error.to_string(),
            })?;
            spawned.extend(provisioned);
        }

        Ok(spawned)
    }

    /// Provisions the group job for a sale-closed trigger.
    ///
    /// Loads structured sale-details evidence from the outcome-recording
    /// task, loads the anchor identity from the group's anchor task, verifies
    /// the customer match, creates the job if missing, and instantiates the
    /// configured downstream bundle.
    fn provision_job(
        &self,
        intent: &FanOutIntent,
        now: Timestamp,
    ) -> Result<Vec<FlowId>, EngineError> {
        let mut group = self
            .groups
            .load_group(&intent.flow_group_id)?
            .ok_or_else(|| {
                EngineError::Store(StoreError::Invalid(format!(
                    "unknown flow group: {}",
                    intent.flow_group_id
                )))
            })?;

        let trigger_state = self.load_state(&intent.flow_id)?;
        let sale_details =
            latest_structured_content(&trigger_state, &intent.task_id).ok_or_else(|| {
                EngineError::InvalidEvidenceFormat(format!(
                    "missing structured sale-details evidence on task {}",
                    intent.task_id
                ))
            })?;
        let sale_customer = sale_details
            .get("customerId")
            .and_then(Value::as_str)
            .ok_or(EngineError::CustomerMismatch)?
            .to_string();

        let anchor_task = self
            .coordinator
            .anchor_task_id
            .as_ref()
            .ok_or_else(|| EngineError::AnchorTaskMissing("no anchor task configured".into()))?;
        let anchor_customer = self
            .find_anchor_customer(&intent.flow_group_id, anchor_task)?
            .ok_or_else(|| EngineError::AnchorTaskMissing(anchor_task.to_string()))?;

        if sale_customer != anchor_customer {
            return Err(EngineError::CustomerMismatch);
        }

        if group.job.is_none() {
            group.job = Some(JobRecord {
                job_id: JobId::new(format!("job-{}", group.flow_group_id)),
                customer_id: sale_customer,
                created_at: now,
            });
            self.groups.save_group(&group)?;
        }

        let mut spawned = Vec::new();
        for workflow_id in &self.coordinator.job_bundle {
            let flow = self.create_flow(
                workflow_id,
                &group.company_id,
                &group.scope,
                Some(&group.flow_group_id),
                now,
            )?;
            spawned.push(flow.flow_id);
        }
        Ok(spawned)
    }

    /// Finds the anchor customer id recorded anywhere in the group.
    fn find_anchor_customer(
        &self,
        flow_group_id: &FlowGroupId,
        anchor_task: &TaskId,
    ) -> Result<Option<String>, EngineError> {
        for flow in self.store.flows_in_group(flow_group_id)? {
            let Some(state) = self.store.load_flow(&flow.flow_id)? else {
                continue;
            };
            if let Some(content) = latest_structured_content(&state, anchor_task)
                && let Some(customer) = content.get("customerId").and_then(Value::as_str)
            {
                return Ok(Some(customer.to_string()));
            }
        }
        Ok(None)
    }
}

// ============================================================================
// SECTION: Helper Functions
// ============================================================================

/// Returns the latest structured evidence content bound to a task.
fn latest_structured_content<'a>(state: &'a FlowState, task_id: &TaskId) -> Option<&'a Value> {
    state
        .evidence
        .iter()
        .filter(|attachment| &attachment.task_id == task_id)
        .filter_map(|attachment| match &attachment.body {
            EvidenceBody::Structured {
                content,
            } => Some((attachment.seq, content)),
            _ => None,
        })
        .max_by_key(|(seq, _)| *seq)
        .map(|(_, content)| content)
}
