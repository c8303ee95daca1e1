// crates/flowspec-core/src/runtime/derived.rs
// ============================================================================
// Module: FlowSpec Derived State
// Description: Pure evaluation of node, task, and flow state from snapshot plus truth.
// Purpose: Compute deterministic predicates without persisting anything.
// Dependencies: crate::core
// ============================================================================

//! ## Overview
//! Every function here is pure: it takes the bound snapshot and the flow's
//! truth log and returns values, performing no I/O and reading no clocks.
//! Identical `(snapshot, truth)` inputs yield identical outputs, including
//! ordering. Derived predicates are never persisted; the truth log is the
//! only mutation surface for execution state.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;

use crate::core::errors::EngineError;
use crate::core::errors::ReasonCode;
use crate::core::identifiers::FlowId;
use crate::core::identifiers::GateId;
use crate::core::identifiers::NodeId;
use crate::core::identifiers::OutcomeName;
use crate::core::identifiers::TaskExecutionId;
use crate::core::identifiers::TaskId;
use crate::core::identifiers::WorkflowId;
use crate::core::spec::NodeSpec;
use crate::core::spec::TaskSpec;
use crate::core::spec::WorkflowSpec;
use crate::core::time::Timestamp;
use crate::core::truth::DetourRecord;
use crate::core::truth::DetourStatus;
use crate::core::truth::DetourType;
use crate::core::truth::FlowState;
use crate::core::truth::GroupOutcome;
use crate::core::truth::TaskExecution;
use crate::core::truth::ValidityState;

// ============================================================================
// SECTION: Validity Map
// ============================================================================

/// Folds validity events to the latest state per execution.
///
/// Latest wins by `(created_at, seq)` descending; executions without events
/// default to [`ValidityState::Valid`].
#[must_use]
pub fn validity_map(state: &FlowState) -> BTreeMap<TaskExecutionId, ValidityState> {
    let mut latest: BTreeMap<TaskExecutionId, (Timestamp, u64, ValidityState)> = BTreeMap::new();
    for event in &state.validity_events {
        let candidate = (event.created_at, event.seq, event.state);
        match latest.get(&event.task_execution_id) {
            Some((at, seq, _)) if (*at, *seq) >= (event.created_at, event.seq) => {}
            _ => {
                latest.insert(event.task_execution_id.clone(), candidate);
            }
        }
    }
    latest.into_iter().map(|(id, (_, _, validity))| (id, validity)).collect()
}

/// Returns the effective validity of one execution.
#[must_use]
pub fn execution_validity(
    validity: &BTreeMap<TaskExecutionId, ValidityState>,
    execution_id: &TaskExecutionId,
) -> ValidityState {
    validity.get(execution_id).copied().unwrap_or_default()
}

// ============================================================================
// SECTION: Blocked Nodes
// ============================================================================

/// Computes the blocked-node set from active blocking detours.
///
/// Each active blocking detour contributes its checkpoint node plus the
/// checkpoint's precomputed transitive successors. The checkpoint itself
/// remains actionable for its own resolution; that exception is applied by
/// the actionability predicate, not here.
#[must_use]
pub fn blocked_nodes(spec: &WorkflowSpec, state: &FlowState) -> BTreeSet<NodeId> {
    let mut blocked = BTreeSet::new();
    for detour in &state.detours {
        if detour.status != DetourStatus::Active || detour.detour_type != DetourType::Blocking {
            continue;
        }
        blocked.insert(detour.checkpoint_node_id.clone());
        if let Some(node) = spec.node(&detour.checkpoint_node_id) {
            blocked.extend(node.transitive_successors.iter().cloned());
        }
    }
    blocked
}

// ============================================================================
// SECTION: Node Predicates
// ============================================================================

/// Returns the node's current iteration, defaulting to 1 before activation.
#[must_use]
pub fn current_iteration(state: &FlowState, node_id: &NodeId) -> u32 {
    state.latest_activation(node_id).map_or(1, |activation| activation.iteration)
}

/// Returns true when any task of the node has been started this iteration.
#[must_use]
pub fn node_started(node: &NodeSpec, state: &FlowState, iteration: u32) -> bool {
    node.tasks.iter().any(|task| {
        state
            .executions
            .iter()
            .any(|execution| execution.task_id == task.task_id && execution.iteration == iteration)
    })
}

/// Returns true when a task has a stamped, currently-valid outcome.
fn task_has_valid_outcome(
    state: &FlowState,
    validity: &BTreeMap<TaskExecutionId, ValidityState>,
    task_id: &TaskId,
    iteration: u32,
) -> bool {
    state.executions.iter().any(|execution| {
        &execution.task_id == task_id
            && execution.iteration == iteration
            && execution.outcome.is_some()
            && execution_validity(validity, &execution.execution_id) == ValidityState::Valid
    })
}

/// Evaluates the node's completion rule at the provided iteration.
///
/// Only executions whose latest validity is valid and whose outcome is
/// stamped count toward completion.
#[must_use]
pub fn node_complete(
    node: &NodeSpec,
    state: &FlowState,
    validity: &BTreeMap<TaskExecutionId, ValidityState>,
    iteration: u32,
) -> bool {
    if node.tasks.is_empty() {
        return false;
    }
    match node.completion_rule {
        crate::core::spec::CompletionRule::AnyTaskDone => node
            .tasks
            .iter()
            .any(|task| task_has_valid_outcome(state, validity, &task.task_id, iteration)),
        _ => node
            .required_task_ids()
            .iter()
            .all(|task_id| task_has_valid_outcome(state, validity, task_id, iteration)),
    }
}

// ============================================================================
// SECTION: Task Actionability
// ============================================================================

/// One actionable task in canonical ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionableTask {
    /// Owning flow identifier.
    pub flow_id: FlowId,
    /// Node the task belongs to.
    pub node_id: NodeId,
    /// Actionable task identifier.
    pub task_id: TaskId,
    /// Current node iteration.
    pub iteration: u32,
}

/// Returns true when an active detour re-opens this task's checkpoint.
fn active_detour_reopens_task(
    state: &FlowState,
    node_id: &NodeId,
    task_id: &TaskId,
) -> bool {
    state.detours.iter().any(|detour| {
        detour.status == DetourStatus::Active
            && &detour.checkpoint_node_id == node_id
            && state
                .execution(&detour.checkpoint_task_execution_id)
                .is_some_and(|execution| &execution.task_id == task_id)
    })
}

/// Returns true when the node is the checkpoint of any active detour.
fn node_is_active_checkpoint(state: &FlowState, node_id: &NodeId) -> bool {
    state.detours.iter().any(|detour| {
        detour.status == DetourStatus::Active && &detour.checkpoint_node_id == node_id
    })
}

/// Evaluates the full actionability predicate for one task.
///
/// The task is actionable iff all of the following hold:
/// 1. the node has a live activation;
/// 2. the node is not complete this iteration;
/// 3. the task has no execution this iteration, or its latest execution is
///    still open, or the stamped execution is re-opened (invalid, or an
///    active detour references it as checkpoint);
/// 4. the node is not blocked, unless it is itself the checkpoint of an
///    active detour (self-block exception);
/// 5. no inbound gate source node is blocked (join propagation);
/// 6. every cross-flow dependency is satisfied by a group outcome.
#[must_use]
pub fn task_actionable(
    spec: &WorkflowSpec,
    state: &FlowState,
    node: &NodeSpec,
    task: &TaskSpec,
    group_outcomes: &[GroupOutcome],
) -> bool {
    let validity = validity_map(state);
    let blocked = blocked_nodes(spec, state);
    task_actionable_inner(spec, state, node, task, group_outcomes, &validity, &blocked)
}

/// Actionability with precomputed validity and blocked sets.
fn task_actionable_inner(
    spec: &WorkflowSpec,
    state: &FlowState,
    node: &NodeSpec,
    task: &TaskSpec,
    group_outcomes: &[GroupOutcome],
    validity: &BTreeMap<TaskExecutionId, ValidityState>,
    blocked: &BTreeSet<NodeId>,
) -> bool {
    let Some(activation) = state.latest_activation(&node.node_id) else {
        return false;
    };
    let iteration = activation.iteration;

    if node_complete(node, state, validity, iteration) {
        return false;
    }

    if let Some(latest) = state.latest_execution(&task.task_id, iteration)
        && !latest.is_open()
        && execution_validity(validity, &latest.execution_id) != ValidityState::Invalid
        && !active_detour_reopens_task(state, &node.node_id, &task.task_id)
    {
        return false;
    }

    if blocked.contains(&node.node_id) && !node_is_active_checkpoint(state, &node.node_id) {
        return false;
    }

    for gate in spec.gates_into(&node.node_id) {
        if blocked.contains(&gate.source_node_id) {
            return false;
        }
    }

    for dependency in &task.cross_flow_dependencies {
        let satisfied = group_outcomes.iter().any(|outcome| {
            outcome.workflow_id == dependency.source_workflow_id
                && outcome.task_id.as_str() == dependency.task_suffix()
                && outcome.outcome == dependency.required_outcome
        });
        if !satisfied {
            return false;
        }
    }

    true
}

/// Collects every actionable task for a flow in canonical order.
///
/// Canonical sort: `(flow_id, task_id, iteration)` ascending.
#[must_use]
pub fn actionable_tasks(
    spec: &WorkflowSpec,
    state: &FlowState,
    group_outcomes: &[GroupOutcome],
) -> Vec<ActionableTask> {
    let validity = validity_map(state);
    let blocked = blocked_nodes(spec, state);
    let mut tasks = Vec::new();
    for node in &spec.nodes {
        let Some(activation) = state.latest_activation(&node.node_id) else {
            continue;
        };
        if node_complete(node, state, &validity, activation.iteration) {
            continue;
        }
        for task in node.ordered_tasks() {
            if task_actionable_inner(spec, state, node, task, group_outcomes, &validity, &blocked)
            {
                tasks.push(ActionableTask {
                    flow_id: state.flow.flow_id.clone(),
                    node_id: node.node_id.clone(),
                    task_id: task.task_id.clone(),
                    iteration: activation.iteration,
                });
            }
        }
    }
    tasks.sort_by(|a, b| {
        (&a.flow_id, &a.task_id, a.iteration).cmp(&(&b.flow_id, &b.task_id, b.iteration))
    });
    tasks
}

// ============================================================================
// SECTION: Refusal Explainer
// ============================================================================

/// Explains a refused task start with exactly one reason code.
///
/// # Errors
///
/// Returns [`EngineError::CoverageGap`] when no reason applies; that is an
/// engine bug, not a user-facing condition.
pub fn explain_start_refusal(
    spec: &WorkflowSpec,
    state: &FlowState,
    node: &NodeSpec,
    task: &TaskSpec,
    group_outcomes: &[GroupOutcome],
) -> Result<ReasonCode, EngineError> {
    let validity = validity_map(state);
    let blocked = blocked_nodes(spec, state);

    let Some(activation) = state.latest_activation(&node.node_id) else {
        return Ok(ReasonCode::NodeNotActive);
    };
    let iteration = activation.iteration;

    if node_complete(node, state, &validity, iteration) {
        return Ok(ReasonCode::NodeComplete);
    }

    if let Some(latest) = state.latest_execution(&task.task_id, iteration)
        && !latest.is_open()
        && execution_validity(&validity, &latest.execution_id) != ValidityState::Invalid
        && !active_detour_reopens_task(state, &node.node_id, &task.task_id)
    {
        return Ok(ReasonCode::OutcomeAlreadyRecorded);
    }

    if blocked.contains(&node.node_id) && !node_is_active_checkpoint(state, &node.node_id) {
        return Ok(ReasonCode::ActiveBlockingDetour);
    }

    if spec.gates_into(&node.node_id).any(|gate| blocked.contains(&gate.source_node_id)) {
        return Ok(ReasonCode::JoinBlocked);
    }

    for dependency in &task.cross_flow_dependencies {
        let satisfied = group_outcomes.iter().any(|outcome| {
            outcome.workflow_id == dependency.source_workflow_id
                && outcome.task_id.as_str() == dependency.task_suffix()
                && outcome.outcome == dependency.required_outcome
        });
        if !satisfied {
            return Ok(ReasonCode::CrossFlowDepMissing);
        }
    }

    Err(EngineError::CoverageGap(format!(
        "refusal for task {} matched no reason code",
        task.task_id
    )))
}

// ============================================================================
// SECTION: Flow Completion
// ============================================================================

/// Evaluates whether the flow is complete.
///
/// A flow is complete iff no detour is active, the workflow terminates, every
/// activated node is valid-complete at its latest iteration, and every
/// non-terminal gate triggered by a valid outcome leads to an activated
/// target node.
#[must_use]
pub fn flow_complete(spec: &WorkflowSpec, state: &FlowState) -> bool {
    if spec.non_terminating || state.active_detour().is_some() {
        return false;
    }

    let validity = validity_map(state);
    let activated: BTreeSet<&NodeId> =
        state.activations.iter().map(|activation| &activation.node_id).collect();
    if activated.is_empty() {
        return false;
    }

    for node_id in &activated {
        let Some(node) = spec.node(node_id) else {
            return false;
        };
        let iteration = current_iteration(state, node_id);
        if !node_complete(node, state, &validity, iteration) {
            return false;
        }
    }

    for execution in &state.executions {
        let Some(outcome) = &execution.outcome else {
            continue;
        };
        if execution_validity(&validity, &execution.execution_id) != ValidityState::Valid {
            continue;
        }
        let Some((node, _)) = spec.task(&execution.task_id) else {
            continue;
        };
        if let Some(gate) = spec.gate_for(&node.node_id, outcome)
            && let Some(target) = &gate.target_node_id
            && !activated.contains(target)
        {
            return false;
        }
    }

    true
}

// ============================================================================
// SECTION: Gate Evaluation
// ============================================================================

/// One routing decision produced by gate evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateRoute {
    /// Evaluated gate identifier.
    pub gate_id: GateId,
    /// Outcome name that triggered the gate.
    pub outcome: OutcomeName,
    /// Routed target node; `None` is terminal.
    pub target_node_id: Option<NodeId>,
}

/// Evaluates gates for a completed node at the provided iteration.
///
/// Collects the unique set of valid outcome names recorded at the node this
/// iteration, sorted for determinism, and resolves each through its gate.
///
/// # Errors
///
/// Returns [`EngineError::CoverageGap`] when a recorded outcome has no gate;
/// publish validation makes that impossible for validated snapshots.
pub fn evaluate_gates(
    spec: &WorkflowSpec,
    state: &FlowState,
    node: &NodeSpec,
    iteration: u32,
) -> Result<Vec<GateRoute>, EngineError> {
    let validity = validity_map(state);
    let mut names: BTreeSet<&OutcomeName> = BTreeSet::new();
    for execution in &state.executions {
        if execution.iteration == iteration
            && execution_validity(&validity, &execution.execution_id) == ValidityState::Valid
            && node.tasks.iter().any(|task| task.task_id == execution.task_id)
            && let Some(outcome) = &execution.outcome
        {
            names.insert(outcome);
        }
    }

    let mut routes = Vec::with_capacity(names.len());
    for name in names {
        let Some(gate) = spec.gate_for(&node.node_id, name) else {
            return Err(EngineError::CoverageGap(format!(
                "no gate for node {} and outcome {name}",
                node.node_id
            )));
        };
        routes.push(GateRoute {
            gate_id: gate.gate_id.clone(),
            outcome: name.clone(),
            target_node_id: gate.target_node_id.clone(),
        });
    }
    Ok(routes)
}

// ============================================================================
// SECTION: Group Outcomes
// ============================================================================

/// Collects the valid, stamped outcomes one flow contributes to its group.
///
/// Store implementations aggregate this per group for cross-flow dependency
/// evaluation.
#[must_use]
pub fn collect_group_outcomes(workflow_id: &WorkflowId, state: &FlowState) -> Vec<GroupOutcome> {
    let validity = validity_map(state);
    let mut outcomes = Vec::new();
    for execution in &state.executions {
        if let Some(outcome) = &execution.outcome
            && execution_validity(&validity, &execution.execution_id) == ValidityState::Valid
        {
            let row = GroupOutcome {
                workflow_id: workflow_id.clone(),
                task_id: execution.task_id.clone(),
                outcome: outcome.clone(),
            };
            if !outcomes.contains(&row) {
                outcomes.push(row);
            }
        }
    }
    outcomes
}

// ============================================================================
// SECTION: SLA Helper
// ============================================================================

/// Computes the SLA deadline for an execution from the task's default SLA.
#[must_use]
pub fn sla_deadline(task: &TaskSpec, execution: &TaskExecution) -> Option<Timestamp> {
    task.default_sla_hours.map(|hours| execution.started_at.plus_hours(hours))
}

// ============================================================================
// SECTION: Detour Helpers
// ============================================================================

/// Counts prior detours anchored at a checkpoint node (repeat index).
#[must_use]
pub fn detour_repeat_index(state: &FlowState, checkpoint_node_id: &NodeId) -> u32 {
    let count = state
        .detours
        .iter()
        .filter(|detour| &detour.checkpoint_node_id == checkpoint_node_id)
        .count();
    u32::try_from(count).unwrap_or(u32::MAX)
}

/// Returns the active detour anchored at a checkpoint node, if any.
#[must_use]
pub fn active_detour_at<'a>(
    state: &'a FlowState,
    checkpoint_node_id: &NodeId,
) -> Option<&'a DetourRecord> {
    state.detours.iter().find(|detour| {
        detour.status == DetourStatus::Active && &detour.checkpoint_node_id == checkpoint_node_id
    })
}
