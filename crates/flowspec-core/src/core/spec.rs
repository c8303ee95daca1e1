// crates/flowspec-core/src/core/spec.rs
// ============================================================================
// Module: FlowSpec Workflow Specification
// Description: Workflow, node, task, outcome, and gate specifications.
// Purpose: Define canonical workflow specs with validation and snapshot helpers.
// Dependencies: crate::core::{evidence, identifiers}, serde
// ============================================================================

//! ## Overview
//! Workflow specifications define the directed graph executed by the
//! progression engine: nodes containing tasks with named outcomes, and gates
//! routing between nodes keyed by `(source node, outcome name)`. A published
//! snapshot is a deep copy of the draft with `transitive_successors`
//! precomputed per node; it is immutable thereafter and shared by reference
//! across all flows bound to it.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::VecDeque;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::evidence::EvidenceSchema;
use crate::core::hashing::HashDigest;
use crate::core::identifiers::GateId;
use crate::core::identifiers::NodeId;
use crate::core::identifiers::OutcomeId;
use crate::core::identifiers::OutcomeName;
use crate::core::identifiers::TaskId;
use crate::core::identifiers::WorkflowId;
use crate::core::identifiers::WorkflowVersionId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Workflow Specification
// ============================================================================

/// Canonical workflow specification.
///
/// The same shape serves as the editable draft definition (empty
/// `transitive_successors`) and as the published snapshot (successors
/// computed, then frozen).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSpec {
    /// Workflow identifier shared by all versions.
    pub workflow_id: WorkflowId,
    /// Human-readable workflow name.
    pub name: String,
    /// Monotonic version number assigned at publish.
    pub version: u32,
    /// Indicates the workflow never reaches a terminal state.
    pub non_terminating: bool,
    /// Node specifications in deterministic order.
    pub nodes: Vec<NodeSpec>,
    /// Gate specifications routing between nodes.
    pub gates: Vec<GateSpec>,
    /// Fan-out rules triggering child flows in the same group.
    pub fan_out_rules: Vec<FanOutRule>,
}

impl WorkflowSpec {
    /// Validates the structural invariants every snapshot must satisfy.
    ///
    /// Publish-time validation layers the registry-dependent categories on
    /// top of this check.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError`] when validation fails.
    pub fn validate(&self) -> Result<(), SpecError> {
        if self.nodes.is_empty() {
            return Err(SpecError::MissingNodes);
        }

        ensure_unique_node_ids(&self.nodes)?;
        ensure_unique_task_ids(&self.nodes)?;
        ensure_unique_outcome_names(&self.nodes)?;
        ensure_unique_gate_keys(&self.gates)?;
        ensure_gate_endpoints_exist(&self.nodes, &self.gates)?;
        ensure_entry_node_exists(&self.nodes)?;

        Ok(())
    }

    /// Returns the node specification for the provided node id.
    #[must_use]
    pub fn node(&self, node_id: &NodeId) -> Option<&NodeSpec> {
        self.nodes.iter().find(|node| &node.node_id == node_id)
    }

    /// Locates a task and its owning node by task id.
    #[must_use]
    pub fn task(&self, task_id: &TaskId) -> Option<(&NodeSpec, &TaskSpec)> {
        self.nodes.iter().find_map(|node| {
            node.tasks.iter().find(|task| &task.task_id == task_id).map(|task| (node, task))
        })
    }

    /// Returns the gate keyed by `(source node, outcome name)`, if declared.
    ///
    /// Validated specs carry at most one gate per key.
    #[must_use]
    pub fn gate_for(&self, node_id: &NodeId, outcome: &OutcomeName) -> Option<&GateSpec> {
        self.gates
            .iter()
            .find(|gate| &gate.source_node_id == node_id && &gate.outcome_name == outcome)
    }

    /// Returns all gates whose source is the provided node.
    pub fn gates_from<'a>(&'a self, node_id: &'a NodeId) -> impl Iterator<Item = &'a GateSpec> {
        self.gates.iter().filter(move |gate| &gate.source_node_id == node_id)
    }

    /// Returns all gates whose target is the provided node.
    pub fn gates_into<'a>(&'a self, node_id: &'a NodeId) -> impl Iterator<Item = &'a GateSpec> {
        self.gates.iter().filter(move |gate| gate.target_node_id.as_ref() == Some(node_id))
    }

    /// Returns fan-out rules matching `(source node, trigger outcome)`.
    pub fn fan_out_rules_for<'a>(
        &'a self,
        node_id: &'a NodeId,
        outcome: &'a OutcomeName,
    ) -> impl Iterator<Item = &'a FanOutRule> {
        self.fan_out_rules.iter().filter(move |rule| {
            &rule.source_node_id == node_id && &rule.trigger_outcome == outcome
        })
    }

    /// Computes `transitive_successors` for every node and freezes them in.
    ///
    /// Successor sets are built by BFS over non-terminal gates and sorted by
    /// node id for deterministic snapshots.
    #[must_use]
    pub fn with_transitive_successors(mut self) -> Self {
        let successors = compute_transitive_successors(&self.nodes, &self.gates);
        for node in &mut self.nodes {
            node.transitive_successors =
                successors.get(&node.node_id).cloned().unwrap_or_default();
        }
        self
    }

    /// Hydrates an editable draft definition from a published snapshot.
    ///
    /// The semantic graph is preserved; precomputed successor sets are
    /// cleared because they are recomputed at the next publish.
    #[must_use]
    pub fn hydrate(snapshot: &Self) -> Self {
        let mut draft = snapshot.clone();
        for node in &mut draft.nodes {
            node.transitive_successors.clear();
        }
        draft
    }
}

// ============================================================================
// SECTION: Published Versions
// ============================================================================

/// Immutable published workflow version.
///
/// # Invariants
/// - `snapshot` is frozen at publish; `snapshot_hash` is its canonical digest.
/// - Running flows bound to this version are unaffected by later drafts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowVersion {
    /// Version identifier.
    pub version_id: WorkflowVersionId,
    /// Workflow identifier shared by all versions.
    pub workflow_id: WorkflowId,
    /// Frozen snapshot with precomputed successors.
    pub snapshot: WorkflowSpec,
    /// Canonical digest of `snapshot`.
    pub snapshot_hash: HashDigest,
    /// Publish timestamp.
    pub published_at: Timestamp,
}

// ============================================================================
// SECTION: Node Specifications
// ============================================================================

/// Completion rule deciding when a node counts as done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionRule {
    /// Every task in the node must have a valid outcome.
    AllTasksDone,
    /// At least one task in the node must have a valid outcome.
    AnyTaskDone,
    /// Every task listed in `specific_tasks` must have a valid outcome.
    SpecificTasksDone,
}

/// Node specification containing tasks and completion policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Node identifier.
    pub node_id: NodeId,
    /// Human-readable node name.
    pub name: String,
    /// Indicates the node activates when a flow is instantiated.
    pub entry: bool,
    /// Completion rule for the node.
    pub completion_rule: CompletionRule,
    /// Task ids referenced by [`CompletionRule::SpecificTasksDone`].
    pub specific_tasks: Vec<TaskId>,
    /// Task specifications owned by the node.
    pub tasks: Vec<TaskSpec>,
    /// Nodes reachable from this node via gates, precomputed at publish.
    pub transitive_successors: Vec<NodeId>,
}

impl NodeSpec {
    /// Returns the node's tasks ordered by `(display_order, task_id)`.
    #[must_use]
    pub fn ordered_tasks(&self) -> Vec<&TaskSpec> {
        let mut tasks: Vec<&TaskSpec> = self.tasks.iter().collect();
        tasks.sort_by(|a, b| {
            a.display_order.cmp(&b.display_order).then_with(|| a.task_id.cmp(&b.task_id))
        });
        tasks
    }

    /// Returns the task ids the completion rule actually requires.
    ///
    /// An empty `specific_tasks` list falls back to all tasks.
    #[must_use]
    pub fn required_task_ids(&self) -> Vec<&TaskId> {
        match self.completion_rule {
            CompletionRule::SpecificTasksDone if !self.specific_tasks.is_empty() => {
                self.specific_tasks.iter().collect()
            }
            _ => self.tasks.iter().map(|task| &task.task_id).collect(),
        }
    }
}

// ============================================================================
// SECTION: Task Specifications
// ============================================================================

/// Task specification with declared outcomes and evidence policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Task identifier.
    pub task_id: TaskId,
    /// Human-readable task name.
    pub name: String,
    /// Operator instructions shown by consuming surfaces.
    pub instructions: String,
    /// Display ordering hint within the node.
    pub display_order: u32,
    /// Indicates an outcome may only be recorded with validating evidence.
    pub evidence_required: bool,
    /// Evidence schema the attachments must satisfy, if any.
    pub evidence_schema: Option<EvidenceSchema>,
    /// Default SLA in hours from task start, if any.
    pub default_sla_hours: Option<u32>,
    /// Declared outcomes; names are unique within the task.
    pub outcomes: Vec<OutcomeSpec>,
    /// Cross-flow dependencies gating actionability.
    pub cross_flow_dependencies: Vec<CrossFlowDependency>,
}

impl TaskSpec {
    /// Returns true when the task declares the provided outcome name.
    #[must_use]
    pub fn declares_outcome(&self, name: &OutcomeName) -> bool {
        self.outcomes.iter().any(|outcome| &outcome.name == name)
    }
}

/// Declared task outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeSpec {
    /// Outcome identifier.
    pub outcome_id: OutcomeId,
    /// Outcome name, unique per task and keying the node's gate space.
    pub name: OutcomeName,
}

// ============================================================================
// SECTION: Gate Specifications
// ============================================================================

/// Gate routing record keyed by `(source node, outcome name)`.
///
/// # Invariants
/// - At most one gate per `(source_node_id, outcome_name)`.
/// - `target_node_id == None` marks a terminal path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateSpec {
    /// Gate identifier.
    pub gate_id: GateId,
    /// Source node identifier.
    pub source_node_id: NodeId,
    /// Outcome name triggering the gate.
    pub outcome_name: OutcomeName,
    /// Target node identifier; `None` is terminal.
    pub target_node_id: Option<NodeId>,
}

// ============================================================================
// SECTION: Cross-Flow Dependencies
// ============================================================================

/// Cross-flow dependency gating a task on an outcome elsewhere in the group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossFlowDependency {
    /// Workflow the outcome must originate from.
    pub source_workflow_id: WorkflowId,
    /// Source task path in `nodeId.taskId` form.
    pub source_task_path: String,
    /// Outcome name the source task must have recorded.
    pub required_outcome: OutcomeName,
}

impl CrossFlowDependency {
    /// Returns the task-id suffix of `source_task_path`.
    ///
    /// Matching compares only the suffix after the last `.`; paths without a
    /// separator match on the whole string. Known fragility: two nodes
    /// containing an identically-named task are indistinguishable here.
    #[must_use]
    pub fn task_suffix(&self) -> &str {
        self.source_task_path.rsplit('.').next().unwrap_or(self.source_task_path.as_str())
    }
}

// ============================================================================
// SECTION: Fan-Out Rules
// ============================================================================

/// Fan-out rule instantiating a child workflow in the same flow group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanOutRule {
    /// Source node whose completion triggers the rule.
    pub source_node_id: NodeId,
    /// Outcome name triggering the rule.
    pub trigger_outcome: OutcomeName,
    /// Workflow to instantiate.
    pub target_workflow_id: WorkflowId,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Workflow specification validation errors.
#[derive(Debug, Error)]
pub enum SpecError {
    /// Specification contains no nodes.
    #[error("workflow spec must define at least one node")]
    MissingNodes,
    /// Specification declares no entry node.
    #[error("workflow spec must declare at least one entry node")]
    MissingEntryNode,
    /// Duplicate node identifiers detected.
    #[error("duplicate node identifier: {0}")]
    DuplicateNodeId(String),
    /// Duplicate task identifiers detected.
    #[error("duplicate task identifier: {0}")]
    DuplicateTaskId(String),
    /// Duplicate outcome names within a task.
    #[error("duplicate outcome name {name} in task {task_id}")]
    DuplicateOutcomeName {
        /// Task declaring the duplicate.
        task_id: String,
        /// Duplicated outcome name.
        name: String,
    },
    /// Two gates share a `(source node, outcome name)` key.
    #[error("duplicate gate for node {node_id} and outcome {outcome}")]
    DuplicateGateKey {
        /// Source node of the colliding gates.
        node_id: String,
        /// Outcome name of the colliding gates.
        outcome: String,
    },
    /// Gate references a node that is not defined.
    #[error("gate {0} references unknown node: {1}")]
    UnknownGateNode(String, String),
}

// ============================================================================
// SECTION: Validation Helpers
// ============================================================================

/// Ensures node identifiers are unique within the spec.
fn ensure_unique_node_ids(nodes: &[NodeSpec]) -> Result<(), SpecError> {
    for (index, node) in nodes.iter().enumerate() {
        if nodes.iter().skip(index + 1).any(|other| other.node_id == node.node_id) {
            return Err(SpecError::DuplicateNodeId(node.node_id.to_string()));
        }
    }
    Ok(())
}

/// Ensures task identifiers are unique across all nodes.
fn ensure_unique_task_ids(nodes: &[NodeSpec]) -> Result<(), SpecError> {
    let mut seen: Vec<&TaskId> = Vec::new();
    for node in nodes {
        for task in &node.tasks {
            if seen.contains(&&task.task_id) {
                return Err(SpecError::DuplicateTaskId(task.task_id.to_string()));
            }
            seen.push(&task.task_id);
        }
    }
    Ok(())
}

/// Ensures outcome names are unique within each task.
fn ensure_unique_outcome_names(nodes: &[NodeSpec]) -> Result<(), SpecError> {
    for node in nodes {
        for task in &node.tasks {
            for (index, outcome) in task.outcomes.iter().enumerate() {
                if task.outcomes.iter().skip(index + 1).any(|other| other.name == outcome.name) {
                    return Err(SpecError::DuplicateOutcomeName {
                        task_id: task.task_id.to_string(),
                        name: outcome.name.to_string(),
                    });
                }
            }
        }
    }
    Ok(())
}

/// Ensures gate keys `(source node, outcome name)` are unique.
fn ensure_unique_gate_keys(gates: &[GateSpec]) -> Result<(), SpecError> {
    for (index, gate) in gates.iter().enumerate() {
        if gates.iter().skip(index + 1).any(|other| {
            other.source_node_id == gate.source_node_id && other.outcome_name == gate.outcome_name
        }) {
            return Err(SpecError::DuplicateGateKey {
                node_id: gate.source_node_id.to_string(),
                outcome: gate.outcome_name.to_string(),
            });
        }
    }
    Ok(())
}

/// Ensures gate sources and non-terminal targets reference defined nodes.
fn ensure_gate_endpoints_exist(nodes: &[NodeSpec], gates: &[GateSpec]) -> Result<(), SpecError> {
    for gate in gates {
        if !nodes.iter().any(|node| node.node_id == gate.source_node_id) {
            return Err(SpecError::UnknownGateNode(
                gate.gate_id.to_string(),
                gate.source_node_id.to_string(),
            ));
        }
        if let Some(target) = &gate.target_node_id
            && !nodes.iter().any(|node| &node.node_id == target)
        {
            return Err(SpecError::UnknownGateNode(
                gate.gate_id.to_string(),
                target.to_string(),
            ));
        }
    }
    Ok(())
}

/// Ensures at least one entry node is declared.
fn ensure_entry_node_exists(nodes: &[NodeSpec]) -> Result<(), SpecError> {
    if nodes.iter().any(|node| node.entry) {
        Ok(())
    } else {
        Err(SpecError::MissingEntryNode)
    }
}

// ============================================================================
// SECTION: Transitive Successors
// ============================================================================

/// Computes the transitive successor set of every node via BFS over gates.
///
/// Terminal gates (`target_node_id == None`) are ignored. Each result vector
/// is sorted by node id for deterministic snapshots.
fn compute_transitive_successors(
    nodes: &[NodeSpec],
    gates: &[GateSpec],
) -> BTreeMap<NodeId, Vec<NodeId>> {
    let mut adjacency: BTreeMap<&NodeId, Vec<&NodeId>> = BTreeMap::new();
    for gate in gates {
        if let Some(target) = &gate.target_node_id {
            adjacency.entry(&gate.source_node_id).or_default().push(target);
        }
    }

    let mut result = BTreeMap::new();
    for node in nodes {
        let mut reachable: BTreeSet<NodeId> = BTreeSet::new();
        let mut queue: VecDeque<&NodeId> = VecDeque::new();
        queue.push_back(&node.node_id);
        while let Some(current) = queue.pop_front() {
            for next in adjacency.get(current).into_iter().flatten() {
                if reachable.insert((*next).clone()) {
                    queue.push_back(next);
                }
            }
        }
        result.insert(node.node_id.clone(), reachable.into_iter().collect());
    }
    result
}
