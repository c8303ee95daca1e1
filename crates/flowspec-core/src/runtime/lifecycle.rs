// crates/flowspec-core/src/runtime/lifecycle.rs
// ============================================================================
// Module: FlowSpec Workflow Lifecycle
// Description: Draft validation, publish, and publish-impact analysis.
// Purpose: Gate snapshot creation behind the full validation categories.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! Drafts move `Draft -> Validated -> Published`. Validation covers the
//! structural, outcome/gate, evidence, semantic, cross-flow, and fan-out
//! categories; publishing freezes a deep copy of the definition with
//! precomputed transitive successors into an immutable version. Running
//! flows bound to prior versions are unaffected. Impact analysis is advisory
//! and read-only.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::collections::VecDeque;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::hashing::DEFAULT_HASH_ALGORITHM;
use crate::core::hashing::HashError;
use crate::core::hashing::hash_canonical_json;
use crate::core::identifiers::NodeId;
use crate::core::identifiers::WorkflowVersionId;
use crate::core::spec::WorkflowSpec;
use crate::core::spec::WorkflowVersion;
use crate::core::time::Timestamp;
use crate::interfaces::StoreError;
use crate::interfaces::TruthStore;
use crate::interfaces::WorkflowRegistry;

// ============================================================================
// SECTION: Draft Lifecycle
// ============================================================================

/// Draft lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftStatus {
    /// Draft is editable and unvalidated.
    Draft,
    /// Draft passed the full validation categories.
    Validated,
    /// Draft was published as an immutable version.
    Published,
}

/// Editable workflow draft wrapping a definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDraft {
    /// Draft definition; `transitive_successors` stay empty until publish.
    pub definition: WorkflowSpec,
    /// Draft lifecycle status.
    pub status: DraftStatus,
}

impl WorkflowDraft {
    /// Wraps a definition as an unvalidated draft.
    #[must_use]
    pub const fn new(definition: WorkflowSpec) -> Self {
        Self {
            definition,
            status: DraftStatus::Draft,
        }
    }

    /// Hydrates an editable draft from a published snapshot.
    #[must_use]
    pub fn from_snapshot(snapshot: &WorkflowSpec) -> Self {
        Self::new(WorkflowSpec::hydrate(snapshot))
    }

    /// Runs the full validation categories and advances to `Validated`.
    ///
    /// Returns the issue list; the draft advances only when it is empty.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError`] when registry lookups fail.
    pub fn validate<R: WorkflowRegistry>(
        &mut self,
        registry: &R,
    ) -> Result<Vec<ValidationIssue>, LifecycleError> {
        let issues = validate_definition(&self.definition, registry)?;
        if issues.is_empty() {
            self.status = DraftStatus::Validated;
        }
        Ok(issues)
    }

    /// Publishes the validated draft as an immutable version.
    ///
    /// The version number continues from the latest published version; the
    /// snapshot is a deep copy with transitive successors computed.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::NotValidated`] when the draft has not passed
    /// validation, plus hashing and registry errors.
    pub fn publish<R: WorkflowRegistry>(
        &mut self,
        registry: &R,
        now: Timestamp,
    ) -> Result<WorkflowVersion, LifecycleError> {
        if self.status != DraftStatus::Validated {
            return Err(LifecycleError::NotValidated);
        }

        let next_version = registry
            .latest_published(&self.definition.workflow_id)?
            .map_or(1, |latest| latest.snapshot.version + 1);

        let mut snapshot = self.definition.clone().with_transitive_successors();
        snapshot.version = next_version;
        let snapshot_hash = hash_canonical_json(DEFAULT_HASH_ALGORITHM, &snapshot)?;

        let version = WorkflowVersion {
            version_id: WorkflowVersionId::new(format!(
                "{}-v{next_version}",
                self.definition.workflow_id
            )),
            workflow_id: self.definition.workflow_id.clone(),
            snapshot,
            snapshot_hash,
            published_at: now,
        };
        registry.store_version(&version)?;
        self.status = DraftStatus::Published;
        Ok(version)
    }
}

// ============================================================================
// SECTION: Validation Issues
// ============================================================================

/// Validation category a finding belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationCategory {
    /// Graph shape: entries, reachability, termination, parenting.
    Structural,
    /// Outcome and gate coverage.
    OutcomesGates,
    /// Evidence schema well-formedness.
    Evidence,
    /// Completion-rule references.
    Semantic,
    /// Cross-flow dependency references.
    CrossFlow,
    /// Fan-out rule references.
    FanOut,
}

/// One validation finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Category of the finding.
    pub category: ValidationCategory,
    /// Human-readable description.
    pub message: String,
}

/// Lifecycle errors.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Publish attempted before validation passed.
    #[error("draft must be validated before publish")]
    NotValidated,
    /// Registry or store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Snapshot hashing failure.
    #[error(transparent)]
    Hash(#[from] HashError),
}

// ============================================================================
// SECTION: Validation
// ============================================================================

/// Runs every validation category over a draft definition.
///
/// # Errors
///
/// Returns [`LifecycleError`] when registry lookups fail; findings are
/// returned as issues, not errors.
pub fn validate_definition<R: WorkflowRegistry>(
    definition: &WorkflowSpec,
    registry: &R,
) -> Result<Vec<ValidationIssue>, LifecycleError> {
    let mut issues = Vec::new();

    if let Err(error) = definition.validate() {
        issues.push(ValidationIssue {
            category: ValidationCategory::Structural,
            message: error.to_string(),
        });
    }

    check_reachability(definition, &mut issues);
    check_termination(definition, &mut issues);
    check_parenting(definition, &mut issues);
    check_outcomes_and_gates(definition, &mut issues);
    check_evidence(definition, &mut issues);
    check_semantic(definition, &mut issues);
    check_cross_flow(definition, registry, &mut issues)?;
    check_fan_out(definition, registry, &mut issues)?;

    Ok(issues)
}

/// Checks every node is reachable from some entry node.
fn check_reachability(definition: &WorkflowSpec, issues: &mut Vec<ValidationIssue>) {
    let mut reachable: BTreeSet<&NodeId> = BTreeSet::new();
    let mut queue: VecDeque<&NodeId> = VecDeque::new();
    for node in &definition.nodes {
        if node.entry {
            reachable.insert(&node.node_id);
            queue.push_back(&node.node_id);
        }
    }
    while let Some(current) = queue.pop_front() {
        for gate in definition.gates_from(current) {
            if let Some(target) = &gate.target_node_id
                && reachable.insert(target)
            {
                queue.push_back(target);
            }
        }
    }
    for node in &definition.nodes {
        if !reachable.contains(&node.node_id) {
            issues.push(ValidationIssue {
                category: ValidationCategory::Structural,
                message: format!("node {} is unreachable from any entry node", node.node_id),
            });
        }
    }
}

/// Checks a terminal path exists unless the workflow is non-terminating.
fn check_termination(definition: &WorkflowSpec, issues: &mut Vec<ValidationIssue>) {
    if !definition.non_terminating
        && !definition.gates.iter().any(|gate| gate.target_node_id.is_none())
    {
        issues.push(ValidationIssue {
            category: ValidationCategory::Structural,
            message: "terminating workflow has no terminal gate path".to_string(),
        });
    }
}

/// Checks every node parents at least one task.
fn check_parenting(definition: &WorkflowSpec, issues: &mut Vec<ValidationIssue>) {
    for node in &definition.nodes {
        if node.tasks.is_empty() {
            issues.push(ValidationIssue {
                category: ValidationCategory::Structural,
                message: format!("node {} has no tasks", node.node_id),
            });
        }
    }
}

/// Checks every declared outcome has exactly one gate at its node.
fn check_outcomes_and_gates(definition: &WorkflowSpec, issues: &mut Vec<ValidationIssue>) {
    for node in &definition.nodes {
        for task in &node.tasks {
            if task.outcomes.is_empty() {
                issues.push(ValidationIssue {
                    category: ValidationCategory::OutcomesGates,
                    message: format!("task {} declares no outcomes", task.task_id),
                });
            }
            for outcome in &task.outcomes {
                if definition.gate_for(&node.node_id, &outcome.name).is_none() {
                    issues.push(ValidationIssue {
                        category: ValidationCategory::OutcomesGates,
                        message: format!(
                            "outcome {} of task {} has no gate at node {}",
                            outcome.name, task.task_id, node.node_id
                        ),
                    });
                }
            }
        }
    }
    for gate in &definition.gates {
        let declared = definition.node(&gate.source_node_id).is_some_and(|node| {
            node.tasks.iter().any(|task| task.declares_outcome(&gate.outcome_name))
        });
        if !declared {
            issues.push(ValidationIssue {
                category: ValidationCategory::OutcomesGates,
                message: format!(
                    "gate {} routes undeclared outcome {} at node {}",
                    gate.gate_id, gate.outcome_name, gate.source_node_id
                ),
            });
        }
    }
}

/// Checks evidence schema well-formedness.
fn check_evidence(definition: &WorkflowSpec, issues: &mut Vec<ValidationIssue>) {
    for node in &definition.nodes {
        for task in &node.tasks {
            if let Some(schema) = &task.evidence_schema
                && let Err(error) = schema.validate_shape()
            {
                issues.push(ValidationIssue {
                    category: ValidationCategory::Evidence,
                    message: format!("task {}: {error}", task.task_id),
                });
            }
        }
    }
}

/// Checks completion-rule task references.
fn check_semantic(definition: &WorkflowSpec, issues: &mut Vec<ValidationIssue>) {
    for node in &definition.nodes {
        for task_id in &node.specific_tasks {
            if !node.tasks.iter().any(|task| &task.task_id == task_id) {
                issues.push(ValidationIssue {
                    category: ValidationCategory::Semantic,
                    message: format!(
                        "node {} completion rule references unknown task {task_id}",
                        node.node_id
                    ),
                });
            }
        }
    }
}

/// Checks cross-flow dependency references against the registry.
fn check_cross_flow<R: WorkflowRegistry>(
    definition: &WorkflowSpec,
    registry: &R,
    issues: &mut Vec<ValidationIssue>,
) -> Result<(), LifecycleError> {
    for node in &definition.nodes {
        for task in &node.tasks {
            for dependency in &task.cross_flow_dependencies {
                if !dependency.source_task_path.contains('.') {
                    issues.push(ValidationIssue {
                        category: ValidationCategory::CrossFlow,
                        message: format!(
                            "task {}: dependency path {} is not nodeId.taskId",
                            task.task_id, dependency.source_task_path
                        ),
                    });
                    continue;
                }
                let suffix = dependency.task_suffix();
                if dependency.source_workflow_id == definition.workflow_id {
                    if suffix == task.task_id.as_str() {
                        issues.push(ValidationIssue {
                            category: ValidationCategory::CrossFlow,
                            message: format!("task {} depends on itself", task.task_id),
                        });
                    }
                    check_dependency_outcome(definition, task, dependency, suffix, issues);
                    continue;
                }
                match registry.latest_published(&dependency.source_workflow_id)? {
                    Some(version) => {
                        check_dependency_outcome(
                            &version.snapshot,
                            task,
                            dependency,
                            suffix,
                            issues,
                        );
                    }
                    None => {
                        issues.push(ValidationIssue {
                            category: ValidationCategory::CrossFlow,
                            message: format!(
                                "task {}: source workflow {} is not published",
                                task.task_id, dependency.source_workflow_id
                            ),
                        });
                    }
                }
            }
        }
    }
    Ok(())
}

/// Checks a dependency's task and outcome exist in the source spec.
fn check_dependency_outcome(
    source: &WorkflowSpec,
    task: &crate::core::spec::TaskSpec,
    dependency: &crate::core::spec::CrossFlowDependency,
    suffix: &str,
    issues: &mut Vec<ValidationIssue>,
) {
    let source_task = source
        .nodes
        .iter()
        .flat_map(|node| node.tasks.iter())
        .find(|candidate| candidate.task_id.as_str() == suffix);
    match source_task {
        Some(candidate) => {
            if !candidate.declares_outcome(&dependency.required_outcome) {
                issues.push(ValidationIssue {
                    category: ValidationCategory::CrossFlow,
                    message: format!(
                        "task {}: outcome {} not declared by source task {suffix}",
                        task.task_id, dependency.required_outcome
                    ),
                });
            }
        }
        None => {
            issues.push(ValidationIssue {
                category: ValidationCategory::CrossFlow,
                message: format!(
                    "task {}: source task {suffix} not found in workflow {}",
                    task.task_id, source.workflow_id
                ),
            });
        }
    }
}

/// Checks fan-out rule references against the registry.
fn check_fan_out<R: WorkflowRegistry>(
    definition: &WorkflowSpec,
    registry: &R,
    issues: &mut Vec<ValidationIssue>,
) -> Result<(), LifecycleError> {
    for rule in &definition.fan_out_rules {
        if rule.target_workflow_id == definition.workflow_id {
            issues.push(ValidationIssue {
                category: ValidationCategory::FanOut,
                message: format!("fan-out rule at node {} targets itself", rule.source_node_id),
            });
        } else if registry.latest_published(&rule.target_workflow_id)?.is_none() {
            issues.push(ValidationIssue {
                category: ValidationCategory::FanOut,
                message: format!(
                    "fan-out target {} is not published",
                    rule.target_workflow_id
                ),
            });
        }
        match definition.node(&rule.source_node_id) {
            Some(node) => {
                if !node.tasks.iter().any(|task| task.declares_outcome(&rule.trigger_outcome)) {
                    issues.push(ValidationIssue {
                        category: ValidationCategory::FanOut,
                        message: format!(
                            "fan-out trigger {} not declared at node {}",
                            rule.trigger_outcome, rule.source_node_id
                        ),
                    });
                }
            }
            None => {
                issues.push(ValidationIssue {
                    category: ValidationCategory::FanOut,
                    message: format!("fan-out source node {} not found", rule.source_node_id),
                });
            }
        }
    }
    Ok(())
}

// ============================================================================
// SECTION: Publish Impact
// ============================================================================

/// Kind of breaking change between a draft and the latest published version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakingChangeKind {
    /// A published node is absent from the draft.
    NodeRemoved,
    /// A published task is absent from the draft.
    TaskRemoved,
    /// A published outcome name is absent from the draft task.
    OutcomeRemoved,
}

/// Severity classification for a breaking change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactSeverity {
    /// No active flows depend on the changed element.
    Advisory,
    /// Active flows depend on the changed element.
    Critical,
}

/// One breaking change with its blast radius.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakingChange {
    /// Change kind.
    pub kind: BreakingChangeKind,
    /// Affected element description.
    pub element: String,
    /// Number of non-completed flows bound to the workflow.
    pub affected_flows: u64,
    /// Severity classification.
    pub severity: ImpactSeverity,
}

/// Advisory publish-impact report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpactReport {
    /// Breaking changes in deterministic order.
    pub changes: Vec<BreakingChange>,
}

/// Analyzes breaking changes between a draft and the latest published version.
///
/// Renames surface as removals: the old name disappears from the draft.
///
/// # Errors
///
/// Returns [`StoreError`] when the active-flow count query fails.
pub fn publish_impact<S: TruthStore>(
    draft: &WorkflowSpec,
    latest: &WorkflowVersion,
    store: &S,
) -> Result<ImpactReport, StoreError> {
    let affected = store.active_flow_count(&latest.workflow_id)?;
    let severity = if affected > 0 {
        ImpactSeverity::Critical
    } else {
        ImpactSeverity::Advisory
    };

    let mut changes = Vec::new();
    for node in &latest.snapshot.nodes {
        let Some(draft_node) = draft.node(&node.node_id) else {
            changes.push(BreakingChange {
                kind: BreakingChangeKind::NodeRemoved,
                element: node.node_id.to_string(),
                affected_flows: affected,
                severity,
            });
            continue;
        };
        for task in &node.tasks {
            let Some(draft_task) =
                draft_node.tasks.iter().find(|candidate| candidate.task_id == task.task_id)
            else {
                changes.push(BreakingChange {
                    kind: BreakingChangeKind::TaskRemoved,
                    element: task.task_id.to_string(),
                    affected_flows: affected,
                    severity,
                });
                continue;
            };
            for outcome in &task.outcomes {
                if !draft_task.declares_outcome(&outcome.name) {
                    changes.push(BreakingChange {
                        kind: BreakingChangeKind::OutcomeRemoved,
                        element: format!("{}:{}", task.task_id, outcome.name),
                        affected_flows: affected,
                        severity,
                    });
                }
            }
        }
    }

    Ok(ImpactReport {
        changes,
    })
}
