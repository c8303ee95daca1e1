// crates/flowspec-core/tests/lifecycle_validation.rs
// ============================================================================
// Module: Lifecycle Validation Tests
// Description: Tests for draft validation, publish, and impact analysis.
// ============================================================================
//! ## Overview
//! Validates the draft validation categories, version numbering at publish,
//! snapshot successor computation, round-trip hydration, and the advisory
//! publish-impact report.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use flowspec_core::CompletionRule;
use flowspec_core::CrossFlowDependency;
use flowspec_core::DraftStatus;
use flowspec_core::FanOutRule;
use flowspec_core::GateSpec;
use flowspec_core::ImpactSeverity;
use flowspec_core::InMemoryTruthStore;
use flowspec_core::LifecycleError;
use flowspec_core::NodeSpec;
use flowspec_core::OutcomeSpec;
use flowspec_core::TaskId;
use flowspec_core::TaskSpec;
use flowspec_core::Timestamp;
use flowspec_core::ValidationCategory;
use flowspec_core::WorkflowDraft;
use flowspec_core::WorkflowSpec;
use flowspec_core::publish_impact;
use flowspec_core::runtime::lifecycle::BreakingChangeKind;
use flowspec_core::validate_definition;

// ============================================================================
// SECTION: Fixtures
// ============================================================================

/// Shorthand for unix-millis timestamps.
fn ts(value: i64) -> Timestamp {
    Timestamp::UnixMillis(value)
}

/// Builds a task with the provided declared outcome names.
fn task(id: &str, outcomes: &[&str]) -> TaskSpec {
    TaskSpec {
        task_id: TaskId::new(id),
        name: id.to_string(),
        instructions: String::new(),
        display_order: 1,
        evidence_required: false,
        evidence_schema: None,
        default_sla_hours: None,
        outcomes: outcomes
            .iter()
            .enumerate()
            .map(|(index, name)| OutcomeSpec {
                outcome_id: format!("{id}-o{index}").into(),
                name: (*name).into(),
            })
            .collect(),
        cross_flow_dependencies: Vec::new(),
    }
}

/// Builds an all-tasks-done node.
fn node(id: &str, entry: bool, tasks: Vec<TaskSpec>) -> NodeSpec {
    NodeSpec {
        node_id: id.into(),
        name: id.to_string(),
        entry,
        completion_rule: CompletionRule::AllTasksDone,
        specific_tasks: Vec::new(),
        tasks,
        transitive_successors: Vec::new(),
    }
}

/// Builds a gate record.
fn gate(id: &str, source: &str, outcome: &str, target: Option<&str>) -> GateSpec {
    GateSpec {
        gate_id: id.into(),
        source_node_id: source.into(),
        outcome_name: outcome.into(),
        target_node_id: target.map(Into::into),
    }
}

/// Two-node chain used as the validation baseline.
fn valid_spec() -> WorkflowSpec {
    WorkflowSpec {
        workflow_id: "wf-life".into(),
        name: "Lifecycle".to_string(),
        version: 0,
        non_terminating: false,
        nodes: vec![
            node("n1", true, vec![task("t1", &["DONE"])]),
            node("n2", false, vec![task("t2", &["OK"])]),
        ],
        gates: vec![gate("g1", "n1", "DONE", Some("n2")), gate("g2", "n2", "OK", None)],
        fan_out_rules: Vec::new(),
    }
}

/// Collects the categories present in an issue list.
fn categories(
    issues: &[flowspec_core::ValidationIssue],
) -> Vec<ValidationCategory> {
    issues.iter().map(|issue| issue.category).collect()
}

// ============================================================================
// SECTION: Validation Categories
// ============================================================================

/// Tests a clean draft validates with no issues.
#[test]
fn test_valid_draft_passes() {
    let store = InMemoryTruthStore::new();
    let issues = validate_definition(&valid_spec(), &store).unwrap();
    assert!(issues.is_empty(), "unexpected issues: {issues:?}");
}

/// Tests an unreachable node is reported.
#[test]
fn test_unreachable_node_reported() {
    let mut spec = valid_spec();
    spec.nodes.push(node("n3", false, vec![task("t3", &["X"])]));
    spec.gates.push(gate("g3", "n3", "X", None));
    let store = InMemoryTruthStore::new();
    let issues = validate_definition(&spec, &store).unwrap();
    assert!(categories(&issues).contains(&ValidationCategory::Structural));
}

/// Tests a terminating workflow without a terminal gate is reported.
#[test]
fn test_missing_terminal_path_reported() {
    let mut spec = valid_spec();
    spec.gates = vec![gate("g1", "n1", "DONE", Some("n2")), gate("g2", "n2", "OK", Some("n1"))];
    let store = InMemoryTruthStore::new();
    let issues = validate_definition(&spec, &store).unwrap();
    assert!(
        issues.iter().any(|issue| issue.message.contains("terminal")),
        "expected terminal-path issue: {issues:?}"
    );
}

/// Tests an outcome without a gate is reported.
#[test]
fn test_outcome_without_gate_reported() {
    let mut spec = valid_spec();
    spec.nodes[0].tasks[0] = task("t1", &["DONE", "FAILED"]);
    let store = InMemoryTruthStore::new();
    let issues = validate_definition(&spec, &store).unwrap();
    assert!(categories(&issues).contains(&ValidationCategory::OutcomesGates));
}

/// Tests a completion-rule reference to a missing task is reported.
#[test]
fn test_specific_tasks_reference_checked() {
    let mut spec = valid_spec();
    spec.nodes[0].completion_rule = CompletionRule::SpecificTasksDone;
    spec.nodes[0].specific_tasks = vec![TaskId::new("ghost")];
    let store = InMemoryTruthStore::new();
    let issues = validate_definition(&spec, &store).unwrap();
    assert!(categories(&issues).contains(&ValidationCategory::Semantic));
}

/// Tests cross-flow references are checked against the registry.
#[test]
fn test_cross_flow_references_checked() {
    let store = InMemoryTruthStore::new();

    let mut spec = valid_spec();
    spec.nodes[0].tasks[0].cross_flow_dependencies.push(CrossFlowDependency {
        source_workflow_id: "wf-unpublished".into(),
        source_task_path: "nx.tx".to_string(),
        required_outcome: "OK".into(),
    });
    let issues = validate_definition(&spec, &store).unwrap();
    assert!(categories(&issues).contains(&ValidationCategory::CrossFlow));

    // Malformed path and self-dependency inside the same workflow.
    let mut spec = valid_spec();
    spec.nodes[0].tasks[0].cross_flow_dependencies.push(CrossFlowDependency {
        source_workflow_id: "wf-life".into(),
        source_task_path: "no-separator".to_string(),
        required_outcome: "OK".into(),
    });
    spec.nodes[0].tasks[0].cross_flow_dependencies.push(CrossFlowDependency {
        source_workflow_id: "wf-life".into(),
        source_task_path: "n1.t1".to_string(),
        required_outcome: "DONE".into(),
    });
    let issues = validate_definition(&spec, &store).unwrap();
    let messages: Vec<&str> = issues.iter().map(|issue| issue.message.as_str()).collect();
    assert!(messages.iter().any(|message| message.contains("nodeId.taskId")));
    assert!(messages.iter().any(|message| message.contains("depends on itself")));
}

/// Tests fan-out targets and triggers are checked.
#[test]
fn test_fan_out_references_checked() {
    let store = InMemoryTruthStore::new();

    let mut spec = valid_spec();
    spec.fan_out_rules.push(FanOutRule {
        source_node_id: "n1".into(),
        trigger_outcome: "DONE".into(),
        target_workflow_id: "wf-life".into(),
    });
    let issues = validate_definition(&spec, &store).unwrap();
    assert!(issues.iter().any(|issue| issue.message.contains("targets itself")));

    let mut spec = valid_spec();
    spec.fan_out_rules.push(FanOutRule {
        source_node_id: "n1".into(),
        trigger_outcome: "NEVER".into(),
        target_workflow_id: "wf-other".into(),
    });
    let issues = validate_definition(&spec, &store).unwrap();
    assert!(issues.iter().any(|issue| issue.message.contains("not published")));
    assert!(issues.iter().any(|issue| issue.message.contains("not declared")));
}

// ============================================================================
// SECTION: Publish
// ============================================================================

/// Tests publish requires prior validation.
#[test]
fn test_publish_requires_validation() {
    let store = InMemoryTruthStore::new();
    let mut draft = WorkflowDraft::new(valid_spec());
    let error = draft.publish(&store, ts(1)).unwrap_err();
    assert!(matches!(error, LifecycleError::NotValidated));
}

/// Tests publish numbers versions and precomputes successors.
#[test]
fn test_publish_versions_and_successors() {
    let store = InMemoryTruthStore::new();
    let mut draft = WorkflowDraft::new(valid_spec());
    assert!(draft.validate(&store).unwrap().is_empty());
    let first = draft.publish(&store, ts(1)).unwrap();
    assert_eq!(first.snapshot.version, 1);
    assert_eq!(draft.status, DraftStatus::Published);

    let n1 = first.snapshot.node(&"n1".into()).unwrap();
    assert_eq!(n1.transitive_successors, vec!["n2".into()]);
    let n2 = first.snapshot.node(&"n2".into()).unwrap();
    assert!(n2.transitive_successors.is_empty());

    let mut again = WorkflowDraft::new(valid_spec());
    assert!(again.validate(&store).unwrap().is_empty());
    let second = again.publish(&store, ts(2)).unwrap();
    assert_eq!(second.snapshot.version, 2);
    assert_ne!(first.version_id, second.version_id);
}

/// Tests hydrating a snapshot reproduces the semantic graph.
#[test]
fn test_snapshot_round_trip() {
    let store = InMemoryTruthStore::new();
    let mut draft = WorkflowDraft::new(valid_spec());
    assert!(draft.validate(&store).unwrap().is_empty());
    let version = draft.publish(&store, ts(1)).unwrap();

    let mut hydrated = WorkflowDraft::from_snapshot(&version.snapshot);
    assert_eq!(hydrated.status, DraftStatus::Draft);
    assert!(hydrated.definition.nodes.iter().all(|node| node.transitive_successors.is_empty()));
    assert!(hydrated.validate(&store).unwrap().is_empty());
    let republished = hydrated.publish(&store, ts(2)).unwrap();

    // Same semantic graph modulo version metadata.
    let mut normalized = republished.snapshot.clone();
    normalized.version = version.snapshot.version;
    assert_eq!(normalized, version.snapshot);
}

// ============================================================================
// SECTION: Publish Impact
// ============================================================================

/// Tests removals are detected and classified by active-flow count.
#[test]
fn test_publish_impact_detects_removals() {
    let store = InMemoryTruthStore::new();
    let mut draft = WorkflowDraft::new(valid_spec());
    assert!(draft.validate(&store).unwrap().is_empty());
    let version = draft.publish(&store, ts(1)).unwrap();

    // Draft drops node n2 and renames t1's outcome.
    let mut next = valid_spec();
    next.nodes.pop();
    next.gates = vec![gate("g1", "n1", "SHIPPED", None)];
    next.nodes[0].tasks[0] = task("t1", &["SHIPPED"]);

    let report = publish_impact(&next, &version, &store).unwrap();
    let kinds: Vec<BreakingChangeKind> = report.changes.iter().map(|change| change.kind).collect();
    assert!(kinds.contains(&BreakingChangeKind::NodeRemoved));
    assert!(kinds.contains(&BreakingChangeKind::OutcomeRemoved));
    assert!(report.changes.iter().all(|change| change.severity == ImpactSeverity::Advisory));
}
