// crates/flowspec-core/tests/detour_overlay.rs
// ============================================================================
// Module: Detour Overlay Tests
// Description: Tests for detour open, escalate, convert, and resolution.
// ============================================================================
//! ## Overview
//! Validates the rework overlay: provisional tainting, the single-active
//! invariant, blocking scope with the checkpoint exemption, stable resume,
//! and the spoof and hijack guards.

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
use flowspec_core::CoordinatorConfig;
use flowspec_core::DetourStatus;
use flowspec_core::DetourType;
use flowspec_core::EngineConfig;
use flowspec_core::EngineError;
use flowspec_core::GateSpec;
use flowspec_core::GroupScope;
use flowspec_core::InMemoryTruthStore;
use flowspec_core::NodeSpec;
use flowspec_core::OutcomeSpec;
use flowspec_core::ProgressionEngine;
use flowspec_core::ReasonCode;
use flowspec_core::ScopeId;
use flowspec_core::TaskExecutionId;
use flowspec_core::TaskId;
use flowspec_core::TaskSpec;
use flowspec_core::Timestamp;
use flowspec_core::UserId;
use flowspec_core::ValidityState;
use flowspec_core::WorkflowDraft;
use flowspec_core::WorkflowSpec;
use flowspec_core::runtime::derived;

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

/// Three-node chain: N1(T1 DONE) -> N2(T2 GO) -> N3(T3 END) -> terminal.
fn chain_spec() -> WorkflowSpec {
    WorkflowSpec {
        workflow_id: "wf-chain".into(),
        name: "Chain".to_string(),
        version: 0,
        non_terminating: false,
        nodes: vec![
            node("n1", true, vec![task("t1", &["DONE"])]),
            node("n2", false, vec![task("t2", &["GO"])]),
            node("n3", false, vec![task("t3", &["END"])]),
        ],
        gates: vec![
            gate("g1", "n1", "DONE", Some("n2")),
            gate("g2", "n2", "GO", Some("n3")),
            gate("g3", "n3", "END", None),
        ],
        fan_out_rules: Vec::new(),
    }
}

/// Test harness bundling store, engine, flow, and checkpoint execution.
struct Harness {
    /// Engine under test.
    engine: ProgressionEngine<InMemoryTruthStore, InMemoryTruthStore, InMemoryTruthStore>,
    /// Instantiated flow id.
    flow_id: flowspec_core::FlowId,
    /// Execution id of the stamped checkpoint task.
    checkpoint_execution: TaskExecutionId,
}

/// Publishes the chain workflow, instantiates it, and completes T1.
fn chain_harness() -> Harness {
    let store = InMemoryTruthStore::new();
    let mut draft = WorkflowDraft::new(chain_spec());
    assert!(draft.validate(&store).unwrap().is_empty());
    draft.publish(&store, ts(0)).unwrap();

    let engine = ProgressionEngine::new(
        store.clone(),
        store.clone(),
        store,
        CoordinatorConfig::default(),
        EngineConfig::default(),
    );
    let scope = GroupScope {
        scope_type: "deal".to_string(),
        scope_id: ScopeId::new("deal-1"),
    };
    let flow = engine.create_flow(&"wf-chain".into(), &"acme".into(), &scope, None, ts(1)).unwrap();
    let checkpoint_execution =
        engine.start_task(&flow.flow_id, &"t1".into(), &user(), ts(2)).unwrap();
    engine
        .record_outcome(&flow.flow_id, &"t1".into(), &"DONE".into(), &user(), None, ts(3))
        .unwrap();

    Harness {
        engine,
        flow_id: flow.flow_id,
        checkpoint_execution,
    }
}

/// Default test user.
fn user() -> UserId {
    UserId::new("alice")
}

// ============================================================================
// SECTION: Resolution
// ============================================================================

/// Tests detour resolution activates the stable resume target directly.
#[test]
fn test_detour_resolve_stable_resume() {
    let harness = chain_harness();
    let detour_id = harness
        .engine
        .open_detour(
            &harness.flow_id,
            &"n1".into(),
            &"n2".into(),
            &harness.checkpoint_execution,
            DetourType::NonBlocking,
            None,
            &user(),
            ts(4),
        )
        .unwrap();

    let state = harness.engine.flow_state(&harness.flow_id).unwrap();
    let validity = derived::validity_map(&state);
    assert_eq!(
        validity.get(&harness.checkpoint_execution),
        Some(&ValidityState::Provisional)
    );

    let recorded = harness
        .engine
        .record_outcome(
            &harness.flow_id,
            &"t1".into(),
            &"DONE".into(),
            &user(),
            Some(&detour_id),
            ts(5),
        )
        .unwrap();
    assert_eq!(recorded.resolved_detour_id, Some(detour_id.clone()));
    assert!(recorded.routes.is_empty());

    let state = harness.engine.flow_state(&harness.flow_id).unwrap();
    let record = state.detour(&detour_id).unwrap();
    assert_eq!(record.status, DetourStatus::Resolved);
    assert_eq!(record.resolved_at, Some(ts(5)));

    // Stable resume: a second N2 activation exists despite no gate routing.
    let n2_activations = state
        .activations
        .iter()
        .filter(|activation| activation.node_id.as_str() == "n2")
        .count();
    assert_eq!(n2_activations, 2);

    // The resolving execution is explicitly valid and linked to the detour.
    let resolving = state.executions.last().unwrap();
    assert_eq!(resolving.resolved_detour_id, Some(detour_id));
    let validity = derived::validity_map(&state);
    assert_eq!(
        validity.get(&resolving.execution_id),
        Some(&ValidityState::Valid)
    );
}

/// Tests the repeat index counts prior detours at the same checkpoint.
#[test]
fn test_repeat_index_counts_prior_detours() {
    let harness = chain_harness();
    let first = harness
        .engine
        .open_detour(
            &harness.flow_id,
            &"n1".into(),
            &"n2".into(),
            &harness.checkpoint_execution,
            DetourType::NonBlocking,
            None,
            &user(),
            ts(4),
        )
        .unwrap();
    harness
        .engine
        .record_outcome(&harness.flow_id, &"t1".into(), &"DONE".into(), &user(), Some(&first), ts(5))
        .unwrap();

    let state = harness.engine.flow_state(&harness.flow_id).unwrap();
    let resolving = state.executions.last().unwrap().execution_id.clone();
    let second = harness
        .engine
        .open_detour(
            &harness.flow_id,
            &"n1".into(),
            &"n2".into(),
            &resolving,
            DetourType::NonBlocking,
            None,
            &user(),
            ts(6),
        )
        .unwrap();

    let state = harness.engine.flow_state(&harness.flow_id).unwrap();
    assert_eq!(state.detour(&first).unwrap().repeat_index, 0);
    assert_eq!(state.detour(&second).unwrap().repeat_index, 1);
}

// ============================================================================
// SECTION: Guards
// ============================================================================

/// Tests a checkpoint outcome without the detour id is refused as a spoof.
#[test]
fn test_detour_spoof_rejected() {
    let harness = chain_harness();
    let detour_id = harness
        .engine
        .open_detour(
            &harness.flow_id,
            &"n1".into(),
            &"n2".into(),
            &harness.checkpoint_execution,
            DetourType::NonBlocking,
            None,
            &user(),
            ts(4),
        )
        .unwrap();

    let error = harness
        .engine
        .record_outcome(&harness.flow_id, &"t1".into(), &"DONE".into(), &user(), None, ts(5))
        .unwrap_err();
    assert_eq!(error.code(), "DETOUR_SPOOF");

    let state = harness.engine.flow_state(&harness.flow_id).unwrap();
    assert_eq!(state.detour(&detour_id).unwrap().status, DetourStatus::Active);
}

/// Tests only one detour may be active per flow.
#[test]
fn test_nested_detour_forbidden() {
    let harness = chain_harness();
    harness
        .engine
        .open_detour(
            &harness.flow_id,
            &"n1".into(),
            &"n2".into(),
            &harness.checkpoint_execution,
            DetourType::NonBlocking,
            None,
            &user(),
            ts(4),
        )
        .unwrap();

    let error = harness
        .engine
        .open_detour(
            &harness.flow_id,
            &"n1".into(),
            &"n2".into(),
            &harness.checkpoint_execution,
            DetourType::NonBlocking,
            None,
            &user(),
            ts(5),
        )
        .unwrap_err();
    assert_eq!(error.code(), "NESTED_DETOUR_FORBIDDEN");
}

/// Tests a detour cannot resolve an outcome at a different node.
#[test]
fn test_detour_hijack_rejected() {
    let harness = chain_harness();
    harness.engine.start_task(&harness.flow_id, &"t2".into(), &user(), ts(4)).unwrap();
    let detour_id = harness
        .engine
        .open_detour(
            &harness.flow_id,
            &"n1".into(),
            &"n2".into(),
            &harness.checkpoint_execution,
            DetourType::NonBlocking,
            None,
            &user(),
            ts(5),
        )
        .unwrap();

    let error = harness
        .engine
        .record_outcome(
            &harness.flow_id,
            &"t2".into(),
            &"GO".into(),
            &user(),
            Some(&detour_id),
            ts(6),
        )
        .unwrap_err();
    assert_eq!(error.code(), "DETOUR_HIJACK");
}

/// Tests a converted detour can no longer be resolved.
#[test]
fn test_converted_detour_cannot_resolve() {
    let harness = chain_harness();
    let detour_id = harness
        .engine
        .open_detour(
            &harness.flow_id,
            &"n1".into(),
            &"n2".into(),
            &harness.checkpoint_execution,
            DetourType::NonBlocking,
            None,
            &user(),
            ts(4),
        )
        .unwrap();
    harness.engine.trigger_remediation(&harness.flow_id, &detour_id, &user(), ts(5)).unwrap();

    let state = harness.engine.flow_state(&harness.flow_id).unwrap();
    assert_eq!(state.detour(&detour_id).unwrap().status, DetourStatus::Converted);
    assert_eq!(state.detour(&detour_id).unwrap().converted_at, Some(ts(5)));

    let error = harness
        .engine
        .record_outcome(
            &harness.flow_id,
            &"t1".into(),
            &"DONE".into(),
            &user(),
            Some(&detour_id),
            ts(6),
        )
        .unwrap_err();
    assert_eq!(error.code(), "INVALID_DETOUR");
}

// ============================================================================
// SECTION: Blocking Scope
// ============================================================================

/// Tests blocking detours block successors while the checkpoint stays open.
#[test]
fn test_blocking_detour_self_block_exception() {
    let harness = chain_harness();
    let detour_id = harness
        .engine
        .open_detour(
            &harness.flow_id,
            &"n1".into(),
            &"n2".into(),
            &harness.checkpoint_execution,
            DetourType::NonBlocking,
            None,
            &user(),
            ts(4),
        )
        .unwrap();
    harness.engine.escalate_detour(&harness.flow_id, &detour_id, &user(), ts(5)).unwrap();

    let state = harness.engine.flow_state(&harness.flow_id).unwrap();
    let record = state.detour(&detour_id).unwrap();
    assert_eq!(record.detour_type, DetourType::Blocking);
    assert_eq!(record.escalated_at, Some(ts(5)));

    // The checkpoint task stays actionable for its own resolution.
    harness.engine.start_task(&harness.flow_id, &"t1".into(), &user(), ts(6)).unwrap();

    // Descendant tasks are blocked.
    let error =
        harness.engine.start_task(&harness.flow_id, &"t2".into(), &user(), ts(7)).unwrap_err();
    match error {
        EngineError::TaskNotActionable {
            reason, ..
        } => assert_eq!(reason, ReasonCode::ActiveBlockingDetour),
        other => panic!("expected TASK_NOT_ACTIONABLE, got {other:?}"),
    }
}

/// Tests join propagation blocks a checkpoint fed by its own blocked cycle.
#[test]
fn test_join_blocked_through_cycle() {
    let spec = WorkflowSpec {
        workflow_id: "wf-cycle".into(),
        name: "Cycle".to_string(),
        version: 0,
        non_terminating: false,
        nodes: vec![node("n1", true, vec![task("t1", &["LOOP", "DONE"])])],
        gates: vec![gate("g1", "n1", "LOOP", Some("n1")), gate("g2", "n1", "DONE", None)],
        fan_out_rules: Vec::new(),
    };
    let store = InMemoryTruthStore::new();
    let mut draft = WorkflowDraft::new(spec);
    assert!(draft.validate(&store).unwrap().is_empty());
    draft.publish(&store, ts(0)).unwrap();
    let engine = ProgressionEngine::new(
        store.clone(),
        store.clone(),
        store,
        CoordinatorConfig::default(),
        EngineConfig::default(),
    );
    let scope = GroupScope {
        scope_type: "deal".to_string(),
        scope_id: ScopeId::new("deal-2"),
    };
    let flow = engine.create_flow(&"wf-cycle".into(), &"acme".into(), &scope, None, ts(1)).unwrap();

    let execution = engine.start_task(&flow.flow_id, &"t1".into(), &user(), ts(2)).unwrap();
    engine
        .record_outcome(&flow.flow_id, &"t1".into(), &"LOOP".into(), &user(), None, ts(3))
        .unwrap();

    let detour_id = engine
        .open_detour(
            &flow.flow_id,
            &"n1".into(),
            &"n1".into(),
            &execution,
            DetourType::Blocking,
            None,
            &user(),
            ts(4),
        )
        .unwrap();

    // The self-loop gate makes the checkpoint its own blocked join source.
    let error = engine.start_task(&flow.flow_id, &"t1".into(), &user(), ts(5)).unwrap_err();
    match error {
        EngineError::TaskNotActionable {
            reason, ..
        } => assert_eq!(reason, ReasonCode::JoinBlocked),
        other => panic!("expected TASK_NOT_ACTIONABLE, got {other:?}"),
    }

    // Resolution through the detour path is unaffected by join blocking.
    let recorded = engine
        .record_outcome(
            &flow.flow_id,
            &"t1".into(),
            &"DONE".into(),
            &user(),
            Some(&detour_id),
            ts(6),
        )
        .unwrap();
    assert_eq!(recorded.resolved_detour_id, Some(detour_id));
}
