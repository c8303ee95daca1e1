// crates/flowspec-core/tests/determinism_prop.rs
// ============================================================================
// Module: Determinism Property Tests
// Description: Property tests for derived-state determinism and ordering.
// ============================================================================
//! ## Overview
//! Property-checks the determinism guarantees: identical truth yields
//! byte-identical derived output, validity folding is independent of event
//! list order, and actionable tasks respect the canonical sort.

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
use flowspec_core::Flow;
use flowspec_core::FlowState;
use flowspec_core::FlowStatus;
use flowspec_core::GateSpec;
use flowspec_core::NodeSpec;
use flowspec_core::OutcomeSpec;
use flowspec_core::TaskId;
use flowspec_core::TaskSpec;
use flowspec_core::Timestamp;
use flowspec_core::UserId;
use flowspec_core::ValidityEvent;
use flowspec_core::ValidityState;
use flowspec_core::WorkflowSpec;
use flowspec_core::hashing::DEFAULT_HASH_ALGORITHM;
use flowspec_core::hashing::hash_bytes;
use flowspec_core::runtime::derived;
use proptest::prelude::Strategy;
use proptest::prelude::prop;
use proptest::prelude::proptest;
use proptest::sample::Index;

// ============================================================================
// SECTION: Fixtures
// ============================================================================

/// Shorthand for unix-millis timestamps.
fn ts(value: i64) -> Timestamp {
    Timestamp::UnixMillis(value)
}

/// Builds a multi-task node spec for actionability checks.
fn spec_with_tasks(task_ids: &[&str]) -> WorkflowSpec {
    let tasks = task_ids
        .iter()
        .enumerate()
        .map(|(index, id)| TaskSpec {
            task_id: TaskId::new(*id),
            name: (*id).to_string(),
            instructions: String::new(),
            display_order: u32::try_from(index).unwrap_or(u32::MAX),
            evidence_required: false,
            evidence_schema: None,
            default_sla_hours: None,
            outcomes: vec![OutcomeSpec {
                outcome_id: format!("{id}-o0").into(),
                name: "DONE".into(),
            }],
            cross_flow_dependencies: Vec::new(),
        })
        .collect();
    WorkflowSpec {
        workflow_id: "wf-prop".into(),
        name: "Prop".to_string(),
        version: 1,
        non_terminating: false,
        nodes: vec![NodeSpec {
            node_id: "n1".into(),
            name: "n1".to_string(),
            entry: true,
            completion_rule: CompletionRule::AllTasksDone,
            specific_tasks: Vec::new(),
            tasks,
            transitive_successors: Vec::new(),
        }],
        gates: vec![GateSpec {
            gate_id: "g1".into(),
            source_node_id: "n1".into(),
            outcome_name: "DONE".into(),
            target_node_id: None,
        }],
        fan_out_rules: Vec::new(),
    }
    .with_transitive_successors()
}

/// Builds an empty flow state.
fn flow_state() -> FlowState {
    FlowState::new(Flow {
        flow_id: "flow-prop".into(),
        company_id: "acme".into(),
        workflow_id: "wf-prop".into(),
        workflow_version_id: "wf-prop-v1".into(),
        snapshot_hash: hash_bytes(DEFAULT_HASH_ALGORITHM, b"snapshot"),
        flow_group_id: "group-prop".into(),
        status: FlowStatus::Active,
        created_at: ts(0),
        completed_at: None,
    })
}

/// Default test user.
fn user() -> UserId {
    UserId::new("prop")
}

/// Strategy producing a validity state.
fn validity_state() -> impl Strategy<Value = ValidityState> {
    prop::sample::select(vec![
        ValidityState::Valid,
        ValidityState::Provisional,
        ValidityState::Invalid,
    ])
}

// ============================================================================
// SECTION: Properties
// ============================================================================

proptest! {
    /// Validity folding is independent of the event list order.
    #[test]
    fn prop_validity_fold_order_independent(
        times in prop::collection::vec(0_i64 .. 50, 1 .. 24),
        states in prop::collection::vec(validity_state(), 24),
        shuffle in prop::collection::vec(prop::arbitrary::any::<Index>(), 8),
    ) {
        let mut state = flow_state();
        let activation = state.record_node_activation("n1".into(), 1, ts(0));
        let execution = state.record_task_start("t1".into(), user(), activation, 1, ts(1));

        let events: Vec<ValidityEvent> = times
            .iter()
            .enumerate()
            .map(|(index, time)| ValidityEvent {
                seq: u64::try_from(index).unwrap_or(u64::MAX) + 1,
                task_execution_id: execution.clone(),
                state: states[index % states.len()],
                created_at: ts(*time),
                created_by: user(),
                reason: None,
            })
            .collect();

        let mut ordered = state.clone();
        ordered.validity_events = events.clone();

        let mut shuffled_events = events;
        for (offset, index) in shuffle.iter().enumerate() {
            let a = offset % shuffled_events.len();
            let b = index.index(shuffled_events.len());
            shuffled_events.swap(a, b);
        }
        let mut shuffled = state;
        shuffled.validity_events = shuffled_events;

        let left = derived::validity_map(&ordered);
        let right = derived::validity_map(&shuffled);
        proptest::prop_assert_eq!(left, right);
    }

    /// Actionable tasks are byte-identical across repeated evaluation and
    /// come out in canonical order.
    #[test]
    fn prop_actionable_tasks_deterministic(
        started in prop::collection::vec(prop::bool::ANY, 4),
        stamped in prop::collection::vec(prop::bool::ANY, 4),
    ) {
        let ids = ["t-a", "t-b", "t-c", "t-d"];
        let spec = spec_with_tasks(&ids);
        let mut state = flow_state();
        let activation = state.record_node_activation("n1".into(), 1, ts(0));

        let mut clock = 1;
        for (index, id) in ids.iter().enumerate() {
            if started[index] {
                let execution =
                    state.record_task_start((*id).into(), user(), activation.clone(), 1, ts(clock));
                clock += 1;
                if stamped[index] {
                    state.record_outcome(&execution, "DONE".into(), user(), ts(clock)).unwrap();
                    clock += 1;
                }
            }
        }

        let first = derived::actionable_tasks(&spec, &state, &[]);
        let second = derived::actionable_tasks(&spec, &state.clone(), &[]);
        let left = serde_json::to_string(&first).unwrap();
        let right = serde_json::to_string(&second).unwrap();
        proptest::prop_assert_eq!(left, right);

        let mut sorted = first.clone();
        sorted.sort_by(|a, b| {
            (&a.flow_id, &a.task_id, a.iteration).cmp(&(&b.flow_id, &b.task_id, b.iteration))
        });
        proptest::prop_assert_eq!(first, sorted);
    }

    /// A stamped execution never loses its outcome tuple.
    #[test]
    fn prop_outcome_immutable(attempts in 1_u8 .. 5) {
        let mut state = flow_state();
        let activation = state.record_node_activation("n1".into(), 1, ts(0));
        let execution = state.record_task_start("t-a".into(), user(), activation, 1, ts(1));
        state.record_outcome(&execution, "DONE".into(), user(), ts(2)).unwrap();

        for attempt in 0 .. attempts {
            let result = state.record_outcome(
                &execution,
                "DONE".into(),
                user(),
                ts(3 + i64::from(attempt)),
            );
            proptest::prop_assert!(result.is_err());
        }
        let stamped = state.execution(&execution).unwrap();
        proptest::prop_assert_eq!(stamped.outcome_at, Some(ts(2)));
    }
}

// ============================================================================
// SECTION: Deterministic Spot Checks
// ============================================================================

/// Tests identical truth yields identical gate evaluation, including order.
#[test]
fn test_gate_evaluation_deterministic_order() {
    let spec = spec_with_tasks(&["t-a", "t-b"]);
    let mut state = flow_state();
    let activation = state.record_node_activation("n1".into(), 1, ts(0));
    let first = state.record_task_start("t-a".into(), user(), activation.clone(), 1, ts(1));
    state.record_outcome(&first, "DONE".into(), user(), ts(2)).unwrap();
    let second = state.record_task_start("t-b".into(), user(), activation, 1, ts(3));
    state.record_outcome(&second, "DONE".into(), user(), ts(4)).unwrap();

    let node = &spec.nodes[0];
    let routes_a = derived::evaluate_gates(&spec, &state, node, 1).unwrap();
    let routes_b = derived::evaluate_gates(&spec, &state, node, 1).unwrap();
    assert_eq!(routes_a, routes_b);
    assert_eq!(routes_a.len(), 1);
    assert!(routes_a[0].target_node_id.is_none());
}
