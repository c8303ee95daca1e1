// crates/flowspec-core/tests/coordinator.rs
// ============================================================================
// Module: Fan-Out Coordinator Tests
// Description: Tests for post-commit fan-out dispatch and job provisioning.
// ============================================================================
//! ## Overview
//! Validates fan-out rule dispatch, the idempotent duplicate policy, failure
//! handling that blocks the triggering flow without rolling back outcomes,
//! and the sale-closed job provisioning path.

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
use flowspec_core::EngineConfig;
use flowspec_core::EvidenceBody;
use flowspec_core::FanOutRule;
use flowspec_core::FlowGroupDirectory;
use flowspec_core::FlowStatus;
use flowspec_core::GateSpec;
use flowspec_core::GroupScope;
use flowspec_core::InMemoryTruthStore;
use flowspec_core::NodeSpec;
use flowspec_core::OutcomeSpec;
use flowspec_core::ProgressionEngine;
use flowspec_core::ScopeId;
use flowspec_core::TaskId;
use flowspec_core::TaskSpec;
use flowspec_core::Timestamp;
use flowspec_core::UserId;
use flowspec_core::WorkflowDraft;
use flowspec_core::WorkflowRegistry;
use flowspec_core::WorkflowSpec;
use flowspec_core::WorkflowVersion;
use flowspec_core::hashing::DEFAULT_HASH_ALGORITHM;
use flowspec_core::hashing::hash_canonical_json;
use serde_json::json;

// ============================================================================
// SECTION: Fixtures
// ============================================================================

/// Shorthand for unix-millis timestamps.
fn ts(value: i64) -> Timestamp {
    Timestamp::UnixMillis(value)
}

/// Builds a single-node, single-task workflow with terminal gates.
fn simple_spec(workflow_id: &str, task_id: &str, outcome: &str) -> WorkflowSpec {
    WorkflowSpec {
        workflow_id: workflow_id.into(),
        name: workflow_id.to_string(),
        version: 0,
        non_terminating: false,
        nodes: vec![NodeSpec {
            node_id: "n1".into(),
            name: "n1".to_string(),
            entry: true,
            completion_rule: CompletionRule::AllTasksDone,
            specific_tasks: Vec::new(),
            tasks: vec![TaskSpec {
                task_id: TaskId::new(task_id),
                name: task_id.to_string(),
                instructions: String::new(),
                display_order: 1,
                evidence_required: false,
                evidence_schema: None,
                default_sla_hours: None,
                outcomes: vec![OutcomeSpec {
                    outcome_id: format!("{task_id}-o0").into(),
                    name: outcome.into(),
                }],
                cross_flow_dependencies: Vec::new(),
            }],
            transitive_successors: Vec::new(),
        }],
        gates: vec![GateSpec {
            gate_id: "g1".into(),
            source_node_id: "n1".into(),
            outcome_name: outcome.into(),
            target_node_id: None,
        }],
        fan_out_rules: Vec::new(),
    }
}

/// Publishes a spec through the draft lifecycle.
fn publish(store: &InMemoryTruthStore, spec: WorkflowSpec, at: i64) {
    let mut draft = WorkflowDraft::new(spec);
    let issues = draft.validate(store).unwrap();
    assert!(issues.is_empty(), "unexpected validation issues: {issues:?}");
    draft.publish(store, ts(at)).unwrap();
}

/// Stores a snapshot directly, bypassing validation (for failure fixtures).
fn store_unvalidated(store: &InMemoryTruthStore, spec: WorkflowSpec, at: i64) {
    let snapshot = spec.with_transitive_successors();
    let snapshot_hash = hash_canonical_json(DEFAULT_HASH_ALGORITHM, &snapshot).unwrap();
    let version = WorkflowVersion {
        version_id: format!("{}-v1", snapshot.workflow_id).into(),
        workflow_id: snapshot.workflow_id.clone(),
        snapshot,
        snapshot_hash,
        published_at: ts(at),
    };
    store.store_version(&version).unwrap();
}

/// Builds an engine with the provided coordinator configuration.
fn engine_with(
    store: &InMemoryTruthStore,
    coordinator: CoordinatorConfig,
) -> ProgressionEngine<InMemoryTruthStore, InMemoryTruthStore, InMemoryTruthStore> {
    ProgressionEngine::new(
        store.clone(),
        store.clone(),
        store.clone(),
        coordinator,
        EngineConfig::default(),
    )
}

/// Default test scope.
fn scope() -> GroupScope {
    GroupScope {
        scope_type: "deal".to_string(),
        scope_id: ScopeId::new("deal-1"),
    }
}

/// Default test user.
fn user() -> UserId {
    UserId::new("alice")
}

// ============================================================================
// SECTION: Dispatch
// ============================================================================

/// Tests fan-out spawns the child workflow in the same group.
#[test]
fn test_fan_out_spawns_child_flow() {
    let store = InMemoryTruthStore::new();
    publish(&store, simple_spec("wf-child", "tc", "DONE"), 0);
    let mut parent = simple_spec("wf-parent", "tp", "DONE");
    parent.fan_out_rules.push(FanOutRule {
        source_node_id: "n1".into(),
        trigger_outcome: "DONE".into(),
        target_workflow_id: "wf-child".into(),
    });
    publish(&store, parent, 1);

    let engine = engine_with(&store, CoordinatorConfig::default());
    let flow =
        engine.create_flow(&"wf-parent".into(), &"acme".into(), &scope(), None, ts(2)).unwrap();
    engine.start_task(&flow.flow_id, &"tp".into(), &user(), ts(3)).unwrap();
    let recorded = engine
        .record_outcome(&flow.flow_id, &"tp".into(), &"DONE".into(), &user(), None, ts(4))
        .unwrap();

    assert_eq!(recorded.spawned_flows.len(), 1);
    let child = engine.flow_state(&recorded.spawned_flows[0]).unwrap();
    assert_eq!(child.flow.workflow_id.as_str(), "wf-child");
    assert_eq!(child.flow.flow_group_id, flow.flow_group_id);
    assert_eq!(child.activations.len(), 1);

    // Re-dispatch resolves to the same child flow.
    let again = engine
        .create_flow(&"wf-child".into(), &"acme".into(), &scope(), None, ts(5))
        .unwrap();
    assert_eq!(again.flow_id, child.flow.flow_id);
}

/// Tests a fan-out failure blocks the flow but keeps the outcome.
#[test]
fn test_fan_out_failure_preserves_outcome() {
    let store = InMemoryTruthStore::new();
    let mut parent = simple_spec("wf-parent", "tp", "DONE");
    parent.fan_out_rules.push(FanOutRule {
        source_node_id: "n1".into(),
        trigger_outcome: "DONE".into(),
        target_workflow_id: "wf-ghost".into(),
    });
    // Stored without validation: the target workflow is never published.
    store_unvalidated(&store, parent, 0);

    let engine = engine_with(&store, CoordinatorConfig::default());
    let flow =
        engine.create_flow(&"wf-parent".into(), &"acme".into(), &scope(), None, ts(1)).unwrap();
    engine.start_task(&flow.flow_id, &"tp".into(), &user(), ts(2)).unwrap();
    let recorded = engine
        .record_outcome(&flow.flow_id, &"tp".into(), &"DONE".into(), &user(), None, ts(3))
        .unwrap();
    assert!(recorded.spawned_flows.is_empty());

    let state = engine.flow_state(&flow.flow_id).unwrap();
    assert_eq!(state.flow.status, FlowStatus::Blocked);
    assert_eq!(state.executions[0].outcome.as_ref().map(ToString::to_string), Some("DONE".to_string()));
    assert_eq!(state.fan_out_failures.len(), 1);
    assert_eq!(
        state.fan_out_failures[0].target_workflow_id.as_ref().map(ToString::to_string),
        Some("wf-ghost".to_string())
    );
}

// ============================================================================
// SECTION: Job Provisioning
// ============================================================================

/// Coordinator configuration for the sale-closed tests.
fn sale_coordinator() -> CoordinatorConfig {
    CoordinatorConfig {
        sale_closed_outcome: "SALE_CLOSED".into(),
        anchor_task_id: Some(TaskId::new("t-anchor")),
        job_bundle: vec!["wf-install".into()],
    }
}

/// Runs the anchor flow and attaches the anchor identity evidence.
fn run_anchor_flow(
    engine: &ProgressionEngine<InMemoryTruthStore, InMemoryTruthStore, InMemoryTruthStore>,
    customer: &str,
) {
    let flow =
        engine.create_flow(&"wf-anchor".into(), &"acme".into(), &scope(), None, ts(10)).unwrap();
    engine.start_task(&flow.flow_id, &"t-anchor".into(), &user(), ts(11)).unwrap();
    engine
        .attach_evidence(
            &flow.flow_id,
            &"t-anchor".into(),
            EvidenceBody::Structured {
                content: json!({"customerId": customer}),
            },
            &user(),
            None,
            ts(12),
        )
        .unwrap();
    engine
        .record_outcome(&flow.flow_id, &"t-anchor".into(), &"IDENTIFIED".into(), &user(), None, ts(13))
        .unwrap();
}

/// Tests the sale-closed trigger provisions the job and the bundle.
#[test]
fn test_sale_closed_provisions_job_and_bundle() {
    let store = InMemoryTruthStore::new();
    publish(&store, simple_spec("wf-anchor", "t-anchor", "IDENTIFIED"), 0);
    publish(&store, simple_spec("wf-install", "t-install", "DONE"), 1);
    publish(&store, simple_spec("wf-sale", "t-sale", "SALE_CLOSED"), 2);

    let engine = engine_with(&store, sale_coordinator());
    run_anchor_flow(&engine, "customer-1");

    let sale =
        engine.create_flow(&"wf-sale".into(), &"acme".into(), &scope(), None, ts(20)).unwrap();
    engine.start_task(&sale.flow_id, &"t-sale".into(), &user(), ts(21)).unwrap();
    engine
        .attach_evidence(
            &sale.flow_id,
            &"t-sale".into(),
            EvidenceBody::Structured {
                content: json!({"customerId": "customer-1", "amount": 12_500}),
            },
            &user(),
            None,
            ts(22),
        )
        .unwrap();
    let recorded = engine
        .record_outcome(&sale.flow_id, &"t-sale".into(), &"SALE_CLOSED".into(), &user(), None, ts(23))
        .unwrap();

    let group = store.load_group(&sale.flow_group_id).unwrap().unwrap();
    let job = group.job.unwrap();
    assert_eq!(job.customer_id, "customer-1");

    let bundle_flow = recorded
        .spawned_flows
        .iter()
        .find_map(|flow_id| {
            let state = engine.flow_state(flow_id).unwrap();
            (state.flow.workflow_id.as_str() == "wf-install").then_some(state)
        })
        .unwrap();
    assert_eq!(bundle_flow.flow.flow_group_id, sale.flow_group_id);

    // Re-provisioning is idempotent: the job and bundle flow are reused.
    let sale_state = engine.flow_state(&sale.flow_id).unwrap();
    assert_eq!(sale_state.flow.status, FlowStatus::Completed);
}

/// Tests a customer mismatch blocks the sale flow and skips the job.
#[test]
fn test_sale_closed_customer_mismatch_blocks() {
    let store = InMemoryTruthStore::new();
    publish(&store, simple_spec("wf-anchor", "t-anchor", "IDENTIFIED"), 0);
    publish(&store, simple_spec("wf-install", "t-install", "DONE"), 1);
    publish(&store, simple_spec("wf-sale", "t-sale", "SALE_CLOSED"), 2);

    let engine = engine_with(&store, sale_coordinator());
    run_anchor_flow(&engine, "customer-1");

    let sale =
        engine.create_flow(&"wf-sale".into(), &"acme".into(), &scope(), None, ts(20)).unwrap();
    engine.start_task(&sale.flow_id, &"t-sale".into(), &user(), ts(21)).unwrap();
    engine
        .attach_evidence(
            &sale.flow_id,
            &"t-sale".into(),
            EvidenceBody::Structured {
                content: json!({"customerId": "customer-2"}),
            },
            &user(),
            None,
            ts(22),
        )
        .unwrap();
    engine
        .record_outcome(&sale.flow_id, &"t-sale".into(), &"SALE_CLOSED".into(), &user(), None, ts(23))
        .unwrap();

    let state = engine.flow_state(&sale.flow_id).unwrap();
    assert_eq!(state.flow.status, FlowStatus::Blocked);
    assert!(state.fan_out_failures[0].message.contains("customer"));

    let group = store.load_group(&sale.flow_group_id).unwrap().unwrap();
    assert!(group.job.is_none());
}

/// Tests a missing anchor task blocks the sale flow.
#[test]
fn test_sale_closed_missing_anchor_blocks() {
    let store = InMemoryTruthStore::new();
    publish(&store, simple_spec("wf-install", "t-install", "DONE"), 0);
    publish(&store, simple_spec("wf-sale", "t-sale", "SALE_CLOSED"), 1);

    let engine = engine_with(&store, sale_coordinator());
    let sale =
        engine.create_flow(&"wf-sale".into(), &"acme".into(), &scope(), None, ts(2)).unwrap();
    engine.start_task(&sale.flow_id, &"t-sale".into(), &user(), ts(3)).unwrap();
    engine
        .attach_evidence(
            &sale.flow_id,
            &"t-sale".into(),
            EvidenceBody::Structured {
                content: json!({"customerId": "customer-1"}),
            },
            &user(),
            None,
            ts(4),
        )
        .unwrap();
    engine
        .record_outcome(&sale.flow_id, &"t-sale".into(), &"SALE_CLOSED".into(), &user(), None, ts(5))
        .unwrap();

    let state = engine.flow_state(&sale.flow_id).unwrap();
    assert_eq!(state.flow.status, FlowStatus::Blocked);
    assert!(state.fan_out_failures[0].message.contains("anchor"));
}
