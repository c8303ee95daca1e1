// crates/flowspec-store-sqlite/tests/sqlite_store_unit.rs
// ============================================================================
// Module: SQLite Store Tests
// Description: Tests for the durable truth store.
// ============================================================================
//! ## Overview
//! Validates persistence round-trips, append-only version history, pruning,
//! group uniqueness, and registry lookups against a temporary database.

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
use flowspec_core::FlowGroup;
use flowspec_core::FlowGroupDirectory;
use flowspec_core::FlowState;
use flowspec_core::FlowStatus;
use flowspec_core::GateSpec;
use flowspec_core::GroupScope;
use flowspec_core::NodeSpec;
use flowspec_core::OutcomeSpec;
use flowspec_core::ScopeId;
use flowspec_core::StoreError;
use flowspec_core::TaskId;
use flowspec_core::TaskSpec;
use flowspec_core::Timestamp;
use flowspec_core::TruthStore;
use flowspec_core::UserId;
use flowspec_core::WorkflowRegistry;
use flowspec_core::WorkflowSpec;
use flowspec_core::WorkflowVersion;
use flowspec_core::hashing::DEFAULT_HASH_ALGORITHM;
use flowspec_core::hashing::hash_canonical_json;
use flowspec_store_sqlite::SqliteStoreConfig;
use flowspec_store_sqlite::SqliteTruthStore;
use tempfile::TempDir;

// ============================================================================
// SECTION: Fixtures
// ============================================================================

/// Shorthand for unix-millis timestamps.
fn ts(value: i64) -> Timestamp {
    Timestamp::UnixMillis(value)
}

/// Opens a store in a fresh temporary directory.
fn open_store() -> (TempDir, SqliteTruthStore) {
    let dir = tempfile::tempdir().unwrap();
    let store =
        SqliteTruthStore::new(SqliteStoreConfig::for_path(dir.path().join("truth.db"))).unwrap();
    (dir, store)
}

/// Builds a small published version for registry tests.
fn version(workflow_id: &str, number: u32) -> WorkflowVersion {
    let snapshot = WorkflowSpec {
        workflow_id: workflow_id.into(),
        name: workflow_id.to_string(),
        version: number,
        non_terminating: false,
        nodes: vec![NodeSpec {
            node_id: "n1".into(),
            name: "n1".to_string(),
            entry: true,
            completion_rule: CompletionRule::AllTasksDone,
            specific_tasks: Vec::new(),
            tasks: vec![TaskSpec {
                task_id: TaskId::new("t1"),
                name: "t1".to_string(),
                instructions: String::new(),
                display_order: 1,
                evidence_required: false,
                evidence_schema: None,
                default_sla_hours: None,
                outcomes: vec![OutcomeSpec {
                    outcome_id: "t1-o0".into(),
                    name: "DONE".into(),
                }],
                cross_flow_dependencies: Vec::new(),
            }],
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
    .with_transitive_successors();
    let snapshot_hash = hash_canonical_json(DEFAULT_HASH_ALGORITHM, &snapshot).unwrap();
    WorkflowVersion {
        version_id: format!("{workflow_id}-v{number}").into(),
        workflow_id: workflow_id.into(),
        snapshot,
        snapshot_hash,
        published_at: ts(0),
    }
}

/// Builds a flow state bound to the test version.
fn flow_state(flow_id: &str, group: &str) -> FlowState {
    let version = version("wf-store", 1);
    FlowState::new(Flow {
        flow_id: flow_id.into(),
        company_id: "acme".into(),
        workflow_id: "wf-store".into(),
        workflow_version_id: version.version_id,
        snapshot_hash: version.snapshot_hash,
        flow_group_id: group.into(),
        status: FlowStatus::Active,
        created_at: ts(1),
        completed_at: None,
    })
}

/// Default test user.
fn user() -> UserId {
    UserId::new("alice")
}

// ============================================================================
// SECTION: Flow Persistence
// ============================================================================

/// Tests save and load round-trip with hash verification.
#[test]
fn test_flow_round_trip() {
    let (_dir, store) = open_store();
    let mut state = flow_state("flow-1", "group-1");
    let activation = state.record_node_activation("n1".into(), 1, ts(2));
    let execution = state.record_task_start("t1".into(), user(), activation, 1, ts(3));
    state.record_outcome(&execution, "DONE".into(), user(), ts(4)).unwrap();

    store.save_flow(&state).unwrap();
    let loaded = store.load_flow(&"flow-1".into()).unwrap().unwrap();
    assert_eq!(loaded, state);
    assert!(store.load_flow(&"flow-missing".into()).unwrap().is_none());
}

/// Tests each save appends a new verifiable version.
#[test]
fn test_version_history_and_pruning() {
    let (_dir, store) = open_store();
    let mut state = flow_state("flow-1", "group-1");
    store.save_flow(&state).unwrap();
    let activation = state.record_node_activation("n1".into(), 1, ts(2));
    store.save_flow(&state).unwrap();
    state.record_task_start("t1".into(), user(), activation, 1, ts(3));
    store.save_flow(&state).unwrap();

    let versions = store.list_flow_versions(&"flow-1".into()).unwrap();
    assert_eq!(versions.len(), 3);
    assert_eq!(versions[0].version, 3);

    let oldest = store.load_version(&"flow-1".into(), 1).unwrap().unwrap();
    assert!(oldest.activations.is_empty());

    let pruned = store.prune_versions(&"flow-1".into(), 1).unwrap();
    assert_eq!(pruned, 2);
    let versions = store.list_flow_versions(&"flow-1".into()).unwrap();
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].version, 3);
}

/// Tests group listing and active-flow counting.
#[test]
fn test_group_listing_and_counts() {
    let (_dir, store) = open_store();
    let mut completed = flow_state("flow-1", "group-1");
    completed.update_status(FlowStatus::Completed, ts(5));
    store.save_flow(&completed).unwrap();
    store.save_flow(&flow_state("flow-2", "group-1")).unwrap();
    store.save_flow(&flow_state("flow-3", "group-2")).unwrap();

    let flows = store.flows_in_group(&"group-1".into()).unwrap();
    assert_eq!(flows.len(), 2);
    assert_eq!(store.active_flow_count(&"wf-store".into()).unwrap(), 2);
    store.readiness().unwrap();
}

/// Tests group outcomes aggregate valid stamped outcomes per group.
#[test]
fn test_group_outcomes() {
    let (_dir, store) = open_store();
    let mut state = flow_state("flow-1", "group-1");
    let activation = state.record_node_activation("n1".into(), 1, ts(2));
    let execution = state.record_task_start("t1".into(), user(), activation, 1, ts(3));
    state.record_outcome(&execution, "DONE".into(), user(), ts(4)).unwrap();
    store.save_flow(&state).unwrap();

    let outcomes = store.group_outcomes(&"group-1".into()).unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].task_id.as_str(), "t1");
    assert!(store.group_outcomes(&"group-2".into()).unwrap().is_empty());
}

// ============================================================================
// SECTION: Groups and Registry
// ============================================================================

/// Tests the `(company, scope)` uniqueness constraint.
#[test]
fn test_group_uniqueness() {
    let (_dir, store) = open_store();
    let scope = GroupScope {
        scope_type: "deal".to_string(),
        scope_id: ScopeId::new("deal-1"),
    };
    let group = FlowGroup {
        flow_group_id: "group-1".into(),
        company_id: "acme".into(),
        scope: scope.clone(),
        job: None,
    };
    store.create_group(&group).unwrap();

    let duplicate = FlowGroup {
        flow_group_id: "group-2".into(),
        company_id: "acme".into(),
        scope: scope.clone(),
        job: None,
    };
    let error = store.create_group(&duplicate).unwrap_err();
    assert!(matches!(error, StoreError::Conflict(_)));

    let found = store.find_group(&"acme".into(), &scope).unwrap().unwrap();
    assert_eq!(found.flow_group_id.as_str(), "group-1");
    assert!(store.load_group(&"group-9".into()).unwrap().is_none());
}

/// Tests registry storage and latest-published resolution.
#[test]
fn test_registry_latest_published() {
    let (_dir, store) = open_store();
    store.store_version(&version("wf-store", 1)).unwrap();
    store.store_version(&version("wf-store", 2)).unwrap();

    let latest = store.latest_published(&"wf-store".into()).unwrap().unwrap();
    assert_eq!(latest.snapshot.version, 2);

    let by_id = store.version(&"wf-store-v1".into()).unwrap().unwrap();
    assert_eq!(by_id.snapshot.version, 1);
    assert!(store.latest_published(&"wf-other".into()).unwrap().is_none());
}

/// Tests a reopened store accepts its own schema version.
#[test]
fn test_reopen_preserves_schema() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("truth.db");
    {
        let store = SqliteTruthStore::new(SqliteStoreConfig::for_path(&path)).unwrap();
        store.save_flow(&flow_state("flow-1", "group-1")).unwrap();
    }
    let store = SqliteTruthStore::new(SqliteStoreConfig::for_path(&path)).unwrap();
    assert!(store.load_flow(&"flow-1".into()).unwrap().is_some());
}
