// system-tests/src/lib.rs
// ============================================================================
// Module: FlowSpec System Tests
// Description: Shared fixtures for full-stack scenario tests.
// Purpose: Drive the engine over the durable store exactly as hosts do.
// Dependencies: flowspec-core, flowspec-store-sqlite
// ============================================================================

//! ## Overview
//! System tests exercise the complete stack: specs published through the
//! draft lifecycle, flows progressed by the engine, and truth persisted in
//! the `SQLite` store. Fixtures here are shared by the scenario suites.

// ============================================================================
// SECTION: Imports
// ============================================================================

use flowspec_core::CompletionRule;
use flowspec_core::CoordinatorConfig;
use flowspec_core::EngineConfig;
use flowspec_core::GateSpec;
use flowspec_core::GroupScope;
use flowspec_core::NodeSpec;
use flowspec_core::OutcomeSpec;
use flowspec_core::ProgressionEngine;
use flowspec_core::ScopeId;
use flowspec_core::TaskId;
use flowspec_core::TaskSpec;
use flowspec_core::Timestamp;
use flowspec_core::UserId;
use flowspec_core::WorkflowDraft;
use flowspec_core::WorkflowSpec;
use flowspec_store_sqlite::SqliteStoreConfig;
use flowspec_store_sqlite::SqliteTruthStore;

/// Engine type used by every system test.
pub type SystemEngine = ProgressionEngine<SqliteTruthStore, SqliteTruthStore, SqliteTruthStore>;

// ============================================================================
// SECTION: Fixtures
// ============================================================================

/// Shorthand for unix-millis timestamps.
#[must_use]
pub const fn ts(value: i64) -> Timestamp {
    Timestamp::UnixMillis(value)
}

/// Default test user.
#[must_use]
pub fn operator() -> UserId {
    UserId::new("operator")
}

/// Default test scope.
#[must_use]
pub fn scope() -> GroupScope {
    GroupScope {
        scope_type: "deal".to_string(),
        scope_id: ScopeId::new("deal-1"),
    }
}

/// Builds a task with the provided declared outcome names.
#[must_use]
pub fn task(id: &str, outcomes: &[&str]) -> TaskSpec {
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
#[must_use]
pub fn node(id: &str, entry: bool, tasks: Vec<TaskSpec>) -> NodeSpec {
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
#[must_use]
pub fn gate(id: &str, source: &str, outcome: &str, target: Option<&str>) -> GateSpec {
    GateSpec {
        gate_id: id.into(),
        source_node_id: source.into(),
        outcome_name: outcome.into(),
        target_node_id: target.map(Into::into),
    }
}

/// Opens a durable store in the provided directory.
///
/// # Panics
///
/// Panics when the store cannot be opened; system-test setup is fail-fast.
#[must_use]
#[allow(clippy::panic, reason = "System-test setup is fail-fast by design.")]
pub fn open_store(dir: &std::path::Path) -> SqliteTruthStore {
    match SqliteTruthStore::new(SqliteStoreConfig::for_path(dir.join("truth.db"))) {
        Ok(store) => store,
        Err(error) => panic!("failed to open system-test store: {error}"),
    }
}

/// Publishes a spec through the draft lifecycle.
///
/// # Panics
///
/// Panics when validation or publish fails; system-test setup is fail-fast.
#[allow(
    clippy::panic,
    clippy::use_debug,
    reason = "System-test setup is fail-fast by design."
)]
pub fn publish(store: &SqliteTruthStore, spec: WorkflowSpec, at: i64) {
    let mut draft = WorkflowDraft::new(spec);
    match draft.validate(store) {
        Ok(issues) if issues.is_empty() => {}
        Ok(issues) => panic!("fixture spec failed validation: {issues:?}"),
        Err(error) => panic!("fixture validation errored: {error}"),
    }
    if let Err(error) = draft.publish(store, ts(at)) {
        panic!("fixture publish failed: {error}");
    }
}

/// Builds an engine over the durable store with a custom coordinator.
#[must_use]
pub fn engine_with(store: &SqliteTruthStore, coordinator: CoordinatorConfig) -> SystemEngine {
    ProgressionEngine::new(
        store.clone(),
        store.clone(),
        store.clone(),
        coordinator,
        EngineConfig::default(),
    )
}

/// Builds an engine over the durable store with default configuration.
#[must_use]
pub fn engine(store: &SqliteTruthStore) -> SystemEngine {
    engine_with(store, CoordinatorConfig::default())
}
