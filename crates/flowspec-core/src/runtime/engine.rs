// crates/flowspec-core/src/runtime/engine.rs
// ============================================================================
// Module: FlowSpec Progression Engine
// Description: Transactional start, outcome, gate, activation, and completion logic.
// Purpose: Execute workflow progression with per-flow serialization and append-only truth.
// Dependencies: crate::{core, interfaces, runtime}
// ============================================================================

//! ## Overview
//! The progression engine is the single canonical execution path for
//! FlowSpec. Every state-changing operation acquires the flow's exclusive
//! lock, loads the truth log, mutates it in memory, and commits it with one
//! atomic save. Post-commit side effects (hooks, fan-out) run outside the
//! transaction and never roll back stamped outcomes.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;

use serde::Deserialize;
use serde::Serialize;

use crate::core::errors::EngineError;
use crate::core::evidence::EvidenceBody;
use crate::core::evidence::ensure_tenant_prefix;
use crate::core::evidence::validate_against_schema;
use crate::core::evidence::validate_file_pointer;
use crate::core::identifiers::CompanyId;
use crate::core::identifiers::DetourId;
use crate::core::identifiers::EvidenceId;
use crate::core::identifiers::FlowGroupId;
use crate::core::identifiers::FlowId;
use crate::core::identifiers::IdempotencyKey;
use crate::core::identifiers::NodeActivationId;
use crate::core::identifiers::NodeId;
use crate::core::identifiers::OutcomeName;
use crate::core::identifiers::TaskExecutionId;
use crate::core::identifiers::TaskId;
use crate::core::identifiers::UserId;
use crate::core::identifiers::WorkflowId;
use crate::core::spec::WorkflowSpec;
use crate::core::spec::WorkflowVersion;
use crate::core::time::Timestamp;
use crate::core::truth::Flow;
use crate::core::truth::FlowState;
use crate::core::truth::FlowStatus;
use crate::core::truth::GroupScope;
use crate::core::truth::ValidityState;
use crate::interfaces::EngineEvent;
use crate::interfaces::FlowGroupDirectory;
use crate::interfaces::HookSink;
use crate::interfaces::StoreError;
use crate::interfaces::TruthStore;
use crate::interfaces::WorkflowRegistry;
use crate::runtime::coordinator::CoordinatorConfig;
use crate::runtime::coordinator::FanOutIntent;
use crate::runtime::derived;
use crate::runtime::derived::ActionableTask;
use crate::runtime::derived::GateRoute;
use crate::runtime::hooks::HookRegistry;

// ============================================================================
// SECTION: Engine Configuration
// ============================================================================

/// Hard cap on per-node iterations; the only cycle guard.
pub const MAX_NODE_ITERATIONS: u32 = 100;

/// Configuration for the progression engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct EngineConfig {
    /// Maximum iteration a node activation may reach.
    #[serde(default = "default_max_node_iterations")]
    pub max_node_iterations: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_node_iterations: MAX_NODE_ITERATIONS,
        }
    }
}

/// Returns the default iteration cap.
const fn default_max_node_iterations() -> u32 {
    MAX_NODE_ITERATIONS
}

// ============================================================================
// SECTION: Progression Engine
// ============================================================================

/// Progression engine implementing deterministic flow advancement.
pub struct ProgressionEngine<S, G, R> {
    /// Truth store implementation.
    pub(crate) store: S,
    /// Flow group directory implementation.
    pub(crate) groups: G,
    /// Workflow registry implementation.
    pub(crate) registry: R,
    /// Hook registry configured at startup.
    hooks: HookRegistry,
    /// Fan-out coordinator configuration.
    pub(crate) coordinator: CoordinatorConfig,
    /// Engine configuration.
    pub(crate) config: EngineConfig,
    /// Per-flow exclusive locks.
    locks: Mutex<BTreeMap<String, Arc<Mutex<()>>>>,
}

impl<S, G, R> ProgressionEngine<S, G, R>
where
    S: TruthStore,
    G: FlowGroupDirectory,
    R: WorkflowRegistry,
{
    /// Creates a new progression engine.
    #[must_use]
    pub fn new(
        store: S,
        groups: G,
        registry: R,
        coordinator: CoordinatorConfig,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            groups,
            registry,
            hooks: HookRegistry::new(),
            coordinator,
            config,
            locks: Mutex::new(BTreeMap::new()),
        }
    }

    /// Registers a hook sink; registration order is emission order.
    pub fn register_hook(&mut self, sink: Box<dyn HookSink + Send + Sync>) {
        self.hooks.register(sink);
    }

    /// Returns the number of hook events dropped by failing sinks.
    #[must_use]
    pub fn dropped_hook_count(&self) -> u64 {
        self.hooks.dropped_count()
    }

    // ------------------------------------------------------------------
    // Flow instantiation
    // ------------------------------------------------------------------

    /// Creates a flow for the latest published version of a workflow.
    ///
    /// Idempotent per `(flow group, workflow)`: when a flow for the workflow
    /// already exists in the group it is returned unchanged. Entry nodes are
    /// activated at iteration 1.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NoPublishedVersion`] when the workflow has no
    /// published version, [`EngineError::ScopeMismatch`] when a supplied
    /// group hint disagrees with the requested scope, and store errors on
    /// persistence failures.
    pub fn create_flow(
        &self,
        workflow_id: &WorkflowId,
        company_id: &CompanyId,
        scope: &GroupScope,
        flow_group_hint: Option<&FlowGroupId>,
        now: Timestamp,
    ) -> Result<Flow, EngineError> {
        let group = self.resolve_group(company_id, scope, flow_group_hint)?;

        for existing in self.store.flows_in_group(&group.flow_group_id)? {
            if &existing.workflow_id == workflow_id {
                return Ok(existing);
            }
        }

        let version = self
            .registry
            .latest_published(workflow_id)?
            .ok_or_else(|| EngineError::NoPublishedVersion(workflow_id.to_string()))?;

        let flow_id =
            FlowId::new(format!("flow-{}-{workflow_id}", group.flow_group_id));
        let flow = Flow {
            flow_id: flow_id.clone(),
            company_id: company_id.clone(),
            workflow_id: workflow_id.clone(),
            workflow_version_id: version.version_id.clone(),
            snapshot_hash: version.snapshot_hash.clone(),
            flow_group_id: group.flow_group_id.clone(),
            status: FlowStatus::Active,
            created_at: now,
            completed_at: None,
        };

        let mut state = FlowState::new(flow);
        let entries = activate_entry_nodes(&mut state, &version.snapshot, now);
        self.store.save_flow(&state)?;

        for (node_id, iteration) in entries {
            self.hooks.emit(&EngineEvent::NodeActivated {
                flow_id: flow_id.clone(),
                node_id,
                iteration,
            });
        }

        Ok(state.flow)
    }

    /// Resolves or creates the flow group for an instantiation request.
    fn resolve_group(
        &self,
        company_id: &CompanyId,
        scope: &GroupScope,
        flow_group_hint: Option<&FlowGroupId>,
    ) -> Result<crate::core::truth::FlowGroup, EngineError> {
        if let Some(hint) = flow_group_hint {
            let group = self
                .groups
                .load_group(hint)?
                .ok_or_else(|| EngineError::ScopeMismatch(format!("unknown flow group: {hint}")))?;
            if &group.company_id != company_id || &group.scope != scope {
                return Err(EngineError::ScopeMismatch(hint.to_string()));
            }
            return Ok(group);
        }

        if let Some(group) = self.groups.find_group(company_id, scope)? {
            return Ok(group);
        }

        let group = crate::core::truth::FlowGroup {
            flow_group_id: FlowGroupId::new(format!(
                "group-{company_id}-{}-{}",
                scope.scope_type, scope.scope_id
            )),
            company_id: company_id.clone(),
            scope: scope.clone(),
            job: None,
        };
        self.groups.create_group(&group)?;
        Ok(group)
    }

    // ------------------------------------------------------------------
    // Task start
    // ------------------------------------------------------------------

    /// Starts a task, appending a new open execution.
    ///
    /// Actionability is checked here and only here; outcome recording relies
    /// on the open execution instead.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::FlowBlocked`], [`EngineError::TaskNotFound`],
    /// [`EngineError::TaskNotActionable`] with the explainer's reason, or
    /// [`EngineError::TaskAlreadyStarted`] carrying the open execution id.
    pub fn start_task(
        &self,
        flow_id: &FlowId,
        task_id: &TaskId,
        user: &UserId,
        now: Timestamp,
    ) -> Result<TaskExecutionId, EngineError> {
        let lock = self.flow_guard(flow_id)?;
        let _held = lock.lock().map_err(|_| lock_conflict(flow_id))?;

        let mut state = self.load_state(flow_id)?;
        ensure_not_blocked(&state)?;
        let version = self.snapshot_for(&state.flow)?;
        let spec = &version.snapshot;
        let (node, task) =
            spec.task(task_id).ok_or_else(|| EngineError::TaskNotFound(task_id.to_string()))?;

        let group_outcomes = self.store.group_outcomes(&state.flow.flow_group_id)?;
        if !derived::task_actionable(spec, &state, node, task, &group_outcomes) {
            let reason = derived::explain_start_refusal(spec, &state, node, task, &group_outcomes)?;
            return Err(EngineError::TaskNotActionable {
                task_id: task_id.to_string(),
                reason,
            });
        }

        let activation = state
            .latest_activation(&node.node_id)
            .ok_or_else(|| EngineError::CoverageGap("actionable task without activation".into()))?;
        let iteration = activation.iteration;
        let activation_id = activation.activation_id.clone();

        if let Some(open) = state.open_execution(task_id, iteration) {
            return Err(EngineError::TaskAlreadyStarted {
                execution_id: open.execution_id.to_string(),
            });
        }

        let execution_id = state.record_task_start(
            task_id.clone(),
            user.clone(),
            activation_id,
            iteration,
            now,
        );
        self.store.save_flow(&state)?;

        self.hooks.emit(&EngineEvent::TaskStarted {
            flow_id: flow_id.clone(),
            task_id: task_id.clone(),
            execution_id: execution_id.clone(),
        });

        Ok(execution_id)
    }

    // ------------------------------------------------------------------
    // Outcome recording
    // ------------------------------------------------------------------

    /// Records an outcome, routes gates, and detects completion.
    ///
    /// With a `detour_id` the detour resolution path applies: the resume
    /// target is activated directly and gate routing is skipped. Fan-out
    /// dispatch runs post-commit; its failures block the flow but never roll
    /// back the stamped outcome.
    ///
    /// # Errors
    ///
    /// Returns the closed-code errors for invalid outcomes, missing starts,
    /// evidence requirements, detour misuse, and the iteration cap.
    #[allow(
        clippy::too_many_lines,
        reason = "Single linear flow keeps the ordered transaction steps auditable."
    )]
    pub fn record_outcome(
        &self,
        flow_id: &FlowId,
        task_id: &TaskId,
        outcome: &OutcomeName,
        user: &UserId,
        detour_id: Option<&DetourId>,
        now: Timestamp,
    ) -> Result<OutcomeRecorded, EngineError> {
        let lock = self.flow_guard(flow_id)?;
        let _held = lock.lock().map_err(|_| lock_conflict(flow_id))?;

        let mut state = self.load_state(flow_id)?;
        ensure_not_blocked(&state)?;
        let version = self.snapshot_for(&state.flow)?;
        let spec = &version.snapshot;
        let (node, task) =
            spec.task(task_id).ok_or_else(|| EngineError::TaskNotFound(task_id.to_string()))?;
        let node_id = node.node_id.clone();
        let iteration = derived::current_iteration(&state, &node_id);

        let execution_id = match state.open_execution(task_id, iteration) {
            Some(open) => open.execution_id.clone(),
            None => {
                if let Some(detour) = detour_id {
                    // Resolution re-opens the checkpoint implicitly: the prior
                    // execution stays tainted and a fresh one is stamped.
                    validate_resolution_detour(&state, &node_id, detour)?;
                    let activation = state.latest_activation(&node_id).ok_or_else(|| {
                        EngineError::CoverageGap("detour checkpoint without activation".into())
                    })?;
                    let activation_id = activation.activation_id.clone();
                    state.record_task_start(
                        task_id.clone(),
                        user.clone(),
                        activation_id,
                        iteration,
                        now,
                    )
                } else {
                    // An active detour at this node demands explicit
                    // resolution before the stamped-execution errors apply.
                    if let Some(active) = derived::active_detour_at(&state, &node_id) {
                        return Err(EngineError::DetourSpoof {
                            detour_id: active.detour_id.to_string(),
                        });
                    }
                    let stamped = state
                        .latest_execution(task_id, iteration)
                        .filter(|execution| !execution.is_open());
                    return Err(match stamped {
                        Some(execution) => EngineError::OutcomeAlreadyRecorded {
                            execution_id: execution.execution_id.to_string(),
                        },
                        None => EngineError::TaskNotStarted(task_id.to_string()),
                    });
                }
            }
        };

        if !task.declares_outcome(outcome) {
            return Err(EngineError::InvalidOutcome {
                task_id: task_id.to_string(),
                outcome: outcome.to_string(),
            });
        }

        if task.evidence_required {
            let satisfied = match &task.evidence_schema {
                Some(schema) => state
                    .evidence_for_task(task_id)
                    .any(|attachment| validate_against_schema(schema, &attachment.body).is_ok()),
                None => state.evidence_for_task(task_id).next().is_some(),
            };
            if !satisfied {
                return Err(EngineError::EvidenceRequired(task_id.to_string()));
            }
        }

        if let Some(active) = derived::active_detour_at(&state, &node_id)
            && detour_id.is_none()
        {
            return Err(EngineError::DetourSpoof {
                detour_id: active.detour_id.to_string(),
            });
        }
        if let Some(detour) = detour_id {
            validate_resolution_detour(&state, &node_id, detour)?;
        }

        // Transaction body: stamp, overlay, route, complete. `after_stamp` is
        // the fallback commit when an activation would exceed the cap.
        state.record_outcome(&execution_id, outcome.clone(), user.clone(), now)?;
        let after_stamp = state.clone();

        let mut routes: Vec<GateRoute> = Vec::new();
        let mut activated: Vec<(NodeId, u32)> = Vec::new();
        let mut node_completed = false;

        let routing = (|| -> Result<(), EngineError> {
            if let Some(detour) = detour_id {
                state.record_validity(
                    execution_id.clone(),
                    ValidityState::Valid,
                    user.clone(),
                    now,
                    Some(format!("resolved by detour {detour}")),
                );
                state.record_resolved_detour(&execution_id, detour.clone())?;
                let resume = {
                    let record = state
                        .detour_mut(detour)
                        .ok_or_else(|| EngineError::InvalidDetour(detour.to_string()))?;
                    record.status = crate::core::truth::DetourStatus::Resolved;
                    record.resolved_at = Some(now);
                    record.resume_target_node_id.clone()
                };
                let (_, resume_iteration) = activate_in_state(
                    &mut state,
                    &resume,
                    self.config.max_node_iterations,
                    now,
                )?;
                activated.push((resume, resume_iteration));
            } else {
                let validity = derived::validity_map(&state);
                node_completed = derived::node_complete(node, &state, &validity, iteration);
                if node_completed {
                    routes = derived::evaluate_gates(spec, &state, node, iteration)?;
                    for route in &routes {
                        if let Some(target) = &route.target_node_id {
                            let (_, target_iteration) = activate_in_state(
                                &mut state,
                                target,
                                self.config.max_node_iterations,
                                now,
                            )?;
                            activated.push((target.clone(), target_iteration));
                        }
                    }
                }
            }
            Ok(())
        })();

        if let Err(error) = routing {
            if matches!(error, EngineError::IterationLimitExceeded { .. }) {
                // Commit the stamped outcome, then block outside that commit.
                self.store.save_flow(&after_stamp)?;
                let mut blocked = after_stamp;
                blocked.update_status(FlowStatus::Blocked, now);
                self.store.save_flow(&blocked)?;
            }
            return Err(error);
        }

        let flow_completed = derived::flow_complete(spec, &state);
        if flow_completed && state.flow.status != FlowStatus::Blocked {
            state.update_status(FlowStatus::Completed, now);
        }

        self.store.save_flow(&state)?;

        self.hooks.emit(&EngineEvent::TaskDone {
            flow_id: flow_id.clone(),
            task_id: task_id.clone(),
            execution_id: execution_id.clone(),
            outcome: outcome.clone(),
        });
        for (activated_node, activated_iteration) in &activated {
            self.hooks.emit(&EngineEvent::NodeActivated {
                flow_id: flow_id.clone(),
                node_id: activated_node.clone(),
                iteration: *activated_iteration,
            });
        }
        if flow_completed {
            self.hooks.emit(&EngineEvent::FlowCompleted {
                flow_id: flow_id.clone(),
            });
        }

        let mut spawned = Vec::new();
        if node_completed {
            let intent = FanOutIntent {
                flow_id: flow_id.clone(),
                flow_group_id: state.flow.flow_group_id.clone(),
                company_id: state.flow.company_id.clone(),
                node_id: node_id.clone(),
                task_id: task_id.clone(),
                outcome: outcome.clone(),
            };
            match self.dispatch_fan_out(spec, &intent, now) {
                Ok(flows) => spawned = flows,
                Err(failure) => {
                    state.record_fan_out_failure(
                        node_id,
                        outcome.clone(),
                        failure.target_workflow_id,
                        failure.message,
                        now,
                    );
                    state.update_status(FlowStatus::Blocked, now);
                    self.store.save_flow(&state)?;
                }
            }
        }

        Ok(OutcomeRecorded {
            execution_id,
            outcome: outcome.clone(),
            node_completed,
            routes,
            flow_completed,
            resolved_detour_id: detour_id.cloned(),
            spawned_flows: spawned,
        })
    }

    // ------------------------------------------------------------------
    // Evidence
    // ------------------------------------------------------------------

    /// Attaches evidence to a task, honouring the idempotency key.
    ///
    /// File pointers are validated for shape and tenant prefix; payloads are
    /// validated against the task schema when one is declared. The attachment
    /// binds to the current-iteration execution when one exists.
    ///
    /// # Errors
    ///
    /// Returns the closed-code evidence errors or store errors.
    pub fn attach_evidence(
        &self,
        flow_id: &FlowId,
        task_id: &TaskId,
        body: EvidenceBody,
        user: &UserId,
        idempotency_key: Option<IdempotencyKey>,
        now: Timestamp,
    ) -> Result<EvidenceId, EngineError> {
        let lock = self.flow_guard(flow_id)?;
        let _held = lock.lock().map_err(|_| lock_conflict(flow_id))?;

        let mut state = self.load_state(flow_id)?;
        ensure_not_blocked(&state)?;
        let version = self.snapshot_for(&state.flow)?;
        let (node, task) = version
            .snapshot
            .task(task_id)
            .ok_or_else(|| EngineError::TaskNotFound(task_id.to_string()))?;

        if let EvidenceBody::File {
            pointer,
        } = &body
        {
            validate_file_pointer(pointer)?;
            ensure_tenant_prefix(pointer, &state.flow.company_id)?;
        }
        if let Some(schema) = &task.evidence_schema {
            validate_against_schema(schema, &body)?;
        }

        let iteration = derived::current_iteration(&state, &node.node_id);
        let execution_id = state
            .latest_execution(task_id, iteration)
            .map(|execution| execution.execution_id.clone());

        let evidence_id = state.attach_evidence(
            task_id.clone(),
            execution_id,
            body,
            user.clone(),
            now,
            idempotency_key,
        );
        self.store.save_flow(&state)?;
        Ok(evidence_id)
    }

    // ------------------------------------------------------------------
    // Activation
    // ------------------------------------------------------------------

    /// Activates a node explicitly, deriving the iteration when omitted.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::IterationLimitExceeded`] when the iteration
    /// would exceed the cap; the flow status is not changed by this
    /// operation.
    pub fn activate_node(
        &self,
        flow_id: &FlowId,
        node_id: &NodeId,
        iteration: Option<u32>,
        now: Timestamp,
    ) -> Result<(NodeActivationId, u32), EngineError> {
        let lock = self.flow_guard(flow_id)?;
        let _held = lock.lock().map_err(|_| lock_conflict(flow_id))?;

        let mut state = self.load_state(flow_id)?;
        ensure_not_blocked(&state)?;
        let version = self.snapshot_for(&state.flow)?;
        if version.snapshot.node(node_id).is_none() {
            return Err(EngineError::CoverageGap(format!("unknown node: {node_id}")));
        }

        let iteration = iteration.unwrap_or_else(|| {
            state.latest_activation(node_id).map_or(1, |activation| activation.iteration + 1)
        });
        if iteration > self.config.max_node_iterations {
            return Err(EngineError::IterationLimitExceeded {
                node_id: node_id.to_string(),
                iteration,
            });
        }

        let activation_id = state.record_node_activation(node_id.clone(), iteration, now);
        self.store.save_flow(&state)?;

        self.hooks.emit(&EngineEvent::NodeActivated {
            flow_id: flow_id.clone(),
            node_id: node_id.clone(),
            iteration,
        });

        Ok((activation_id, iteration))
    }

    // ------------------------------------------------------------------
    // Status and read surface
    // ------------------------------------------------------------------

    /// Sets a caller-driven flow status such as suspension.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::FlowNotFound`] or store errors.
    pub fn set_flow_status(
        &self,
        flow_id: &FlowId,
        status: FlowStatus,
        now: Timestamp,
    ) -> Result<(), EngineError> {
        let lock = self.flow_guard(flow_id)?;
        let _held = lock.lock().map_err(|_| lock_conflict(flow_id))?;

        let mut state = self.load_state(flow_id)?;
        state.update_status(status, now);
        self.store.save_flow(&state)?;
        Ok(())
    }

    /// Loads a flow's truth log.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::FlowNotFound`] or store errors.
    pub fn flow_state(&self, flow_id: &FlowId) -> Result<FlowState, EngineError> {
        self.load_state(flow_id)
    }

    /// Computes the actionable tasks for a flow in canonical order.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::FlowNotFound`] or store errors.
    pub fn actionable_tasks(&self, flow_id: &FlowId) -> Result<Vec<ActionableTask>, EngineError> {
        let state = self.load_state(flow_id)?;
        let version = self.snapshot_for(&state.flow)?;
        let group_outcomes = self.store.group_outcomes(&state.flow.flow_group_id)?;
        Ok(derived::actionable_tasks(&version.snapshot, &state, &group_outcomes))
    }

    // ------------------------------------------------------------------
    // Internal helpers
    // ------------------------------------------------------------------

    /// Returns the exclusive lock handle for a flow.
    pub(crate) fn flow_guard(&self, flow_id: &FlowId) -> Result<Arc<Mutex<()>>, EngineError> {
        let mut table = self.locks.lock().map_err(|_| lock_conflict(flow_id))?;
        Ok(Arc::clone(table.entry(flow_id.as_str().to_string()).or_default()))
    }

    /// Loads the flow state or fails with `FLOW_NOT_FOUND`.
    pub(crate) fn load_state(&self, flow_id: &FlowId) -> Result<FlowState, EngineError> {
        self.store
            .load_flow(flow_id)?
            .ok_or_else(|| EngineError::FlowNotFound(flow_id.to_string()))
    }

    /// Loads the bound snapshot and verifies the flow's stored digest.
    pub(crate) fn snapshot_for(&self, flow: &Flow) -> Result<WorkflowVersion, EngineError> {
        let version = self.registry.version(&flow.workflow_version_id)?.ok_or_else(|| {
            EngineError::Store(StoreError::Corrupt(format!(
                "missing workflow version: {}",
                flow.workflow_version_id
            )))
        })?;
        if version.snapshot_hash != flow.snapshot_hash {
            return Err(EngineError::Store(StoreError::Corrupt(format!(
                "snapshot hash mismatch for flow: {}",
                flow.flow_id
            ))));
        }
        Ok(version)
    }
}

// ============================================================================
// SECTION: Results
// ============================================================================

/// Result of a recorded outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeRecorded {
    /// Execution the outcome was stamped onto.
    pub execution_id: TaskExecutionId,
    /// Recorded outcome name.
    pub outcome: OutcomeName,
    /// True when the node completed in this transaction.
    pub node_completed: bool,
    /// Gate routes evaluated on completion (empty on the detour path).
    pub routes: Vec<GateRoute>,
    /// True when the flow completed in this transaction.
    pub flow_completed: bool,
    /// Detour resolved by this outcome, if any.
    pub resolved_detour_id: Option<DetourId>,
    /// Child flows spawned by post-commit fan-out.
    pub spawned_flows: Vec<FlowId>,
}

// ============================================================================
// SECTION: Helper Functions
// ============================================================================

/// Builds the retriable lock-conflict error for a flow.
fn lock_conflict(flow_id: &FlowId) -> EngineError {
    EngineError::Store(StoreError::Conflict(format!("flow lock unavailable: {flow_id}")))
}

/// Rejects state-changing commands on blocked flows.
fn ensure_not_blocked(state: &FlowState) -> Result<(), EngineError> {
    if state.flow.status == FlowStatus::Blocked {
        Err(EngineError::FlowBlocked(state.flow.flow_id.to_string()))
    } else {
        Ok(())
    }
}

/// Validates a detour referenced for resolution.
///
/// The detour must exist, be active (converted detours can no longer be
/// resolved), and be anchored at the node whose outcome is being recorded.
fn validate_resolution_detour(
    state: &FlowState,
    node_id: &NodeId,
    detour_id: &DetourId,
) -> Result<(), EngineError> {
    let Some(record) = state.detour(detour_id) else {
        return Err(EngineError::InvalidDetour(detour_id.to_string()));
    };
    if record.status != crate::core::truth::DetourStatus::Active {
        return Err(EngineError::InvalidDetour(detour_id.to_string()));
    }
    if &record.checkpoint_node_id != node_id {
        return Err(EngineError::DetourHijack(detour_id.to_string()));
    }
    Ok(())
}

/// Activates a node within an open transaction, enforcing the cap.
fn activate_in_state(
    state: &mut FlowState,
    node_id: &NodeId,
    max_node_iterations: u32,
    now: Timestamp,
) -> Result<(NodeActivationId, u32), EngineError> {
    let iteration =
        state.latest_activation(node_id).map_or(1, |activation| activation.iteration + 1);
    if iteration > max_node_iterations {
        return Err(EngineError::IterationLimitExceeded {
            node_id: node_id.to_string(),
            iteration,
        });
    }
    Ok((state.record_node_activation(node_id.clone(), iteration, now), iteration))
}

/// Activates every entry node at iteration 1 during instantiation.
fn activate_entry_nodes(
    state: &mut FlowState,
    spec: &WorkflowSpec,
    now: Timestamp,
) -> Vec<(NodeId, u32)> {
    let mut activated = Vec::new();
    for node in &spec.nodes {
        if node.entry {
            state.record_node_activation(node.node_id.clone(), 1, now);
            activated.push((node.node_id.clone(), 1));
        }
    }
    activated
}
