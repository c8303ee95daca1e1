// crates/flowspec-core/src/runtime/store.rs
// ============================================================================
// Module: FlowSpec In-Memory Store
// Description: Simple in-memory truth store for tests and examples.
// Purpose: Provide a deterministic store implementation without external deps.
// Dependencies: crate::core, crate::interfaces, crate::runtime::derived
// ============================================================================

//! ## Overview
//! This module provides a simple in-memory implementation of the store
//! traits for tests and local demos. It is not intended for production use.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;

use crate::core::identifiers::CompanyId;
use crate::core::identifiers::FlowGroupId;
use crate::core::identifiers::FlowId;
use crate::core::identifiers::WorkflowId;
use crate::core::identifiers::WorkflowVersionId;
use crate::core::spec::WorkflowVersion;
use crate::core::truth::Flow;
use crate::core::truth::FlowGroup;
use crate::core::truth::FlowState;
use crate::core::truth::FlowStatus;
use crate::core::truth::GroupOutcome;
use crate::core::truth::GroupScope;
use crate::interfaces::FlowGroupDirectory;
use crate::interfaces::StoreError;
use crate::interfaces::TruthStore;
use crate::interfaces::WorkflowRegistry;
use crate::runtime::derived::collect_group_outcomes;

// ============================================================================
// SECTION: In-Memory Store
// ============================================================================

/// In-memory truth store, group directory, and workflow registry.
#[derive(Debug, Default, Clone)]
pub struct InMemoryTruthStore {
    /// Flow state map keyed by flow id.
    flows: Arc<Mutex<BTreeMap<String, FlowState>>>,
    /// Flow group map keyed by group id.
    groups: Arc<Mutex<BTreeMap<String, FlowGroup>>>,
    /// Published version map keyed by version id.
    versions: Arc<Mutex<BTreeMap<String, WorkflowVersion>>>,
}

impl InMemoryTruthStore {
    /// Creates a new in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// Maps a poisoned mutex into a store error.
fn poisoned(which: &str) -> StoreError {
    StoreError::Store(format!("{which} mutex poisoned"))
}

impl TruthStore for InMemoryTruthStore {
    fn load_flow(&self, flow_id: &FlowId) -> Result<Option<FlowState>, StoreError> {
        let guard = self.flows.lock().map_err(|_| poisoned("flow store"))?;
        Ok(guard.get(flow_id.as_str()).cloned())
    }

    fn save_flow(&self, state: &FlowState) -> Result<(), StoreError> {
        self.flows
            .lock()
            .map_err(|_| poisoned("flow store"))?
            .insert(state.flow.flow_id.as_str().to_string(), state.clone());
        Ok(())
    }

    fn flows_in_group(&self, flow_group_id: &FlowGroupId) -> Result<Vec<Flow>, StoreError> {
        let guard = self.flows.lock().map_err(|_| poisoned("flow store"))?;
        Ok(guard
            .values()
            .filter(|state| &state.flow.flow_group_id == flow_group_id)
            .map(|state| state.flow.clone())
            .collect())
    }

    fn group_outcomes(
        &self,
        flow_group_id: &FlowGroupId,
    ) -> Result<Vec<GroupOutcome>, StoreError> {
        let guard = self.flows.lock().map_err(|_| poisoned("flow store"))?;
        let mut outcomes = Vec::new();
        for state in guard.values() {
            if &state.flow.flow_group_id == flow_group_id {
                outcomes.extend(collect_group_outcomes(&state.flow.workflow_id, state));
            }
        }
        Ok(outcomes)
    }

    fn active_flow_count(&self, workflow_id: &WorkflowId) -> Result<u64, StoreError> {
        let guard = self.flows.lock().map_err(|_| poisoned("flow store"))?;
        let count = guard
            .values()
            .filter(|state| {
                &state.flow.workflow_id == workflow_id
                    && state.flow.status != FlowStatus::Completed
            })
            .count();
        Ok(count as u64)
    }

    fn readiness(&self) -> Result<(), StoreError> {
        let _guard = self.flows.lock().map_err(|_| poisoned("flow store"))?;
        Ok(())
    }
}

impl FlowGroupDirectory for InMemoryTruthStore {
    fn find_group(
        &self,
        company_id: &CompanyId,
        scope: &GroupScope,
    ) -> Result<Option<FlowGroup>, StoreError> {
        let guard = self.groups.lock().map_err(|_| poisoned("group directory"))?;
        Ok(guard
            .values()
            .find(|group| &group.company_id == company_id && &group.scope == scope)
            .cloned())
    }

    fn load_group(&self, flow_group_id: &FlowGroupId) -> Result<Option<FlowGroup>, StoreError> {
        let guard = self.groups.lock().map_err(|_| poisoned("group directory"))?;
        Ok(guard.get(flow_group_id.as_str()).cloned())
    }

    fn create_group(&self, group: &FlowGroup) -> Result<(), StoreError> {
        let mut guard = self.groups.lock().map_err(|_| poisoned("group directory"))?;
        let duplicate = guard.values().any(|existing| {
            existing.company_id == group.company_id && existing.scope == group.scope
        });
        if duplicate {
            return Err(StoreError::Conflict(format!(
                "flow group already exists for scope {}/{}",
                group.scope.scope_type, group.scope.scope_id
            )));
        }
        guard.insert(group.flow_group_id.as_str().to_string(), group.clone());
        Ok(())
    }

    fn save_group(&self, group: &FlowGroup) -> Result<(), StoreError> {
        self.groups
            .lock()
            .map_err(|_| poisoned("group directory"))?
            .insert(group.flow_group_id.as_str().to_string(), group.clone());
        Ok(())
    }
}

impl WorkflowRegistry for InMemoryTruthStore {
    fn latest_published(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<Option<WorkflowVersion>, StoreError> {
        let guard = self.versions.lock().map_err(|_| poisoned("workflow registry"))?;
        Ok(guard
            .values()
            .filter(|version| &version.workflow_id == workflow_id)
            .max_by_key(|version| version.snapshot.version)
            .cloned())
    }

    fn version(
        &self,
        version_id: &WorkflowVersionId,
    ) -> Result<Option<WorkflowVersion>, StoreError> {
        let guard = self.versions.lock().map_err(|_| poisoned("workflow registry"))?;
        Ok(guard.get(version_id.as_str()).cloned())
    }

    fn store_version(&self, version: &WorkflowVersion) -> Result<(), StoreError> {
        self.versions
            .lock()
            .map_err(|_| poisoned("workflow registry"))?
            .insert(version.version_id.as_str().to_string(), version.clone());
        Ok(())
    }
}
