// crates/flowspec-core/src/core/errors.rs
// ============================================================================
// Module: FlowSpec Engine Errors
// Description: Closed engine error kinds, refusal reasons, and the error envelope.
// Purpose: Surface invariant violations as values with stable codes.
// Dependencies: crate::core::{evidence, hashing, identifiers, truth}, crate::interfaces, serde
// ============================================================================

//! ## Overview
//! Every engine operation returns either a result value or an
//! [`EngineError`] carrying one of the closed, stable error codes. Invariant
//! violations are errors, never panics, and never corrupt truth. The refusal
//! explainer maps every refused action to exactly one [`ReasonCode`]; a
//! [`EngineError::CoverageGap`] marks an impossible branch and indicates an
//! engine bug rather than a user-facing condition.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::evidence::EvidenceError;
use crate::core::hashing::HashError;
use crate::core::spec::SpecError;
use crate::core::truth::TruthError;
use crate::interfaces::StoreError;

// ============================================================================
// SECTION: Refusal Reasons
// ============================================================================

/// Closed set of reasons the explainer may return for a refused action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    /// The task's node has no live activation.
    NodeNotActive,
    /// The task's node is already complete.
    NodeComplete,
    /// The task already carries a recorded outcome.
    OutcomeAlreadyRecorded,
    /// An active blocking detour covers the node.
    ActiveBlockingDetour,
    /// An inbound join source is blocked.
    JoinBlocked,
    /// Another detour is already active on the flow.
    NestedDetourForbidden,
    /// A cross-flow dependency is unsatisfied.
    CrossFlowDepMissing,
}

// ============================================================================
// SECTION: Engine Errors
// ============================================================================

/// Engine operation errors with stable, closed codes.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Flow does not exist.
    #[error("flow not found: {0}")]
    FlowNotFound(String),
    /// Flow is blocked and rejects state-changing commands.
    #[error("flow is blocked: {0}")]
    FlowBlocked(String),
    /// Task is not declared by the bound snapshot.
    #[error("task not found: {0}")]
    TaskNotFound(String),
    /// Task failed the actionability predicate.
    #[error("task not actionable: {task_id} ({reason:?})")]
    TaskNotActionable {
        /// Refused task identifier.
        task_id: String,
        /// Explainer reason for the refusal.
        reason: ReasonCode,
    },
    /// An open execution already exists for the task.
    #[error("task already started: {execution_id}")]
    TaskAlreadyStarted {
        /// Identifier of the open execution.
        execution_id: String,
    },
    /// No execution exists to stamp an outcome onto.
    #[error("task not started: {0}")]
    TaskNotStarted(String),
    /// Outcome name is not declared by the task.
    #[error("invalid outcome {outcome} for task {task_id}")]
    InvalidOutcome {
        /// Task the outcome was submitted for.
        task_id: String,
        /// Undeclared outcome name.
        outcome: String,
    },
    /// Execution already carries a stamped outcome.
    #[error("outcome already recorded: {execution_id}")]
    OutcomeAlreadyRecorded {
        /// Stamped execution identifier.
        execution_id: String,
    },
    /// Task requires validating evidence before an outcome.
    #[error("evidence required for task: {0}")]
    EvidenceRequired(String),
    /// Evidence payload does not satisfy the schema.
    #[error("invalid evidence format: {0}")]
    InvalidEvidenceFormat(String),
    /// File pointer shape is invalid.
    #[error("invalid file pointer: {0}")]
    InvalidFilePointer(String),
    /// Storage key is not prefixed by the owning tenant.
    #[error("storage key tenant mismatch: {0}")]
    StorageKeyTenantMismatch(String),
    /// Node activation would exceed the iteration cap.
    #[error("iteration limit exceeded for node {node_id} at iteration {iteration}")]
    IterationLimitExceeded {
        /// Node whose activation was refused.
        node_id: String,
        /// Refused iteration number.
        iteration: u32,
    },
    /// Another detour is already active on the flow.
    #[error("nested detour forbidden; active detour: {active_detour_id}")]
    NestedDetourForbidden {
        /// Identifier of the already-active detour.
        active_detour_id: String,
    },
    /// Checkpoint outcome submitted without naming the active detour.
    #[error("active detour requires explicit resolution: {detour_id}")]
    DetourSpoof {
        /// Identifier of the active detour.
        detour_id: String,
    },
    /// Referenced detour is unknown or not resolvable.
    #[error("invalid detour: {0}")]
    InvalidDetour(String),
    /// Referenced detour belongs to a different checkpoint.
    #[error("detour checkpoint mismatch: {0}")]
    DetourHijack(String),
    /// Workflow exists but has no published lifecycle state.
    #[error("workflow not published: {0}")]
    WorkflowNotPublished(String),
    /// Workflow has no published version to instantiate.
    #[error("no published version for workflow: {0}")]
    NoPublishedVersion(String),
    /// Requested scope disagrees with the flow group's scope.
    #[error("scope mismatch for flow group: {0}")]
    ScopeMismatch(String),
    /// Group anchor task has no usable outcome or evidence.
    #[error("anchor task missing: {0}")]
    AnchorTaskMissing(String),
    /// Sale details and anchor identity disagree on the customer.
    #[error("customer mismatch between sale details and anchor identity")]
    CustomerMismatch,
    /// Impossible branch reached; indicates an engine bug.
    #[error("explainer coverage gap: {0}")]
    CoverageGap(String),
    /// Store error.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Canonical hashing error.
    #[error(transparent)]
    Hash(#[from] HashError),
    /// Specification validation error.
    #[error(transparent)]
    Spec(#[from] SpecError),
}

impl EngineError {
    /// Returns the stable error code for the envelope.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::FlowNotFound(_) => "FLOW_NOT_FOUND",
            Self::FlowBlocked(_) => "FLOW_BLOCKED",
            Self::TaskNotFound(_) => "TASK_NOT_FOUND",
            Self::TaskNotActionable {
                ..
            } => "TASK_NOT_ACTIONABLE",
            Self::TaskAlreadyStarted {
                ..
            } => "TASK_ALREADY_STARTED",
            Self::TaskNotStarted(_) => "TASK_NOT_STARTED",
            Self::InvalidOutcome {
                ..
            } => "INVALID_OUTCOME",
            Self::OutcomeAlreadyRecorded {
                ..
            } => "OUTCOME_ALREADY_RECORDED",
            Self::EvidenceRequired(_) => "EVIDENCE_REQUIRED",
            Self::InvalidEvidenceFormat(_) => "INVALID_EVIDENCE_FORMAT",
            Self::InvalidFilePointer(_) => "INVALID_FILE_POINTER",
            Self::StorageKeyTenantMismatch(_) => "STORAGE_KEY_TENANT_MISMATCH",
            Self::IterationLimitExceeded {
                ..
            } => "ITERATION_LIMIT_EXCEEDED",
            Self::NestedDetourForbidden {
                ..
            } => "NESTED_DETOUR_FORBIDDEN",
            Self::DetourSpoof {
                ..
            } => "DETOUR_SPOOF",
            Self::InvalidDetour(_) => "INVALID_DETOUR",
            Self::DetourHijack(_) => "DETOUR_HIJACK",
            Self::WorkflowNotPublished(_) => "WORKFLOW_NOT_PUBLISHED",
            Self::NoPublishedVersion(_) => "NO_PUBLISHED_VERSION",
            Self::ScopeMismatch(_) => "SCOPE_MISMATCH",
            Self::AnchorTaskMissing(_) => "ANCHOR_TASK_MISSING",
            Self::CustomerMismatch => "CUSTOMER_MISMATCH",
            Self::CoverageGap(_) => "COVERAGE_GAP",
            Self::Store(_) => "STORE_ERROR",
            Self::Hash(_) => "HASH_ERROR",
            Self::Spec(_) => "INVALID_SPEC",
        }
    }

    /// Returns true when the caller may retry the operation unchanged.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::Store(StoreError::Conflict(_)))
    }

    /// Builds the caller-facing error envelope.
    #[must_use]
    pub fn envelope(&self) -> ErrorEnvelope {
        let details = match self {
            Self::TaskNotActionable {
                reason, ..
            } => serde_json::to_value(reason).ok(),
            Self::TaskAlreadyStarted {
                execution_id,
            } => Some(Value::String(execution_id.clone())),
            _ => None,
        };
        ErrorEnvelope {
            code: self.code().to_string(),
            message: self.to_string(),
            details,
        }
    }
}

impl From<EvidenceError> for EngineError {
    fn from(error: EvidenceError) -> Self {
        match error {
            EvidenceError::InvalidFormat(message) => Self::InvalidEvidenceFormat(message),
            EvidenceError::InvalidFilePointer(message) => Self::InvalidFilePointer(message),
            EvidenceError::TenantMismatch {
                storage_key,
            } => Self::StorageKeyTenantMismatch(storage_key),
            EvidenceError::SchemaShape(message) => Self::InvalidEvidenceFormat(message),
        }
    }
}

impl From<TruthError> for EngineError {
    fn from(error: TruthError) -> Self {
        match error {
            TruthError::OutcomeAlreadyRecorded(execution_id) => Self::OutcomeAlreadyRecorded {
                execution_id,
            },
            TruthError::ExecutionNotFound(execution_id) => {
                Self::CoverageGap(format!("stale execution reference: {execution_id}"))
            }
        }
    }
}

// ============================================================================
// SECTION: Error Envelope
// ============================================================================

/// Caller-facing error envelope with a stable code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// Stable error code string.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Optional structured details.
    pub details: Option<Value>,
}
