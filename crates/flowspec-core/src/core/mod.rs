// crates/flowspec-core/src/core/mod.rs
// ============================================================================
// Module: FlowSpec Core Types
// Description: Canonical FlowSpec specification and truth-log structures.
// Purpose: Provide stable, serializable types for workflow snapshots and flows.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! FlowSpec core types define workflow specifications, flow truth logs,
//! evidence schemas, and engine errors. These types are the canonical source
//! of truth for any derived API surfaces.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod errors;
pub mod evidence;
pub mod hashing;
pub mod identifiers;
pub mod spec;
pub mod time;
pub mod truth;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use errors::EngineError;
pub use errors::ErrorEnvelope;
pub use errors::ReasonCode;
pub use evidence::EvidenceBody;
pub use evidence::EvidenceError;
pub use evidence::EvidenceSchema;
pub use evidence::FilePointer;
pub use evidence::KnownEvidenceSchema;
pub use evidence::ensure_tenant_prefix;
pub use evidence::validate_against_schema;
pub use evidence::validate_file_pointer;
pub use evidence::validate_subset_schema;
pub use hashing::DEFAULT_HASH_ALGORITHM;
pub use hashing::HashAlgorithm;
pub use hashing::HashDigest;
pub use hashing::HashError;
pub use identifiers::CompanyId;
pub use identifiers::DetourId;
pub use identifiers::EvidenceId;
pub use identifiers::FlowGroupId;
pub use identifiers::FlowId;
pub use identifiers::GateId;
pub use identifiers::IdempotencyKey;
pub use identifiers::JobId;
pub use identifiers::NodeActivationId;
pub use identifiers::NodeId;
pub use identifiers::OutcomeId;
pub use identifiers::OutcomeName;
pub use identifiers::ScopeId;
pub use identifiers::TaskExecutionId;
pub use identifiers::TaskId;
pub use identifiers::UserId;
pub use identifiers::WorkflowId;
pub use identifiers::WorkflowVersionId;
pub use spec::CompletionRule;
pub use spec::CrossFlowDependency;
pub use spec::FanOutRule;
pub use spec::GateSpec;
pub use spec::NodeSpec;
pub use spec::OutcomeSpec;
pub use spec::SpecError;
pub use spec::TaskSpec;
pub use spec::WorkflowSpec;
pub use spec::WorkflowVersion;
pub use self::time::Timestamp;
pub use truth::DetourRecord;
pub use truth::DetourStatus;
pub use truth::DetourType;
pub use truth::EvidenceAttachment;
pub use truth::FanOutFailure;
pub use truth::Flow;
pub use truth::FlowGroup;
pub use truth::FlowState;
pub use truth::FlowStatus;
pub use truth::GroupOutcome;
pub use truth::GroupScope;
pub use truth::JobRecord;
pub use truth::NodeActivation;
pub use truth::TaskExecution;
pub use truth::TruthError;
pub use truth::ValidityEvent;
pub use truth::ValidityState;
