// crates/flowspec-store-sqlite/src/lib.rs
// ============================================================================
// Module: FlowSpec SQLite Store Library
// Description: Public API surface for the SQLite truth store.
// Purpose: Expose the durable store implementation and its configuration.
// Dependencies: crate::store
// ============================================================================

//! ## Overview
//! Durable FlowSpec persistence backed by `SQLite` WAL. Flow truth logs are
//! stored as canonical JSON snapshots in an append-only version table and
//! verified against stored hashes on load.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use store::FlowSummary;
pub use store::FlowVersionSummary;
pub use store::SqliteJournalMode;
pub use store::SqliteStoreConfig;
pub use store::SqliteStoreError;
pub use store::SqliteSyncMode;
pub use store::SqliteTruthStore;
