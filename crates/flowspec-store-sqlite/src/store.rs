// crates/flowspec-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Truth Store
// Description: Durable TruthStore backed by SQLite WAL.
// Purpose: Persist flow truth snapshots with deterministic serialization.
// Dependencies: flowspec-core, rusqlite, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! This module implements the durable FlowSpec store traits using `SQLite`.
//! Each save produces a canonical JSON snapshot of the flow's truth log
//! stored in an append-only version table. Loads verify integrity via stored
//! hashes and fail closed on corruption. Connection access is serialized
//! through a mutex, which combined with the engine's per-flow locks gives
//! the strong per-flow write ordering the engine requires.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use flowspec_core::CompanyId;
use flowspec_core::Flow;
use flowspec_core::FlowGroup;
use flowspec_core::FlowGroupDirectory;
use flowspec_core::FlowGroupId;
use flowspec_core::FlowId;
use flowspec_core::FlowState;
use flowspec_core::FlowStatus;
use flowspec_core::GroupOutcome;
use flowspec_core::GroupScope;
use flowspec_core::StoreError;
use flowspec_core::TruthStore;
use flowspec_core::WorkflowId;
use flowspec_core::WorkflowRegistry;
use flowspec_core::WorkflowVersion;
use flowspec_core::WorkflowVersionId;
use flowspec_core::hashing::DEFAULT_HASH_ALGORITHM;
use flowspec_core::hashing::HashAlgorithm;
use flowspec_core::hashing::canonical_json_bytes;
use flowspec_core::hashing::hash_bytes;
use flowspec_core::runtime::derived::collect_group_outcomes;
use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::params;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// `SQLite` schema version for the store.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` journal mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `journal_mode` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteJournalMode {
    /// WAL journal mode (recommended).
    #[default]
    Wal,
    /// Delete journal mode (legacy).
    Delete,
}

impl SqliteJournalMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` sync mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `synchronous` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode (safest).
    #[default]
    Full,
    /// Normal synchronous mode (balanced).
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Configuration for the `SQLite` truth store.
///
/// # Invariants
/// - `path` must resolve to a file path (not a directory).
/// - `busy_timeout_ms` is interpreted as milliseconds.
/// - `max_versions`, when set, must be greater than zero.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteStoreConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteJournalMode,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
    /// Optional maximum versions per flow (older versions pruned).
    #[serde(default)]
    pub max_versions: Option<u64>,
}

impl SqliteStoreConfig {
    /// Builds a config with defaults for the provided database path.
    #[must_use]
    pub fn for_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: SqliteJournalMode::default(),
            sync_mode: SqliteSyncMode::default(),
            max_versions: None,
        }
    }
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` store errors.
///
/// # Invariants
/// - Error messages avoid embedding raw truth payloads.
#[derive(Debug, Error, Clone)]
pub enum SqliteStoreError {
    /// Store I/O error.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Store corruption or hash mismatch.
    #[error("sqlite store corruption: {0}")]
    Corrupt(String),
    /// Store schema version mismatch.
    #[error("sqlite store version mismatch: {0}")]
    VersionMismatch(String),
    /// Invalid store data.
    #[error("sqlite store invalid data: {0}")]
    Invalid(String),
    /// Uniqueness conflict; the caller may retry after inspecting state.
    #[error("sqlite store conflict: {0}")]
    Conflict(String),
}

impl From<SqliteStoreError> for StoreError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Io(message) => Self::Io(message),
            SqliteStoreError::Db(message) => Self::Store(message),
            SqliteStoreError::Corrupt(message) => Self::Corrupt(message),
            SqliteStoreError::VersionMismatch(message) => Self::VersionMismatch(message),
            SqliteStoreError::Invalid(message) => Self::Invalid(message),
            SqliteStoreError::Conflict(message) => Self::Conflict(message),
        }
    }
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// `SQLite`-backed truth store with WAL support.
///
/// # Invariants
/// - Flow state loads verify stored hashes before deserialization.
/// - `SQLite` connection access is serialized through a mutex.
#[derive(Debug, Clone)]
pub struct SqliteTruthStore {
    /// Store configuration.
    config: SqliteStoreConfig,
    /// Shared connection guarded by a mutex.
    connection: Arc<Mutex<Connection>>,
}

/// Summary metadata for a stored flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowSummary {
    /// Flow identifier.
    pub flow_id: FlowId,
    /// Owning group identifier.
    pub flow_group_id: FlowGroupId,
    /// Bound workflow identifier.
    pub workflow_id: WorkflowId,
    /// Latest stored version.
    pub latest_version: i64,
    /// Timestamp when the latest version was saved.
    pub saved_at: i64,
}

/// Summary metadata for a specific flow state version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowVersionSummary {
    /// Stored version number.
    pub version: i64,
    /// Timestamp when the version was saved.
    pub saved_at: i64,
    /// Stored state hash.
    pub state_hash: String,
    /// Stored hash algorithm label.
    pub hash_algorithm: String,
    /// Stored payload length in bytes.
    pub state_bytes: usize,
}

impl SqliteTruthStore {
    /// Opens an `SQLite`-backed truth store.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the database cannot be opened or
    /// initialized.
    pub fn new(config: SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        validate_store_path(&config.path)?;
        if let Some(max_versions) = config.max_versions
            && max_versions == 0
        {
            return Err(SqliteStoreError::Invalid(
                "max_versions must be greater than zero".to_string(),
            ));
        }
        let mut connection = open_connection(&config)?;
        initialize_schema(&mut connection)?;
        Ok(Self {
            config,
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Acquires the connection guard.
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, SqliteStoreError> {
        self.connection
            .lock()
            .map_err(|_| SqliteStoreError::Io("sqlite connection mutex poisoned".to_string()))
    }

    /// Loads the latest flow state, verifying the stored hash.
    fn load_state(&self, flow_id: &FlowId) -> Result<Option<FlowState>, SqliteStoreError> {
        let guard = self.lock()?;
        let row = guard
            .query_row(
                "SELECT flow_state_versions.state_json, flow_state_versions.state_hash, \
                 flow_state_versions.hash_algorithm
                 FROM flows
                 JOIN flow_state_versions
                   ON flows.flow_id = flow_state_versions.flow_id
                  AND flows.latest_version = flow_state_versions.version
                 WHERE flows.flow_id = ?1",
                params![flow_id.as_str()],
                |row| {
                    let bytes: Vec<u8> = row.get(0)?;
                    let hash: String = row.get(1)?;
                    let algorithm: String = row.get(2)?;
                    Ok((bytes, hash, algorithm))
                },
            )
            .optional()
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        drop(guard);

        let Some((bytes, hash, algorithm)) = row else {
            return Ok(None);
        };
        decode_state(flow_id, &bytes, &hash, &algorithm).map(Some)
    }

    /// Saves the flow state as a new version inside one transaction.
    fn save_state(&self, state: &FlowState) -> Result<(), SqliteStoreError> {
        let state_json = canonical_json_bytes(state)
            .map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
        let digest = hash_bytes(DEFAULT_HASH_ALGORITHM, &state_json);
        let saved_at = unix_millis();
        let flow = &state.flow;

        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(|err| SqliteStoreError::Db(err.to_string()))?;

        let latest: Option<i64> = tx
            .query_row(
                "SELECT latest_version FROM flows WHERE flow_id = ?1",
                params![flow.flow_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        let version = latest.unwrap_or(0) + 1;

        tx.execute(
            "INSERT INTO flows (flow_id, flow_group_id, workflow_id, company_id, status, \
             latest_version)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(flow_id) DO UPDATE SET status = ?5, latest_version = ?6",
            params![
                flow.flow_id.as_str(),
                flow.flow_group_id.as_str(),
                flow.workflow_id.as_str(),
                flow.company_id.as_str(),
                status_label(flow.status),
                version,
            ],
        )
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;

        tx.execute(
            "INSERT INTO flow_state_versions (flow_id, version, state_json, state_hash, \
             hash_algorithm, saved_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                flow.flow_id.as_str(),
                version,
                state_json,
                digest.value,
                algorithm_label(digest.algorithm),
                saved_at,
            ],
        )
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;

        if let Some(keep) = self.config.max_versions {
            let keep = i64::try_from(keep).unwrap_or(i64::MAX);
            tx.execute(
                "DELETE FROM flow_state_versions WHERE flow_id = ?1 AND version <= ?2 - ?3",
                params![flow.flow_id.as_str(), version, keep],
            )
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        }

        tx.commit().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        Ok(())
    }

    /// Lists flows stored in the database (optionally filtered by group).
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] if the query fails.
    pub fn list_flows(
        &self,
        flow_group_id: Option<&FlowGroupId>,
    ) -> Result<Vec<FlowSummary>, SqliteStoreError> {
        let guard = self.lock()?;
        let mut stmt = guard
            .prepare(
                "SELECT flows.flow_id, flows.flow_group_id, flows.workflow_id, \
                 flows.latest_version, flow_state_versions.saved_at
                 FROM flows
                 JOIN flow_state_versions
                   ON flows.flow_id = flow_state_versions.flow_id
                  AND flows.latest_version = flow_state_versions.version",
            )
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        let rows = stmt
            .query_map([], |row| {
                let flow_id: String = row.get(0)?;
                let group_id: String = row.get(1)?;
                let workflow_id: String = row.get(2)?;
                let latest_version: i64 = row.get(3)?;
                let saved_at: i64 = row.get(4)?;
                Ok((flow_id, group_id, workflow_id, latest_version, saved_at))
            })
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        let mut results = Vec::new();
        for row in rows {
            let (flow_id, group_id, workflow_id, latest_version, saved_at) =
                row.map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            if let Some(expected) = flow_group_id
                && group_id != expected.as_str()
            {
                continue;
            }
            results.push(FlowSummary {
                flow_id: FlowId::new(flow_id),
                flow_group_id: FlowGroupId::new(group_id),
                workflow_id: WorkflowId::new(workflow_id),
                latest_version,
                saved_at,
            });
        }
        drop(stmt);
        drop(guard);
        results.sort_by(|a, b| a.flow_id.cmp(&b.flow_id));
        Ok(results)
    }

    /// Lists all stored versions for a flow, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] if the query fails.
    pub fn list_flow_versions(
        &self,
        flow_id: &FlowId,
    ) -> Result<Vec<FlowVersionSummary>, SqliteStoreError> {
        let guard = self.lock()?;
        let mut stmt = guard
            .prepare(
                "SELECT version, saved_at, state_hash, hash_algorithm, length(state_json)
                 FROM flow_state_versions WHERE flow_id = ?1 ORDER BY version DESC",
            )
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        let rows = stmt
            .query_map(params![flow_id.as_str()], |row| {
                let version: i64 = row.get(0)?;
                let saved_at: i64 = row.get(1)?;
                let state_hash: String = row.get(2)?;
                let hash_algorithm: String = row.get(3)?;
                let length: i64 = row.get(4)?;
                Ok((version, saved_at, state_hash, hash_algorithm, length))
            })
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        let mut results = Vec::new();
        for row in rows {
            let (version, saved_at, state_hash, hash_algorithm, length) =
                row.map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            let state_bytes = usize::try_from(length).map_err(|_| {
                SqliteStoreError::Invalid(format!(
                    "negative state length for flow {}",
                    flow_id.as_str()
                ))
            })?;
            results.push(FlowVersionSummary {
                version,
                saved_at,
                state_hash,
                hash_algorithm,
                state_bytes,
            });
        }
        Ok(results)
    }

    /// Loads a specific stored flow state version.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] if the version is invalid or the payload
    /// fails its hash check.
    pub fn load_version(
        &self,
        flow_id: &FlowId,
        version: i64,
    ) -> Result<Option<FlowState>, SqliteStoreError> {
        if version < 1 {
            return Err(SqliteStoreError::Invalid("version must be >= 1".to_string()));
        }
        let guard = self.lock()?;
        let row = guard
            .query_row(
                "SELECT state_json, state_hash, hash_algorithm FROM flow_state_versions
                 WHERE flow_id = ?1 AND version = ?2",
                params![flow_id.as_str(), version],
                |row| {
                    let bytes: Vec<u8> = row.get(0)?;
                    let hash: String = row.get(1)?;
                    let algorithm: String = row.get(2)?;
                    Ok((bytes, hash, algorithm))
                },
            )
            .optional()
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        drop(guard);

        let Some((bytes, hash, algorithm)) = row else {
            return Ok(None);
        };
        decode_state(flow_id, &bytes, &hash, &algorithm).map(Some)
    }

    /// Prunes older flow state versions, keeping the most recent `keep`.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] if `keep` is zero or the query fails.
    pub fn prune_versions(&self, flow_id: &FlowId, keep: u64) -> Result<u64, SqliteStoreError> {
        if keep == 0 {
            return Err(SqliteStoreError::Invalid("keep must be >= 1".to_string()));
        }
        let keep = i64::try_from(keep).unwrap_or(i64::MAX);
        let guard = self.lock()?;
        let latest: Option<i64> = guard
            .query_row(
                "SELECT latest_version FROM flows WHERE flow_id = ?1",
                params![flow_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        let Some(latest) = latest else {
            return Ok(0);
        };
        let deleted = guard
            .execute(
                "DELETE FROM flow_state_versions WHERE flow_id = ?1 AND version <= ?2 - ?3",
                params![flow_id.as_str(), latest, keep],
            )
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        Ok(u64::try_from(deleted).unwrap_or(u64::MAX))
    }
}

// ============================================================================
// SECTION: TruthStore Implementation
// ============================================================================

impl TruthStore for SqliteTruthStore {
    fn load_flow(&self, flow_id: &FlowId) -> Result<Option<FlowState>, StoreError> {
        self.load_state(flow_id).map_err(StoreError::from)
    }

    fn save_flow(&self, state: &FlowState) -> Result<(), StoreError> {
        self.save_state(state).map_err(StoreError::from)
    }

    fn flows_in_group(&self, flow_group_id: &FlowGroupId) -> Result<Vec<Flow>, StoreError> {
        let summaries = self.list_flows(Some(flow_group_id)).map_err(StoreError::from)?;
        let mut flows = Vec::with_capacity(summaries.len());
        for summary in summaries {
            if let Some(state) = self.load_state(&summary.flow_id).map_err(StoreError::from)? {
                flows.push(state.flow);
            }
        }
        Ok(flows)
    }

    fn group_outcomes(
        &self,
        flow_group_id: &FlowGroupId,
    ) -> Result<Vec<GroupOutcome>, StoreError> {
        let summaries = self.list_flows(Some(flow_group_id)).map_err(StoreError::from)?;
        let mut outcomes = Vec::new();
        for summary in summaries {
            if let Some(state) = self.load_state(&summary.flow_id).map_err(StoreError::from)? {
                outcomes.extend(collect_group_outcomes(&state.flow.workflow_id, &state));
            }
        }
        Ok(outcomes)
    }

    fn active_flow_count(&self, workflow_id: &WorkflowId) -> Result<u64, StoreError> {
        let guard = self.lock().map_err(StoreError::from)?;
        let count: i64 = guard
            .query_row(
                "SELECT COUNT(*) FROM flows WHERE workflow_id = ?1 AND status != 'completed'",
                params![workflow_id.as_str()],
                |row| row.get(0),
            )
            .map_err(|err| StoreError::Store(err.to_string()))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    fn readiness(&self) -> Result<(), StoreError> {
        let guard = self.lock().map_err(StoreError::from)?;
        guard
            .query_row("SELECT 1", [], |_| Ok(()))
            .map_err(|err| StoreError::Store(err.to_string()))?;
        Ok(())
    }
}

// ============================================================================
// SECTION: FlowGroupDirectory Implementation
// ============================================================================

impl FlowGroupDirectory for SqliteTruthStore {
    fn find_group(
        &self,
        company_id: &CompanyId,
        scope: &GroupScope,
    ) -> Result<Option<FlowGroup>, StoreError> {
        let guard = self.lock().map_err(StoreError::from)?;
        let bytes: Option<Vec<u8>> = guard
            .query_row(
                "SELECT group_json FROM flow_groups
                 WHERE company_id = ?1 AND scope_type = ?2 AND scope_id = ?3",
                params![company_id.as_str(), scope.scope_type, scope.scope_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| StoreError::Store(err.to_string()))?;
        drop(guard);
        bytes.map(|bytes| decode_group(&bytes)).transpose()
    }

    fn load_group(&self, flow_group_id: &FlowGroupId) -> Result<Option<FlowGroup>, StoreError> {
        let guard = self.lock().map_err(StoreError::from)?;
        let bytes: Option<Vec<u8>> = guard
            .query_row(
                "SELECT group_json FROM flow_groups WHERE flow_group_id = ?1",
                params![flow_group_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| StoreError::Store(err.to_string()))?;
        drop(guard);
        bytes.map(|bytes| decode_group(&bytes)).transpose()
    }

    fn create_group(&self, group: &FlowGroup) -> Result<(), StoreError> {
        let bytes = canonical_json_bytes(group).map_err(|err| StoreError::Invalid(err.to_string()))?;
        let guard = self.lock().map_err(StoreError::from)?;
        let result = guard.execute(
            "INSERT INTO flow_groups (flow_group_id, company_id, scope_type, scope_id, \
             group_json)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                group.flow_group_id.as_str(),
                group.company_id.as_str(),
                group.scope.scope_type,
                group.scope.scope_id.as_str(),
                bytes,
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(failure, message))
                if failure.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::Conflict(message.unwrap_or_else(|| {
                    format!("flow group already exists: {}", group.flow_group_id)
                })))
            }
            Err(err) => Err(StoreError::Store(err.to_string())),
        }
    }

    fn save_group(&self, group: &FlowGroup) -> Result<(), StoreError> {
        let bytes = canonical_json_bytes(group).map_err(|err| StoreError::Invalid(err.to_string()))?;
        let guard = self.lock().map_err(StoreError::from)?;
        guard
            .execute(
                "INSERT INTO flow_groups (flow_group_id, company_id, scope_type, scope_id, \
                 group_json)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(flow_group_id) DO UPDATE SET group_json = ?5",
                params![
                    group.flow_group_id.as_str(),
                    group.company_id.as_str(),
                    group.scope.scope_type,
                    group.scope.scope_id.as_str(),
                    bytes,
                ],
            )
            .map_err(|err| StoreError::Store(err.to_string()))?;
        Ok(())
    }
}

// ============================================================================
// SECTION: WorkflowRegistry Implementation
// ============================================================================

impl WorkflowRegistry for SqliteTruthStore {
    fn latest_published(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<Option<WorkflowVersion>, StoreError> {
        let guard = self.lock().map_err(StoreError::from)?;
        let bytes: Option<Vec<u8>> = guard
            .query_row(
                "SELECT version_json FROM workflow_versions WHERE workflow_id = ?1
                 ORDER BY version_number DESC LIMIT 1",
                params![workflow_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| StoreError::Store(err.to_string()))?;
        drop(guard);
        bytes.map(|bytes| decode_version(&bytes)).transpose()
    }

    fn version(
        &self,
        version_id: &WorkflowVersionId,
    ) -> Result<Option<WorkflowVersion>, StoreError> {
        let guard = self.lock().map_err(StoreError::from)?;
        let bytes: Option<Vec<u8>> = guard
            .query_row(
                "SELECT version_json FROM workflow_versions WHERE version_id = ?1",
                params![version_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| StoreError::Store(err.to_string()))?;
        drop(guard);
        bytes.map(|bytes| decode_version(&bytes)).transpose()
    }

    fn store_version(&self, version: &WorkflowVersion) -> Result<(), StoreError> {
        let bytes =
            canonical_json_bytes(version).map_err(|err| StoreError::Invalid(err.to_string()))?;
        let guard = self.lock().map_err(StoreError::from)?;
        guard
            .execute(
                "INSERT INTO workflow_versions (version_id, workflow_id, version_number, \
                 version_json)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    version.version_id.as_str(),
                    version.workflow_id.as_str(),
                    i64::from(version.snapshot.version),
                    bytes,
                ],
            )
            .map_err(|err| StoreError::Store(err.to_string()))?;
        Ok(())
    }
}

// ============================================================================
// SECTION: Helper Functions
// ============================================================================

/// Validates the configured database path.
fn validate_store_path(path: &Path) -> Result<(), SqliteStoreError> {
    if path.as_os_str().is_empty() {
        return Err(SqliteStoreError::Invalid("store path is empty".to_string()));
    }
    if path.is_dir() {
        return Err(SqliteStoreError::Invalid(format!(
            "store path is a directory: {}",
            path.display()
        )));
    }
    Ok(())
}

/// Opens a connection with the configured pragmas applied.
fn open_connection(config: &SqliteStoreConfig) -> Result<Connection, SqliteStoreError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE;
    let connection = Connection::open_with_flags(&config.path, flags)
        .map_err(|err| SqliteStoreError::Io(err.to_string()))?;
    connection
        .busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms))
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    connection
        .pragma_update(None, "journal_mode", config.journal_mode.pragma_value())
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    connection
        .pragma_update(None, "synchronous", config.sync_mode.pragma_value())
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    Ok(connection)
}

/// Initializes or verifies the store schema.
fn initialize_schema(connection: &mut Connection) -> Result<(), SqliteStoreError> {
    let tx = connection.transaction().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    let version: Option<i64> = tx
        .query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0))
        .optional()
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    match version {
        None => {
            tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION])
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            tx.execute_batch(
                "CREATE TABLE IF NOT EXISTS flows (
                    flow_id TEXT NOT NULL PRIMARY KEY,
                    flow_group_id TEXT NOT NULL,
                    workflow_id TEXT NOT NULL,
                    company_id TEXT NOT NULL,
                    status TEXT NOT NULL,
                    latest_version INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_flows_group ON flows (flow_group_id);
                CREATE INDEX IF NOT EXISTS idx_flows_workflow ON flows (workflow_id);
                CREATE TABLE IF NOT EXISTS flow_state_versions (
                    flow_id TEXT NOT NULL,
                    version INTEGER NOT NULL,
                    state_json BLOB NOT NULL,
                    state_hash TEXT NOT NULL,
                    hash_algorithm TEXT NOT NULL,
                    saved_at INTEGER NOT NULL,
                    PRIMARY KEY (flow_id, version)
                );
                CREATE TABLE IF NOT EXISTS flow_groups (
                    flow_group_id TEXT NOT NULL PRIMARY KEY,
                    company_id TEXT NOT NULL,
                    scope_type TEXT NOT NULL,
                    scope_id TEXT NOT NULL,
                    group_json BLOB NOT NULL,
                    UNIQUE (company_id, scope_type, scope_id)
                );
                CREATE TABLE IF NOT EXISTS workflow_versions (
                    version_id TEXT NOT NULL PRIMARY KEY,
                    workflow_id TEXT NOT NULL,
                    version_number INTEGER NOT NULL,
                    version_json BLOB NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_versions_workflow
                    ON workflow_versions (workflow_id, version_number);",
            )
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        }
        Some(found) if found == SCHEMA_VERSION => {}
        Some(found) => {
            return Err(SqliteStoreError::VersionMismatch(format!(
                "store schema version {found}, expected {SCHEMA_VERSION}"
            )));
        }
    }
    tx.commit().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    Ok(())
}

/// Decodes and verifies a stored flow state payload.
fn decode_state(
    flow_id: &FlowId,
    bytes: &[u8],
    hash: &str,
    algorithm: &str,
) -> Result<FlowState, SqliteStoreError> {
    let algorithm = parse_algorithm(algorithm)?;
    let expected = hash_bytes(algorithm, bytes);
    if expected.value != hash {
        return Err(SqliteStoreError::Corrupt(format!(
            "hash mismatch for flow {}",
            flow_id.as_str()
        )));
    }
    let state: FlowState = serde_json::from_slice(bytes)
        .map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
    if state.flow.flow_id != *flow_id {
        return Err(SqliteStoreError::Invalid(
            "flow_id mismatch between key and payload".to_string(),
        ));
    }
    Ok(state)
}

/// Decodes a stored flow group payload.
fn decode_group(bytes: &[u8]) -> Result<FlowGroup, StoreError> {
    serde_json::from_slice(bytes).map_err(|err| StoreError::Invalid(err.to_string()))
}

/// Decodes a stored workflow version payload.
fn decode_version(bytes: &[u8]) -> Result<WorkflowVersion, StoreError> {
    serde_json::from_slice(bytes).map_err(|err| StoreError::Invalid(err.to_string()))
}

/// Returns the stable status label stored in the flows header.
const fn status_label(status: FlowStatus) -> &'static str {
    match status {
        FlowStatus::Active => "active",
        FlowStatus::Completed => "completed",
        FlowStatus::Suspended => "suspended",
        FlowStatus::Blocked => "blocked",
    }
}

/// Returns the stable label for a hash algorithm.
const fn algorithm_label(algorithm: HashAlgorithm) -> &'static str {
    match algorithm {
        HashAlgorithm::Sha256 => "sha256",
    }
}

/// Parses a stored hash algorithm label.
fn parse_algorithm(label: &str) -> Result<HashAlgorithm, SqliteStoreError> {
    match label {
        "sha256" => Ok(HashAlgorithm::Sha256),
        other => Err(SqliteStoreError::Invalid(format!("unknown hash algorithm: {other}"))),
    }
}

/// Returns the current wall clock as unix milliseconds.
fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| i64::try_from(duration.as_millis()).unwrap_or(i64::MAX))
}

