// crates/flowspec-core/src/core/time.rs
// ============================================================================
// Module: FlowSpec Time Model
// Description: Canonical timestamp representations for truth records.
// Purpose: Provide deterministic, replayable time values across FlowSpec records.
// Dependencies: serde, time
// ============================================================================

//! ## Overview
//! FlowSpec embeds explicit time values in truth records to keep replay
//! deterministic. The engine never reads wall-clock time directly; hosts must
//! supply timestamps with every state-changing operation. Latest-wins folds
//! order timestamps with the derived total order below, so a single flow must
//! use one timestamp kind consistently.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use time::Duration;

// ============================================================================
// SECTION: Time Values
// ============================================================================

/// Canonical timestamp used in FlowSpec truth records.
///
/// # Invariants
/// - Values are explicitly provided by callers; the engine never reads wall-clock time.
/// - Monotonicity within a flow is a caller responsibility.
/// - All records of one flow must use the same timestamp kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Timestamp {
    /// Unix epoch milliseconds.
    UnixMillis(i64),
    /// Monotonic logical time value.
    Logical(u64),
}

impl Timestamp {
    /// Returns the timestamp as unix milliseconds when available.
    #[must_use]
    pub const fn as_unix_millis(&self) -> Option<i64> {
        match self {
            Self::UnixMillis(value) => Some(*value),
            Self::Logical(_) => None,
        }
    }

    /// Returns the timestamp as logical time when available.
    #[must_use]
    pub const fn as_logical(&self) -> Option<u64> {
        match self {
            Self::UnixMillis(_) => None,
            Self::Logical(value) => Some(*value),
        }
    }

    /// Returns the timestamp shifted forward by a whole number of hours.
    ///
    /// Used for SLA deadlines derived from `default_sla_hours`. Logical
    /// timestamps treat one hour as one tick. Saturates on overflow.
    #[must_use]
    pub fn plus_hours(&self, hours: u32) -> Self {
        match self {
            Self::UnixMillis(value) => {
                let shift = Duration::hours(i64::from(hours));
                let millis = i64::try_from(shift.whole_milliseconds()).unwrap_or(i64::MAX);
                Self::UnixMillis(value.saturating_add(millis))
            }
            Self::Logical(value) => Self::Logical(value.saturating_add(u64::from(hours))),
        }
    }
}
