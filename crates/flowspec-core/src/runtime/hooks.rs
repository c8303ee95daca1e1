// crates/flowspec-core/src/runtime/hooks.rs
// ============================================================================
// Module: FlowSpec Hook Registry
// Description: Append-only registry of best-effort engine event sinks.
// Purpose: Notify host observers after commits without affecting truth.
// Dependencies: crate::interfaces
// ============================================================================

//! ## Overview
//! The hook registry holds the sinks configured at startup and emits engine
//! events after successful commits. Emission is best-effort: a failing sink
//! increments the dropped counter and is otherwise ignored. Hooks can never
//! mutate truth.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use crate::interfaces::EngineEvent;
use crate::interfaces::HookSink;

// ============================================================================
// SECTION: Hook Registry
// ============================================================================

/// Append-only registry of engine event sinks.
#[derive(Default)]
pub struct HookRegistry {
    /// Registered sinks in registration order.
    sinks: Vec<Box<dyn HookSink + Send + Sync>>,
    /// Count of events dropped by failing sinks.
    dropped: AtomicU64,
}

impl HookRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a sink; registration order is emission order.
    pub fn register(&mut self, sink: Box<dyn HookSink + Send + Sync>) {
        self.sinks.push(sink);
    }

    /// Emits an event to every sink, dropping sink failures.
    pub fn emit(&self, event: &EngineEvent) {
        for sink in &self.sinks {
            if sink.on_event(event).is_err() {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Returns the number of events dropped by failing sinks.
    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry")
            .field("sinks", &self.sinks.len())
            .field("dropped", &self.dropped_count())
            .finish()
    }
}
