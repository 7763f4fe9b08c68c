#![forbid(unsafe_code)]

//! Core control-and-safety plane for guided breathing sessions.
//!
//! This crate provides:
//! - Domain types (phases, patterns, belief, safety profiles, runtime state)
//! - The pattern catalog
//! - The pure reducer, phase sequencer and adaptive state estimator
//! - The safety guard, circuit breaker and tier gating
//! - The kernel orchestrator with its middleware seam
//! - Persistence (registry store, session WAL, CSV rollup, event-log export)

pub mod types;
pub mod error;
pub mod events;
pub mod catalog;
pub mod config;
pub mod logging;
pub mod clock;
pub mod sequencer;
pub mod estimator;
pub mod registry;
pub mod guard;
pub mod reducer;
pub mod middleware;
pub mod kernel;
pub mod wal;
pub mod csv_rollup;
pub mod state;
pub mod history;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
pub use events::{KernelEvent, SafetyAction};
pub use catalog::{build_default_catalog, get_default_catalog, Catalog};
pub use config::Config;
pub use clock::{Clock, SimulatedClock, SystemClock};
pub use estimator::AdaptiveStateEstimator;
pub use registry::{check_eligibility, record_outcome, Eligibility, PracticeStats, SessionOutcome};
pub use guard::{Guard, SafetyGuard};
pub use reducer::{reduce, replay};
pub use middleware::{CueMiddleware, CueSink, Deferred, Middleware, TraceMiddleware};
pub use kernel::{Kernel, KernelDiagnostics, SubscriptionId};
pub use wal::{HistorySink, JsonlSink, SessionRecord};
pub use state::RegistryStore;
pub use history::load_session_history;
