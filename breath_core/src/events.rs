//! The closed vocabulary of kernel events.
//!
//! Events are serialized as `{"type": "PHASE_TRANSITION", ...}` so an exported
//! log can be replayed. Kinds written by a newer build decode as
//! [`KernelEvent::Unknown`], which every consumer treats as a no-op.

use crate::types::{BeliefState, Observation, Phase, SafetyRegistry};
use serde::{Deserialize, Serialize};

/// What a safety interdiction did to the event it replaced
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SafetyAction {
    RejectStart,
    EmergencyHalt,
    PatternLocked,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KernelEvent {
    Boot {
        timestamp: f64,
    },
    LoadProtocol {
        pattern_id: String,
        timestamp: f64,
    },
    StartSession {
        timestamp: f64,
    },
    Tick {
        observation: Observation,
        timestamp: f64,
    },
    BeliefUpdate {
        belief: BeliefState,
        timestamp: f64,
    },
    PhaseTransition {
        from: Phase,
        to: Phase,
        timestamp: f64,
    },
    CycleComplete {
        count: u32,
        timestamp: f64,
    },
    Interruption {
        timestamp: f64,
    },
    Resume {
        timestamp: f64,
    },
    Halt {
        timestamp: f64,
    },
    SafetyInterdiction {
        risk_level: f64,
        action: SafetyAction,
        timestamp: f64,
    },
    LoadSafetyRegistry {
        registry: SafetyRegistry,
        timestamp: f64,
    },
    /// Event kind this build does not know
    #[serde(other)]
    Unknown,
}

impl KernelEvent {
    /// Wire name of the event kind
    pub fn kind(&self) -> &'static str {
        match self {
            KernelEvent::Boot { .. } => "BOOT",
            KernelEvent::LoadProtocol { .. } => "LOAD_PROTOCOL",
            KernelEvent::StartSession { .. } => "START_SESSION",
            KernelEvent::Tick { .. } => "TICK",
            KernelEvent::BeliefUpdate { .. } => "BELIEF_UPDATE",
            KernelEvent::PhaseTransition { .. } => "PHASE_TRANSITION",
            KernelEvent::CycleComplete { .. } => "CYCLE_COMPLETE",
            KernelEvent::Interruption { .. } => "INTERRUPTION",
            KernelEvent::Resume { .. } => "RESUME",
            KernelEvent::Halt { .. } => "HALT",
            KernelEvent::SafetyInterdiction { .. } => "SAFETY_INTERDICTION",
            KernelEvent::LoadSafetyRegistry { .. } => "LOAD_SAFETY_REGISTRY",
            KernelEvent::Unknown => "UNKNOWN",
        }
    }

    /// Event time; `None` only for [`KernelEvent::Unknown`]
    pub fn timestamp(&self) -> Option<f64> {
        match self {
            KernelEvent::Boot { timestamp }
            | KernelEvent::LoadProtocol { timestamp, .. }
            | KernelEvent::StartSession { timestamp }
            | KernelEvent::Tick { timestamp, .. }
            | KernelEvent::BeliefUpdate { timestamp, .. }
            | KernelEvent::PhaseTransition { timestamp, .. }
            | KernelEvent::CycleComplete { timestamp, .. }
            | KernelEvent::Interruption { timestamp }
            | KernelEvent::Resume { timestamp }
            | KernelEvent::Halt { timestamp }
            | KernelEvent::SafetyInterdiction { timestamp, .. }
            | KernelEvent::LoadSafetyRegistry { timestamp, .. } => Some(*timestamp),
            KernelEvent::Unknown => None,
        }
    }
}
