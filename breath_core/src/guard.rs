//! Safety guard consulted before every dispatch.
//!
//! A guard sees the event and the state it would be reduced against. It can
//! pass the event through, replace it with a `SAFETY_INTERDICTION`, or drop it
//! by returning `None`. Dropped events are never logged, reduced or broadcast.

use crate::config::SafetyConfig;
use crate::events::{KernelEvent, SafetyAction};
use crate::types::{KernelStatus, RuntimeState};

/// Event interceptor seam of the kernel
pub trait Guard {
    fn check(&self, event: KernelEvent, state: &RuntimeState) -> Option<KernelEvent>;
}

impl<F> Guard for F
where
    F: Fn(KernelEvent, &RuntimeState) -> Option<KernelEvent>,
{
    fn check(&self, event: KernelEvent, state: &RuntimeState) -> Option<KernelEvent> {
        self(event, state)
    }
}

/// Default guard enforcing session locks, emergency halts and pattern locks
#[derive(Clone, Debug, Default)]
pub struct SafetyGuard {
    policy: SafetyConfig,
}

impl SafetyGuard {
    pub fn new(policy: SafetyConfig) -> Self {
        Self { policy }
    }
}

fn interdiction(risk_level: f64, action: SafetyAction, timestamp: f64) -> KernelEvent {
    KernelEvent::SafetyInterdiction {
        risk_level,
        action,
        timestamp,
    }
}

impl Guard for SafetyGuard {
    fn check(&self, event: KernelEvent, state: &RuntimeState) -> Option<KernelEvent> {
        match &event {
            KernelEvent::StartSession { timestamp } if state.status == KernelStatus::SafetyLock => {
                tracing::warn!("Start rejected: kernel is safety-locked");
                Some(interdiction(1.0, SafetyAction::RejectStart, *timestamp))
            }
            KernelEvent::BeliefUpdate { belief, timestamp }
                if belief.prediction_error > self.policy.emergency_prediction_error
                    && state.session_duration > self.policy.emergency_min_session_secs =>
            {
                tracing::warn!(
                    prediction_error = belief.prediction_error,
                    session_duration = state.session_duration,
                    "Emergency halt"
                );
                Some(interdiction(0.95, SafetyAction::EmergencyHalt, *timestamp))
            }
            KernelEvent::LoadProtocol {
                pattern_id,
                timestamp,
            } => match state.safety_registry.locked_until(pattern_id, *timestamp) {
                Some(until) => {
                    tracing::warn!("Pattern '{}' is locked until {:.0}", pattern_id, until);
                    Some(interdiction(0.8, SafetyAction::PatternLocked, *timestamp))
                }
                None => Some(event),
            },
            _ => Some(event),
        }
    }
}
