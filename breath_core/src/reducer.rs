//! The pure state-transition function.
//!
//! `reduce` is the only place a [`RuntimeState`] is computed. It never fails
//! and never panics: events that do not apply to the current status return
//! the state unchanged.

use crate::catalog::Catalog;
use crate::events::KernelEvent;
use crate::types::{BeliefState, KernelStatus, Phase, RuntimeState};

/// Apply one event to a state, producing the next state
pub fn reduce(state: &RuntimeState, event: &KernelEvent, catalog: &Catalog) -> RuntimeState {
    match event {
        KernelEvent::Boot { .. } => RuntimeState::default(),

        KernelEvent::LoadProtocol { pattern_id, .. } => {
            if state.status == KernelStatus::SafetyLock {
                return state.clone();
            }
            let Some(pattern) = catalog.get(pattern_id) else {
                return state.clone();
            };
            RuntimeState {
                status: KernelStatus::Idle,
                phase: Phase::Inhale,
                phase_start_time: 0.0,
                phase_duration: pattern.timings.duration(Phase::Inhale),
                cycle_count: 0,
                session_start_time: 0.0,
                paused_at: None,
                belief: BeliefState {
                    rhythm_alignment: 0.0,
                    prediction_error: 0.0,
                    confidence: 0.0,
                    ..state.belief
                },
                pattern: Some(pattern.clone()),
                ..state.clone()
            }
        }

        KernelEvent::StartSession { timestamp } => {
            if state.pattern.is_none() {
                return state.clone();
            }
            RuntimeState {
                status: KernelStatus::Running,
                session_start_time: *timestamp,
                phase_start_time: *timestamp,
                paused_at: None,
                ..state.clone()
            }
        }

        KernelEvent::Interruption { timestamp } => {
            if state.status != KernelStatus::Running {
                return state.clone();
            }
            RuntimeState {
                status: KernelStatus::Paused,
                paused_at: Some(*timestamp),
                ..state.clone()
            }
        }

        KernelEvent::Resume { timestamp } => {
            if state.status != KernelStatus::Paused {
                return state.clone();
            }
            let paused_for = state
                .paused_at
                .map(|at| (timestamp - at).max(0.0))
                .unwrap_or(0.0);
            RuntimeState {
                status: KernelStatus::Running,
                phase_start_time: state.phase_start_time + paused_for,
                paused_at: None,
                ..state.clone()
            }
        }

        KernelEvent::Halt { .. } => RuntimeState {
            status: KernelStatus::Halted,
            paused_at: None,
            ..state.clone()
        },

        KernelEvent::SafetyInterdiction { .. } => RuntimeState {
            status: KernelStatus::SafetyLock,
            paused_at: None,
            ..state.clone()
        },

        KernelEvent::PhaseTransition { to, timestamp, .. } => RuntimeState {
            phase: *to,
            phase_start_time: *timestamp,
            phase_duration: state
                .pattern
                .as_ref()
                .map(|p| p.timings.duration(*to))
                .unwrap_or(0.0),
            ..state.clone()
        },

        KernelEvent::CycleComplete { count, .. } => RuntimeState {
            cycle_count: *count,
            ..state.clone()
        },

        KernelEvent::BeliefUpdate { belief, .. } => RuntimeState {
            belief: *belief,
            ..state.clone()
        },

        KernelEvent::Tick {
            observation,
            timestamp,
        } => RuntimeState {
            last_observation: Some(observation.clone()),
            timestamp: *timestamp,
            ..state.clone()
        },

        KernelEvent::LoadSafetyRegistry { registry, .. } => RuntimeState {
            safety_registry: registry.clone(),
            ..state.clone()
        },

        KernelEvent::Unknown => state.clone(),
    }
}

/// Rebuild a state by folding `reduce` over an ordered event list
///
/// Derived fields are left at zero; they depend on the wall clock.
pub fn replay<'a, I>(initial: RuntimeState, events: I, catalog: &Catalog) -> RuntimeState
where
    I: IntoIterator<Item = &'a KernelEvent>,
{
    events
        .into_iter()
        .fold(initial, |state, event| reduce(&state, event, catalog))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build_default_catalog;
    use crate::events::SafetyAction;
    use crate::types::{Observation, SafetyProfile, SafetyRegistry};

    fn loaded(pattern_id: &str) -> RuntimeState {
        let catalog = build_default_catalog();
        reduce(
            &RuntimeState::default(),
            &KernelEvent::LoadProtocol {
                pattern_id: pattern_id.into(),
                timestamp: 0.0,
            },
            &catalog,
        )
    }

    fn sample_events() -> Vec<KernelEvent> {
        let mut registry = SafetyRegistry::new();
        registry.insert("box", SafetyProfile::default());
        vec![
            KernelEvent::Boot { timestamp: 0.0 },
            KernelEvent::LoadSafetyRegistry {
                registry,
                timestamp: 0.0,
            },
            KernelEvent::LoadProtocol {
                pattern_id: "box".into(),
                timestamp: 0.5,
            },
            KernelEvent::StartSession { timestamp: 1.0 },
            KernelEvent::BeliefUpdate {
                belief: BeliefState {
                    arousal: 0.3,
                    ..BeliefState::default()
                },
                timestamp: 1.1,
            },
            KernelEvent::Tick {
                observation: Observation::empty(0.1, 1.1),
                timestamp: 1.1,
            },
            KernelEvent::PhaseTransition {
                from: Phase::Inhale,
                to: Phase::HoldIn,
                timestamp: 5.0,
            },
            KernelEvent::Interruption { timestamp: 6.0 },
            KernelEvent::Resume { timestamp: 8.0 },
            KernelEvent::CycleComplete {
                count: 1,
                timestamp: 17.0,
            },
            KernelEvent::Unknown,
            KernelEvent::SafetyInterdiction {
                risk_level: 0.95,
                action: SafetyAction::EmergencyHalt,
                timestamp: 18.0,
            },
            KernelEvent::Halt { timestamp: 19.0 },
        ]
    }

    #[test]
    fn test_reduce_is_deterministic() {
        let catalog = build_default_catalog();
        let mut state = RuntimeState::default();
        for event in sample_events() {
            let a = reduce(&state, &event, &catalog);
            let b = reduce(&state, &event, &catalog);
            assert_eq!(a, b, "diverged on {}", event.kind());
            state = a;
        }
    }

    #[test]
    fn test_load_protocol_resets_session_but_keeps_arousal() {
        let catalog = build_default_catalog();
        let state = RuntimeState {
            cycle_count: 3,
            phase: Phase::Exhale,
            belief: BeliefState {
                arousal: 0.8,
                attention: 0.6,
                rhythm_alignment: 0.9,
                prediction_error: 0.4,
                confidence: 0.7,
                ..BeliefState::default()
            },
            ..RuntimeState::default()
        };

        let next = reduce(
            &state,
            &KernelEvent::LoadProtocol {
                pattern_id: "4-7-8".into(),
                timestamp: 1.0,
            },
            &catalog,
        );

        assert_eq!(next.pattern_id(), Some("4-7-8"));
        assert_eq!(next.phase, Phase::Inhale);
        assert_eq!(next.phase_duration, 4.0);
        assert_eq!(next.cycle_count, 0);
        assert_eq!(next.belief.arousal, 0.8);
        assert_eq!(next.belief.attention, 0.6);
        assert_eq!(next.belief.rhythm_alignment, 0.0);
        assert_eq!(next.belief.prediction_error, 0.0);
        assert_eq!(next.belief.confidence, 0.0);
    }

    #[test]
    fn test_load_protocol_ignored_when_locked_or_unknown() {
        let catalog = build_default_catalog();
        let locked = RuntimeState {
            status: KernelStatus::SafetyLock,
            ..RuntimeState::default()
        };
        let event = KernelEvent::LoadProtocol {
            pattern_id: "box".into(),
            timestamp: 0.0,
        };
        assert_eq!(reduce(&locked, &event, &catalog), locked);

        let idle = RuntimeState::default();
        let unknown = KernelEvent::LoadProtocol {
            pattern_id: "no-such-pattern".into(),
            timestamp: 0.0,
        };
        assert_eq!(reduce(&idle, &unknown, &catalog), idle);
    }

    #[test]
    fn test_start_requires_pattern() {
        let catalog = build_default_catalog();
        let idle = RuntimeState::default();
        let start = KernelEvent::StartSession { timestamp: 2.0 };
        assert_eq!(reduce(&idle, &start, &catalog).status, KernelStatus::Idle);

        let started = reduce(&loaded("box"), &start, &catalog);
        assert_eq!(started.status, KernelStatus::Running);
        assert_eq!(started.session_start_time, 2.0);
        assert_eq!(started.phase_start_time, 2.0);
    }

    #[test]
    fn test_pause_resume_shifts_phase_start() {
        let catalog = build_default_catalog();
        let mut state = reduce(
            &loaded("box"),
            &KernelEvent::StartSession { timestamp: 10.0 },
            &catalog,
        );
        state = reduce(&state, &KernelEvent::Interruption { timestamp: 11.5 }, &catalog);
        assert_eq!(state.status, KernelStatus::Paused);

        // Pausing twice keeps the first pause time
        let again = reduce(&state, &KernelEvent::Interruption { timestamp: 12.0 }, &catalog);
        assert_eq!(again, state);

        state = reduce(&state, &KernelEvent::Resume { timestamp: 16.5 }, &catalog);
        assert_eq!(state.status, KernelStatus::Running);
        assert_eq!(state.phase_start_time, 15.0);
        assert_eq!(state.paused_at, None);
    }

    #[test]
    fn test_resume_ignored_unless_paused() {
        let catalog = build_default_catalog();
        let state = loaded("box");
        assert_eq!(
            reduce(&state, &KernelEvent::Resume { timestamp: 3.0 }, &catalog),
            state
        );
    }

    #[test]
    fn test_halt_and_interdiction_are_unconditional() {
        let catalog = build_default_catalog();
        let idle = RuntimeState::default();

        let halted = reduce(&idle, &KernelEvent::Halt { timestamp: 1.0 }, &catalog);
        assert_eq!(halted.status, KernelStatus::Halted);
        assert_eq!(
            reduce(&halted, &KernelEvent::Halt { timestamp: 2.0 }, &catalog),
            halted
        );

        let locked = reduce(
            &halted,
            &KernelEvent::SafetyInterdiction {
                risk_level: 1.0,
                action: SafetyAction::RejectStart,
                timestamp: 3.0,
            },
            &catalog,
        );
        assert_eq!(locked.status, KernelStatus::SafetyLock);
    }

    #[test]
    fn test_phase_transition_takes_duration_from_pattern() {
        let catalog = build_default_catalog();
        let next = reduce(
            &loaded("4-7-8"),
            &KernelEvent::PhaseTransition {
                from: Phase::Inhale,
                to: Phase::HoldIn,
                timestamp: 4.0,
            },
            &catalog,
        );
        assert_eq!(next.phase, Phase::HoldIn);
        assert_eq!(next.phase_duration, 7.0);
        assert_eq!(next.phase_start_time, 4.0);
    }

    #[test]
    fn test_tick_only_touches_observation_and_timestamp() {
        let catalog = build_default_catalog();
        let state = loaded("box");
        let obs = Observation::empty(0.1, 7.0).with_heart_rate(72.0, 0.9);
        let next = reduce(
            &state,
            &KernelEvent::Tick {
                observation: obs.clone(),
                timestamp: 7.0,
            },
            &catalog,
        );
        assert_eq!(next.last_observation, Some(obs));
        assert_eq!(next.timestamp, 7.0);
        assert_eq!(
            RuntimeState {
                last_observation: None,
                timestamp: state.timestamp,
                ..next
            },
            state
        );
    }

    #[test]
    fn test_unknown_event_is_noop() {
        let catalog = build_default_catalog();
        let state = loaded("calm");
        assert_eq!(reduce(&state, &KernelEvent::Unknown, &catalog), state);
    }

    #[test]
    fn test_replay_matches_step_by_step() {
        let catalog = build_default_catalog();
        let events = sample_events();

        let mut stepped = RuntimeState::default();
        for event in &events {
            stepped = reduce(&stepped, event, &catalog);
        }
        let replayed = replay(RuntimeState::default(), &events, &catalog);

        assert_eq!(replayed, stepped);
        assert_eq!(replayed.status, KernelStatus::Halted);
        assert_eq!(replayed.cycle_count, 1);
        assert!(replayed.safety_registry.get("box").is_some());
    }
}
