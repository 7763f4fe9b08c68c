//! Session-completion policy, circuit breaker and tier gating.
//!
//! This layer sits beside the kernel: it reads and writes [`SafetyRegistry`]
//! values but never touches the kernel's copy. Callers compute a complete
//! updated registry here and push it in with `Kernel::load_safety_registry`.

use crate::config::SafetyConfig;
use crate::types::{BreathingPattern, SafetyRegistry};
use serde::{Deserialize, Serialize};

/// How a finished session is scored
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    Success,
    Adverse,
}

impl SessionOutcome {
    /// Success needs enough time on the pattern and a settled final belief
    pub fn evaluate(duration_secs: f64, final_prediction_error: f64, policy: &SafetyConfig) -> Self {
        if duration_secs > policy.success_min_duration_secs
            && final_prediction_error < policy.success_max_prediction_error
        {
            SessionOutcome::Success
        } else {
            SessionOutcome::Adverse
        }
    }

    /// Value stored in the resonance window
    pub fn resonance(self) -> f64 {
        match self {
            SessionOutcome::Success => 1.0,
            SessionOutcome::Adverse => 0.0,
        }
    }
}

/// Fold one session outcome into a copy of the registry
///
/// Adverse outcomes raise the pattern's stress score. Once the score exceeds
/// the threshold the breaker trips: the pattern is locked for the configured
/// window and the score starts over.
pub fn record_outcome(
    registry: &SafetyRegistry,
    pattern_id: &str,
    outcome: SessionOutcome,
    now: f64,
    policy: &SafetyConfig,
) -> SafetyRegistry {
    let mut next = registry.clone();
    let profile = next.entry(pattern_id);

    profile.push_resonance(outcome.resonance());

    if outcome == SessionOutcome::Adverse {
        profile.cumulative_stress_score += 1;
        profile.last_incident_timestamp = now;
        tracing::debug!(
            "Adverse session on '{}', stress score {}",
            pattern_id,
            profile.cumulative_stress_score
        );
    }

    if profile.cumulative_stress_score > policy.stress_threshold {
        profile.safety_lock_until = now + policy.lock_seconds();
        profile.cumulative_stress_score = 0;
        tracing::warn!(
            "Circuit breaker tripped for '{}': locked for {}h",
            pattern_id,
            policy.lock_hours
        );
    }

    next
}

/// Practice totals derived from session history
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PracticeStats {
    /// Sessions longer than the quality threshold, across all patterns
    pub quality_sessions: usize,
}

/// Whether a pattern may be loaded right now
#[derive(Clone, Debug, PartialEq)]
pub enum Eligibility {
    Allowed,
    Locked {
        until: f64,
    },
    NeedsPractice {
        quality_sessions: usize,
        required_quality: usize,
        perfect_sessions: usize,
        required_perfect: usize,
    },
    LowResonance {
        average: f64,
        required: f64,
    },
}

impl Eligibility {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Eligibility::Allowed)
    }

    /// Human-readable reason for a refusal
    pub fn describe(&self) -> String {
        match self {
            Eligibility::Allowed => "available".into(),
            Eligibility::Locked { until } => format!("safety-locked until {:.0}", until),
            Eligibility::NeedsPractice {
                quality_sessions,
                required_quality,
                perfect_sessions,
                required_perfect,
            } => {
                if *required_perfect > 0 {
                    format!(
                        "requires {} quality sessions ({} so far) and {} perfect sessions ({} so far)",
                        required_quality, quality_sessions, required_perfect, perfect_sessions
                    )
                } else {
                    format!(
                        "requires {} quality sessions ({} so far)",
                        required_quality, quality_sessions
                    )
                }
            }
            Eligibility::LowResonance { average, required } => format!(
                "recent resonance {:.2} is below {:.2}",
                average, required
            ),
        }
    }
}

/// Tier gate consulted before loading or starting a pattern
pub fn check_eligibility(
    pattern: &BreathingPattern,
    registry: &SafetyRegistry,
    stats: &PracticeStats,
    now: f64,
    policy: &SafetyConfig,
) -> Eligibility {
    if let Some(until) = registry.locked_until(&pattern.id, now) {
        return Eligibility::Locked { until };
    }

    match pattern.tier {
        0 | 1 => Eligibility::Allowed,
        2 => {
            if stats.quality_sessions < policy.tier2_quality_sessions {
                return Eligibility::NeedsPractice {
                    quality_sessions: stats.quality_sessions,
                    required_quality: policy.tier2_quality_sessions,
                    perfect_sessions: registry.perfect_sessions(),
                    required_perfect: 0,
                };
            }
            let average = registry
                .get(&pattern.id)
                .and_then(|p| p.average_resonance());
            match average {
                Some(average) if average < policy.tier2_min_resonance => {
                    Eligibility::LowResonance {
                        average,
                        required: policy.tier2_min_resonance,
                    }
                }
                _ => Eligibility::Allowed,
            }
        }
        _ => {
            let perfect = registry.perfect_sessions();
            if stats.quality_sessions < policy.tier3_quality_sessions
                || perfect < policy.tier3_perfect_sessions
            {
                Eligibility::NeedsPractice {
                    quality_sessions: stats.quality_sessions,
                    required_quality: policy.tier3_quality_sessions,
                    perfect_sessions: perfect,
                    required_perfect: policy.tier3_perfect_sessions,
                }
            } else {
                Eligibility::Allowed
            }
        }
    }
}
