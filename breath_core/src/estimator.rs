//! Adaptive state estimator.
//!
//! A predict/correct approximation in the shape of a scalar Kalman filter per
//! dimension. It is not a free-energy minimizer: the prediction error it
//! reports is a weighted distance from the pattern's target and is used only
//! as a stress proxy.
//!
//! The estimator holds parameters and the current target. Belief is passed in
//! and returned, so the kernel's event log stays the only record of it.

use crate::config::EstimatorConfig;
use crate::types::{BeliefState, BreathingPattern, Observation, TargetProfile};

/// Attention level a distracted user is pulled toward
const DISTRACTED_ATTENTION: f64 = 0.1;
const RHYTHM_DECAY_PER_SEC: f64 = 0.5;
const ATTENTION_RECOVERY_PER_SEC: f64 = 0.15;
const RHYTHM_RECOVERY_PER_SEC: f64 = 0.1;

const HR_FLOOR_BPM: f64 = 50.0;
const HR_SPAN_BPM: f64 = 70.0;

const WEIGHT_AROUSAL: f64 = 0.4;
const WEIGHT_ATTENTION: f64 = 0.3;
const WEIGHT_RHYTHM: f64 = 0.3;

/// Desired end state for a pattern
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TargetState {
    pub arousal: f64,
    pub attention: f64,
    pub rhythm_alignment: f64,
}

impl TargetState {
    pub fn for_profile(profile: TargetProfile) -> Self {
        let (arousal, attention, rhythm_alignment) = match profile {
            TargetProfile::Parasympathetic => (0.2, 0.7, 0.9),
            TargetProfile::Balanced => (0.4, 0.8, 0.9),
            TargetProfile::Sympathetic => (0.7, 0.8, 0.8),
            TargetProfile::Default => (0.4, 0.7, 0.8),
        };
        Self {
            arousal,
            attention,
            rhythm_alignment,
        }
    }
}

#[derive(Clone, Debug)]
pub struct AdaptiveStateEstimator {
    params: EstimatorConfig,
    profile: TargetProfile,
    target: TargetState,
}

impl AdaptiveStateEstimator {
    pub fn new(params: EstimatorConfig) -> Self {
        Self {
            params,
            profile: TargetProfile::Default,
            target: TargetState::for_profile(TargetProfile::Default),
        }
    }

    pub fn target(&self) -> TargetState {
        self.target
    }

    /// Retarget for the bound pattern; `None` selects the default target
    pub fn set_target_for_pattern(&mut self, pattern: Option<&BreathingPattern>) {
        let profile = pattern.map(|p| p.target).unwrap_or_default();
        if profile != self.profile {
            tracing::debug!("Estimator target {:?} -> {:?}", self.profile, profile);
            self.profile = profile;
            self.target = TargetState::for_profile(profile);
        }
    }

    /// Advance the belief by `dt` seconds and fold in `observation`
    pub fn update(&self, belief: &BeliefState, dt: f64, observation: &Observation) -> BeliefState {
        let dt = if dt.is_finite() && dt > 0.0 { dt } else { 0.0 };

        let mut next = self.predict(belief, dt);
        self.correct(&mut next, dt, observation);
        clamp_estimates(&mut next);
        self.diagnose(&mut next, observation);
        next
    }

    fn predict(&self, belief: &BeliefState, dt: f64) -> BeliefState {
        let p = &self.params;
        let t = &self.target;
        let relax = |value: f64, target: f64, tau: f64| {
            let alpha = 1.0 - (-dt / tau).exp();
            value + alpha * (target - value)
        };

        BeliefState {
            arousal: relax(belief.arousal, t.arousal, p.tau_arousal),
            attention: relax(belief.attention, t.attention, p.tau_attention),
            rhythm_alignment: relax(belief.rhythm_alignment, t.rhythm_alignment, p.tau_rhythm),
            arousal_variance: belief.arousal_variance + p.process_noise_arousal * dt,
            attention_variance: belief.attention_variance + p.process_noise_attention * dt,
            rhythm_variance: belief.rhythm_variance + p.process_noise_rhythm * dt,
            ..*belief
        }
    }

    fn correct(&self, belief: &mut BeliefState, dt: f64, obs: &Observation) {
        let p = &self.params;

        if let Some(z) = self.heart_rate_measurement(obs) {
            let gain = belief.arousal_variance / (belief.arousal_variance + p.measurement_noise_hr);
            belief.arousal += gain * (z - belief.arousal);
            belief.arousal_variance *= 1.0 - gain;
        }

        if obs.is_distracted() {
            let gain = belief.attention_variance
                / (belief.attention_variance + p.measurement_noise_attention);
            belief.attention += gain * (DISTRACTED_ATTENTION - belief.attention);
            belief.attention_variance *= 1.0 - gain;
            belief.rhythm_alignment -= RHYTHM_DECAY_PER_SEC * dt;
        } else {
            let shrink = (1.0 - dt).max(0.0);
            belief.attention = (belief.attention + ATTENTION_RECOVERY_PER_SEC * dt).min(1.0);
            belief.attention_variance = (belief.attention_variance * shrink).max(p.variance_floor);
            belief.rhythm_alignment = (belief.rhythm_alignment + RHYTHM_RECOVERY_PER_SEC * dt).min(1.0);
            belief.rhythm_variance = (belief.rhythm_variance * shrink).max(p.variance_floor);
        }
    }

    /// Normalized heart rate when the reading is trustworthy
    fn heart_rate_measurement(&self, obs: &Observation) -> Option<f64> {
        let hr = obs.heart_rate.filter(|v| v.is_finite())?;
        let confidence = obs.hr_confidence.filter(|v| v.is_finite())?;
        if confidence <= self.params.hr_confidence_threshold {
            return None;
        }
        Some(((hr - HR_FLOOR_BPM) / HR_SPAN_BPM).clamp(0.0, 1.0))
    }

    fn diagnose(&self, belief: &mut BeliefState, obs: &Observation) {
        let t = &self.target;
        let ea = belief.arousal - t.arousal;
        let et = belief.attention - t.attention;
        let er = belief.rhythm_alignment - t.rhythm_alignment;
        belief.prediction_error =
            (WEIGHT_AROUSAL * ea * ea + WEIGHT_ATTENTION * et * et + WEIGHT_RHYTHM * er * er).sqrt();

        let avg_variance =
            (belief.arousal_variance + belief.attention_variance + belief.rhythm_variance) / 3.0;
        let certainty = (1.0 - avg_variance).clamp(0.0, 1.0);
        let sensor_quality = obs
            .hr_confidence
            .filter(|v| v.is_finite())
            .unwrap_or(1.0)
            .clamp(0.0, 1.0);
        belief.confidence = (certainty * sensor_quality * belief.attention)
            .cbrt()
            .clamp(0.0, 1.0);
    }
}

fn clamp_estimates(belief: &mut BeliefState) {
    belief.arousal = belief.arousal.clamp(0.0, 1.0);
    belief.attention = belief.attention.clamp(0.0, 1.0);
    belief.rhythm_alignment = belief.rhythm_alignment.clamp(0.0, 1.0);
    belief.arousal_variance = belief.arousal_variance.max(0.0);
    belief.attention_variance = belief.attention_variance.max(0.0);
    belief.rhythm_variance = belief.rhythm_variance.max(0.0);
}
