//! Core domain types for the breath pacing kernel.
//!
//! This module defines the fundamental types used throughout the system:
//! - Breathing phases, timings and patterns
//! - Sensor observations and the estimator's belief
//! - Per-pattern safety profiles and the registry holding them
//! - The kernel status and runtime state

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// Number of session outcomes kept per pattern
pub const RESONANCE_WINDOW: usize = 5;

// ============================================================================
// Phases and Patterns
// ============================================================================

/// One step of the breathing cycle
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    #[default]
    Inhale,
    HoldIn,
    Exhale,
    HoldOut,
}

impl Phase {
    /// Fixed cyclic order of phases
    pub const ORDER: [Phase; 4] = [Phase::Inhale, Phase::HoldIn, Phase::Exhale, Phase::HoldOut];

    /// Position of this phase in [`Phase::ORDER`]
    pub fn index(self) -> usize {
        match self {
            Phase::Inhale => 0,
            Phase::HoldIn => 1,
            Phase::Exhale => 2,
            Phase::HoldOut => 3,
        }
    }

    /// The phase `steps` positions after this one, wrapping past `holdOut`
    pub fn advance(self, steps: usize) -> Phase {
        Phase::ORDER[(self.index() + steps) % Phase::ORDER.len()]
    }

    pub fn label(self) -> &'static str {
        match self {
            Phase::Inhale => "Inhale",
            Phase::HoldIn => "Hold",
            Phase::Exhale => "Exhale",
            Phase::HoldOut => "Hold (empty)",
        }
    }
}

/// Per-phase durations in seconds
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct PhaseTimings {
    pub inhale: f64,
    #[serde(default)]
    pub hold_in: f64,
    pub exhale: f64,
    #[serde(default)]
    pub hold_out: f64,
}

impl PhaseTimings {
    pub fn new(inhale: f64, hold_in: f64, exhale: f64, hold_out: f64) -> Self {
        Self {
            inhale,
            hold_in,
            exhale,
            hold_out,
        }
    }

    /// Configured duration of a phase
    pub fn duration(&self, phase: Phase) -> f64 {
        match phase {
            Phase::Inhale => self.inhale,
            Phase::HoldIn => self.hold_in,
            Phase::Exhale => self.exhale,
            Phase::HoldOut => self.hold_out,
        }
    }

    /// Length of one full breath cycle
    pub fn cycle_seconds(&self) -> f64 {
        Phase::ORDER.iter().map(|p| self.duration(*p).max(0.0)).sum()
    }

    /// Count of phases with a positive duration
    pub fn active_phases(&self) -> usize {
        Phase::ORDER
            .iter()
            .filter(|p| self.duration(**p) > 0.0)
            .count()
    }
}

/// Physiological target the estimator relaxes toward for a pattern
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum TargetProfile {
    Parasympathetic,
    Balanced,
    Sympathetic,
    #[default]
    Default,
}

/// An immutable breathing protocol
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BreathingPattern {
    pub id: String,
    pub label: String,
    pub timings: PhaseTimings,
    /// Difficulty tier, 1 (open to everyone) to 3 (advanced)
    pub tier: u8,
    pub recommended_cycles: u32,
    #[serde(default)]
    pub target: TargetProfile,
}

impl BreathingPattern {
    /// Seconds needed to complete the recommended number of cycles
    pub fn recommended_seconds(&self) -> f64 {
        self.timings.cycle_seconds() * f64::from(self.recommended_cycles)
    }
}

// ============================================================================
// Observations and Belief
// ============================================================================

/// Explicit user input carried by an observation
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UserInteraction {
    Pause,
    Resume,
    Touch,
}

/// Whether the session surface is on screen
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum VisibilityState {
    #[default]
    Visible,
    Hidden,
}

/// Instantaneous sensor/context sample fed to `tick`
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct Observation {
    pub delta_time: f64,
    pub timestamp: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heart_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hr_confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_interaction: Option<UserInteraction>,
    #[serde(default)]
    pub visibility_state: VisibilityState,
}

impl Observation {
    /// A sample with no sensor data and the surface visible
    pub fn empty(delta_time: f64, timestamp: f64) -> Self {
        Self {
            delta_time,
            timestamp,
            ..Self::default()
        }
    }

    pub fn with_heart_rate(mut self, bpm: f64, confidence: f64) -> Self {
        self.heart_rate = Some(bpm);
        self.hr_confidence = Some(confidence);
        self
    }

    /// True when the user paused or hid the surface during this sample
    pub fn is_distracted(&self) -> bool {
        self.user_interaction == Some(UserInteraction::Pause)
            || self.visibility_state == VisibilityState::Hidden
    }
}

/// The estimator's belief about the user's state
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct BeliefState {
    pub arousal: f64,
    pub attention: f64,
    pub rhythm_alignment: f64,
    pub arousal_variance: f64,
    pub attention_variance: f64,
    pub rhythm_variance: f64,
    pub prediction_error: f64,
    pub confidence: f64,
}

impl Default for BeliefState {
    fn default() -> Self {
        Self {
            arousal: 0.5,
            attention: 0.5,
            rhythm_alignment: 0.0,
            arousal_variance: 0.5,
            attention_variance: 0.5,
            rhythm_variance: 0.5,
            prediction_error: 0.0,
            confidence: 0.0,
        }
    }
}

// ============================================================================
// Safety Registry
// ============================================================================

/// Accumulated safety history for one pattern
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct SafetyProfile {
    pub cumulative_stress_score: u32,
    pub last_incident_timestamp: f64,
    /// Absolute time in seconds; 0 means unlocked
    pub safety_lock_until: f64,
    pub resonance_history: VecDeque<f64>,
}

impl SafetyProfile {
    /// Append an outcome, evicting the oldest beyond [`RESONANCE_WINDOW`]
    pub fn push_resonance(&mut self, value: f64) {
        self.resonance_history.push_back(value);
        while self.resonance_history.len() > RESONANCE_WINDOW {
            self.resonance_history.pop_front();
        }
    }

    pub fn is_locked(&self, now: f64) -> bool {
        self.safety_lock_until > now
    }

    /// Mean of the resonance window, if any outcome was recorded
    pub fn average_resonance(&self) -> Option<f64> {
        if self.resonance_history.is_empty() {
            return None;
        }
        let sum: f64 = self.resonance_history.iter().sum();
        Some(sum / self.resonance_history.len() as f64)
    }

    /// Entries in the window recorded as full successes
    pub fn perfect_sessions(&self) -> usize {
        self.resonance_history.iter().filter(|v| **v == 1.0).count()
    }
}

/// Pattern id -> safety profile, swapped into the kernel wholesale
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
#[serde(transparent)]
pub struct SafetyRegistry(BTreeMap<String, SafetyProfile>);

impl SafetyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, pattern_id: &str) -> Option<&SafetyProfile> {
        self.0.get(pattern_id)
    }

    pub fn insert(&mut self, pattern_id: impl Into<String>, profile: SafetyProfile) {
        self.0.insert(pattern_id.into(), profile);
    }

    /// Mutable access, creating an empty profile on first use
    pub fn entry(&mut self, pattern_id: &str) -> &mut SafetyProfile {
        self.0.entry(pattern_id.to_string()).or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &SafetyProfile)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Lock deadline for a pattern if it is locked at `now`
    pub fn locked_until(&self, pattern_id: &str, now: f64) -> Option<f64> {
        self.get(pattern_id)
            .filter(|p| p.is_locked(now))
            .map(|p| p.safety_lock_until)
    }

    /// Perfect outcomes summed over every pattern
    pub fn perfect_sessions(&self) -> usize {
        self.0.values().map(SafetyProfile::perfect_sessions).sum()
    }
}

// ============================================================================
// Runtime State
// ============================================================================

/// Kernel lifecycle status
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KernelStatus {
    #[default]
    Idle,
    Running,
    Paused,
    Halted,
    SafetyLock,
}

/// The single source of truth, replaced wholesale on every dispatch
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct RuntimeState {
    pub status: KernelStatus,
    pub pattern: Option<BreathingPattern>,
    pub phase: Phase,
    pub phase_start_time: f64,
    pub phase_duration: f64,
    pub cycle_count: u32,
    pub session_start_time: f64,
    pub belief: BeliefState,
    pub safety_registry: SafetyRegistry,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_observation: Option<Observation>,
    /// Timestamp of the last `TICK`
    pub timestamp: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused_at: Option<f64>,

    // Derived on every dispatch, never persisted
    #[serde(skip)]
    pub phase_elapsed: f64,
    #[serde(skip)]
    pub session_duration: f64,
}

impl RuntimeState {
    pub fn pattern_id(&self) -> Option<&str> {
        self.pattern.as_ref().map(|p| p.id.as_str())
    }

    pub fn is_running(&self) -> bool {
        self.status == KernelStatus::Running
    }
}
