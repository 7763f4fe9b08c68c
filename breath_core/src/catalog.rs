//! Default catalog of breathing patterns.
//!
//! This module provides the built-in protocols and merges user-defined
//! patterns from the config file.

use crate::config::CustomPattern;
use crate::types::*;
use once_cell::sync::Lazy;
use std::collections::BTreeMap;

/// Cached default catalog - built once and reused across all operations
static DEFAULT_CATALOG: Lazy<Catalog> = Lazy::new(build_default_catalog);

/// Get a reference to the cached default catalog
pub fn get_default_catalog() -> &'static Catalog {
    &DEFAULT_CATALOG
}

/// The set of patterns a kernel can bind
#[derive(Clone, Debug, Default)]
pub struct Catalog {
    pub patterns: BTreeMap<String, BreathingPattern>,
}

impl Catalog {
    pub fn get(&self, pattern_id: &str) -> Option<&BreathingPattern> {
        self.patterns.get(pattern_id)
    }

    pub fn insert(&mut self, pattern: BreathingPattern) {
        self.patterns.insert(pattern.id.clone(), pattern);
    }

    /// Patterns ordered by tier, then id
    pub fn by_tier(&self) -> Vec<&BreathingPattern> {
        let mut patterns: Vec<_> = self.patterns.values().collect();
        patterns.sort_by(|a, b| a.tier.cmp(&b.tier).then_with(|| a.id.cmp(&b.id)));
        patterns
    }

    /// Default catalog extended with custom patterns
    ///
    /// A custom pattern with a built-in id replaces the built-in one.
    pub fn with_custom(custom: &[CustomPattern]) -> Catalog {
        let mut catalog = get_default_catalog().clone();
        for c in custom {
            if catalog.patterns.contains_key(&c.id) {
                tracing::warn!("Custom pattern '{}' overrides a built-in pattern", c.id);
            }
            catalog.insert(BreathingPattern {
                id: c.id.clone(),
                label: c.label.clone(),
                timings: PhaseTimings::new(c.inhale, c.hold_in, c.exhale, c.hold_out),
                tier: c.tier,
                recommended_cycles: c.recommended_cycles,
                target: c.target,
            });
        }
        catalog
    }

    /// Validate the catalog for internal consistency
    ///
    /// Returns a list of validation errors (empty if valid)
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        for (id, pattern) in &self.patterns {
            if id != &pattern.id {
                errors.push(format!("Pattern key '{}' does not match id '{}'", id, pattern.id));
            }

            if !(1..=3).contains(&pattern.tier) {
                errors.push(format!("Pattern '{}': tier {} outside 1-3", id, pattern.tier));
            }

            for phase in Phase::ORDER {
                let secs = pattern.timings.duration(phase);
                if !secs.is_finite() || secs < 0.0 {
                    errors.push(format!(
                        "Pattern '{}': {:?} duration {} is not a non-negative number",
                        id, phase, secs
                    ));
                }
            }

            if !(pattern.timings.inhale > 0.0) {
                errors.push(format!("Pattern '{}': inhale must be positive", id));
            }

            if pattern.timings.active_phases() < 2 {
                errors.push(format!(
                    "Pattern '{}': needs at least two phases with a positive duration",
                    id
                ));
            }

            if pattern.recommended_cycles == 0 {
                errors.push(format!("Pattern '{}': recommended_cycles is 0", id));
            }
        }

        if !self.patterns.values().any(|p| p.tier == 1) {
            errors.push("Catalog has no tier 1 patterns".to_string());
        }

        errors
    }
}

fn pattern(
    id: &str,
    label: &str,
    timings: [f64; 4],
    tier: u8,
    recommended_cycles: u32,
    target: TargetProfile,
) -> BreathingPattern {
    let [inhale, hold_in, exhale, hold_out] = timings;
    BreathingPattern {
        id: id.into(),
        label: label.into(),
        timings: PhaseTimings::new(inhale, hold_in, exhale, hold_out),
        tier,
        recommended_cycles,
        target,
    }
}

/// Builds the default catalog of built-in patterns
///
/// Prefer `get_default_catalog()` outside of tests.
pub fn build_default_catalog() -> Catalog {
    use TargetProfile as T;

    let mut catalog = Catalog::default();

    // Tier 1
    catalog.insert(pattern("box", "Box Breathing", [4.0, 4.0, 4.0, 4.0], 1, 4, T::Balanced));
    catalog.insert(pattern("calm", "Calm", [4.0, 0.0, 6.0, 0.0], 1, 6, T::Parasympathetic));
    catalog.insert(pattern(
        "coherence",
        "Coherent Breathing",
        [5.5, 0.0, 5.5, 0.0],
        1,
        6,
        T::Balanced,
    ));
    catalog.insert(pattern("triangle", "Triangle", [4.0, 4.0, 4.0, 0.0], 1, 5, T::Balanced));

    // Tier 2
    catalog.insert(pattern(
        "4-7-8",
        "4-7-8 Relaxing Breath",
        [4.0, 7.0, 8.0, 0.0],
        2,
        4,
        T::Parasympathetic,
    ));
    catalog.insert(pattern("7-11", "7-11", [7.0, 0.0, 11.0, 0.0], 2, 4, T::Parasympathetic));
    catalog.insert(pattern("deep", "Deep Rest", [4.0, 4.0, 6.0, 2.0], 2, 4, T::Parasympathetic));
    catalog.insert(pattern("awake", "Awake", [6.0, 0.0, 2.0, 0.0], 2, 8, T::Sympathetic));
    catalog.insert(pattern("tactical", "Tactical", [4.0, 4.0, 4.0, 4.0], 2, 6, T::Balanced));

    // Tier 3
    catalog.insert(pattern("buteyko", "Buteyko", [3.0, 0.0, 3.0, 5.0], 3, 6, T::Default));
    catalog.insert(pattern("power", "Power Breathing", [2.0, 0.0, 2.0, 0.0], 3, 30, T::Sympathetic));

    catalog
}
