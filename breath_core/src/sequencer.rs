//! Phase sequencing over the fixed `[inhale, holdIn, exhale, holdOut]` order.

use crate::types::{Phase, PhaseTimings};
use crate::{Error, Result};

/// A step from one phase to the next
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition {
    pub from: Phase,
    pub to: Phase,
}

impl Transition {
    /// Wrapping past `holdOut` completes one breath cycle
    pub fn completes_cycle(&self) -> bool {
        is_cycle_boundary(self.from, self.to)
    }
}

/// The phase that follows `current`, skipping phases configured as zero
///
/// The search covers at most one full cycle. A single active phase follows
/// itself; an all-zero pattern is a configuration error.
pub fn next_phase(current: Phase, timings: &PhaseTimings) -> Result<Phase> {
    (1..=Phase::ORDER.len())
        .map(|step| current.advance(step))
        .find(|phase| timings.duration(*phase) > 0.0)
        .ok_or_else(|| {
            Error::MalformedPattern(format!(
                "{}/{}/{}/{}",
                timings.inhale, timings.hold_in, timings.exhale, timings.hold_out
            ))
        })
}

/// Compute the transition out of `current`
pub fn transition_from(current: Phase, timings: &PhaseTimings) -> Result<Transition> {
    Ok(Transition {
        from: current,
        to: next_phase(current, timings)?,
    })
}

/// Entering `inhale` is the boundary. When inhale is zero-length the wrap
/// lands on a later phase, and the wrap itself still counts.
pub fn is_cycle_boundary(from: Phase, to: Phase) -> bool {
    to == Phase::Inhale || to.index() <= from.index()
}
