//! Middleware seam of the kernel and the built-in middlewares.
//!
//! Middlewares run synchronously after every committed dispatch, in
//! registration order, and see the event with the states before and after it.

use crate::events::KernelEvent;
use crate::types::{Phase, RuntimeState};
use crate::Result;

/// Events queued by callbacks during a notification
///
/// The kernel processes them after the current notification finishes, in the
/// order they were queued.
#[derive(Debug, Default)]
pub struct Deferred {
    events: Vec<KernelEvent>,
}

impl Deferred {
    pub fn dispatch(&mut self, event: KernelEvent) {
        self.events.push(event);
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub(crate) fn into_events(self) -> Vec<KernelEvent> {
        self.events
    }
}

pub trait Middleware {
    /// Name used in diagnostics
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn handle(
        &mut self,
        event: &KernelEvent,
        before: &RuntimeState,
        after: &RuntimeState,
        deferred: &mut Deferred,
    ) -> Result<()>;
}

impl<F> Middleware for F
where
    F: FnMut(&KernelEvent, &RuntimeState, &RuntimeState, &mut Deferred) -> Result<()>,
{
    fn handle(
        &mut self,
        event: &KernelEvent,
        before: &RuntimeState,
        after: &RuntimeState,
        deferred: &mut Deferred,
    ) -> Result<()> {
        self(event, before, after, deferred)
    }
}

/// Audio/haptic cue collaborator
pub trait CueSink {
    /// Announce the phase that just began and how long it lasts
    fn cue(&mut self, phase: Phase, duration: f64) -> Result<()>;
}

/// Forwards phase starts of a running session to a [`CueSink`]
pub struct CueMiddleware<S> {
    sink: S,
}

impl<S: CueSink> CueMiddleware<S> {
    pub fn new(sink: S) -> Self {
        Self { sink }
    }

    pub fn into_inner(self) -> S {
        self.sink
    }
}

impl<S: CueSink> Middleware for CueMiddleware<S> {
    fn name(&self) -> &str {
        "cue"
    }

    fn handle(
        &mut self,
        event: &KernelEvent,
        _before: &RuntimeState,
        after: &RuntimeState,
        _deferred: &mut Deferred,
    ) -> Result<()> {
        if !after.is_running() {
            return Ok(());
        }
        match event {
            KernelEvent::PhaseTransition { to, .. } => self.sink.cue(*to, after.phase_duration),
            // First phase of a session has no transition into it
            KernelEvent::StartSession { .. } => self.sink.cue(after.phase, after.phase_duration),
            _ => Ok(()),
        }
    }
}

/// Logs status changes and safety interdictions
#[derive(Clone, Copy, Debug, Default)]
pub struct TraceMiddleware;

impl Middleware for TraceMiddleware {
    fn name(&self) -> &str {
        "trace"
    }

    fn handle(
        &mut self,
        event: &KernelEvent,
        before: &RuntimeState,
        after: &RuntimeState,
        _deferred: &mut Deferred,
    ) -> Result<()> {
        match event {
            KernelEvent::SafetyInterdiction {
                risk_level, action, ..
            } => {
                tracing::warn!(risk_level, ?action, "Safety interdiction");
            }
            KernelEvent::PhaseTransition { from, to, .. } => {
                tracing::debug!(?from, ?to, cycle = after.cycle_count, "Phase transition");
            }
            KernelEvent::CycleComplete { count, .. } => {
                tracing::debug!(count, "Cycle complete");
            }
            _ => {}
        }
        if before.status != after.status {
            tracing::info!(
                "Kernel status {:?} -> {:?} on {}",
                before.status,
                after.status,
                event.kind()
            );
        }
        Ok(())
    }
}
