//! Kernel orchestrator.
//!
//! The kernel owns the current [`RuntimeState`], a bounded event log, the
//! subscriber set and the middleware chain. Every event goes through the same
//! pipeline: guard, log, reduce, derive, commit, middlewares, subscribers.
//!
//! Callbacks cannot re-enter `dispatch` directly. Events they want to send go
//! into a [`Deferred`] queue that is drained strictly after the current
//! notification completes, so the log always reflects dispatch order.
//!
//! The kernel is single-threaded. A host that shares one across threads must
//! serialize `dispatch` and `tick` behind a single lock or channel.

use crate::catalog::Catalog;
use crate::clock::Clock;
use crate::config::Config;
use crate::estimator::AdaptiveStateEstimator;
use crate::events::KernelEvent;
use crate::guard::{Guard, SafetyGuard};
use crate::middleware::{Deferred, Middleware};
use crate::reducer::reduce;
use crate::sequencer;
use crate::types::{KernelStatus, Observation, RuntimeState, SafetyRegistry};
use crate::{Error, Result};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};

/// State-change listener; may queue follow-up events through `Deferred`
pub type Subscriber = Box<dyn FnMut(&RuntimeState, &mut Deferred) -> Result<()>>;

/// Handle returned by [`Kernel::subscribe`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Counters for audit tooling
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct KernelDiagnostics {
    pub dispatched: u64,
    pub dropped: u64,
    pub interdicted: u64,
    pub evicted: u64,
    pub callback_failures: u64,
}

pub struct Kernel {
    catalog: Catalog,
    clock: Box<dyn Clock>,
    guard: Box<dyn Guard>,
    estimator: AdaptiveStateEstimator,
    state: RuntimeState,
    log: VecDeque<KernelEvent>,
    log_capacity: usize,
    max_tick_dt: f64,
    middlewares: Vec<Box<dyn Middleware>>,
    subscribers: Vec<(SubscriptionId, Subscriber)>,
    next_subscription: u64,
    pending: VecDeque<KernelEvent>,
    diagnostics: KernelDiagnostics,
}

impl Kernel {
    /// Build a kernel over `catalog` without rejecting it
    ///
    /// Validation problems are logged, not enforced; hosts loading
    /// user-supplied patterns should go through [`Kernel::validated`].
    pub fn new(catalog: Catalog, config: &Config, clock: impl Clock + 'static) -> Self {
        for problem in catalog.validate() {
            tracing::warn!("Kernel catalog problem: {}", problem);
        }
        Self {
            catalog,
            clock: Box::new(clock),
            guard: Box::new(SafetyGuard::new(config.safety.clone())),
            estimator: AdaptiveStateEstimator::new(config.estimator.clone()),
            state: RuntimeState::default(),
            log: VecDeque::with_capacity(config.kernel.log_capacity.min(4096)),
            log_capacity: config.kernel.log_capacity.max(1),
            max_tick_dt: config.kernel.max_tick_dt,
            middlewares: Vec::new(),
            subscribers: Vec::new(),
            next_subscription: 0,
            pending: VecDeque::new(),
            diagnostics: KernelDiagnostics::default(),
        }
    }

    /// Build a kernel, refusing a catalog that fails [`Catalog::validate`]
    pub fn validated(
        catalog: Catalog,
        config: &Config,
        clock: impl Clock + 'static,
    ) -> Result<Self> {
        let errors = catalog.validate();
        if !errors.is_empty() {
            return Err(Error::CatalogValidation(errors.join("; ")));
        }
        Ok(Self::new(catalog, config, clock))
    }

    /// Replace the safety guard
    pub fn with_guard(mut self, guard: impl Guard + 'static) -> Self {
        self.guard = Box::new(guard);
        self
    }

    /// Boot the kernel into its initial state
    pub fn init(&mut self) {
        let now = self.clock.now();
        tracing::debug!("Kernel init at {:.3}", now);
        self.dispatch(KernelEvent::Boot { timestamp: now });
    }

    /// End any active session and drop every callback
    pub fn dispose(&mut self) {
        if matches!(self.state.status, KernelStatus::Running | KernelStatus::Paused) {
            let now = self.clock.now();
            self.dispatch(KernelEvent::Halt { timestamp: now });
        }
        self.pending.clear();
        self.middlewares.clear();
        self.subscribers.clear();
        tracing::debug!(diagnostics = ?self.diagnostics, "Kernel disposed");
    }

    pub fn state(&self) -> &RuntimeState {
        &self.state
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    pub fn diagnostics(&self) -> KernelDiagnostics {
        self.diagnostics
    }

    /// Ordered copy of the event log, oldest first
    pub fn log_buffer(&self) -> Vec<KernelEvent> {
        self.log.iter().cloned().collect()
    }

    /// Clamp a frame step to the configured maximum
    pub fn clamp_dt(&self, dt: f64) -> f64 {
        if dt.is_finite() {
            dt.clamp(0.0, self.max_tick_dt)
        } else {
            0.0
        }
    }

    pub fn subscribe<F>(&mut self, callback: F) -> SubscriptionId
    where
        F: FnMut(&RuntimeState, &mut Deferred) -> Result<()> + 'static,
    {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.subscribers.push((id, Box::new(callback)));
        id
    }

    /// Remove a subscriber; returns false if it was already gone
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sid, _)| *sid != id);
        self.subscribers.len() != before
    }

    pub fn use_middleware(&mut self, middleware: impl Middleware + 'static) {
        self.middlewares.push(Box::new(middleware));
    }

    /// Swap in a complete registry snapshot
    pub fn load_safety_registry(&mut self, registry: SafetyRegistry) {
        let now = self.clock.now();
        self.dispatch(KernelEvent::LoadSafetyRegistry {
            registry,
            timestamp: now,
        });
    }

    /// Run an event through the pipeline, then any events it caused
    pub fn dispatch(&mut self, event: KernelEvent) {
        self.pending.push_back(event);
        while let Some(next) = self.pending.pop_front() {
            self.dispatch_one(next);
        }
    }

    fn dispatch_one(&mut self, event: KernelEvent) {
        let before = self.state.clone();

        let Some(event) = self.guard.check(event, &before) else {
            self.diagnostics.dropped += 1;
            tracing::debug!("Guard dropped event");
            return;
        };
        if matches!(event, KernelEvent::SafetyInterdiction { .. }) {
            self.diagnostics.interdicted += 1;
        }

        self.log.push_back(event.clone());
        while self.log.len() > self.log_capacity {
            self.log.pop_front();
            self.diagnostics.evicted += 1;
        }

        let mut next = reduce(&before, &event, &self.catalog);
        self.derive(&mut next);
        self.state = next;
        self.diagnostics.dispatched += 1;

        let mut deferred = Deferred::default();

        for middleware in self.middlewares.iter_mut() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                middleware.handle(&event, &before, &self.state, &mut deferred)
            }));
            settle(outcome, middleware.name(), &event, &mut self.diagnostics);
        }

        for (id, subscriber) in self.subscribers.iter_mut() {
            let outcome =
                panic::catch_unwind(AssertUnwindSafe(|| subscriber(&self.state, &mut deferred)));
            settle(
                outcome,
                &format!("subscriber#{}", id.0),
                &event,
                &mut self.diagnostics,
            );
        }

        self.pending.extend(deferred.into_events());
    }

    /// Fill the wall-clock derived fields; zero unless running
    fn derive(&self, state: &mut RuntimeState) {
        if state.is_running() {
            let now = self.clock.now();
            state.phase_elapsed = (now - state.phase_start_time).max(0.0);
            state.session_duration = (now - state.session_start_time).max(0.0);
        } else {
            state.phase_elapsed = 0.0;
            state.session_duration = 0.0;
        }
    }

    /// Advance one frame
    ///
    /// Updates the belief, moves to the next phase once the current one has
    /// run its duration, then records the raw observation. `dt` should already
    /// be clamped by the driver (see [`Kernel::clamp_dt`]).
    pub fn tick(&mut self, dt: f64, observation: Observation) -> Result<()> {
        let now = self.clock.now();

        self.estimator
            .set_target_for_pattern(self.state.pattern.as_ref());
        let belief = self.estimator.update(&self.state.belief, dt, &observation);
        self.dispatch(KernelEvent::BeliefUpdate {
            belief,
            timestamp: now,
        });

        let due = match &self.state.pattern {
            Some(pattern)
                if self.state.is_running()
                    && now - self.state.phase_start_time >= self.state.phase_duration =>
            {
                match sequencer::transition_from(self.state.phase, &pattern.timings) {
                    Ok(transition) => Some(transition),
                    Err(e) => {
                        tracing::error!("Cannot advance pattern '{}': {}", pattern.id, e);
                        return Err(e);
                    }
                }
            }
            _ => None,
        };

        if let Some(transition) = due {
            let count = self.state.cycle_count + 1;
            self.dispatch(KernelEvent::PhaseTransition {
                from: transition.from,
                to: transition.to,
                timestamp: now,
            });
            if transition.completes_cycle() {
                self.dispatch(KernelEvent::CycleComplete {
                    count,
                    timestamp: now,
                });
            }
        }

        self.dispatch(KernelEvent::Tick {
            observation,
            timestamp: now,
        });
        Ok(())
    }
}

fn settle(
    outcome: std::thread::Result<Result<()>>,
    who: &str,
    event: &KernelEvent,
    diagnostics: &mut KernelDiagnostics,
) {
    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            diagnostics.callback_failures += 1;
            tracing::error!("{} failed on {}: {}", who, event.kind(), e);
        }
        Err(_) => {
            diagnostics.callback_failures += 1;
            tracing::error!("{} panicked on {}", who, event.kind());
        }
    }
}
