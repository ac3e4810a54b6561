//! Executor — the virtual-user scheduler and its control loop.
//!
//! A run is a pool of concurrent virtual users (VUs), each a Tokio task that
//! repeatedly invokes its bound scenario. The scheduler does not drive
//! iterations itself; it only controls *population*: every `tick` it samples
//! the [`RampProfile`] for the target active-VU count, admits missing units
//! and retires surplus ones. Rate over time is therefore a property of the
//! ramp curve and the scenarios' own latency, never of a central dispatcher.
//!
//! # Virtual-user lifecycle
//!
//! ```text
//! Idle -> Running -> Iterating -> Stopping -> Terminated
//! ```
//!
//! - `Idle -> Running`: the scheduler admitted the unit on a tick where the
//!   ramp target exceeded the active count.
//! - `Running -> Iterating`: the unit's loop invokes the bound scenario.
//! - `Iterating -> Stopping`: a stop condition was observed at an iteration
//!   boundary: the unit's retire flag, the run deadline, the per-VU
//!   iteration cap, or run-level cancellation.
//! - `Stopping -> Terminated`: the unit retires. In-flight work is never
//!   interrupted: stop conditions are only checked *between* iterations, so
//!   the drain is inherent in the loop shape (cooperative, not preemptive).
//!
//! # Failure containment
//!
//! A scenario invocation that returns `Err` or panics is recorded as one
//! failed iteration and nothing else: the virtual user keeps looping and
//! sibling units are unaffected. Panics are contained with `catch_unwind`
//! around each invocation.
//!
//! # Shutdown
//!
//! When the control loop exits (deadline reached, every iteration-capped VU
//! finished, or cancellation), all units get their retire flag set and are
//! joined within the configured `graceful_stop` window. Units still running
//! after the window, typically stuck on a pathological in-flight request,
//! are aborted.

pub mod ramp;
pub use ramp::RampProfile;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use futures::FutureExt;
use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use url::Url;

use crate::config::RunConfig;
use crate::http::HttpExecutor;
use crate::metrics::{Aggregator, Recorder};
use crate::scenario::{Registry, Scenario, ScenarioContext};

/// Run-level cancellation signal, observed cooperatively by every virtual
/// user at its next iteration boundary and by the scheduler at its next tick.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Where a virtual user is in its lifecycle. Published through an atomic so
/// the scheduler can sample it without synchronizing with the unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum VuState {
    Idle = 0,
    Running = 1,
    Iterating = 2,
    Stopping = 3,
    Terminated = 4,
}

impl VuState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => VuState::Idle,
            1 => VuState::Running,
            2 => VuState::Iterating,
            3 => VuState::Stopping,
            _ => VuState::Terminated,
        }
    }
}

/// Scheduler-side handle to one virtual user.
struct VuHandle {
    id: usize,
    state: Arc<AtomicU8>,
    retire: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl VuHandle {
    fn state(&self) -> VuState {
        VuState::from_u8(self.state.load(Ordering::Relaxed))
    }

    /// Counts toward the ramp target: admitted, not retired, not done.
    fn is_active(&self) -> bool {
        !self.retire.load(Ordering::Relaxed)
            && matches!(
                self.state(),
                VuState::Idle | VuState::Running | VuState::Iterating
            )
    }

    fn retire(&self) {
        self.retire.store(true, Ordering::Relaxed);
    }
}

/// Drives a pool of virtual users through the configured ramp schedule.
pub struct VuScheduler {
    config: RunConfig,
    base_url: Url,
}

impl VuScheduler {
    pub fn new(config: RunConfig, base_url: Url) -> Self {
        Self { config, base_url }
    }

    /// Run to completion. Returns once every virtual user has terminated.
    pub async fn run(
        &self,
        registry: &Registry,
        http: Arc<HttpExecutor>,
        aggregator: Arc<Aggregator>,
        cancel: CancelHandle,
    ) {
        if registry.is_empty() {
            tracing::warn!("no scenarios registered, nothing to run");
            return;
        }
        let profile = RampProfile::from_config(&self.config);
        let started = Instant::now();
        let deadline = profile.total().map(|total| started + total);

        let mut vus: Vec<VuHandle> = Vec::new();
        let mut admitted = 0usize;
        let mut ticker = tokio::time::interval(self.config.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if cancel.is_cancelled() {
                tracing::info!("cancellation requested, stopping the run");
                break;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                tracing::debug!("run deadline reached");
                break;
            }

            let target = profile.target_at(started.elapsed());
            let active = vus.iter().filter(|vu| vu.is_active()).count();
            if target > active {
                // Iteration-capped units are not replaced once they finish,
                // so admissions stay monotone in that mode.
                let missing = if self.config.iterations.is_some() {
                    target.saturating_sub(admitted)
                } else {
                    target - active
                };
                for _ in 0..missing {
                    vus.push(self.admit(
                        admitted,
                        registry,
                        &http,
                        &aggregator,
                        &cancel,
                        deadline,
                    ));
                    admitted += 1;
                }
            } else if active > target {
                // Retire the newest surplus units first.
                let mut surplus = active - target;
                for vu in vus.iter().rev() {
                    if surplus == 0 {
                        break;
                    }
                    if vu.is_active() {
                        tracing::debug!(vu = vu.id, "retiring virtual user");
                        vu.retire();
                        surplus -= 1;
                    }
                }
            }

            if self.config.iterations.is_some()
                && admitted >= self.config.vus
                && vus.iter().all(|vu| vu.handle.is_finished())
            {
                tracing::debug!("all virtual users exhausted their iteration cap");
                break;
            }
        }

        self.drain(vus).await;
    }

    fn admit(
        &self,
        id: usize,
        registry: &Registry,
        http: &Arc<HttpExecutor>,
        aggregator: &Arc<Aggregator>,
        cancel: &CancelHandle,
        deadline: Option<Instant>,
    ) -> VuHandle {
        let scenario = registry.bind(id);
        let mut query = self.config.query.clone();
        query.extend(scenario.query().iter().cloned());

        let state = Arc::new(AtomicU8::new(VuState::Idle as u8));
        let retire = Arc::new(AtomicBool::new(false));
        let unit = VirtualUser {
            id,
            scenario,
            base_url: self.base_url.clone(),
            query,
            http: Arc::clone(http),
            recorder: aggregator.recorder(),
            aggregator: Arc::clone(aggregator),
            state: Arc::clone(&state),
            retire: Arc::clone(&retire),
            cancel: cancel.clone(),
            deadline,
            iterations: self.config.iterations,
            pacing: self.config.pacing,
        };
        let handle = tokio::spawn(unit.run());
        VuHandle {
            id,
            state,
            retire,
            handle,
        }
    }

    /// Signal every unit and join within the graceful-stop window; abort
    /// whatever is left after it.
    async fn drain(&self, mut vus: Vec<VuHandle>) {
        tracing::debug!(vus = vus.len(), "draining virtual users");
        for vu in &vus {
            vu.retire();
        }
        let joins = join_all(vus.iter_mut().map(|vu| &mut vu.handle));
        if tokio::time::timeout(self.config.graceful_stop, joins)
            .await
            .is_err()
        {
            for vu in &vus {
                if !vu.handle.is_finished() {
                    tracing::warn!(vu = vu.id, "graceful stop window expired, aborting");
                    vu.handle.abort();
                }
            }
            let _ = join_all(vus.iter_mut().map(|vu| &mut vu.handle)).await;
        }
    }
}

/// One execution unit, exclusively owned by its spawned task.
struct VirtualUser {
    id: usize,
    scenario: Scenario,
    base_url: Url,
    query: Vec<(String, String)>,
    http: Arc<HttpExecutor>,
    recorder: Recorder,
    aggregator: Arc<Aggregator>,
    state: Arc<AtomicU8>,
    retire: Arc<AtomicBool>,
    cancel: CancelHandle,
    deadline: Option<Instant>,
    iterations: Option<u64>,
    pacing: Option<std::time::Duration>,
}

impl VirtualUser {
    async fn run(self) {
        self.set_state(VuState::Running);
        self.aggregator.vu_started();
        tracing::debug!(vu = self.id, scenario = %self.scenario.name(), "virtual user admitted");
        // Publishes Terminated and releases the gauge slot even if the task
        // is aborted mid-iteration.
        let _guard = VuGuard {
            state: Arc::clone(&self.state),
            aggregator: Arc::clone(&self.aggregator),
        };

        let mut iteration: u64 = 0;
        loop {
            if self.should_stop(iteration) {
                self.set_state(VuState::Stopping);
                break;
            }

            self.set_state(VuState::Iterating);
            let ctx = ScenarioContext::new(
                self.base_url.clone(),
                self.query.clone(),
                Arc::clone(&self.http),
                self.recorder.clone(),
                self.id,
                iteration,
            );
            let failed = match AssertUnwindSafe(self.scenario.invoke(ctx))
                .catch_unwind()
                .await
            {
                Ok(Ok(())) => false,
                Ok(Err(err)) => {
                    tracing::debug!(vu = self.id, error = %err, "iteration failed");
                    true
                }
                Err(_) => {
                    tracing::warn!(vu = self.id, "scenario panicked, recorded as failed iteration");
                    true
                }
            };
            self.recorder.record_iteration(failed);
            iteration += 1;

            if let Some(pacing) = self.pacing {
                tokio::time::sleep(pacing).await;
            }
        }
        tracing::debug!(vu = self.id, iterations = iteration, "virtual user retired");
    }

    fn should_stop(&self, iteration: u64) -> bool {
        self.retire.load(Ordering::Relaxed)
            || self.cancel.is_cancelled()
            || self.deadline.is_some_and(|d| Instant::now() >= d)
            || self.iterations.is_some_and(|cap| iteration >= cap)
    }

    fn set_state(&self, state: VuState) {
        self.state.store(state as u8, Ordering::Relaxed);
    }
}

struct VuGuard {
    state: Arc<AtomicU8>,
    aggregator: Arc<Aggregator>,
}

impl Drop for VuGuard {
    fn drop(&mut self) {
        self.state.store(VuState::Terminated as u8, Ordering::Relaxed);
        self.aggregator.vu_stopped();
    }
}
