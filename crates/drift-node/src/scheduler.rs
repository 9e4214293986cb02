//! Wall-clock aligned job scheduling.
//!
//! A [`Scheduler`] fires a [`Job`] on boundaries of `interval / occurrences`
//! measured from the Unix epoch, so every node of a network ticks at the same
//! instants. Occurrence `k` of an interval is the boundary whose index modulo
//! `occurrences` is `k`; occurrences below `skipped_occurrences` never fire.
//!
//! The validation job runs once per interval (`occurrences = 1`). The
//! verification job runs `verifications_count_per_validation` times per
//! interval and skips occurrence 0, which belongs to validation.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use drift_core::traits::Clock;

/// Work fired by a [`Scheduler`] with the boundary timestamp in nanoseconds.
#[async_trait]
pub trait Job: Send + Sync + 'static {
    async fn run(&self, timestamp: i64);
}

/// Lifecycle of a [`Scheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    /// A single firing is pending.
    Scheduled,
    /// Periodic firing is active.
    Running,
}

struct Control {
    state: SchedulerState,
    generation: u64,
    ticker: Option<JoinHandle<()>>,
}

/// Fires a [`Job`] on aligned ticks.
pub struct Scheduler {
    name: &'static str,
    job: Arc<dyn Job>,
    clock: Arc<dyn Clock>,
    interval: i64,
    occurrences: u32,
    skipped_occurrences: u32,
    control: Arc<Mutex<Control>>,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("name", &self.name)
            .field("interval", &self.interval)
            .field("occurrences", &self.occurrences)
            .field("skipped_occurrences", &self.skipped_occurrences)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// `interval` is in nanoseconds. A zero `occurrences` is treated as one.
    pub fn new(
        name: &'static str,
        job: Arc<dyn Job>,
        clock: Arc<dyn Clock>,
        interval: i64,
        occurrences: u32,
        skipped_occurrences: u32,
    ) -> Self {
        Self {
            name,
            job,
            clock,
            interval: interval.max(1),
            occurrences: occurrences.max(1),
            skipped_occurrences,
            control: Arc::new(Mutex::new(Control {
                state: SchedulerState::Idle,
                generation: 0,
                ticker: None,
            })),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn state(&self) -> SchedulerState {
        self.control.lock().state
    }

    /// Distance between two consecutive occurrences, in nanoseconds.
    pub fn sub_interval(&self) -> i64 {
        (self.interval / i64::from(self.occurrences)).max(1)
    }

    /// Begin periodic firing. Returns `false` if the scheduler was not idle.
    pub fn start(&self) -> bool {
        let mut control = self.control.lock();
        if control.state != SchedulerState::Idle {
            return false;
        }
        control.generation += 1;
        control.state = SchedulerState::Running;

        let generation = control.generation;
        let job = Arc::clone(&self.job);
        let clock = Arc::clone(&self.clock);
        let state = Arc::clone(&self.control);
        let (name, sub, occurrences, skipped) =
            (self.name, self.sub_interval(), self.occurrences, self.skipped_occurrences);

        control.ticker = Some(tokio::spawn(async move {
            loop {
                let boundary = sleep_until_next(clock.as_ref(), sub).await;
                if state.lock().generation != generation {
                    return;
                }
                let occurrence = occurrence_index(boundary, sub, occurrences);
                if occurrence < skipped {
                    continue;
                }
                fire(name, &job, boundary).await;
            }
        }));
        debug!(scheduler = name, "started");
        true
    }

    /// Stop periodic firing or cancel a pending single firing. A job already
    /// running completes on its own.
    pub fn stop(&self) {
        let mut control = self.control.lock();
        control.generation += 1;
        control.state = SchedulerState::Idle;
        if let Some(ticker) = control.ticker.take() {
            ticker.abort();
        }
        debug!(scheduler = self.name, "stopped");
    }

    /// Fire the job once on the next full-interval boundary. Returns `None`
    /// if the scheduler is already running or has a firing pending.
    pub fn fire_once(&self) -> Option<JoinHandle<()>> {
        let mut control = self.control.lock();
        if control.state != SchedulerState::Idle {
            return None;
        }
        control.generation += 1;
        control.state = SchedulerState::Scheduled;

        let generation = control.generation;
        let job = Arc::clone(&self.job);
        let clock = Arc::clone(&self.clock);
        let state = Arc::clone(&self.control);
        let (name, interval) = (self.name, self.interval);

        Some(tokio::spawn(async move {
            let boundary = sleep_until_next(clock.as_ref(), interval).await;
            if state.lock().generation != generation {
                return;
            }
            fire(name, &job, boundary).await;
            let mut control = state.lock();
            if control.generation == generation {
                control.state = SchedulerState::Idle;
            }
        }))
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(ticker) = self.control.lock().ticker.take() {
            ticker.abort();
        }
    }
}

/// Next multiple of `step` strictly after `now`.
pub fn next_boundary(now: i64, step: i64) -> i64 {
    (now.div_euclid(step) + 1) * step
}

fn occurrence_index(boundary: i64, sub: i64, occurrences: u32) -> u32 {
    // Fits: the remainder is below `occurrences`.
    boundary.div_euclid(sub).rem_euclid(i64::from(occurrences)) as u32
}

async fn sleep_until_next(clock: &dyn Clock, step: i64) -> i64 {
    let now = clock.now();
    let boundary = next_boundary(now, step);
    let wait = u64::try_from(boundary - now).unwrap_or(0);
    tokio::time::sleep(Duration::from_nanos(wait)).await;
    boundary
}

async fn fire(name: &'static str, job: &Arc<dyn Job>, timestamp: i64) {
    let job = Arc::clone(job);
    if let Err(e) = tokio::spawn(async move { job.run(timestamp).await }).await {
        warn!(scheduler = name, timestamp, "job failed: {e}");
    }
}
