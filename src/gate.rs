//! # Working-Hours Gate
//!
//! ## Responsibility
//! Tick once per interval (1 minute by default, first tick immediate) and run
//! one listen cycle per tick while the local time-of-day is inside the
//! configured window.
//!
//! ## Guarantees
//! - Both window bounds are inclusive.
//! - A window whose start is later than its end wraps midnight.
//! - The caller runs its cycle between two calls to
//!   [`WorkingHoursGate::wait_for_window`], so the cycle completes before the
//!   next tick is considered; ticks missed meanwhile are skipped, never
//!   replayed.
//! - Waiting ends only on an in-window tick or cancellation.

use std::fmt;
use std::time::Duration;

use chrono::NaiveTime;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Default spacing between gate ticks.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(60);

/// Shortest accepted tick spacing.
pub const MIN_TICK_INTERVAL: Duration = Duration::from_millis(1);

// ---------------------------------------------------------------------------
// WorkingHours
// ---------------------------------------------------------------------------

/// A daily time-of-day window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkingHours {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl WorkingHours {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    /// `true` when `time` falls inside the window, bounds included.
    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start <= self.end {
            time >= self.start && time <= self.end
        } else {
            time >= self.start || time <= self.end
        }
    }
}

impl Default for WorkingHours {
    /// 08:00 to 20:00.
    fn default() -> Self {
        Self {
            start: NaiveTime::from_hms_opt(8, 0, 0).unwrap_or(NaiveTime::MIN),
            end: NaiveTime::from_hms_opt(20, 0, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

impl fmt::Display for WorkingHours {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start.format("%H:%M:%S"), self.end.format("%H:%M:%S"))
    }
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Source of the current local time-of-day.
pub trait Clock: Send + Sync {
    fn time_of_day(&self) -> NaiveTime;
}

/// Wall clock in the host's local timezone.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalClock;

impl Clock for LocalClock {
    fn time_of_day(&self) -> NaiveTime {
        chrono::Local::now().time()
    }
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

/// Outcome of one gate tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Proceed,
    Skip,
}

pub struct WorkingHoursGate<C> {
    hours: WorkingHours,
    clock: C,
    interval: Duration,
    ticker: Option<Interval>,
    previous: Option<GateDecision>,
}

impl<C: Clock> WorkingHoursGate<C> {
    pub fn new(hours: WorkingHours, clock: C) -> Self {
        Self {
            hours,
            clock,
            interval: DEFAULT_TICK_INTERVAL,
            ticker: None,
            previous: None,
        }
    }

    /// Override the tick interval, clamped to [`MIN_TICK_INTERVAL`].
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(MIN_TICK_INTERVAL);
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn hours(&self) -> WorkingHours {
        self.hours
    }

    /// Wait for the next tick that falls inside the window.
    ///
    /// Returns `true` when a cycle may run and `false` once `cancel` fires.
    /// Out-of-window ticks are logged and skipped.
    pub async fn wait_for_window(&mut self, cancel: &CancellationToken) -> bool {
        let period = self.interval;
        let ticker = self.ticker.get_or_insert_with(|| {
            let mut t = tokio::time::interval(period);
            t.set_missed_tick_behavior(MissedTickBehavior::Skip);
            t
        });

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return false,
                _ = ticker.tick() => {}
            }

            let decision = decide(&self.hours, &self.clock);
            let now = self.clock.time_of_day().format("%H:%M:%S");
            let changed = self.previous != Some(decision);
            self.previous = Some(decision);

            match decision {
                GateDecision::Proceed => {
                    if changed {
                        info!(%now, window = %self.hours, "Inside working hours, listener active");
                    }
                    return true;
                }
                GateDecision::Skip if changed => {
                    info!(%now, window = %self.hours, "Outside working hours, listener paused");
                }
                GateDecision::Skip => {
                    debug!(%now, window = %self.hours, "Outside working hours");
                }
            }
        }
    }
}

fn decide<C: Clock>(hours: &WorkingHours, clock: &C) -> GateDecision {
    if hours.contains(clock.time_of_day()) {
        GateDecision::Proceed
    } else {
        GateDecision::Skip
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
