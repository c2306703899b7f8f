//! Rolling-window circuit breaker.
//!
//! Outcomes are sampled over a sliding window. The breaker opens once the
//! window holds at least `minimum_throughput` samples and the failure ratio
//! reaches `failure_ratio`. After `break_duration` a single probe is let
//! through; its outcome closes or reopens the circuit.
//!
//! The breaker takes `now` explicitly so that the state machine stays a pure
//! function of its inputs; callers pass [`tokio::time::Instant::now`].

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation, outcomes are sampled.
    Closed,
    /// Failure threshold exceeded, calls fail fast.
    Open,
    /// Cool-down elapsed, one probe is in flight.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Failure fraction in `[0, 1]` that trips the breaker.
    pub failure_ratio: f64,
    /// Width of the rolling sample window.
    pub sampling_duration: Duration,
    /// Samples required in the window before the ratio is evaluated.
    pub minimum_throughput: usize,
    /// How long the circuit stays open before a probe is allowed.
    pub break_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_ratio: 0.5,
            sampling_duration: Duration::from_secs(10),
            minimum_throughput: 5,
            break_duration: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    at: Instant,
    failed: bool,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    cfg: CircuitBreakerConfig,
    state: CircuitState,
    samples: VecDeque<Sample>,
    open_until: Option<Instant>,
    trips: u64,
}

impl CircuitBreaker {
    pub fn new(cfg: CircuitBreakerConfig) -> Self {
        Self {
            cfg,
            state: CircuitState::Closed,
            samples: VecDeque::new(),
            open_until: None,
            trips: 0,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Number of Closed/HalfOpen → Open transitions so far.
    pub fn trips(&self) -> u64 {
        self.trips
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.cfg
    }

    /// Ask for permission to attempt a call.
    ///
    /// Returns `Err(remaining)` while the circuit is open. When the cool-down
    /// has elapsed the breaker moves to [`CircuitState::HalfOpen`] and grants
    /// exactly one probe; further calls are refused until the probe outcome
    /// is recorded.
    pub fn try_acquire(&mut self, now: Instant) -> Result<(), Duration> {
        match self.state {
            CircuitState::Closed => Ok(()),
            CircuitState::HalfOpen => Err(Duration::ZERO),
            CircuitState::Open => {
                let until = self.open_until.unwrap_or(now);
                if now >= until {
                    self.state = CircuitState::HalfOpen;
                    info!("Circuit half-open, allowing one probe attempt");
                    Ok(())
                } else {
                    Err(until - now)
                }
            }
        }
    }

    pub fn record_success(&mut self, now: Instant) {
        match self.state {
            CircuitState::HalfOpen => {
                self.state = CircuitState::Closed;
                self.open_until = None;
                self.samples.clear();
                info!("Probe succeeded, circuit closed");
            }
            CircuitState::Closed => self.push(now, false),
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&mut self, now: Instant) {
        match self.state {
            CircuitState::HalfOpen => {
                warn!(
                    break_secs = self.cfg.break_duration.as_secs(),
                    "Probe failed, circuit reopened"
                );
                self.open(now);
            }
            CircuitState::Closed => {
                self.push(now, true);
                let total = self.samples.len();
                let failures = self.samples.iter().filter(|s| s.failed).count();
                if total >= self.cfg.minimum_throughput
                    && failures as f64 / total as f64 >= self.cfg.failure_ratio
                {
                    warn!(
                        failures,
                        total,
                        break_secs = self.cfg.break_duration.as_secs(),
                        "Failure ratio exceeded, circuit opened"
                    );
                    self.open(now);
                }
            }
            CircuitState::Open => {}
        }
    }

    fn open(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.open_until = Some(now + self.cfg.break_duration);
        self.samples.clear();
        self.trips += 1;
    }

    fn push(&mut self, now: Instant, failed: bool) {
        self.samples.push_back(Sample { at: now, failed });
        while let Some(front) = self.samples.front() {
            if now.saturating_duration_since(front.at) > self.cfg.sampling_duration {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
