//! Retry-forever controller composed over the circuit breaker.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::circuit::{CircuitBreaker, CircuitBreakerConfig};
use crate::error::BridgeError;

#[derive(Debug, Clone, PartialEq)]
pub struct ResilienceConfig {
    /// Fixed wait between a failed attempt and the next one.
    pub retry_delay: Duration,
    pub circuit: CircuitBreakerConfig,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(1),
            circuit: CircuitBreakerConfig::default(),
        }
    }
}

/// How [`ResilienceController::execute`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The operation finished without a retry-counted error.
    Completed,
    /// The token fired before or during an attempt or a wait.
    Cancelled,
}

/// Runs an operation under two policies: the outer one retries every
/// non-cancellation error after a fixed delay with no attempt limit, the
/// inner one is a [`CircuitBreaker`] that refuses attempts while open.
///
/// The breaker state lives as long as the controller, so one controller
/// should be kept for the whole process.
#[derive(Debug)]
pub struct ResilienceController {
    retry_delay: Duration,
    breaker: CircuitBreaker,
    attempts: u64,
}

impl ResilienceController {
    pub fn new(cfg: ResilienceConfig) -> Self {
        Self {
            retry_delay: cfg.retry_delay,
            breaker: CircuitBreaker::new(cfg.circuit),
            attempts: 0,
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Operations actually started (fast-failed calls are not counted).
    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    /// Run `op` until it completes or `cancel` fires.
    ///
    /// `IdleTimeout` from `op` is treated as a completion and recorded as a
    /// success. `Cancelled` ends the loop without touching the breaker.
    pub async fn execute<F, Fut>(&mut self, cancel: &CancellationToken, mut op: F) -> Completion
    where
        F: FnMut(CancellationToken) -> Fut,
        Fut: Future<Output = Result<(), BridgeError>>,
    {
        loop {
            if cancel.is_cancelled() {
                return Completion::Cancelled;
            }

            let result = match self.breaker.try_acquire(Instant::now()) {
                Err(remaining) => Err(BridgeError::CircuitOpen { remaining }),
                Ok(()) => {
                    self.attempts += 1;
                    let result = op(cancel.clone()).await;
                    match &result {
                        Err(BridgeError::Cancelled) => {}
                        Ok(()) => self.breaker.record_success(Instant::now()),
                        Err(e) if e.is_benign() => self.breaker.record_success(Instant::now()),
                        Err(_) => self.breaker.record_failure(Instant::now()),
                    }
                    result
                }
            };

            match result {
                Err(BridgeError::Cancelled) => return Completion::Cancelled,
                Ok(()) => return Completion::Completed,
                Err(e) if e.is_benign() => return Completion::Completed,
                Err(BridgeError::CircuitOpen { remaining }) => {
                    debug!(remaining_secs = remaining.as_secs(), "Circuit open, attempt skipped");
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        attempt = self.attempts,
                        circuit = %self.breaker.state(),
                        delay_ms = self.retry_delay.as_millis() as u64,
                        "Listen cycle failed, retrying"
                    );
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return Completion::Cancelled,
                _ = tokio::time::sleep(self.retry_delay) => {}
            }
        }
    }
}

impl Default for ResilienceController {
    fn default() -> Self {
        Self::new(ResilienceConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
