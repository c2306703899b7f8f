//! # Resilience
//!
//! Policies wrapped around every listen cycle.
//!
//! 1. **Retry**: any error other than cancellation waits a fixed delay
//!    (1 s) and tries again, without an attempt limit.
//! 2. **Circuit breaker**: outcomes are sampled over a rolling 10 s window;
//!    at a failure ratio of 0.5 with at least 5 samples the circuit opens and
//!    calls fail fast for 30 s, after which a single probe decides whether it
//!    closes or reopens.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let mut controller = ResilienceController::new(ResilienceConfig::default());
//! controller.execute(&cancel, |token| run_cycle(&ctx, token)).await;
//! ```

pub mod circuit;
pub mod controller;

pub use circuit::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use controller::{Completion, ResilienceConfig, ResilienceController};
