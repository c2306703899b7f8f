//! Crate-level error types.
//!
//! Each layer gets its own enum so callers can match on the failure domain:
//!
//! - [`BridgeError`]: everything that can end a listen cycle.
//! - [`DeliveryError`]: one failed attempt to hand an event to the HTTP API.
//! - [`ConfigError`]: startup validation; the only process-fatal class.

use std::time::Duration;

/// Errors raised while resolving, connecting to, or reading from the feed.
///
/// [`BridgeError::is_benign`] separates the variants that complete a cycle
/// normally from the ones that feed the retry and circuit-breaker policies.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Name resolution yielded no usable address.
    #[error("unable to resolve host {host}: {detail}")]
    UnresolvedHost { host: String, detail: String },

    /// The TCP connection was refused or the peer was unreachable.
    #[error("unable to connect to socket server {host}:{port}, {source}")]
    Connection {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// No data arrived within the idle window.
    #[error("no data received for {0:?}")]
    IdleTimeout(Duration),

    /// The shutdown token fired.
    #[error("operation cancelled")]
    Cancelled,

    /// The circuit breaker is open; the cycle was not attempted.
    #[error("circuit open, retry allowed in {remaining:?}")]
    CircuitOpen { remaining: Duration },

    /// The event conduit no longer accepts events.
    #[error(transparent)]
    ConduitClosed(#[from] ConduitClosed),

    /// Any other I/O fault on an established connection.
    #[error("socket i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// `true` for outcomes that end a cycle without counting as a failure.
    pub fn is_benign(&self) -> bool {
        matches!(self, BridgeError::IdleTimeout(_) | BridgeError::Cancelled)
    }
}

/// Returned by [`crate::conduit::EventConduit::publish`] after the conduit
/// has been closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("event conduit is closed")]
pub struct ConduitClosed;

/// One failed attempt to forward an event.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// The request never produced a response (DNS, connect, reset, timeout).
    #[error("request to {url} failed: {detail}")]
    Transport { url: String, detail: String },

    /// The API answered with a non-2xx status.
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    /// Shutdown interrupted the delivery or its backoff.
    #[error("delivery cancelled")]
    Cancelled,
}

impl DeliveryError {
    /// Whether the retry schedule applies to this failure.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, DeliveryError::Cancelled)
    }
}

/// Startup configuration problems.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("totalip:{0} is not set")]
    Missing(&'static str),

    #[error("totalip:{field} is invalid: {detail}")]
    Invalid { field: &'static str, detail: String },

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
