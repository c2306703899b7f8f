//! # HTTP Forwarding
//!
//! ## Responsibility
//! POST each event's content to `{base}/api/totalip/socket` with the
//! `x-api-key` header, retrying failed attempts on a fixed schedule.
//!
//! ## Guarantees
//! - One initial attempt plus one retry per schedule entry (1 s, 5 s, 10 s
//!   by default), never more.
//! - An event whose attempts are exhausted is reported failed exactly once
//!   and logged with its id and content; it is not persisted.
//! - Backoff waits and in-flight requests end promptly on cancellation.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let api = PublishingApiClient::builder(cfg.publish_url(), &cfg.publishing_api_key).build()?;
//! let consumer = Arc::new(HttpForwardingConsumer::new(api, cancel.clone()));
//! conduit.subscribe(5, consumer, cancel);
//! ```

use std::future::Future;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::conduit::{DeliveryOutcome, Event, EventHandler};
use crate::error::{ConfigError, DeliveryError};

/// Header carrying the API key on every request.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Waits before the second, third and fourth attempt.
pub const DEFAULT_RETRY_SCHEDULE: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(5),
    Duration::from_secs(10),
];

// ---------------------------------------------------------------------------
// PublishingApi
// ---------------------------------------------------------------------------

/// The `send(content) -> success|failure` capability of the ingestion API.
pub trait PublishingApi: Send + Sync + 'static {
    fn send(&self, content: &str) -> impl Future<Output = Result<(), DeliveryError>> + Send;
}

/// reqwest-backed [`PublishingApi`].
#[derive(Debug, Clone)]
pub struct PublishingApiClient {
    client: reqwest::Client,
    url: String,
}

impl PublishingApiClient {
    /// Start building a client posting to `url` with `api_key`.
    pub fn builder(url: impl Into<String>, api_key: impl Into<String>) -> PublishingApiClientBuilder {
        PublishingApiClientBuilder::new(url, api_key)
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl PublishingApi for PublishingApiClient {
    async fn send(&self, content: &str) -> Result<(), DeliveryError> {
        let resp = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(content.to_owned())
            .send()
            .await
            .map_err(|e| DeliveryError::Transport {
                url: self.url.clone(),
                detail: e.to_string(),
            })?;

        if !resp.status().is_success() {
            return Err(DeliveryError::Status {
                status: resp.status().as_u16(),
                url: self.url.clone(),
            });
        }

        Ok(())
    }
}

/// Builder for [`PublishingApiClient`].
pub struct PublishingApiClientBuilder {
    url: String,
    api_key: String,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl PublishingApiClientBuilder {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Override the TCP connect timeout (default 10 s).
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Override the whole-request timeout (default 30 s).
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// # Errors
    /// [`ConfigError::Invalid`] when the key is not a valid header value,
    /// [`ConfigError::HttpClient`] when the TLS backend cannot initialise.
    pub fn build(self) -> Result<PublishingApiClient, ConfigError> {
        let mut key = HeaderValue::from_str(&self.api_key).map_err(|e| ConfigError::Invalid {
            field: "publishing_api_key",
            detail: e.to_string(),
        })?;
        key.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, key);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(self.connect_timeout)
            .timeout(self.request_timeout)
            .build()
            .map_err(ConfigError::HttpClient)?;

        Ok(PublishingApiClient {
            client,
            url: self.url,
        })
    }
}

// ---------------------------------------------------------------------------
// HttpForwardingConsumer
// ---------------------------------------------------------------------------

/// Drains the conduit into a [`PublishingApi`].
pub struct HttpForwardingConsumer<A> {
    api: A,
    schedule: Vec<Duration>,
    cancel: CancellationToken,
}

impl<A: PublishingApi> HttpForwardingConsumer<A> {
    pub fn new(api: A, cancel: CancellationToken) -> Self {
        Self {
            api,
            schedule: DEFAULT_RETRY_SCHEDULE.to_vec(),
            cancel,
        }
    }

    /// Replace the retry schedule; its length is the number of retries.
    pub fn with_schedule(mut self, schedule: Vec<Duration>) -> Self {
        self.schedule = schedule;
        self
    }

    /// Deliver one event, retrying on the schedule.
    ///
    /// Returns the last attempt's error once the schedule is exhausted.
    pub async fn forward(&self, event: &Event) -> Result<(), DeliveryError> {
        let mut delays = self.schedule.iter();
        let mut attempt: u32 = 1;

        loop {
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(DeliveryError::Cancelled),
                res = self.api.send(&event.content) => res,
            };

            let err = match result {
                Ok(()) => {
                    debug!(event_id = %event.id, attempt, "Event forwarded");
                    return Ok(());
                }
                Err(e) if e.is_retryable() => e,
                Err(e) => return Err(e),
            };

            let Some(delay) = delays.next() else {
                return Err(err);
            };

            warn!(
                event_id = %event.id,
                attempt,
                error = %err,
                retry_in_ms = delay.as_millis() as u64,
                "Event delivery attempt failed"
            );

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(DeliveryError::Cancelled),
                _ = tokio::time::sleep(*delay) => {}
            }
            attempt += 1;
        }
    }
}

impl<A: PublishingApi> EventHandler for HttpForwardingConsumer<A> {
    async fn handle(&self, event: Event) -> DeliveryOutcome {
        match self.forward(&event).await {
            Ok(()) => DeliveryOutcome::Delivered,
            Err(DeliveryError::Cancelled) => {
                warn!(event_id = %event.id, content = %event.content, "Event delivery cancelled by shutdown");
                DeliveryOutcome::Cancelled
            }
            Err(e) => {
                error!(
                    event_id = %event.id,
                    content = %event.content,
                    received_at = %event.received_at,
                    attempts = self.schedule.len() + 1,
                    error = %e,
                    "Event delivery failed permanently"
                );
                DeliveryOutcome::Failed
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
