//! # totalip-relay
//!
//! Relays a line-oriented TCP telemetry feed into an HTTP ingestion API.
//!
//! ```text
//!  feed ──TCP──▶ Listener ──publish──▶ EventConduit ──dispatch──▶ HttpForwardingConsumer ──POST──▶ API
//!                  ▲                                                   │
//!      WorkingHoursGate + ResilienceController                 retry schedule 1s/5s/10s
//! ```
//!
//! The listener side never waits on the network call: it only waits for room
//! in the bounded conduit. Delivery runs with a cap on concurrency and its
//! own retry schedule.

pub mod cli;
pub mod conduit;
pub mod config;
pub mod error;
pub mod forwarder;
pub mod gate;
pub mod listener;
pub mod resilience;
pub mod socket;

pub use conduit::{DeliveryOutcome, Event, EventConduit, EventHandler, StatsSnapshot};
pub use config::BridgeConfig;
pub use error::{BridgeError, ConduitClosed, ConfigError, DeliveryError};
pub use forwarder::{HttpForwardingConsumer, PublishingApi, PublishingApiClient};
pub use gate::{Clock, LocalClock, WorkingHours, WorkingHoursGate};
pub use listener::Listener;
