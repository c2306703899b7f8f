//! # Listener
//!
//! ## Responsibility
//! Own the socket side of the bridge: one listen cycle at a time resolves the
//! feed host, connects, reads lines until the peer closes, the idle timeout
//! expires or shutdown is requested, and publishes each line to the
//! [`EventConduit`]. The outer loop runs cycles under the
//! [`ResilienceController`], gated by working hours when enforced.
//!
//! ## Guarantees
//! - At most one connection exists at any time; it is dropped on every exit
//!   path of the cycle.
//! - Idle timeout, normal end of stream and cancellation complete a cycle
//!   successfully; every other error is returned to the controller.
//! - The reader never waits for delivery, only for room in the conduit.

use std::time::Duration;

use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::conduit::{Event, EventConduit};
use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::gate::{Clock, WorkingHoursGate};
use crate::resilience::{ResilienceConfig, ResilienceController};
use crate::socket::{open, resolve, SocketLineReader};

/// Runs listen cycles against one feed and publishes into one conduit.
pub struct Listener {
    host: String,
    port: u16,
    idle_timeout: Duration,
    conduit: EventConduit,
}

impl Listener {
    pub fn new(host: impl Into<String>, port: u16, idle_timeout: Duration, conduit: EventConduit) -> Self {
        Self {
            host: host.into(),
            port,
            idle_timeout,
            conduit,
        }
    }

    pub fn from_config(cfg: &BridgeConfig, conduit: EventConduit) -> Self {
        Self::new(
            cfg.socket_server_host.clone(),
            cfg.socket_server_port,
            cfg.receive_timeout,
            conduit,
        )
    }

    /// One resolve-connect-read cycle.
    ///
    /// Returns `Ok(())` on end of stream, idle timeout and cancellation.
    pub async fn run_cycle(&self, cancel: CancellationToken) -> Result<(), BridgeError> {
        let host = self.host.as_str();
        let port = self.port;

        match self.listen(&cancel).await {
            Ok(()) => {
                info!(host, port, "Socket server closed the connection");
                Ok(())
            }
            Err(BridgeError::IdleTimeout(idle)) => {
                info!(host, port, idle_secs = idle.as_secs(), "No data received within the idle timeout, disconnecting");
                Ok(())
            }
            Err(BridgeError::Cancelled) => {
                info!(host, port, "Operation cancelled");
                Ok(())
            }
            Err(e @ BridgeError::UnresolvedHost { .. }) => {
                error!(host, error = %e, "Unable to resolve server host");
                Err(e)
            }
            Err(e @ BridgeError::Connection { .. }) => {
                error!(host, port, error = %e, "Unable to connect to socket server");
                Err(e)
            }
            Err(e) => {
                error!(host, port, error = %e, "Unexpected error in listen cycle");
                Err(e)
            }
        }
    }

    async fn listen(&self, cancel: &CancellationToken) -> Result<(), BridgeError> {
        let endpoint = resolve(&self.host, self.port, cancel).await?;
        let stream = open(&self.host, endpoint, cancel).await?;
        info!(
            address = %endpoint.addr.ip(),
            port = endpoint.addr.port(),
            "Connected to server"
        );

        let lines = SocketLineReader::new(stream, self.idle_timeout).into_lines(cancel.clone());
        tokio::pin!(lines);

        while let Some(line) = lines.next().await {
            let Some(event) = Event::from_line(line?) else {
                continue;
            };
            info!(event_id = %event.id, content = %event.content, "Data received");

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(BridgeError::Cancelled),
                res = self.conduit.publish(event) => res?,
            }
        }

        Ok(())
    }

    /// Run cycles until `cancel` fires.
    ///
    /// With a gate, one cycle runs per in-window tick. Without one, a new
    /// cycle starts as soon as the previous one completes.
    pub async fn run<C: Clock>(
        &self,
        gate: Option<WorkingHoursGate<C>>,
        resilience: ResilienceConfig,
        cancel: CancellationToken,
    ) {
        let mut controller = ResilienceController::new(resilience);
        let this = self;
        let circuit = controller.breaker().config();
        info!(
            host = %self.host,
            port = self.port,
            idle_secs = self.idle_timeout.as_secs(),
            failure_ratio = circuit.failure_ratio,
            break_secs = circuit.break_duration.as_secs(),
            "Listener configured"
        );

        match gate {
            Some(mut gate) => {
                info!(
                    window = %gate.hours(),
                    tick_secs = gate.interval().as_secs(),
                    "Listener started with working hours"
                );
                while gate.wait_for_window(&cancel).await {
                    controller.execute(&cancel, move |token| this.run_cycle(token)).await;
                }
            }
            None => {
                info!("Listener started without working hours");
                while !cancel.is_cancelled() {
                    controller.execute(&cancel, move |token| this.run_cycle(token)).await;
                }
            }
        }

        info!(
            attempts = controller.attempts(),
            circuit_trips = controller.breaker().trips(),
            "Listener stopped"
        );
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
