//! # Event Conduit
//!
//! ## Responsibility
//! Decouple the socket reader from HTTP delivery with an ordered, bounded,
//! in-process queue and dispatch queued events to a handler with a cap on
//! simultaneous deliveries.
//!
//! ## Guarantees
//! - Ordered: events are offered to handlers in publish order.
//! - Lossless: a full buffer makes `publish` wait (backpressure); events are
//!   never dropped to make room.
//! - Atomic dequeue: any number of subscriptions may share one conduit, each
//!   event is handed to exactly one of them.
//! - Draining close: after [`EventConduit::close`] new events are refused
//!   and subscriptions finish once the buffer is empty.
//!
//! ## NOT Responsible For
//! - Durability. Buffered events are lost if the process dies.
//! - Retrying deliveries (that is the consumer's job).

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::ConduitClosed;
use crate::socket::is_content_line;

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// One record received from the feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Correlates the receive log line with the delivery log lines.
    pub id: Uuid,
    /// The line exactly as read, never blank.
    pub content: String,
    pub received_at: DateTime<Utc>,
}

impl Event {
    /// Build an event from a received line; `None` for blank lines.
    pub fn from_line(line: impl Into<String>) -> Option<Self> {
        let content = line.into();
        if !is_content_line(&content) {
            return None;
        }
        Some(Self {
            id: Uuid::new_v4(),
            content,
            received_at: Utc::now(),
        })
    }
}

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

/// Final result of handling one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    Failed,
    Cancelled,
}

/// Consumer side of the conduit.
pub trait EventHandler: Send + Sync + 'static {
    fn handle(&self, event: Event) -> impl Future<Output = DeliveryOutcome> + Send;
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct ConduitStats {
    published: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
}

/// Point-in-time copy of [`ConduitStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub published: u64,
    pub delivered: u64,
    pub failed: u64,
    pub cancelled: u64,
}

impl ConduitStats {
    fn record(&self, outcome: DeliveryOutcome) {
        let counter = match outcome {
            DeliveryOutcome::Delivered => &self.delivered,
            DeliveryOutcome::Failed => &self.failed,
            DeliveryOutcome::Cancelled => &self.cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
        }
    }
}

// ---------------------------------------------------------------------------
// EventConduit
// ---------------------------------------------------------------------------

/// The conduit. Clone freely; all clones share one queue.
#[derive(Clone)]
pub struct EventConduit {
    tx: mpsc::Sender<Event>,
    rx: Arc<Mutex<mpsc::Receiver<Event>>>,
    closed: CancellationToken,
    stats: Arc<ConduitStats>,
}

impl EventConduit {
    /// Create a conduit buffering at most `capacity` undelivered events.
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            closed: CancellationToken::new(),
            stats: Arc::new(ConduitStats::default()),
        }
    }

    /// Append an event, waiting for room when the buffer is full.
    pub async fn publish(&self, event: Event) -> Result<(), ConduitClosed> {
        if self.is_closed() {
            return Err(ConduitClosed);
        }
        if self.tx.capacity() == 0 {
            debug!(capacity = self.tx.max_capacity(), "Conduit full, waiting for room");
        }
        self.tx.send(event).await.map_err(|_| ConduitClosed)?;
        self.stats.published.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Stop accepting events. Already buffered events are still dispatched.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Events buffered and not yet handed to a handler.
    pub fn depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Dispatch events to `handler` with at most `max_concurrent` deliveries
    /// in flight.
    ///
    /// The task ends when the conduit is closed and drained, or when
    /// `cancel` fires; either way it waits for in-flight deliveries first.
    pub fn subscribe<H: EventHandler>(
        &self,
        max_concurrent: usize,
        handler: Arc<H>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(dispatch(self.clone(), max_concurrent.max(1), handler, cancel))
    }

    /// Close the conduit and give `dispatcher` up to `grace` to deliver what
    /// is buffered, then fire `cancel` and wait for it to stop.
    ///
    /// Returns the dispatcher's join error if it panicked.
    pub async fn close_and_drain(
        &self,
        mut dispatcher: JoinHandle<()>,
        grace: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), JoinError> {
        self.close();
        info!(
            pending = self.depth(),
            grace_secs = grace.as_secs(),
            "Draining pending deliveries"
        );
        let waited = tokio::time::timeout(grace, &mut dispatcher).await;
        match waited {
            Ok(joined) => joined,
            Err(_) => {
                warn!(pending = self.depth(), "Grace period elapsed, cancelling deliveries");
                cancel.cancel();
                dispatcher.await
            }
        }
    }

    /// Remove and return everything currently buffered.
    #[cfg(test)]
    pub(crate) async fn take_buffered(&self) -> Vec<Event> {
        let mut rx = self.rx.lock().await;
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    async fn next_event(&self) -> Option<Event> {
        let mut rx = self.rx.lock().await;
        tokio::select! {
            biased;
            ev = rx.recv() => ev,
            _ = self.closed.cancelled() => {
                rx.close();
                rx.recv().await
            }
        }
    }
}

async fn dispatch<H: EventHandler>(
    conduit: EventConduit,
    max_concurrent: usize,
    handler: Arc<H>,
    cancel: CancellationToken,
) {
    let limit = Arc::new(Semaphore::new(max_concurrent));
    let mut in_flight = JoinSet::new();

    loop {
        // Take the slot before dequeuing so that with a limit of one the next
        // event is not pulled until the previous delivery finished.
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            permit = limit.clone().acquire_owned() => match permit {
                Ok(p) => p,
                Err(_) => break,
            },
        };

        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            ev = conduit.next_event() => match ev {
                Some(ev) => ev,
                None => break,
            },
        };

        let handler = Arc::clone(&handler);
        let stats = Arc::clone(&conduit.stats);
        in_flight.spawn(async move {
            let outcome = handler.handle(event).await;
            stats.record(outcome);
            drop(permit);
        });

        while let Some(res) = in_flight.try_join_next() {
            if let Err(e) = res {
                error!(error = %e, "Delivery task panicked");
            }
        }
    }

    while let Some(res) = in_flight.join_next().await {
        if let Err(e) = res {
            error!(error = %e, "Delivery task panicked");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    /// Records contents in completion order; optionally sleeps per event.
    #[derive(Default)]
    struct Recorder {
        seen: StdMutex<Vec<String>>,
        delay: Option<Duration>,
        active: AtomicU64,
        peak: AtomicU64,
    }

    impl EventHandler for Recorder {
        fn handle(&self, event: Event) -> impl Future<Output = DeliveryOutcome> + Send {
            async move {
                let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                if let Some(d) = self.delay {
                    tokio::time::sleep(d).await;
                }
                self.seen.lock().unwrap().push(event.content);
                self.active.fetch_sub(1, Ordering::SeqCst);
                DeliveryOutcome::Delivered
            }
        }
    }

    fn ev(s: &str) -> Event {
        Event::from_line(s).unwrap()
    }

    #[test]
    fn blank_line_builds_no_event() {
        assert!(Event::from_line("").is_none());
        assert!(Event::from_line(" \t ").is_none());
    }

    #[test]
    fn event_keeps_content_verbatim() {
        let e = ev("  42;IN;2024 ");
        assert_eq!(e.content, "  42;IN;2024 ");
    }

    #[test]
    fn events_get_distinct_ids() {
        assert_ne!(ev("a").id, ev("a").id);
    }

    #[tokio::test]
    async fn publish_after_close_is_refused() {
        let conduit = EventConduit::new(4);
        conduit.close();
        assert_eq!(conduit.publish(ev("x")).await, Err(ConduitClosed));
        assert_eq!(conduit.stats().published, 0);
    }

    #[tokio::test]
    async fn depth_tracks_buffered_events() {
        let conduit = EventConduit::new(4);
        conduit.publish(ev("a")).await.unwrap();
        conduit.publish(ev("b")).await.unwrap();
        assert_eq!(conduit.depth(), 2);
    }

    #[tokio::test]
    async fn full_buffer_applies_backpressure() {
        let conduit = EventConduit::new(1);
        conduit.publish(ev("a")).await.unwrap();
        let blocked = tokio::time::timeout(Duration::from_millis(50), conduit.publish(ev("b"))).await;
        assert!(blocked.is_err(), "second publish should wait for room");
    }

    #[tokio::test]
    async fn single_slot_preserves_publish_order() {
        let conduit = EventConduit::new(64);
        let handler = Arc::new(Recorder {
            delay: Some(Duration::from_millis(1)),
            ..Default::default()
        });
        let expected: Vec<String> = (0..20).map(|i| format!("line-{i}")).collect();
        for line in &expected {
            conduit.publish(ev(line)).await.unwrap();
        }
        conduit.close();

        conduit
            .subscribe(1, handler.clone(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(*handler.seen.lock().unwrap(), expected);
        assert_eq!(handler.peak.load(Ordering::SeqCst), 1);
        let stats = conduit.stats();
        assert_eq!(stats.published, 20);
        assert_eq!(stats.delivered, 20);
    }

    #[tokio::test]
    async fn concurrent_slots_deliver_everything_once() {
        let conduit = EventConduit::new(8);
        let handler = Arc::new(Recorder {
            delay: Some(Duration::from_millis(5)),
            ..Default::default()
        });
        let task = conduit.subscribe(4, handler.clone(), CancellationToken::new());

        for i in 0..50 {
            conduit.publish(ev(&format!("e{i}"))).await.unwrap();
        }
        conduit.close();
        task.await.unwrap();

        let seen = handler.seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 50);
        let unique: HashSet<_> = seen.iter().collect();
        assert_eq!(unique.len(), 50);
        let peak = handler.peak.load(Ordering::SeqCst);
        assert!(peak <= 4, "peak concurrency {peak}");
        assert!(peak > 1, "expected some parallelism, got {peak}");
    }

    #[tokio::test]
    async fn two_subscriptions_share_the_queue() {
        let conduit = EventConduit::new(64);
        let a = Arc::new(Recorder::default());
        let b = Arc::new(Recorder::default());
        for i in 0..30 {
            conduit.publish(ev(&format!("e{i}"))).await.unwrap();
        }
        let ta = conduit.subscribe(2, a.clone(), CancellationToken::new());
        let tb = conduit.subscribe(2, b.clone(), CancellationToken::new());
        conduit.close();
        ta.await.unwrap();
        tb.await.unwrap();

        let mut all = a.seen.lock().unwrap().clone();
        all.extend(b.seen.lock().unwrap().iter().cloned());
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 30);
    }

    #[tokio::test]
    async fn cancel_stops_dispatch() {
        let conduit = EventConduit::new(8);
        let cancel = CancellationToken::new();
        let task = conduit.subscribe(1, Arc::new(Recorder::default()), cancel.clone());
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("dispatcher should stop on cancel")
            .unwrap();
    }

    /// Holds every event until its token fires.
    struct Stalled(CancellationToken);

    impl EventHandler for Stalled {
        async fn handle(&self, _event: Event) -> DeliveryOutcome {
            self.0.cancelled().await;
            DeliveryOutcome::Cancelled
        }
    }

    #[tokio::test]
    async fn close_and_drain_delivers_buffered_events() {
        let conduit = EventConduit::new(8);
        let handler = Arc::new(Recorder::default());
        for i in 0..5 {
            conduit.publish(ev(&format!("e{i}"))).await.unwrap();
        }
        let cancel = CancellationToken::new();
        let task = conduit.subscribe(2, handler.clone(), cancel.clone());

        conduit
            .close_and_drain(task, Duration::from_secs(5), &cancel)
            .await
            .unwrap();

        assert!(conduit.is_closed());
        assert!(!cancel.is_cancelled());
        assert_eq!(conduit.stats().delivered, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn close_and_drain_cancels_after_grace() {
        let conduit = EventConduit::new(8);
        let cancel = CancellationToken::new();
        conduit.publish(ev("stuck")).await.unwrap();
        let task = conduit.subscribe(1, Arc::new(Stalled(cancel.clone())), cancel.clone());

        let started = tokio::time::Instant::now();
        conduit
            .close_and_drain(task, Duration::from_secs(15), &cancel)
            .await
            .unwrap();

        assert_eq!(started.elapsed(), Duration::from_secs(15));
        assert!(cancel.is_cancelled());
        assert_eq!(conduit.stats().cancelled, 1);
    }

    #[tokio::test]
    async fn close_and_drain_reports_a_panicked_dispatcher() {
        let conduit = EventConduit::new(1);
        let task = tokio::spawn(async { panic!("dispatcher blew up") });
        let err = conduit
            .close_and_drain(task, Duration::from_secs(1), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_panic());
    }
}
