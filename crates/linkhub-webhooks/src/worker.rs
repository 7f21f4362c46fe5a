//! Background delivery worker.
//!
//! A single supervision loop multiplexes three signals: incoming lifecycle
//! events from the broadcast channel, a periodic poll for deliveries whose
//! backoff has elapsed, and shutdown. Every delivery attempt runs as a task
//! in one bounded [`JoinSet`]; the loop stops accepting new work while the
//! set is full, which backpressures both fresh events and retries through
//! the same gate. On shutdown the loop drains in-flight deliveries before
//! returning, so a stopping process does not strand half-sent attempts.

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::delivery::DeliveryService;
use crate::events::LifecycleEvent;

/// Upper bound on concurrently running delivery attempts.
const DEFAULT_MAX_IN_FLIGHT: usize = 32;

/// How often the retry backlog is polled.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);

/// Due deliveries fetched per poll.
const DEFAULT_RETRY_BATCH: i64 = 64;

/// Background worker that delivers events and drives retries.
pub struct WebhookWorker {
    delivery_service: DeliveryService,
    event_rx: Option<broadcast::Receiver<LifecycleEvent>>,
    shutdown: CancellationToken,
    max_in_flight: usize,
    poll_interval: Duration,
    retry_batch: i64,
}

impl WebhookWorker {
    /// Create a worker with the default concurrency and poll settings.
    pub fn new(
        delivery_service: DeliveryService,
        event_rx: broadcast::Receiver<LifecycleEvent>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            delivery_service,
            event_rx: Some(event_rx),
            shutdown,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            retry_batch: DEFAULT_RETRY_BATCH,
        }
    }

    /// Cap the number of concurrent delivery attempts.
    #[must_use]
    pub fn with_max_in_flight(mut self, max: usize) -> Self {
        self.max_in_flight = max.max(1);
        self
    }

    /// Set the retry poll cadence.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set how many due deliveries each poll picks up.
    #[must_use]
    pub fn with_retry_batch(mut self, batch: i64) -> Self {
        self.retry_batch = batch.max(1);
        self
    }

    /// Run until cancelled, then drain in-flight deliveries.
    pub async fn run(mut self) {
        tracing::info!(
            target: "webhook_delivery",
            max_in_flight = self.max_in_flight,
            poll_interval_secs = self.poll_interval.as_secs(),
            "Webhook delivery worker started"
        );

        let mut in_flight: JoinSet<()> = JoinSet::new();
        let mut poll = tokio::time::interval(self.poll_interval);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            // Backpressure gate: no new work while the set is full. Events
            // queue in the broadcast channel meanwhile; an overflow there
            // surfaces as a lag warning below.
            while in_flight.len() >= self.max_in_flight {
                reap(in_flight.join_next().await);
            }

            // Evaluated before the select borrows the set mutably; also keeps
            // join_next from resolving instantly (None) on an empty set.
            let reap_ready = !in_flight.is_empty();

            tokio::select! {
                _ = self.shutdown.cancelled() => break,

                event = recv_or_park(&mut self.event_rx) => {
                    match event {
                        Ok(event) => {
                            tracing::debug!(
                                target: "webhook_delivery",
                                event_id = %event.event_id,
                                event_type = %event.event_type,
                                project_id = %event.project_id,
                                "Queueing lifecycle event for delivery"
                            );
                            let service = self.delivery_service.clone();
                            in_flight.spawn(async move {
                                service.deliver_event(&event).await;
                            });
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            // Lagged events never got delivery rows, so they
                            // are lost to webhooks entirely; surface loudly.
                            tracing::warn!(
                                target: "webhook_delivery",
                                skipped,
                                "Event channel overflowed; increase capacity or in-flight cap"
                            );
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            tracing::info!(
                                target: "webhook_delivery",
                                "Event channel closed; continuing with retries only"
                            );
                            // Park the receiver branch; retries keep running
                            // until shutdown.
                            self.event_rx = None;
                        }
                    }
                }

                _ = poll.tick() => {
                    self.spawn_due_retries(&mut in_flight).await;
                }

                // Keep reaping finished attempts so join errors are logged
                // promptly rather than at the next full-set stall.
                joined = in_flight.join_next(), if reap_ready => {
                    reap(joined);
                }
            }
        }

        tracing::info!(
            target: "webhook_delivery",
            in_flight = in_flight.len(),
            "Webhook worker draining before shutdown"
        );
        while let Some(joined) = in_flight.join_next().await {
            reap(Some(joined));
        }
        tracing::info!(target: "webhook_delivery", "Webhook delivery worker stopped");
    }

    /// Fetch due deliveries and queue them onto the join set.
    async fn spawn_due_retries(&self, in_flight: &mut JoinSet<()>) {
        let budget = self.max_in_flight.saturating_sub(in_flight.len());
        if budget == 0 {
            return;
        }
        let limit = self.retry_batch.min(i64::try_from(budget).unwrap_or(self.retry_batch));

        let due = match linkhub_db::models::WebhookDelivery::find_due(
            self.delivery_service.pool(),
            limit,
        )
        .await
        {
            Ok(due) => due,
            Err(e) => {
                tracing::error!(
                    target: "webhook_delivery",
                    error = %e,
                    "Failed to query due retries"
                );
                return;
            }
        };

        if due.is_empty() {
            return;
        }

        tracing::info!(
            target: "webhook_delivery",
            count = due.len(),
            "Queueing due webhook retries"
        );

        for delivery in due {
            let service = self.delivery_service.clone();
            in_flight.spawn(async move {
                service.process_retry(&delivery).await;
            });
        }
    }
}

/// Receive from the event channel, or park forever once it has closed.
async fn recv_or_park(
    event_rx: &mut Option<broadcast::Receiver<LifecycleEvent>>,
) -> Result<LifecycleEvent, broadcast::error::RecvError> {
    match event_rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Log a panicked delivery task; completed tasks need nothing.
fn reap(joined: Option<Result<(), tokio::task::JoinError>>) {
    if let Some(Err(e)) = joined {
        tracing::error!(
            target: "webhook_delivery",
            error = %e,
            "Delivery task panicked"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventPublisher;

    fn worker_against(rx: broadcast::Receiver<LifecycleEvent>) -> WebhookWorker {
        // A lazily connecting pool lets worker plumbing be exercised without
        // a live database; any stray query fails fast instead of hanging.
        let pool = sqlx::postgres::PgPoolOptions::new()
            .acquire_timeout(Duration::from_millis(100))
            .connect_lazy("postgres://localhost/linkhub_test")
            .expect("lazy pool");
        let hex: String = [0x42u8; 32].iter().map(|b| format!("{b:02x}")).collect();
        let keyring =
            std::sync::Arc::new(linkhub_crypto::KeyRing::from_hex(&hex).expect("keyring"));
        WebhookWorker::new(
            DeliveryService::new(pool, keyring),
            rx,
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_builders_clamp_to_sane_minimums() {
        let (_publisher, rx) = EventPublisher::new(4);
        let worker = worker_against(rx)
            .with_max_in_flight(0)
            .with_retry_batch(0)
            .with_poll_interval(Duration::from_millis(250));

        assert_eq!(worker.max_in_flight, 1);
        assert_eq!(worker.retry_batch, 1);
        assert_eq!(worker.poll_interval, Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_recv_or_park_reads_published_events() {
        let (publisher, rx) = EventPublisher::new(4);
        let mut slot = Some(rx);

        publisher.publish(LifecycleEvent::new(
            crate::events::EventType::ConnectionCreated,
            uuid::Uuid::new_v4(),
            serde_json::json!({}),
        ));

        let received = recv_or_park(&mut slot).await.unwrap();
        assert_eq!(
            received.event_type,
            crate::events::EventType::ConnectionCreated
        );
    }

    #[tokio::test]
    async fn test_recv_or_park_parks_on_closed_channel() {
        let mut slot: Option<broadcast::Receiver<LifecycleEvent>> = None;

        // A parked branch must never resolve; give it a moment to try.
        let outcome =
            tokio::time::timeout(Duration::from_millis(50), recv_or_park(&mut slot)).await;
        assert!(outcome.is_err(), "parked receiver should not resolve");
    }

    #[tokio::test]
    async fn test_worker_stops_on_cancellation() {
        let (_publisher, rx) = EventPublisher::new(4);
        let shutdown = CancellationToken::new();

        let mut worker = worker_against(rx).with_poll_interval(Duration::from_secs(3600));
        worker.shutdown = shutdown.clone();

        let handle = tokio::spawn(worker.run());
        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("worker should stop promptly")
            .expect("worker task should not panic");
    }
}
