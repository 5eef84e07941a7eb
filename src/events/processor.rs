//! Background consumer loop.
//!
//! One consumer per process; horizontal scale comes from running more
//! processes in the same consumer group under distinct consumer names.
//! Delivery is at-least-once: the idempotent persist and the terminal
//! checks in the services are what make replay safe, never an assumption
//! about the transport.

use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::config::EventsConfig;
use crate::constants::streams;
use crate::db::Store;
use crate::domain::{BusEvent, NormalizedEvent};
use crate::services::{BadgeService, ChallengeService};

use super::transport::{StreamMessage, StreamTransport};

pub struct EventProcessor {
    transport: Arc<dyn StreamTransport>,
    store: Store,
    challenges: Arc<ChallengeService>,
    badges: Arc<BadgeService>,
    config: EventsConfig,
    consumer_name: String,
    running: Arc<RwLock<bool>>,
}

impl EventProcessor {
    #[must_use]
    pub fn new(
        transport: Arc<dyn StreamTransport>,
        store: Store,
        challenges: Arc<ChallengeService>,
        badges: Arc<BadgeService>,
        config: EventsConfig,
        consumer_name: String,
    ) -> Self {
        Self {
            transport,
            store,
            challenges,
            badges,
            config,
            consumer_name,
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Run until [`stop`](Self::stop). The stop check is cooperative, once
    /// per iteration; the bounded poll keeps each iteration short.
    pub async fn start(&self) -> anyhow::Result<()> {
        self.ensure_groups().await?;

        *self.running.write().await = true;
        info!(
            consumer = %self.consumer_name,
            group = %self.config.consumer_group,
            "Event processor started"
        );

        let base_backoff = Duration::from_millis(self.config.poll_backoff_base_ms);
        let max_backoff = Duration::from_millis(self.config.poll_backoff_max_ms);
        let block = Duration::from_millis(self.config.block_timeout_ms);
        let mut backoff = base_backoff;

        loop {
            if !*self.running.read().await {
                break;
            }

            match self
                .transport
                .read_group(
                    &self.config.consumer_group,
                    &self.consumer_name,
                    streams::ALL,
                    self.config.batch_size,
                    block,
                )
                .await
            {
                Ok(batch) => {
                    backoff = base_backoff;
                    for message in batch {
                        self.process_message(&message).await;
                    }
                }
                Err(e) => {
                    // Transport blip: never crash the process, back off and
                    // retry the whole poll.
                    warn!("Event stream poll failed, backing off: {e}");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(max_backoff);
                }
            }
        }

        info!("Event processor stopped");
        Ok(())
    }

    async fn ensure_groups(&self) -> anyhow::Result<()> {
        let lookback_ms = self.config.lookback_minutes * 60 * 1000;
        let start_ms = chrono::Utc::now().timestamp_millis() - lookback_ms;

        for stream in streams::ALL {
            self.transport
                .ensure_group(stream, &self.config.consumer_group, start_ms)
                .await?;
        }
        Ok(())
    }

    /// Process a single delivery end to end. Only a fully handled (or
    /// undecodable) message is acked and deleted; a processing failure
    /// leaves it pending for a later claim by this or another consumer.
    pub async fn process_message(&self, message: &StreamMessage) {
        match BusEvent::from_wire(&message.fields) {
            Err(e) => {
                // A permanently malformed message must not block the stream
                // forever. Retire it without side effects and log the loss.
                warn!(
                    stream = %message.stream,
                    id = %message.id,
                    "Dropping undecodable event (data loss): {e}"
                );
                counter!("vendra_events_dropped_total").increment(1);
                self.retire(message).await;
            }
            Ok(event) => {
                let normalized = NormalizedEvent::from_bus(&event);
                match self.handle(&normalized).await {
                    Ok(()) => {
                        counter!("vendra_events_processed_total").increment(1);
                        self.retire(message).await;
                    }
                    Err(e) => {
                        error!(
                            stream = %message.stream,
                            id = %message.id,
                            "Event processing failed, left unacked for retry: {e}"
                        );
                    }
                }
            }
        }
    }

    async fn handle(&self, event: &NormalizedEvent) -> anyhow::Result<()> {
        let inserted = self.store.insert_event_dedup(event).await?;
        if !inserted {
            counter!("vendra_events_deduplicated_total").increment(1);
            debug!(external_id = %event.external_id, "Duplicate event delivery");
        }

        // Rule failures are contained per-definition inside the services;
        // an error surfacing here is a store-level problem worth a retry.
        self.challenges.process_event(event).await?;
        self.badges.process_event(event).await?;
        Ok(())
    }

    /// Ack AND delete. Acking alone can leave a trimmed-but-unacked
    /// backlog; deleting without acking can double-count in some
    /// consumer-group implementations. Both, always.
    async fn retire(&self, message: &StreamMessage) {
        if let Err(e) = self
            .transport
            .ack(&message.stream, &self.config.consumer_group, &message.id)
            .await
        {
            warn!(id = %message.id, "Failed to ack message: {e}");
        }
        if let Err(e) = self.transport.delete(&message.stream, &message.id).await {
            warn!(id = %message.id, "Failed to delete message: {e}");
        }
    }

    pub async fn stop(&self) {
        info!("Stopping event processor...");
        *self.running.write().await = false;
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}
