//! Typed publish side of the event streams.

use metrics::counter;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::constants::streams;
use crate::domain::{BusEvent, EventCategory};

use super::transport::StreamTransport;

#[derive(Clone)]
pub struct EventBus {
    transport: Arc<dyn StreamTransport>,
    max_len: u64,
}

impl EventBus {
    #[must_use]
    pub fn new(transport: Arc<dyn StreamTransport>, max_len: u64) -> Self {
        Self { transport, max_len }
    }

    #[must_use]
    pub const fn stream_for(category: EventCategory) -> &'static str {
        match category {
            EventCategory::Agent => streams::AGENT_EVENTS,
            EventCategory::Business => streams::BUSINESS_EVENTS,
        }
    }

    pub async fn publish(&self, event: &BusEvent) -> anyhow::Result<String> {
        let stream = Self::stream_for(event.category);
        let id = self
            .transport
            .append(stream, &event.to_wire(), self.max_len)
            .await?;
        counter!("vendra_events_published_total", "stream" => stream).increment(1);
        debug!(stream, event_type = %event.event_type, "Event published");
        Ok(id)
    }

    /// Fire-and-forget: event emission must never fail a business flow.
    pub async fn emit(&self, event: BusEvent) {
        if let Err(e) = self.publish(&event).await {
            warn!(event_type = %event.event_type, "Failed to publish event: {e}");
        }
    }
}
