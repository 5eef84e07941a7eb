//! Stream transport abstraction.
//!
//! The processor relies on consumer-group semantics: a message goes to one
//! consumer in the group and stays pending until acknowledged, so a
//! consumer that dies mid-batch leaves its messages claimable by another.
//! Production runs on Redis Streams; tests run the in-memory transport
//! with the same semantics.

use async_trait::async_trait;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct StreamMessage {
    pub stream: String,

    /// Transport-assigned id, ordered within the stream.
    pub id: String,

    pub fields: Vec<(String, String)>,
}

#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Append to a capped stream; entries beyond `max_len` are trimmed
    /// oldest-first. Returns the assigned entry id.
    async fn append(
        &self,
        stream: &str,
        fields: &[(String, String)],
        max_len: u64,
    ) -> anyhow::Result<String>;

    /// Create the consumer group if missing, with its cursor seeded at
    /// `start_ms` so a cold start replays a bounded window, not the whole
    /// retained history.
    async fn ensure_group(&self, stream: &str, group: &str, start_ms: i64) -> anyhow::Result<()>;

    /// Pull up to `count` messages for this consumer across the given
    /// streams, blocking at most `block`. Never an unbounded wait.
    async fn read_group(
        &self,
        group: &str,
        consumer: &str,
        streams: &[&str],
        count: usize,
        block: Duration,
    ) -> anyhow::Result<Vec<StreamMessage>>;

    async fn ack(&self, stream: &str, group: &str, id: &str) -> anyhow::Result<()>;

    async fn delete(&self, stream: &str, id: &str) -> anyhow::Result<()>;
}
