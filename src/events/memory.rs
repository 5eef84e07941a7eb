//! In-memory stream transport mirroring the consumer-group semantics the
//! processor depends on: per-group delivery cursors, pending entries that
//! survive until acknowledged, and idle-claim re-delivery. Used by tests
//! and local development without a Redis.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify};

use super::transport::{StreamMessage, StreamTransport};

#[derive(Clone)]
struct Entry {
    ms: i64,
    seq: u64,
    fields: Vec<(String, String)>,
}

impl Entry {
    fn id(&self) -> String {
        format!("{}-{}", self.ms, self.seq)
    }
}

struct Pending {
    delivered_at: Instant,
}

#[derive(Default)]
struct GroupState {
    /// Last delivered (ms, seq); new reads start strictly after it.
    cursor: (i64, u64),
    pending: HashMap<String, Pending>,
}

#[derive(Default)]
struct StreamState {
    entries: VecDeque<Entry>,
    last_ms: i64,
    last_seq: u64,
    groups: HashMap<String, GroupState>,
}

pub struct InMemoryStreamTransport {
    streams: Mutex<HashMap<String, StreamState>>,
    notify: Notify,
    /// Pending entries idle longer than this become claimable again,
    /// standing in for a consumer that died without acknowledging.
    claim_idle: Duration,
}

impl Default for InMemoryStreamTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStreamTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::with_claim_idle(Duration::from_secs(30))
    }

    #[must_use]
    pub fn with_claim_idle(claim_idle: Duration) -> Self {
        Self {
            streams: Mutex::new(HashMap::new()),
            notify: Notify::new(),
            claim_idle,
        }
    }

    /// Raw entry count, for tests asserting on trim behavior.
    pub async fn len(&self, stream: &str) -> usize {
        let streams = self.streams.lock().await;
        streams.get(stream).map_or(0, |s| s.entries.len())
    }

    pub async fn is_empty(&self, stream: &str) -> bool {
        self.len(stream).await == 0
    }
}

#[async_trait]
impl StreamTransport for InMemoryStreamTransport {
    async fn append(
        &self,
        stream: &str,
        fields: &[(String, String)],
        max_len: u64,
    ) -> anyhow::Result<String> {
        let mut streams = self.streams.lock().await;
        let state = streams.entry(stream.to_string()).or_default();

        let now_ms = chrono::Utc::now().timestamp_millis();
        let (ms, seq) = if now_ms > state.last_ms {
            (now_ms, 0)
        } else {
            (state.last_ms, state.last_seq + 1)
        };
        state.last_ms = ms;
        state.last_seq = seq;

        let entry = Entry {
            ms,
            seq,
            fields: fields.to_vec(),
        };
        let id = entry.id();
        state.entries.push_back(entry);

        while state.entries.len() as u64 > max_len {
            state.entries.pop_front();
        }

        drop(streams);
        self.notify.notify_waiters();
        Ok(id)
    }

    async fn ensure_group(&self, stream: &str, group: &str, start_ms: i64) -> anyhow::Result<()> {
        let mut streams = self.streams.lock().await;
        let state = streams.entry(stream.to_string()).or_default();
        state.groups.entry(group.to_string()).or_insert(GroupState {
            // Seed strictly below start_ms so entries at start_ms deliver.
            cursor: (start_ms - 1, u64::MAX),
            pending: HashMap::new(),
        });
        Ok(())
    }

    async fn read_group(
        &self,
        group: &str,
        consumer: &str,
        streams: &[&str],
        count: usize,
        block: Duration,
    ) -> anyhow::Result<Vec<StreamMessage>> {
        let _ = consumer;
        let deadline = Instant::now() + block;

        loop {
            let mut collected = Vec::new();

            {
                let mut all = self.streams.lock().await;
                for stream in streams {
                    let Some(state) = all.get_mut(*stream) else {
                        continue;
                    };
                    let Some(group_state) = state.groups.get_mut(group) else {
                        continue;
                    };

                    // Reclaim pending entries whose consumer went quiet.
                    let stale: Vec<String> = group_state
                        .pending
                        .iter()
                        .filter(|(_, p)| p.delivered_at.elapsed() >= self.claim_idle)
                        .map(|(id, _)| id.clone())
                        .collect();
                    for id in stale {
                        if collected.len() >= count {
                            break;
                        }
                        if let Some(entry) = state.entries.iter().find(|e| e.id() == id) {
                            group_state.pending.insert(
                                id.clone(),
                                Pending {
                                    delivered_at: Instant::now(),
                                },
                            );
                            collected.push(StreamMessage {
                                stream: (*stream).to_string(),
                                id,
                                fields: entry.fields.clone(),
                            });
                        } else {
                            // Entry was deleted out from under the PEL.
                            group_state.pending.remove(&id);
                        }
                    }

                    // Fresh entries past the group's cursor.
                    let fresh: Vec<Entry> = state
                        .entries
                        .iter()
                        .filter(|e| (e.ms, e.seq) > group_state.cursor)
                        .take(count.saturating_sub(collected.len()))
                        .cloned()
                        .collect();
                    for entry in fresh {
                        group_state.cursor = (entry.ms, entry.seq);
                        group_state.pending.insert(
                            entry.id(),
                            Pending {
                                delivered_at: Instant::now(),
                            },
                        );
                        collected.push(StreamMessage {
                            stream: (*stream).to_string(),
                            id: entry.id(),
                            fields: entry.fields,
                        });
                    }
                }
            }

            if !collected.is_empty() {
                return Ok(collected);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(Vec::new());
            }

            tokio::select! {
                () = self.notify.notified() => {}
                () = tokio::time::sleep(remaining) => return Ok(Vec::new()),
            }
        }
    }

    async fn ack(&self, stream: &str, group: &str, id: &str) -> anyhow::Result<()> {
        let mut streams = self.streams.lock().await;
        if let Some(state) = streams.get_mut(stream)
            && let Some(group_state) = state.groups.get_mut(group)
        {
            group_state.pending.remove(id);
        }
        Ok(())
    }

    async fn delete(&self, stream: &str, id: &str) -> anyhow::Result<()> {
        let mut streams = self.streams.lock().await;
        if let Some(state) = streams.get_mut(stream) {
            state.entries.retain(|e| e.id() != id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(n: u32) -> Vec<(String, String)> {
        vec![("n".to_string(), n.to_string())]
    }

    #[tokio::test]
    async fn test_group_delivers_each_entry_once() {
        let transport = InMemoryStreamTransport::new();
        transport.ensure_group("s", "g", 0).await.unwrap();
        transport.append("s", &fields(1), 100).await.unwrap();
        transport.append("s", &fields(2), 100).await.unwrap();

        let first = transport
            .read_group("g", "c1", &["s"], 10, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(first.len(), 2);

        let second = transport
            .read_group("g", "c1", &["s"], 10, Duration::ZERO)
            .await
            .unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn test_unacked_entries_are_reclaimed_after_idle() {
        let transport = InMemoryStreamTransport::with_claim_idle(Duration::from_millis(10));
        transport.ensure_group("s", "g", 0).await.unwrap();
        transport.append("s", &fields(1), 100).await.unwrap();

        let first = transport
            .read_group("g", "c1", &["s"], 10, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(first.len(), 1);

        tokio::time::sleep(Duration::from_millis(20)).await;

        let reclaimed = transport
            .read_group("g", "c2", &["s"], 10, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].id, first[0].id);
    }

    #[tokio::test]
    async fn test_acked_and_deleted_entries_stay_gone() {
        let transport = InMemoryStreamTransport::with_claim_idle(Duration::from_millis(5));
        transport.ensure_group("s", "g", 0).await.unwrap();
        transport.append("s", &fields(1), 100).await.unwrap();

        let batch = transport
            .read_group("g", "c1", &["s"], 10, Duration::ZERO)
            .await
            .unwrap();
        transport.ack("s", "g", &batch[0].id).await.unwrap();
        transport.delete("s", &batch[0].id).await.unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        let again = transport
            .read_group("g", "c1", &["s"], 10, Duration::ZERO)
            .await
            .unwrap();
        assert!(again.is_empty());
        assert!(transport.is_empty("s").await);
    }

    #[tokio::test]
    async fn test_streams_are_capped() {
        let transport = InMemoryStreamTransport::new();
        for n in 0..20 {
            transport.append("s", &fields(n), 5).await.unwrap();
        }
        assert_eq!(transport.len("s").await, 5);
    }

    #[tokio::test]
    async fn test_group_seeded_past_old_entries() {
        let transport = InMemoryStreamTransport::new();
        transport.append("s", &fields(1), 100).await.unwrap();

        let future = chrono::Utc::now().timestamp_millis() + 60_000;
        transport.ensure_group("s", "g", future).await.unwrap();

        let batch = transport
            .read_group("g", "c1", &["s"], 10, Duration::ZERO)
            .await
            .unwrap();
        assert!(batch.is_empty());
    }
}
