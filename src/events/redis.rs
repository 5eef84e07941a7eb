//! Redis Streams transport.
//!
//! One stream per event category, capped with `XADD MAXLEN ~`. Consumer
//! groups partition messages across processor instances; `XACK` + `XDEL`
//! together retire a message (acking alone can leave a trimmed-but-unacked
//! backlog, deleting without acking can double-count under some group
//! implementations — the processor does both).

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::streams::{StreamReadOptions, StreamReadReply};
use std::time::Duration;

use super::transport::{StreamMessage, StreamTransport};

pub struct RedisStreamTransport {
    conn: redis::aio::ConnectionManager,
}

impl RedisStreamTransport {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = redis::aio::ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl StreamTransport for RedisStreamTransport {
    async fn append(
        &self,
        stream: &str,
        fields: &[(String, String)],
        max_len: u64,
    ) -> anyhow::Result<String> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("XADD");
        cmd.arg(stream)
            .arg("MAXLEN")
            .arg("~")
            .arg(max_len)
            .arg("*");
        for (key, value) in fields {
            cmd.arg(key).arg(value);
        }
        let id: String = cmd.query_async(&mut conn).await?;
        Ok(id)
    }

    async fn ensure_group(&self, stream: &str, group: &str, start_ms: i64) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let start_id = format!("{}-0", start_ms.max(0));
        let result: redis::RedisResult<String> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg(&start_id)
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => Ok(()),
            // Group already exists: keep its cursor, this is a restart.
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_group(
        &self,
        group: &str,
        consumer: &str,
        streams: &[&str],
        count: usize,
        block: Duration,
    ) -> anyhow::Result<Vec<StreamMessage>> {
        let mut conn = self.conn.clone();

        let options = StreamReadOptions::default()
            .group(group, consumer)
            .count(count)
            .block(usize::try_from(block.as_millis()).unwrap_or(usize::MAX));

        let cursors = vec![">"; streams.len()];
        let reply: StreamReadReply = conn.xread_options(streams, &cursors, &options).await?;

        let mut messages = Vec::new();
        for key in reply.keys {
            for entry in key.ids {
                let mut fields = Vec::with_capacity(entry.map.len());
                for (field, value) in &entry.map {
                    let value: String = redis::from_redis_value(value)?;
                    fields.push((field.clone(), value));
                }
                messages.push(StreamMessage {
                    stream: key.key.clone(),
                    id: entry.id.clone(),
                    fields,
                });
            }
        }
        Ok(messages)
    }

    async fn ack(&self, stream: &str, group: &str, id: &str) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.xack(stream, group, &[id]).await?;
        Ok(())
    }

    async fn delete(&self, stream: &str, id: &str) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.xdel(stream, &[id]).await?;
        Ok(())
    }
}
