//! Redis stream publisher.
//!
//! Each [`StreamRecord`] becomes one `XADD` entry whose fields are the record's
//! keys. String values are written as-is; everything else as JSON text.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use serde_json::Value;

use chainsched_core::{EventPublisher, EventStream, PublishError, StreamRecord};

/// Approximate cap on stream length (`MAXLEN ~`).
pub const DEFAULT_MAX_LEN: usize = 100_000;

pub struct RedisStreamPublisher {
    conn: ConnectionManager,
    max_len: usize,
}

impl RedisStreamPublisher {
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            max_len: DEFAULT_MAX_LEN,
        }
    }

    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len;
        self
    }
}

#[async_trait]
impl EventPublisher for RedisStreamPublisher {
    async fn publish(&self, stream: EventStream, record: StreamRecord) -> Result<(), PublishError> {
        let mut cmd = redis::cmd("XADD");
        cmd.arg(stream.as_str()).arg("MAXLEN").arg("~").arg(self.max_len).arg("*");
        for (field, value) in stream_fields(&record) {
            cmd.arg(field).arg(value);
        }

        let mut conn = self.conn.clone();
        let id: String = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| PublishError(e.to_string()))?;
        tracing::trace!(%stream, id, event_type = record.event_type().unwrap_or_default(), "stream entry added");
        Ok(())
    }
}

/// Flatten a record into `XADD` field/value pairs.
pub fn stream_fields(record: &StreamRecord) -> Vec<(String, String)> {
    record
        .fields()
        .map(|(k, v)| {
            let value = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), value)
        })
        .collect()
}
