//! IngressStream (spec.md §2, §4.8): the broker-backed at-least-once
//! queue between the Deduplicator and the Enricher. Written by the
//! dedup stage after a RawSpot is admitted, read by the Enricher's
//! consumer group.
//!
//! Grounded in `original_source/backend/collectors/src/collectors/
//! telnet_collectors/telnet_collectors.py`'s `stream-telnet` producer
//! and `original_source/backend/collectors/src/enrichers/
//! enrich_telnet_spots.py`'s consumer-group read of it.

use crate::error::StoreError;
use crate::model::RawSpot;
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use tracing::{debug, instrument, warn};

pub const STREAM_KEY: &str = "holycluster:raw_spots";
const GROUP: &str = "holycluster-enrich";
const MAXLEN_APPROX: usize = 10_000;
const BLOCK_MS: usize = 5_000;

/// Writer side, held by the dedup stage.
pub struct IngressWriter {
    conn: ConnectionManager,
}

impl IngressWriter {
    pub fn new(conn: ConnectionManager) -> Self {
        IngressWriter { conn }
    }

    #[instrument(skip(self, spot), fields(dx = %spot.dx_callsign))]
    pub async fn publish(&mut self, spot: &RawSpot) -> Result<(), StoreError> {
        let fields = spot.to_stream_fields();
        let mut items: Vec<(&str, &str)> = Vec::with_capacity(fields.len());
        for (k, v) in &fields {
            items.push((k.as_str(), v.as_str()));
        }

        redis::cmd("XADD")
            .arg(STREAM_KEY)
            .arg("MAXLEN")
            .arg("~")
            .arg(MAXLEN_APPROX)
            .arg("*")
            .arg(items)
            .query_async::<_, String>(&mut self.conn)
            .await?;

        Ok(())
    }
}

/// Reader side, held by the Enricher's consumer-group loop.
pub struct IngressReader {
    conn: ConnectionManager,
    consumer: String,
}

impl IngressReader {
    /// Ensure the consumer group exists (idempotent: `BUSYGROUP` is
    /// swallowed), then return a reader bound to `consumer`.
    pub async fn new(mut conn: ConnectionManager, consumer: String) -> Result<Self, StoreError> {
        let created: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(STREAM_KEY)
            .arg(GROUP)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        if let Err(e) = created {
            if !e.to_string().contains("BUSYGROUP") {
                return Err(e.into());
            }
        }

        Ok(IngressReader { conn, consumer })
    }

    /// Block for up to `BLOCK_MS` waiting for new entries, returning
    /// `(entry_id, spot)` pairs. Callers must [`ack`](Self::ack) each
    /// entry once it has been durably handled.
    pub async fn read(&mut self) -> Result<Vec<(String, RawSpot)>, StoreError> {
        let opts = StreamReadOptions::default()
            .group(GROUP, &self.consumer)
            .block(BLOCK_MS)
            .count(100);

        let reply: StreamReadReply = self
            .conn
            .xread_options(&[STREAM_KEY], &[">"], &opts)
            .await?;

        let mut out = Vec::new();
        for key in reply.keys {
            for entry in key.ids {
                let fields: std::collections::HashMap<String, String> = entry
                    .map
                    .iter()
                    .filter_map(|(k, v)| match v {
                        redis::Value::Data(bytes) => {
                            Some((k.clone(), String::from_utf8_lossy(bytes).into_owned()))
                        }
                        redis::Value::Status(s) => Some((k.clone(), s.clone())),
                        _ => None,
                    })
                    .collect();

                match RawSpot::from_stream_fields(&fields) {
                    Some(spot) => out.push((entry.id.clone(), spot)),
                    None => {
                        warn!(id = %entry.id, "malformed raw-spot stream entry, acking without delivering");
                        if let Err(e) = self.ack(&entry.id).await {
                            warn!(id = %entry.id, error = %e, "failed to ack malformed entry");
                        }
                    }
                }
            }
        }
        Ok(out)
    }

    /// Ack by id, then trim the stream up to that id (spec.md §4.8).
    pub async fn ack(&mut self, entry_id: &str) -> Result<(), StoreError> {
        let _: i64 = self.conn.xack(STREAM_KEY, GROUP, &[entry_id]).await?;
        let _: Result<i64, redis::RedisError> = redis::cmd("XTRIM")
            .arg(STREAM_KEY)
            .arg("MINID")
            .arg(entry_id)
            .query_async(&mut self.conn)
            .await;
        debug!(entry_id, "acked raw-spot stream entry");
        Ok(())
    }
}
