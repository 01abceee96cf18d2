//! Deduplicator (spec.md §4.2): cross-source coincidence filter keyed
//! on `(time, dx_callsign, frequency, spotter_callsign)`, short TTL
//! `SET ... NX EX` against the key-value store.

use crate::error::StoreError;
use crate::model::RawSpot;
use redis::aio::ConnectionManager;

pub struct Deduplicator {
    conn: ConnectionManager,
    ttl_secs: u64,
}

fn dedup_key(spot: &RawSpot) -> String {
    format!(
        "{}:{}:{}:{}",
        spot.time, spot.dx_callsign, spot.frequency_khz, spot.spotter_callsign
    )
}

impl Deduplicator {
    pub fn new(conn: ConnectionManager, ttl_secs: u64) -> Self {
        Deduplicator { conn, ttl_secs }
    }

    /// Returns `true` if this spot has not been seen within the TTL
    /// window (i.e. it should be forwarded), `false` if it's a
    /// duplicate and should be dropped.
    pub async fn admit(&mut self, spot: &RawSpot) -> Result<bool, StoreError> {
        let key = dedup_key(spot);
        let reply: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(1)
            .arg("EX")
            .arg(self.ttl_secs)
            .arg("NX")
            .query_async(&mut self.conn)
            .await?;
        Ok(reply.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_spot() -> RawSpot {
        RawSpot {
            spotter_callsign: "K5TR".into(),
            dx_callsign: "VE2PID".into(),
            frequency_khz: 14056.0,
            comment: "CQ".into(),
            time: "2010".into(),
            dx_locator: None,
            spotter_locator: None,
            cluster: "cluster.example:7300".into(),
        }
    }

    // S3 (key shape only; the TTL-gated admit() itself needs a live store).
    #[test]
    fn dedup_key_is_stable_across_sources() {
        let mut a = sample_spot();
        a.cluster = "one.example:7300".into();
        let mut b = sample_spot();
        b.cluster = "two.example:41112".into();
        assert_eq!(dedup_key(&a), dedup_key(&b));
    }

    #[test]
    fn dedup_key_differs_on_any_field() {
        let base = sample_spot();
        let mut other = sample_spot();
        other.frequency_khz = 14057.0;
        assert_ne!(dedup_key(&base), dedup_key(&other));
    }
}
