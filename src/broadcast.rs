//! Broadcaster (spec.md §4.9): WebSocket fanout of broadcastable spots
//! to every connected client, fed by the egress stream's consumer-group
//! reader.
//!
//! Catch-up and live delivery can overlap at subscribe time — a spot
//! delivered as part of the initial backlog query may also arrive
//! again moments later off the live stream. This is accepted (spec.md
//! Non-goals: no cross-source reordering guarantee); clients are
//! expected to dedup on `(dx_callsign, time, frequency)` themselves
//! (see SPEC_FULL.md §12).

use crate::model::{EnrichedSpot, GeoFields};
use crate::streams::EgressReader;
use axum::extract::ws::{Message, WebSocket};
use chrono::{Timelike, Utc};
use dashmap::DashMap;
use serde_json::{json, Value};
use sqlx::PgPool;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const SUBSCRIBER_CHANNEL_CAPACITY: usize = 256;
const BACKLOG_LIMIT: i64 = 500;
const INITIAL_BACKLOG_WINDOW_SECS: i64 = 3600;
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Default)]
pub struct BroadcastCounters {
    pub received: AtomicU64,
    pub broadcast: AtomicU64,
    pub skipped_unresolved: AtomicU64,
}

#[derive(Clone)]
pub struct Broadcaster {
    subscribers: Arc<DashMap<u64, mpsc::Sender<Message>>>,
    next_id: Arc<AtomicU64>,
    pub counters: Arc<BroadcastCounters>,
    pool: PgPool,
}

impl Broadcaster {
    pub fn new(pool: PgPool) -> Self {
        Broadcaster {
            subscribers: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(1)),
            counters: Arc::new(BroadcastCounters::default()),
            pool,
        }
    }

    pub fn active_subscribers(&self) -> usize {
        self.subscribers.len()
    }

    fn subscribe(&self) -> (u64, mpsc::Receiver<Message>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        self.subscribers.insert(id, tx);
        (id, rx)
    }

    fn unsubscribe(&self, id: u64) {
        self.subscribers.remove(&id);
    }

    /// Drive the egress reader loop until `cancel` fires. Reads the
    /// broker stream, acks every entry it read regardless of whether
    /// the spot ends up broadcast (an unresolved-geo spot is still
    /// durably consumed — it's simply not fanout-eligible).
    pub async fn run(&self, mut egress: EgressReader, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                info!("broadcaster consumer cancelled");
                return;
            }

            let entries = tokio::select! {
                r = egress.read() => r,
                _ = cancel.cancelled() => return,
            };

            let entries = match entries {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(error = %e, "egress read failed, retrying");
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                    continue;
                }
            };

            for (entry_id, spot) in entries {
                self.counters.received.fetch_add(1, Ordering::Relaxed);
                if spot.broadcastable() {
                    self.fanout(&spot).await;
                    self.counters.broadcast.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.counters.skipped_unresolved.fetch_add(1, Ordering::Relaxed);
                }
                if let Err(e) = egress.ack(&entry_id).await {
                    warn!(entry_id = %entry_id, error = %e, "failed to ack stream entry");
                }
            }
        }
    }

    async fn fanout(&self, spot: &EnrichedSpot) {
        let payload = cleanup(spot);
        let text = match serde_json::to_string(&payload) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "failed serializing spot for broadcast");
                return;
            }
        };
        let message = Message::Text(text);

        // Snapshot first, then iterate — a subscriber disconnecting
        // mid-fanout must not invalidate this loop (spec.md §4.9).
        let snapshot: Vec<(u64, mpsc::Sender<Message>)> =
            self.subscribers.iter().map(|e| (*e.key(), e.value().clone())).collect();

        let mut dead = Vec::new();
        for (id, tx) in snapshot {
            if tx.send(message.clone()).await.is_err() {
                dead.push(id);
            }
        }
        for id in dead {
            self.unsubscribe(id);
            debug!(id, "removed disconnected subscriber");
        }
    }

    /// Handle one accepted WebSocket connection: read the opening
    /// handshake message, reply with the matching backlog (spec.md
    /// §4.9), then relay live fanout messages until the client
    /// disconnects.
    pub async fn handle_socket(&self, mut socket: WebSocket) {
        let (id, mut rx) = self.subscribe();
        info!(id, active = self.active_subscribers(), "subscriber connected");

        self.send_backlog(&mut socket).await;

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Some(m) => {
                            if socket.send(m).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                incoming = socket.recv() => {
                    match incoming {
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(_)) => break,
                        _ => {}
                    }
                }
            }
        }

        self.unsubscribe(id);
        info!(id, active = self.active_subscribers(), "subscriber disconnected");
    }

    /// Read the subscriber's opening message and reply with the backlog
    /// it asked for. `{"initial":true}` gets the last hour, up to
    /// [`BACKLOG_LIMIT`] spots; `{"last_time":N}` gets everything newer
    /// than `N`; anything else skips the backlog entirely (spec.md
    /// §4.9). Must run before the relay loop starts consuming `socket`.
    async fn send_backlog(&self, socket: &mut WebSocket) {
        let first = tokio::time::timeout(HANDSHAKE_TIMEOUT, socket.recv()).await;
        let Ok(Some(Ok(Message::Text(text)))) = first else {
            return;
        };

        let Ok(opening) = serde_json::from_str::<Value>(&text) else {
            return;
        };

        let (kind, since) = if opening.get("initial").and_then(Value::as_bool) == Some(true) {
            ("initial", Utc::now().timestamp() - INITIAL_BACKLOG_WINDOW_SECS)
        } else if let Some(last_time) = opening.get("last_time").and_then(Value::as_i64) {
            ("update", last_time)
        } else {
            return;
        };

        let spots = self.query_backlog(since).await;
        let payload = json!({
            "type": kind,
            "spots": spots.iter().map(cleanup).collect::<Vec<_>>(),
        });

        match serde_json::to_string(&payload) {
            Ok(text) => {
                if socket.send(Message::Text(text)).await.is_err() {
                    debug!(kind, "backlog send failed, client already gone");
                }
            }
            Err(e) => warn!(error = %e, "failed serializing backlog payload"),
        }
    }

    /// Up to [`BACKLOG_LIMIT`] EnrichedSpots with `timestamp > since`,
    /// most recent first.
    async fn query_backlog(&self, since: i64) -> Vec<EnrichedSpot> {
        let rows = sqlx::query_as::<
            _,
            (
                String, String, f64, String, i64, String,
                String, String, String,
                String, String, Option<f64>, Option<f64>, String, String,
                String, String, Option<f64>, Option<f64>, String, String,
            ),
        >(
            r#"
            SELECT spotter_callsign, dx_callsign, frequency, comment,
                   EXTRACT(EPOCH FROM date_time)::bigint, cluster,
                   band, mode, mode_selection,
                   spotter_locator_source, spotter_locator, spotter_lat, spotter_lon,
                   spotter_country, spotter_continent,
                   dx_locator_source, dx_locator, dx_lat, dx_lon, dx_country, dx_continent
            FROM holy_spots
            WHERE date_time > to_timestamp($1)
            ORDER BY date_time DESC
            LIMIT $2
            "#,
        )
        .bind(since as f64)
        .bind(BACKLOG_LIMIT)
        .fetch_all(&self.pool)
        .await;

        match rows {
            Ok(rows) => rows.into_iter().map(row_to_enriched_spot).collect(),
            Err(e) => {
                warn!(error = %e, "backlog query failed");
                Vec::new()
            }
        }
    }
}

type BacklogRow = (
    String, String, f64, String, i64, String,
    String, String, String,
    String, String, Option<f64>, Option<f64>, String, String,
    String, String, Option<f64>, Option<f64>, String, String,
);

/// `EnrichedSpot.time` (HHMM) is not a stored column (only the absolute
/// `timestamp` is); re-derive it from `timestamp` so [`cleanup`] can
/// treat backlog rows identically to freshly-enriched spots.
fn row_to_enriched_spot(row: BacklogRow) -> EnrichedSpot {
    let (
        spotter_callsign, dx_callsign, frequency_khz, comment, timestamp, cluster,
        band, mode, mode_selection,
        spotter_locator_source, spotter_locator, spotter_lat, spotter_lon, spotter_country, spotter_continent,
        dx_locator_source, dx_locator, dx_lat, dx_lon, dx_country, dx_continent,
    ) = row;

    let time = chrono::DateTime::<Utc>::from_timestamp(timestamp, 0)
        .map(|dt| format!("{:02}{:02}", dt.hour(), dt.minute()))
        .unwrap_or_default();

    EnrichedSpot {
        spotter_callsign,
        dx_callsign,
        frequency_khz,
        comment,
        time,
        cluster,
        timestamp,
        band,
        mode,
        mode_selection,
        spotter: GeoFields {
            locator_source: spotter_locator_source,
            locator: spotter_locator,
            lat: spotter_lat,
            lon: spotter_lon,
            country: spotter_country,
            continent: spotter_continent,
        },
        dx: GeoFields {
            locator_source: dx_locator_source,
            locator: dx_locator,
            lat: dx_lat,
            lon: dx_lon,
            country: dx_country,
            continent: dx_continent,
        },
    }
}

/// Transform an [`EnrichedSpot`] into the client-facing JSON shape
/// (spec.md §4.9/§8 testable properties):
/// - `mode`: SSB/USB/LSB collapse to `"SSB"`, everything else uppercased
/// - `band`: VHF/UHF/SHF stay as strings, everything else emitted as a number
/// - coordinates as `[lon, lat]` pairs
/// - `time` as a float (`HHMM` parsed, e.g. `"2010"` -> `2010.0`)
fn cleanup(spot: &EnrichedSpot) -> Value {
    json!({
        "spotter_callsign": spot.spotter_callsign,
        "dx_callsign": spot.dx_callsign,
        "frequency": spot.frequency_khz,
        "comment": spot.comment,
        "time": spot.time.parse::<f64>().unwrap_or(0.0),
        "timestamp": spot.timestamp,
        "band": cleanup_band(&spot.band),
        "mode": cleanup_mode(&spot.mode),
        "mode_selection": spot.mode_selection,
        "spotter_locator": spot.spotter.locator,
        "spotter_coords": [spot.spotter.lon, spot.spotter.lat],
        "spotter_country": spot.spotter.country,
        "spotter_continent": spot.spotter.continent,
        "dx_locator": spot.dx.locator,
        "dx_coords": [spot.dx.lon, spot.dx.lat],
        "dx_country": spot.dx.country,
        "dx_continent": spot.dx.continent,
    })
}

fn cleanup_mode(mode: &str) -> String {
    let upper = mode.to_uppercase();
    match upper.as_str() {
        "SSB" | "USB" | "LSB" => "SSB".to_string(),
        other => other.to_string(),
    }
}

/// VHF/UHF/SHF are band *names*, not metre counts — they stay strings.
/// Everything else (`"20"`, `"40"`, ...) is a metre count and must be
/// emitted as a JSON number (spec.md §4.9/§8 testable property 8).
fn cleanup_band(band: &str) -> Value {
    match band {
        "VHF" | "UHF" | "SHF" => json!(band),
        other => match other.parse::<f64>() {
            Ok(n) => json!(n),
            Err(_) => json!(other),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> EnrichedSpot {
        EnrichedSpot {
            spotter_callsign: "K5TR".into(),
            dx_callsign: "VE2PID".into(),
            frequency_khz: 14056.0,
            comment: "CQ".into(),
            time: "2010".into(),
            cluster: "c:7300".into(),
            timestamp: 1700000000,
            band: "20".into(),
            mode: "CW".into(),
            mode_selection: "comment".into(),
            spotter: GeoFields {
                locator_source: "prefixes".into(),
                locator: "FN31".into(),
                lat: Some(41.5),
                lon: Some(-73.0),
                country: "United States".into(),
                continent: "NA".into(),
            },
            dx: GeoFields {
                locator_source: "prefixes".into(),
                locator: "FN25".into(),
                lat: Some(45.5),
                lon: Some(-73.0),
                country: "Canada".into(),
                continent: "NA".into(),
            },
        }
    }

    #[test]
    fn collapses_sideband_modes() {
        assert_eq!(cleanup_mode("usb"), "SSB");
        assert_eq!(cleanup_mode("LSB"), "SSB");
        assert_eq!(cleanup_mode("ssb"), "SSB");
        assert_eq!(cleanup_mode("ft8"), "FT8");
    }

    #[test]
    fn cleanup_shapes_coords_as_lon_lat_pairs() {
        let v = cleanup(&sample());
        assert_eq!(v["spotter_coords"], json!([-73.0, 41.5]));
        assert_eq!(v["dx_coords"], json!([-73.0, 45.5]));
    }

    #[test]
    fn cleanup_parses_time_as_float() {
        let v = cleanup(&sample());
        assert_eq!(v["time"], json!(2010.0));
    }

    #[test]
    fn unparseable_time_becomes_zero() {
        let mut s = sample();
        s.time = "garbage".into();
        let v = cleanup(&s);
        assert_eq!(v["time"], json!(0.0));
    }

    #[test]
    fn cleanup_emits_numeric_band_except_vhf_uhf_shf() {
        let mut s = sample();
        s.band = "20".into();
        let v = cleanup(&s);
        assert_eq!(v["band"], json!(20.0));
        assert!(v["band"].is_number());

        for band in ["VHF", "UHF", "SHF"] {
            s.band = band.into();
            let v = cleanup(&s);
            assert_eq!(v["band"], json!(band));
            assert!(v["band"].is_string());
        }
    }
}
