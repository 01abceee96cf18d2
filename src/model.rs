//! Wire and domain records shared across stages.
//!
//! The original passes around untyped string-keyed dicts at every
//! boundary. Here the shapes are tagged records (spec.md §9
//! "Dynamically shaped payloads"); only the broker and WebSocket
//! boundaries serialize to string-keyed maps / JSON.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One candidate spot as parsed off a cluster telnet line, before enrichment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSpot {
    pub spotter_callsign: String,
    pub dx_callsign: String,
    pub frequency_khz: f64,
    pub comment: String,
    /// `HHMM` UTC, four digits, no trailing `Z`.
    pub time: String,
    pub dx_locator: Option<String>,
    pub spotter_locator: Option<String>,
    /// `host:port` of the cluster endpoint this spot arrived from.
    pub cluster: String,
}

impl RawSpot {
    /// Flatten to a string-keyed map at the broker boundary (XADD fields).
    pub fn to_stream_fields(&self) -> HashMap<String, String> {
        let mut m = HashMap::new();
        m.insert("spotter_callsign".into(), self.spotter_callsign.clone());
        m.insert("dx_callsign".into(), self.dx_callsign.clone());
        m.insert("frequency".into(), self.frequency_khz.to_string());
        m.insert("comment".into(), self.comment.clone());
        m.insert("time".into(), self.time.clone());
        m.insert("dx_locator".into(), self.dx_locator.clone().unwrap_or_default());
        m.insert("spotter_locator".into(), self.spotter_locator.clone().unwrap_or_default());
        m.insert("cluster".into(), self.cluster.clone());
        m
    }

    /// Reconstruct from the broker's string-keyed map (XREADGROUP reply).
    pub fn from_stream_fields(m: &HashMap<String, String>) -> Option<Self> {
        Some(RawSpot {
            spotter_callsign: m.get("spotter_callsign")?.clone(),
            dx_callsign: m.get("dx_callsign")?.clone(),
            frequency_khz: m.get("frequency")?.parse().ok()?,
            comment: m.get("comment").cloned().unwrap_or_default(),
            time: m.get("time")?.clone(),
            dx_locator: m.get("dx_locator").cloned().filter(|s| !s.is_empty()),
            spotter_locator: m.get("spotter_locator").cloned().filter(|s| !s.is_empty()),
            cluster: m.get("cluster").cloned().unwrap_or_default(),
        })
    }
}

/// Where a mode assignment came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModeSelection {
    Comment,
    Range,
}

impl ModeSelection {
    pub fn as_str(self) -> &'static str {
        match self {
            ModeSelection::Comment => "comment",
            ModeSelection::Range => "range",
        }
    }
}

/// Per-side geographic resolution attached to an [`EnrichedSpot`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoFields {
    pub locator_source: String,
    pub locator: String,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub country: String,
    pub continent: String,
}

impl GeoFields {
    pub fn is_resolved(&self) -> bool {
        !self.locator.is_empty()
    }
}

/// The persisted/broadcast record: a [`RawSpot`] plus everything the
/// Enricher derived from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedSpot {
    pub spotter_callsign: String,
    pub dx_callsign: String,
    pub frequency_khz: f64,
    pub comment: String,
    pub time: String,
    pub cluster: String,
    pub timestamp: i64,
    pub band: String,
    pub mode: String,
    pub mode_selection: String,
    pub spotter: GeoFields,
    pub dx: GeoFields,
}

impl EnrichedSpot {
    /// Broadcast eligibility per spec.md §4.9/§6: both sides resolved,
    /// non-empty band and mode.
    pub fn broadcastable(&self) -> bool {
        self.spotter.is_resolved()
            && self.dx.is_resolved()
            && !self.band.is_empty()
            && !self.mode.is_empty()
    }

    /// Flatten to a string-keyed map at the broker boundary (XADD fields).
    pub fn to_stream_fields(&self) -> HashMap<String, String> {
        let mut m = HashMap::new();
        m.insert("spotter_callsign".into(), self.spotter_callsign.clone());
        m.insert("dx_callsign".into(), self.dx_callsign.clone());
        m.insert("frequency".into(), self.frequency_khz.to_string());
        m.insert("comment".into(), self.comment.clone());
        m.insert("time".into(), self.time.clone());
        m.insert("cluster".into(), self.cluster.clone());
        m.insert("timestamp".into(), self.timestamp.to_string());
        m.insert("band".into(), self.band.clone());
        m.insert("mode".into(), self.mode.clone());
        m.insert("mode_selection".into(), self.mode_selection.clone());
        m.insert("spotter_locator_source".into(), self.spotter.locator_source.clone());
        m.insert("spotter_locator".into(), self.spotter.locator.clone());
        m.insert("spotter_lat".into(), opt_f64(self.spotter.lat));
        m.insert("spotter_lon".into(), opt_f64(self.spotter.lon));
        m.insert("spotter_country".into(), self.spotter.country.clone());
        m.insert("spotter_continent".into(), self.spotter.continent.clone());
        m.insert("dx_locator_source".into(), self.dx.locator_source.clone());
        m.insert("dx_locator".into(), self.dx.locator.clone());
        m.insert("dx_lat".into(), opt_f64(self.dx.lat));
        m.insert("dx_lon".into(), opt_f64(self.dx.lon));
        m.insert("dx_country".into(), self.dx.country.clone());
        m.insert("dx_continent".into(), self.dx.continent.clone());
        m
    }

    /// Reconstruct from the broker's string-keyed map (XREADGROUP reply).
    pub fn from_stream_fields(m: &HashMap<String, String>) -> Option<Self> {
        Some(EnrichedSpot {
            spotter_callsign: m.get("spotter_callsign")?.clone(),
            dx_callsign: m.get("dx_callsign")?.clone(),
            frequency_khz: m.get("frequency")?.parse().ok()?,
            comment: m.get("comment").cloned().unwrap_or_default(),
            time: m.get("time")?.clone(),
            cluster: m.get("cluster").cloned().unwrap_or_default(),
            timestamp: m.get("timestamp")?.parse().ok()?,
            band: m.get("band").cloned().unwrap_or_default(),
            mode: m.get("mode").cloned().unwrap_or_default(),
            mode_selection: m.get("mode_selection").cloned().unwrap_or_default(),
            spotter: GeoFields {
                locator_source: m.get("spotter_locator_source").cloned().unwrap_or_default(),
                locator: m.get("spotter_locator").cloned().unwrap_or_default(),
                lat: m.get("spotter_lat").and_then(|s| s.parse().ok()),
                lon: m.get("spotter_lon").and_then(|s| s.parse().ok()),
                country: m.get("spotter_country").cloned().unwrap_or_default(),
                continent: m.get("spotter_continent").cloned().unwrap_or_default(),
            },
            dx: GeoFields {
                locator_source: m.get("dx_locator_source").cloned().unwrap_or_default(),
                locator: m.get("dx_locator").cloned().unwrap_or_default(),
                lat: m.get("dx_lat").and_then(|s| s.parse().ok()),
                lon: m.get("dx_lon").and_then(|s| s.parse().ok()),
                country: m.get("dx_country").cloned().unwrap_or_default(),
                continent: m.get("dx_continent").cloned().unwrap_or_default(),
            },
        })
    }
}

fn opt_f64(v: Option<f64>) -> String {
    v.map(|x| x.to_string()).unwrap_or_default()
}

/// A cached geo resolution, as stored (JSON) in the key-value store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoRecord {
    pub locator_source: String,
    pub locator: String,
    pub lat: f64,
    pub lon: f64,
    pub country: String,
    pub continent: String,
}
