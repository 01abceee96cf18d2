//! Enricher (spec.md §4.6): timestamps, classifies, and geo-resolves a
//! [`RawSpot`] into an [`EnrichedSpot`]. Classification failure drops
//! the spot; geo misses do not — the spot is still persisted, it is
//! simply not broadcastable (spec.md §4.9).

use crate::classify::FrequencyClassifier;
use crate::error::EnrichError;
use crate::geo::GeoResolver;
use crate::model::{EnrichedSpot, RawSpot};
use chrono::{NaiveTime, Timelike, Utc};
use std::sync::Arc;
use tracing::{instrument, warn};

pub struct Enricher {
    classifier: Arc<FrequencyClassifier>,
    geo: GeoResolver,
}

impl Enricher {
    pub fn new(classifier: Arc<FrequencyClassifier>, geo: GeoResolver) -> Self {
        Enricher { classifier, geo }
    }

    /// Returns `Ok(None)` when the spot is dropped outright
    /// (unclassifiable frequency); `Ok(Some(_))` otherwise, whether or
    /// not both sides resolved geographically.
    #[instrument(skip(self, raw), fields(dx = %raw.dx_callsign, spotter = %raw.spotter_callsign))]
    pub async fn enrich(&mut self, raw: RawSpot) -> Result<Option<EnrichedSpot>, EnrichError> {
        let (band, mode, selection) = match self.classifier.find_band_and_mode(raw.frequency_khz, &raw.comment) {
            Ok(result) => result,
            Err(e) => {
                warn!(frequency = raw.frequency_khz, error = %e, "dropping unclassifiable spot");
                return Ok(None);
            }
        };

        let timestamp = assemble_timestamp(&raw.time);

        let spotter = self.geo.resolve(&raw.spotter_callsign).await;
        let dx = self.geo.resolve(&raw.dx_callsign).await;

        Ok(Some(EnrichedSpot {
            spotter_callsign: raw.spotter_callsign,
            dx_callsign: raw.dx_callsign,
            frequency_khz: raw.frequency_khz,
            comment: raw.comment,
            time: raw.time,
            cluster: raw.cluster,
            timestamp,
            band,
            mode,
            mode_selection: selection.map(|s| s.as_str().to_string()).unwrap_or_default(),
            spotter,
            dx,
        }))
    }
}

/// Combine today's UTC date with the spot's `HHMM` clock time and the
/// current instant's seconds/microseconds, per the accepted Open
/// Question in spec.md: a spot logged just before UTC midnight using a
/// cluster time from just after midnight (or vice versa) gets today's
/// date regardless, which can shift the apparent timestamp by a day.
/// This is accepted, not corrected (see SPEC_FULL.md §12).
fn assemble_timestamp(hhmm: &str) -> i64 {
    let now = Utc::now();
    let parsed = NaiveTime::parse_from_str(hhmm, "%H%M").ok();

    let time = match parsed {
        Some(t) => t
            .with_second(now.second())
            .and_then(|t| t.with_nanosecond(now.nanosecond()))
            .unwrap_or(t),
        None => now.time(),
    };

    now.date_naive().and_time(time).and_utc().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembles_timestamp_from_hhmm_and_todays_date() {
        let ts = assemble_timestamp("2010");
        let dt = chrono::DateTime::<Utc>::from_timestamp(ts, 0).unwrap();
        assert_eq!(dt.date_naive(), Utc::now().date_naive());
        assert_eq!(dt.hour(), 20);
        assert_eq!(dt.minute(), 10);
    }

    #[test]
    fn malformed_time_falls_back_to_now() {
        let before = Utc::now().timestamp();
        let ts = assemble_timestamp("garbage");
        let after = Utc::now().timestamp();
        assert!(ts >= before - 1 && ts <= after + 1);
    }
}
