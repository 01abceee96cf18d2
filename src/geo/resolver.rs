//! GeoResolver (spec.md §4.4): resolves a callsign to a locator and
//! coordinates, cache-through in front of the external QRZ lookup with
//! the prefix table as the last-resort fallback.

use crate::error::GeoError;
use crate::geo::locator::{locator_to_coordinates, strip_portable_suffix, PrefixTable};
use crate::geo::qrz::QrzSession;
use crate::model::{GeoFields, GeoRecord};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct GeoResolver {
    conn: ConnectionManager,
    qrz: Arc<QrzSession>,
    prefixes: PrefixTable,
    ttl_secs: u64,
}

fn cache_key(callsign: &str) -> String {
    format!("geo:{}", callsign.to_uppercase())
}

impl GeoResolver {
    pub fn new(conn: ConnectionManager, qrz: Arc<QrzSession>, prefixes: PrefixTable, ttl_secs: u64) -> Self {
        GeoResolver { conn, qrz, prefixes, ttl_secs }
    }

    /// Resolve a side of a spot (spotter or dx) purely from its
    /// callsign. Lookup order is cache, then QRZ, then the prefix table
    /// (spec.md §4.4) — there is no self-reported-locator input.
    pub async fn resolve(&mut self, callsign: &str) -> GeoFields {
        let stripped = strip_portable_suffix(callsign);

        if let Some(record) = self.read_cache(&stripped).await {
            return GeoFields {
                locator_source: record.locator_source,
                locator: record.locator,
                lat: Some(record.lat),
                lon: Some(record.lon),
                country: record.country,
                continent: record.continent,
            };
        }

        match self.resolve_uncached(&stripped).await {
            Ok(fields) => fields,
            Err(e) => {
                warn!(callsign = %stripped, error = %e, "geo resolution failed");
                GeoFields::default()
            }
        }
    }

    async fn resolve_uncached(&mut self, callsign: &str) -> Result<GeoFields, GeoError> {
        let qrz_key = self.qrz.get_key().await;
        let from_qrz = if !qrz_key.is_empty() {
            self.qrz.lookup_locator(&qrz_key, callsign).await.locator
        } else {
            None
        };

        let (source, locator) = match from_qrz {
            Some(locator) => ("qrz", locator),
            None => match self.prefixes.resolve_locator(callsign) {
                Some(locator) => ("prefixes", locator),
                None => return Err(GeoError::Unresolvable(callsign.to_string())),
            },
        };

        let fields = self.build_fields(source, &locator, callsign).await;
        if fields.is_resolved() {
            self.write_cache(callsign, &fields).await;
        }
        Ok(fields)
    }

    async fn build_fields(&self, source: &str, locator: &str, callsign: &str) -> GeoFields {
        let (lat, lon) = locator_to_coordinates(locator).unzip();
        let (country, continent) = self.prefixes.resolve_country_and_continent(callsign);
        GeoFields {
            locator_source: source.to_string(),
            locator: locator.to_string(),
            lat,
            lon,
            country: country.unwrap_or_default(),
            continent: continent.unwrap_or_default(),
        }
    }

    async fn read_cache(&mut self, callsign: &str) -> Option<GeoRecord> {
        let raw: Option<String> = self.conn.get(cache_key(callsign)).await.ok()?;
        let raw = raw?;
        match serde_json::from_str(&raw) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(callsign, error = %e, "corrupt geo cache entry, ignoring");
                None
            }
        }
    }

    async fn write_cache(&mut self, callsign: &str, fields: &GeoFields) {
        let (Some(lat), Some(lon)) = (fields.lat, fields.lon) else {
            return;
        };
        let record = GeoRecord {
            locator_source: fields.locator_source.clone(),
            locator: fields.locator.clone(),
            lat,
            lon,
            country: fields.country.clone(),
            continent: fields.continent.clone(),
        };
        let Ok(payload) = serde_json::to_string(&record) else {
            return;
        };
        let result: Result<(), redis::RedisError> = self
            .conn
            .set_ex(cache_key(callsign), payload, self.ttl_secs)
            .await;
        if let Err(e) = result {
            warn!(callsign, error = %e, "failed writing geo cache entry");
        } else {
            debug!(callsign, "cached geo resolution");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_is_uppercased() {
        assert_eq!(cache_key("k5tr"), "geo:K5TR");
        assert_eq!(cache_key("K5TR"), "geo:K5TR");
    }
}
