//! Persister (spec.md §4.7): writes every enriched spot to the
//! relational store, and periodically sweeps rows older than the
//! configured retention window.
//!
//! Grounded in `original_source/backend/collectors/src/collectors/db/
//! cleanup_postgres_tables.py` for the retention sweep, and spec.md §6
//! for the `holy_spots` schema.

use crate::error::DbError;
use crate::model::EnrichedSpot;
use sqlx::PgPool;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

const SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

pub struct Persister {
    pool: PgPool,
}

impl Persister {
    pub fn new(pool: PgPool) -> Self {
        Persister { pool }
    }

    #[instrument(skip(self, spot), fields(dx = %spot.dx_callsign))]
    pub async fn persist(&self, spot: &EnrichedSpot) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO holy_spots (
                spotter_callsign, dx_callsign, frequency, comment, date_time,
                cluster, band, mode, mode_selection,
                spotter_locator_source, spotter_locator, spotter_lat, spotter_lon,
                spotter_country, spotter_continent,
                dx_locator_source, dx_locator, dx_lat, dx_lon,
                dx_country, dx_continent
            ) VALUES (
                $1, $2, $3, $4, to_timestamp($5),
                $6, $7, $8, $9,
                $10, $11, $12, $13,
                $14, $15,
                $16, $17, $18, $19,
                $20, $21
            )
            "#,
        )
        .bind(&spot.spotter_callsign)
        .bind(&spot.dx_callsign)
        .bind(spot.frequency_khz)
        .bind(&spot.comment)
        .bind(spot.timestamp as f64)
        .bind(&spot.cluster)
        .bind(&spot.band)
        .bind(&spot.mode)
        .bind(&spot.mode_selection)
        .bind(&spot.spotter.locator_source)
        .bind(&spot.spotter.locator)
        .bind(spot.spotter.lat)
        .bind(spot.spotter.lon)
        .bind(&spot.spotter.country)
        .bind(&spot.spotter.continent)
        .bind(&spot.dx.locator_source)
        .bind(&spot.dx.locator)
        .bind(spot.dx.lat)
        .bind(spot.dx.lon)
        .bind(&spot.dx.country)
        .bind(&spot.dx.continent)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Delete rows older than `retention_days`, on a fixed interval,
    /// until `cancel` fires.
    pub async fn run_retention_sweeper(&self, retention_days: i64, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(SWEEP_INTERVAL) => {}
                _ = cancel.cancelled() => {
                    info!("retention sweeper cancelled");
                    return;
                }
            }

            match self.sweep(retention_days).await {
                Ok(deleted) => info!(deleted, retention_days, "retention sweep complete"),
                Err(e) => error!(error = %e, "retention sweep failed"),
            }
        }
    }

    async fn sweep(&self, retention_days: i64) -> Result<u64, DbError> {
        let result = sqlx::query(
            "DELETE FROM holy_spots WHERE date_time < now() - ($1 || ' days')::interval",
        )
        .bind(retention_days.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
