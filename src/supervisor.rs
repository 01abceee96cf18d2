//! Supervisor (spec.md §4.10/§5): builds every component from `Config`
//! and owns the process-level task topology. Mirrors the teacher's flat
//! `main()` task layout, generalized to this spec's stage count.

use crate::broadcast::Broadcaster;
use crate::classify::FrequencyClassifier;
use crate::cluster::{load_cluster_endpoints, ClusterSession};
use crate::config::Config;
use crate::dedup::Deduplicator;
use crate::enrich::Enricher;
use crate::geo::locator::PrefixTable;
use crate::geo::{GeoResolver, QrzSession};
use crate::http::{router, AppState};
use crate::model::RawSpot;
use crate::persist::Persister;
use crate::streams::{EgressReader, EgressWriter, IngressReader, IngressWriter};
use redis::aio::ConnectionManager;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const RAW_SPOT_CHANNEL_CAPACITY: usize = 10_000;
const DB_POOL_MIN: u32 = 2;
const DB_POOL_MAX: u32 = 10;

pub struct Supervisor {
    config: Config,
}

impl Supervisor {
    pub fn new(config: Config) -> Self {
        Supervisor { config }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let config = self.config;
        let cancel = CancellationToken::new();

        let pool = PgPoolOptions::new()
            .min_connections(DB_POOL_MIN)
            .max_connections(DB_POOL_MAX)
            .acquire_timeout(Duration::from_secs(10))
            .connect(&config.postgres.url())
            .await?;

        let valkey_client = redis::Client::open(config.valkey.url())?;
        let valkey_conn = ConnectionManager::new(valkey_client).await?;

        let classifier = Arc::new(FrequencyClassifier::load(
            &std::fs::read_to_string(&config.bands_csv_path)?,
            &std::fs::read_to_string(&config.modes_json_path)?,
        )?);
        let prefixes = PrefixTable::load(&std::fs::read_to_string(&config.prefixes_csv_path)?)?;

        let qrz = Arc::new(QrzSession::new(
            config.qrz.user.clone(),
            config.qrz.password.clone(),
            config.qrz.api_key.clone(),
            config.qrz.refresh_interval,
        ));
        qrz.start().await;

        let geo_resolver = GeoResolver::new(
            valkey_conn.clone(),
            qrz.clone(),
            prefixes,
            config.valkey.geo_expiration_secs,
        );

        let broadcaster = Broadcaster::new(pool.clone());
        let persister = Arc::new(Persister::new(pool.clone()));

        let mut tasks = Vec::new();

        tasks.push(tokio::spawn({
            let qrz = qrz.clone();
            let cancel = cancel.clone();
            async move { qrz.refresh_loop(cancel).await }
        }));

        let (raw_tx, raw_rx) = mpsc::channel::<RawSpot>(RAW_SPOT_CHANNEL_CAPACITY);

        let endpoints = load_cluster_endpoints(&std::fs::read_to_string(&config.cluster_csv_path)?);
        info!(count = endpoints.len(), "loaded cluster endpoints");
        for (host, port) in endpoints {
            let session = ClusterSession::new(host, port, config.telnet_username.clone());
            let tx = raw_tx.clone();
            let cancel = cancel.clone();
            tasks.push(tokio::spawn(async move { session.run(tx, cancel).await }));
        }
        drop(raw_tx);

        // ClusterSession -> (Deduplicator) -> IngressStream (spec.md §2):
        // the in-process mpsc above is purely the per-process fan-in from
        // many telnet sessions into one dedup stage; the broker boundary
        // starts at IngressWriter, one XADD per admitted RawSpot.
        tasks.push(tokio::spawn(dedup_publish_task(
            raw_rx,
            valkey_conn.clone(),
            config.valkey.spot_expiration_secs,
            cancel.clone(),
        )));

        // IngressStream -> Enricher -> {Persister, EgressStream}: a
        // consumer-group reader of RawSpots, enriching and persisting
        // each before handing broadcastable ones to EgressWriter.
        let ingress_reader = IngressReader::new(valkey_conn.clone(), "enricher-1".to_string()).await?;
        tasks.push(tokio::spawn(enrich_task(
            ingress_reader,
            classifier,
            geo_resolver,
            persister.clone(),
            EgressWriter::new(valkey_conn.clone()),
            cancel.clone(),
        )));

        tasks.push(tokio::spawn({
            let persister = persister.clone();
            let retention_days = config.postgres.retention_days;
            let cancel = cancel.clone();
            async move { persister.run_retention_sweeper(retention_days, cancel).await }
        }));

        let egress_reader = EgressReader::new(valkey_conn.clone(), "broadcaster-1".to_string()).await?;
        tasks.push(tokio::spawn({
            let broadcaster = broadcaster.clone();
            let cancel = cancel.clone();
            async move { broadcaster.run(egress_reader, cancel).await }
        }));

        let state = AppState {
            broadcaster,
            pool: pool.clone(),
            valkey: valkey_conn.clone(),
            geo: Arc::new(Mutex::new(GeoResolver::new(
                valkey_conn,
                qrz,
                PrefixTable::load(&std::fs::read_to_string(&config.prefixes_csv_path)?)?,
                config.valkey.geo_expiration_secs,
            ))),
        };
        let app = router(state).layer(
            tower::ServiceBuilder::new()
                .layer(tower_http::trace::TraceLayer::new_for_http())
                .layer(tower_http::compression::CompressionLayer::new())
                .layer(tower_http::cors::CorsLayer::permissive()),
        );

        let listener = tokio::net::TcpListener::bind(&config.http_addr).await?;
        info!(addr = %config.http_addr, "listening");

        let server_cancel = cancel.clone();
        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { server_cancel.cancelled().await })
                .await
        });

        tokio::signal::ctrl_c().await.ok();
        info!("shutdown signal received");
        cancel.cancel();

        for task in tasks {
            let _ = task.await;
        }
        if let Err(e) = server.await? {
            error!(error = %e, "http server exited with error");
        }

        Ok(())
    }
}

/// Dedup -> IngressStream, single consumer of the raw spot fan-in
/// channel (spec.md §4.2, §4.8). Every spot admitted past the
/// deduplicator is durably queued for the Enricher; this is the
/// process's only non-broker-backed hop, and it ends the moment a spot
/// crosses onto IngressStream.
async fn dedup_publish_task(
    mut raw_rx: mpsc::Receiver<RawSpot>,
    valkey_conn: ConnectionManager,
    dedup_ttl_secs: u64,
    cancel: CancellationToken,
) {
    let mut dedup = Deduplicator::new(valkey_conn.clone(), dedup_ttl_secs);
    let mut ingress = IngressWriter::new(valkey_conn);

    loop {
        let raw = tokio::select! {
            r = raw_rx.recv() => r,
            _ = cancel.cancelled() => return,
        };

        let Some(raw) = raw else {
            info!("raw spot channel closed, ending dedup/publish task");
            return;
        };

        match dedup.admit(&raw).await {
            Ok(false) => continue,
            Err(e) => {
                error!(error = %e, "dedup store error, dropping spot defensively");
                continue;
            }
            Ok(true) => {}
        }

        if let Err(e) = ingress.publish(&raw).await {
            error!(error = %e, "publish to ingress stream failed");
        }
    }
}

/// IngressStream -> Enrich -> {Persist, EgressStream}, single consumer
/// of the ingress consumer group (spec.md §4.6/§4.8). Every entry read
/// is acked once handled, success or failure alike — redelivery is for
/// process restarts, not per-spot retry (spec.md §7).
async fn enrich_task(
    mut ingress: IngressReader,
    classifier: Arc<FrequencyClassifier>,
    geo_resolver: GeoResolver,
    persister: Arc<Persister>,
    mut egress: EgressWriter,
    cancel: CancellationToken,
) {
    let mut enricher = Enricher::new(classifier, geo_resolver);

    loop {
        if cancel.is_cancelled() {
            info!("enrich task cancelled");
            return;
        }

        let entries = tokio::select! {
            r = ingress.read() => r,
            _ = cancel.cancelled() => return,
        };

        let entries = match entries {
            Ok(entries) => entries,
            Err(e) => {
                error!(error = %e, "ingress read failed, retrying");
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                continue;
            }
        };

        for (entry_id, raw) in entries {
            match enricher.enrich(raw).await {
                Ok(Some(enriched)) => {
                    if let Err(e) = persister.persist(&enriched).await {
                        error!(error = %e, "persist failed");
                    }
                    if enriched.broadcastable() {
                        if let Err(e) = egress.publish(&enriched).await {
                            error!(error = %e, "publish to egress stream failed");
                        }
                    }
                }
                Ok(None) => {}
                Err(e) => error!(error = %e, "enrich failed"),
            }

            if let Err(e) = ingress.ack(&entry_id).await {
                error!(entry_id = %entry_id, error = %e, "failed to ack ingress stream entry");
            }
        }
    }
}
