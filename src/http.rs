//! Read-only HTTP surface plus liveness/metrics endpoints
//! (SPEC_FULL.md §11). Grounded in the teacher's `health`/`ready`/
//! `metrics` handlers and `AppState` pattern.

use crate::broadcast::Broadcaster;
use crate::geo::GeoResolver;
use crate::model::GeoRecord;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Json, Router};
use axum::routing::get;
use redis::aio::ConnectionManager;
use serde::Serialize;
use sqlx::PgPool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

#[derive(Clone)]
pub struct AppState {
    pub broadcaster: Broadcaster,
    pub pool: PgPool,
    pub valkey: ConnectionManager,
    pub geo: Arc<Mutex<GeoResolver>>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics))
        .route("/radio", get(radio_stub))
        .route("/submit_spot", get(submit_spot_stub))
        .route("/spots_ws", get(ws_upgrade))
        .route("/geocache/all", get(geocache_all))
        .route("/geocache/:callsign", get(geocache_one))
        .route("/locator/:callsign", get(locator_lookup))
        .route("/spots_with_issues", get(spots_with_issues))
        .with_state(state)
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn ready(State(state): State<AppState>) -> StatusCode {
    let mut conn = state.valkey.clone();
    let pong: Result<String, redis::RedisError> = redis::cmd("PING").query_async(&mut conn).await;
    match pong {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            warn!(error = %e, "readiness check failed: valkey unreachable");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

#[derive(Serialize)]
struct MetricsResponse {
    received: u64,
    broadcast: u64,
    skipped_unresolved: u64,
    active_subscribers: usize,
}

async fn metrics(State(state): State<AppState>) -> Json<MetricsResponse> {
    let c = &state.broadcaster.counters;
    Json(MetricsResponse {
        received: c.received.load(Ordering::Relaxed),
        broadcast: c.broadcast.load(Ordering::Relaxed),
        skipped_unresolved: c.skipped_unresolved.load(Ordering::Relaxed),
        active_subscribers: state.broadcaster.active_subscribers(),
    })
}

/// The radio-control sidecar itself is out of scope (spec.md
/// Non-goals); the path exists so clients probing the original's
/// routing surface get a clean, honest answer instead of a 404.
async fn radio_stub() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "unavailable" }))
}

/// Upstream spot submission is out of scope; accept the upgrade and
/// close immediately so the path behaves like a real (if unused) route.
async fn submit_spot_stub(ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(|mut socket| async move {
        let _ = socket.close().await;
    })
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        state.broadcaster.handle_socket(socket).await;
    })
}

async fn geocache_one(State(state): State<AppState>, Path(callsign): Path<String>) -> impl IntoResponse {
    let row = sqlx::query_as::<_, (String, String, f64, f64, String, String)>(
        "SELECT locator_source, locator, lat, lon, country, continent FROM geo_cache WHERE callsign = $1",
    )
    .bind(callsign.to_uppercase())
    .fetch_optional(&state.pool)
    .await;

    match row {
        Ok(Some((locator_source, locator, lat, lon, country, continent))) => {
            Json(GeoRecord { locator_source, locator, lat, lon, country, continent }).into_response()
        }
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            warn!(error = %e, "geocache lookup failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn geocache_all(State(state): State<AppState>) -> impl IntoResponse {
    let rows = sqlx::query_as::<_, (String, String, String, f64, f64, String, String)>(
        "SELECT callsign, locator_source, locator, lat, lon, country, continent FROM geo_cache",
    )
    .fetch_all(&state.pool)
    .await;

    match rows {
        Ok(rows) => {
            let out: Vec<_> = rows
                .into_iter()
                .map(|(callsign, locator_source, locator, lat, lon, country, continent)| {
                    serde_json::json!({
                        "callsign": callsign,
                        "locator_source": locator_source,
                        "locator": locator,
                        "lat": lat,
                        "lon": lon,
                        "country": country,
                        "continent": continent,
                    })
                })
                .collect();
            Json(out).into_response()
        }
        Err(e) => {
            warn!(error = %e, "geocache_all query failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn locator_lookup(State(state): State<AppState>, Path(callsign): Path<String>) -> impl IntoResponse {
    let fields = state.geo.lock().await.resolve(&callsign).await;
    if !fields.is_resolved() {
        return Json(serde_json::json!({
            "callsign": callsign,
            "error": "no locator resolvable",
        }))
        .into_response();
    }
    Json(serde_json::json!({
        "callsign": callsign,
        "locator": fields.locator,
        "lat": fields.lat,
        "lon": fields.lon,
        "source": fields.locator_source,
    }))
    .into_response()
}

async fn spots_with_issues(State(state): State<AppState>) -> impl IntoResponse {
    let rows = sqlx::query_as::<_, (String, String, f64, String, String)>(
        "SELECT spotter_callsign, dx_callsign, frequency, comment, issue FROM spots_with_issues ORDER BY date_time DESC LIMIT 200",
    )
    .fetch_all(&state.pool)
    .await;

    match rows {
        Ok(rows) => {
            let out: Vec<_> = rows
                .into_iter()
                .map(|(spotter_callsign, dx_callsign, frequency, comment, issue)| {
                    serde_json::json!({
                        "spotter_callsign": spotter_callsign,
                        "dx_callsign": dx_callsign,
                        "frequency": frequency,
                        "comment": comment,
                        "issue": issue,
                    })
                })
                .collect();
            Json(out).into_response()
        }
        Err(e) => {
            warn!(error = %e, "spots_with_issues query failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
