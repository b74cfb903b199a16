//! Local REST API.
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | GET | `/api/health` | Liveness check |
//! | GET | `/api/status` | Collector state, record counts, calibration, last cycle |
//! | GET | `/api/records?limit=N&synced=B` | Latest records, newest first |
//! | GET | `/api/calibration` | Active calibration profile (404 when uncalibrated) |
//! | POST | `/api/calibration/reload` | Re-read the calibration file |
//! | GET/PUT | `/api/interval` | Collection interval in seconds |

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::info;

use hivewatch_store::{RecordQuery, SensorRecord, StoreStats};
use hivewatch_types::CalibrationProfile;

use crate::collector::CycleReport;
use crate::config::validate_interval;
use crate::state::AppState;

/// Default number of records returned by `/api/records`.
pub const DEFAULT_RECORD_LIMIT: u32 = 100;
/// Upper bound on `limit` for `/api/records`.
pub const MAX_RECORD_LIMIT: u32 = 1000;

/// Create the API router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/status", get(get_status))
        .route("/api/records", get(get_records))
        .route("/api/calibration", get(get_calibration))
        .route("/api/calibration/reload", post(reload_calibration))
        .route("/api/interval", get(get_interval).put(update_interval))
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: OffsetDateTime::now_utc(),
    })
}

/// Collector section of the status response.
#[derive(Debug, Serialize)]
pub struct CollectorStatus {
    pub running: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    pub cycles: u64,
    pub interval_secs: u64,
}

/// Service status response.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub collector: CollectorStatus,
    pub records: StoreStats,
    pub calibrated: bool,
    pub last_cycle: Option<CycleReport>,
}

async fn get_status(State(state): State<Arc<AppState>>) -> Result<Json<StatusResponse>, AppError> {
    let records = state.store.lock().await.stats()?;
    let interval_secs = state.config.read().await.collector.interval_secs;
    let calibrated = state
        .calibration
        .read()
        .await
        .as_ref()
        .is_some_and(CalibrationProfile::is_usable);
    let last_cycle = state.collector.last_cycle.read().await.clone();

    Ok(Json(StatusResponse {
        collector: CollectorStatus {
            running: state.collector.is_running(),
            started_at: state.collector.started_at(),
            cycles: state.collector.cycles(),
            interval_secs,
        },
        records,
        calibrated,
        last_cycle,
    }))
}

/// Query parameters for `/api/records`.
#[derive(Debug, Default, Deserialize)]
pub struct RecordsQuery {
    pub limit: Option<u32>,
    pub synced: Option<bool>,
}

impl RecordsQuery {
    /// Validate the parameters and build the store query.
    pub fn to_query(&self) -> Result<RecordQuery, String> {
        let limit = self.limit.unwrap_or(DEFAULT_RECORD_LIMIT);
        if limit == 0 || limit > MAX_RECORD_LIMIT {
            return Err(format!(
                "limit must be between 1 and {}, got {}",
                MAX_RECORD_LIMIT, limit
            ));
        }
        let mut query = RecordQuery::new().limit(limit);
        query.synced = self.synced;
        Ok(query)
    }
}

async fn get_records(
    State(state): State<Arc<AppState>>,
    query: Result<Query<RecordsQuery>, QueryRejection>,
) -> Result<Json<Vec<SensorRecord>>, AppError> {
    let Query(params) = query.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let query = params.to_query().map_err(AppError::BadRequest)?;
    let records = state.store.lock().await.query(&query)?;
    Ok(Json(records))
}

async fn get_calibration(
    State(state): State<Arc<AppState>>,
) -> Result<Json<CalibrationProfile>, AppError> {
    state
        .calibration()
        .await
        .map(Json)
        .ok_or_else(|| AppError::NotFound("weight sensor is not calibrated".to_string()))
}

async fn reload_calibration(
    State(state): State<Arc<AppState>>,
) -> Result<Json<CalibrationProfile>, AppError> {
    match state.reload_calibration().await {
        Ok(Some(profile)) => Ok(Json(profile)),
        Ok(None) => Err(AppError::NotFound(
            "no calibration file, weight sensor is not calibrated".to_string(),
        )),
        Err(e) => Err(AppError::Internal(e.to_string())),
    }
}

/// Collection interval, used for both reads and updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalBody {
    pub interval_secs: u64,
}

async fn get_interval(State(state): State<Arc<AppState>>) -> Json<IntervalBody> {
    Json(IntervalBody {
        interval_secs: state.config.read().await.collector.interval_secs,
    })
}

async fn update_interval(
    State(state): State<Arc<AppState>>,
    body: Result<Json<IntervalBody>, JsonRejection>,
) -> Result<Json<IntervalBody>, AppError> {
    let Json(body) = body.map_err(|e| AppError::BadRequest(e.body_text()))?;
    validate_interval(body.interval_secs).map_err(AppError::BadRequest)?;

    state.config.write().await.collector.interval_secs = body.interval_secs;
    info!("Collection interval set to {}s", body.interval_secs);
    Ok(Json(body))
}

/// Application error type.
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Store(hivewatch_store::Error),
    Internal(String),
}

impl From<hivewatch_store::Error> for AppError {
    fn from(e: hivewatch_store::Error) -> Self {
        AppError::Store(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Store(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, Json(body)).into_response()
    }
}
