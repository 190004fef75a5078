use crate::errors::Error;
use crate::model::{DeviceId, LatestEntry, Reading, ReadingPayload};
use crate::service::TelemetryService;
use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error};

const DEFAULT_RANGE_COUNT: usize = 100;
const MAX_RANGE_COUNT: usize = 1000;

#[derive(Clone)]
struct AppState {
    service: TelemetryService,
}

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    offset: Option<usize>,
    count: Option<usize>,
}

pub fn create_router(service: TelemetryService) -> Router {
    let state = AppState { service };

    Router::new()
        .route("/api/data/latest", get(get_latest_for_all))
        .route("/api/data/all", delete(clean_all_devices))
        .route(
            "/api/data/:id",
            get(get_device_history)
                .post(add_reading)
                .delete(clean_device_data),
        )
        .route("/api/data/:id/latest", get(get_device_latest))
        .route("/api/data/:id/range", get(get_device_range))
        .with_state(state)
}

async fn add_reading(
    State(state): State<AppState>,
    device_id: Result<Path<DeviceId>, PathRejection>,
    payload: Result<Json<ReadingPayload>, JsonRejection>,
) -> Result<Json<Reading>, AppError> {
    let Path(device_id) = device_id?;
    let Json(payload) = payload?;
    let reading = state.service.ingest(device_id, &payload).await?;
    Ok(Json(reading))
}

async fn get_latest_for_all(State(state): State<AppState>) -> Json<Vec<LatestEntry>> {
    Json(state.service.latest_for_all().await)
}

async fn get_device_history(
    State(state): State<AppState>,
    device_id: Result<Path<DeviceId>, PathRejection>,
) -> Result<Json<Vec<Reading>>, AppError> {
    let Path(device_id) = device_id?;
    Ok(Json(state.service.history(device_id).await?))
}

async fn get_device_latest(
    State(state): State<AppState>,
    device_id: Result<Path<DeviceId>, PathRejection>,
) -> Result<Json<Option<Reading>>, AppError> {
    let Path(device_id) = device_id?;
    Ok(Json(state.service.latest(device_id).await?))
}

async fn get_device_range(
    State(state): State<AppState>,
    device_id: Result<Path<DeviceId>, PathRejection>,
    params: Result<Query<RangeQuery>, QueryRejection>,
) -> Result<Json<Vec<Reading>>, AppError> {
    let Path(device_id) = device_id?;
    let Query(params) = params?;
    let offset = params.offset.unwrap_or(0);
    let count = params
        .count
        .unwrap_or(DEFAULT_RANGE_COUNT)
        .min(MAX_RANGE_COUNT);

    Ok(Json(state.service.range(device_id, offset, count).await?))
}

async fn clean_all_devices(
    State(state): State<AppState>,
) -> Result<Json<Vec<Reading>>, AppError> {
    Ok(Json(state.service.clean_all().await?))
}

async fn clean_device_data(
    State(state): State<AppState>,
    device_id: Result<Path<DeviceId>, PathRejection>,
) -> Result<Json<Vec<Reading>>, AppError> {
    let Path(device_id) = device_id?;
    Ok(Json(state.service.clean_device(device_id).await?))
}

struct AppError(Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!("API error: {}", self.0);
        } else {
            debug!("API request rejected: {}", self.0);
        }

        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

// Malformed paths, queries and bodies are validation failures like any other.
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self(Error::Validation(rejection.body_text()))
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        Self(Error::Validation(rejection.body_text()))
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        Self(Error::Validation(rejection.body_text()))
    }
}
