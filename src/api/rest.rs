// =============================================================================
// REST API facade — Axum 0.7
// =============================================================================
//
// Four read-only endpoints over the Persistence Service's IPC surface
// (§6). Health is public; the other three require a valid Bearer token via
// the teacher's `AuthBearer` extractor. Every error that crosses the IPC
// boundary is mapped through `error_response::ApiError` per §7's
// propagation policy table.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::api::auth::AuthBearer;
use crate::api::error_response::{ipc_error_to_flowtrace, ApiError};
use crate::app_state::AppState;
use crate::ipc::{ActionClass, Request, Response as IpcResponse};

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/candles", get(candles))
        .route("/api/v1/footprints", get(candles))
        .route("/api/v1/gaps", get(gaps))
        .route("/api/v1/ws", get(crate::api::ws::ws_handler))
        .layer(cors)
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    ipc_connected: bool,
    worker_count: usize,
    server_time: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        ipc_connected: state.ipc.is_connected(),
        worker_count: state.supervisor.worker_ids().len(),
        server_time: chrono::Utc::now().timestamp_millis(),
    })
}

#[derive(Deserialize)]
struct CandleQuery {
    exchange: String,
    symbol: String,
    timeframe: String,
    start: Option<i64>,
    end: Option<i64>,
    limit: Option<u32>,
}

/// Serves both `/api/v1/candles` and `/api/v1/footprints` — a
/// `FootprintCandle` already carries the full bin histogram, so there is no
/// separate footprint-only representation to build (§6).
async fn candles(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Query(q): Query<CandleQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let request = Request::CandleFindBySymbol {
        exchange: q.exchange,
        symbol: q.symbol,
        timeframe: q.timeframe,
        start: q.start,
        end: q.end,
        limit: q.limit,
    };
    match state.ipc.call(ActionClass::Candle, request).await {
        Ok(IpcResponse::Candles { candles }) => Ok(Json(candles)),
        Ok(IpcResponse::Error { kind, message }) => Err(ApiError(ipc_error_to_flowtrace(&kind, message))),
        Ok(other) => Err(ApiError(crate::error::FlowtraceError::Fatal(format!(
            "unexpected persistence response: {other:?}"
        )))),
        Err(e) => Err(ApiError(e)),
    }
}

#[derive(Deserialize)]
struct GapQuery {
    exchange: Option<String>,
    symbol: Option<String>,
    synced: Option<bool>,
}

async fn gaps(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Query(q): Query<GapQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let request = Request::GapLoad { exchange: q.exchange, symbol: q.symbol, synced: q.synced };
    match state.ipc.call(ActionClass::Gap, request).await {
        Ok(IpcResponse::GapRows { rows }) => Ok(Json(rows)),
        Ok(IpcResponse::Error { kind, message }) => Err(ApiError(ipc_error_to_flowtrace(&kind, message))),
        Ok(other) => Err(ApiError(crate::error::FlowtraceError::Fatal(format!(
            "unexpected persistence response: {other:?}"
        )))),
        Err(e) => Err(ApiError(e)),
    }
}
