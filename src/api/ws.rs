// =============================================================================
// WebSocket feed — candle completion/update push
// =============================================================================
//
// Grounded on the teacher's `ws.rs` upgrade/auth/ping-pong shape, with the
// push side replaced: instead of polling a trading-state snapshot every
// 500ms, this subscribes to the Supervisor event broadcast (bridged in
// `app_state::AppState::spawn_event_bridge`) and forwards
// `CandleComplete`/`CandleUpdate` events to the client as they happen.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::{Query, State},
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::api::auth::validate_token;
use crate::app_state::AppState;
use crate::supervisor::WorkerEvent;

#[derive(Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    let token = query.token.unwrap_or_default();
    if !validate_token(&token) {
        warn!("WebSocket upgrade rejected: invalid or missing token");
        return (axum::http::StatusCode::FORBIDDEN, "invalid token").into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum CandlePush {
    CandleComplete { worker_id: String, candle: Box<crate::domain::FootprintCandle> },
    CandleUpdate { worker_id: String, symbol: String, timeframe: String },
    GapDetected { worker_id: String, gap: crate::domain::GapRecord },
    Backpressure { worker_id: String, symbol: String },
}

impl CandlePush {
    fn from_event(event: WorkerEvent) -> Option<Self> {
        match event {
            WorkerEvent::CandleComplete { worker_id, candle } => Some(CandlePush::CandleComplete { worker_id, candle }),
            WorkerEvent::CandleUpdate { worker_id, symbol, timeframe } => {
                Some(CandlePush::CandleUpdate { worker_id, symbol, timeframe })
            }
            WorkerEvent::GapDetected { worker_id, gap } => Some(CandlePush::GapDetected { worker_id, gap }),
            WorkerEvent::Backpressure { worker_id, symbol } => Some(CandlePush::Backpressure { worker_id, symbol }),
            _ => None,
        }
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = state.candle_events.subscribe();

    let push_loop = async {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Some(push) = CandlePush::from_event(event) {
                        let Ok(text) = serde_json::to_string(&push) else { continue };
                        if sender.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "WebSocket client lagged, candle events dropped");
                    continue;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    let recv_loop = async {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Close(_) => break,
                Message::Ping(_) | Message::Pong(_) | Message::Text(_) | Message::Binary(_) => continue,
            }
        }
    };

    tokio::select! {
        _ = push_loop => {}
        _ = recv_loop => {}
    }
}
