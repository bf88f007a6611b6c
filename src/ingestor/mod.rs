// =============================================================================
// Ingestor — WebSocket trade ingestion with overlap-based rotation
// =============================================================================
//
// One `run_exchange` task per exchange; it maintains a primary connection
// and, during rotation, a secondary, and forwards every parsed trade to the
// Router for symbol-owner lookup and on to the Supervisor for delivery to
// the owning worker. Grounded on the teacher's
// `market_data/trade_stream.rs::run_trade_stream` connect/read loop.
// =============================================================================

pub mod exchange;
pub mod rotation;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tracing::{debug, error, info, warn};

use crate::domain::TradeData;
use crate::routing::Router;
use crate::supervisor::{Supervisor, WorkerCommand};

use rotation::{RotationAction, RotationConfig, RotationScheduler};

const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);
const ROTATION_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Trades for the same (symbol, worker) are coalesced into one
/// `ProcessTrades` batch at most this often, bounding IPC chattiness
/// without adding visible latency to candle completion.
const BATCH_FLUSH_INTERVAL: Duration = Duration::from_millis(50);

pub struct IngestorConfig {
    pub exchange: String,
    pub symbols: Vec<String>,
    pub rotation: RotationConfig,
}

/// Runs until the process is told to shut down (the caller aborts the
/// returned `JoinHandle`). Reconnects the primary forever on failure;
/// rotation spawns/retires the secondary per spec.md §4.6.
pub fn spawn_exchange_ingestor(config: IngestorConfig, router: Arc<Router>, supervisor: Arc<Supervisor>) -> JoinHandle<()> {
    tokio::spawn(run_exchange(config, router, supervisor))
}

async fn run_exchange(config: IngestorConfig, router: Arc<Router>, supervisor: Arc<Supervisor>) {
    let (trade_tx, mut trade_rx) = mpsc::unbounded_channel::<TradeData>();
    let mut scheduler = RotationScheduler::new(config.rotation);

    let mut primary = spawn_connection(config.exchange.clone(), config.symbols.clone(), trade_tx.clone());
    let mut secondary: Option<JoinHandle<()>> = None;
    let mut rotation_ticker = tokio::time::interval(ROTATION_POLL_INTERVAL);
    let mut batch_ticker = tokio::time::interval(BATCH_FLUSH_INTERVAL);
    let mut pending: HashMap<String, Vec<TradeData>> = HashMap::new();

    scheduler.on_primary_opened();

    loop {
        tokio::select! {
            trade = trade_rx.recv() => {
                match trade {
                    Some(trade) => pending.entry(trade.symbol.clone()).or_default().push(trade),
                    None => break,
                }
            }
            _ = batch_ticker.tick() => {
                flush_pending(&mut pending, &router, &supervisor, &config.exchange);
            }
            _ = rotation_ticker.tick() => {
                match scheduler.poll() {
                    RotationAction::SpawnSecondary => {
                        info!(exchange = %config.exchange, "rotation: spawning secondary connection");
                        secondary = Some(spawn_connection(config.exchange.clone(), config.symbols.clone(), trade_tx.clone()));
                        scheduler.on_secondary_opened();
                    }
                    RotationAction::RetrySecondary => {
                        warn!(exchange = %config.exchange, "rotation: retrying secondary connection");
                        secondary = Some(spawn_connection(config.exchange.clone(), config.symbols.clone(), trade_tx.clone()));
                        scheduler.on_secondary_opened();
                    }
                    RotationAction::PromoteSecondaryAndClosePrimary => {
                        info!(exchange = %config.exchange, "rotation: promoting secondary to primary");
                        primary.abort();
                        if let Some(handle) = secondary.take() {
                            primary = handle;
                        }
                    }
                    RotationAction::FallBackToReactiveReconnect | RotationAction::None => {}
                }
            }
        }

        if primary.is_finished() {
            warn!(exchange = %config.exchange, "primary connection dropped, reconnecting");
            let action = scheduler.on_primary_closed_without_secondary();
            if action == RotationAction::FallBackToReactiveReconnect {
                tokio::time::sleep(RECONNECT_BACKOFF).await;
            }
            primary = spawn_connection(config.exchange.clone(), config.symbols.clone(), trade_tx.clone());
            scheduler.on_primary_opened();
        }
    }
}

fn flush_pending(pending: &mut HashMap<String, Vec<TradeData>>, router: &Router, supervisor: &Supervisor, exchange: &str) {
    for (symbol, trades) in pending.drain() {
        if trades.is_empty() {
            continue;
        }
        match router.route(&symbol) {
            Ok(worker_id) => {
                let command = WorkerCommand::ProcessTrades { exchange: exchange.to_string(), symbol: symbol.clone(), trades };
                if let Err(e) = supervisor.send_command(&worker_id, command) {
                    error!(%symbol, %worker_id, error = %e, "failed to forward trade batch to worker");
                }
            }
            Err(e) => {
                debug!(%symbol, error = %e, "dropping trade batch for unroutable symbol");
            }
        }
    }
}

/// Spawns one connection's read loop; it forwards every parsed trade to
/// `trade_tx` and exits (without panicking) on disconnect or parse
/// failure, so the caller can detect completion via `JoinHandle::is_finished`.
fn spawn_connection(exchange: String, symbols: Vec<String>, trade_tx: mpsc::UnboundedSender<TradeData>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let url = match exchange::ws_url(&exchange, &symbols) {
            Ok(url) => url,
            Err(e) => {
                error!(%exchange, error = %e, "failed to build websocket url");
                return;
            }
        };

        let (ws_stream, _response) = match connect_async(&url).await {
            Ok(pair) => pair,
            Err(e) => {
                error!(%exchange, %url, error = %e, "failed to connect trade websocket");
                return;
            }
        };
        info!(%exchange, %url, "trade websocket connected");

        let (mut write, mut read) = ws_stream.split();
        if let Ok(subscribe) = exchange::subscribe_message(&exchange, &symbols) {
            use futures_util::SinkExt;
            if let Err(e) = write.send(tokio_tungstenite::tungstenite::Message::Text(subscribe)).await {
                warn!(%exchange, error = %e, "failed to send subscribe message");
            }
        }

        loop {
            match read.next().await {
                Some(Ok(tokio_tungstenite::tungstenite::Message::Text(text))) => {
                    match exchange::parse_trades(&exchange, &text) {
                        Ok(trades) => {
                            for trade in trades {
                                if trade_tx.send(trade).is_err() {
                                    return;
                                }
                            }
                        }
                        Err(e) => debug!(%exchange, error = %e, "unrecognised frame, skipping"),
                    }
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!(%exchange, error = %e, "trade websocket read error");
                    return;
                }
                None => {
                    warn!(%exchange, "trade websocket stream ended");
                    return;
                }
            }
        }
    })
}
