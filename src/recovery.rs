// =============================================================================
// Gap recovery orchestrator
// =============================================================================
//
// spec.md §4.5: "A recovery orchestrator (REST-based) periodically reads
// unsynced gaps, fetches the missing trades via the exchange REST adapter
// (out of scope), applies them into the affected candles as if live, and
// calls `gap_mark_synced` for every gap whose full range has been covered."
//
// Wire formats for the REST fetch are explicitly out of scope, so only
// Binance is wired up here (`binance::client::BinanceClient`, a public,
// unsigned endpoint) — the same pragmatic narrowing the ingestor side makes
// for WS adapters. Recovered trades are routed through the ordinary
// Router -> Supervisor -> `WorkerCommand::ProcessTrades` path, identical to
// live trades, so the Candle Engine's gap-detection and bin logic never
// need a second code path for backfilled data.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::binance::client::BinanceClient;
use crate::domain::{GapRecord, TradeData};
use crate::ipc::{ActionClass, IpcClient, Request, Response};
use crate::routing::Router;
use crate::supervisor::{Supervisor, WorkerCommand};

/// Default interval between recovery sweeps when none is configured.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

pub struct RecoveryConfig {
    pub poll_interval: Duration,
    /// Max aggTrades pages fetched per gap per sweep, bounding a single
    /// pathologically large gap from starving other gaps in the same pass.
    pub max_pages_per_gap: u32,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        RecoveryConfig { poll_interval: DEFAULT_POLL_INTERVAL, max_pages_per_gap: 20 }
    }
}

/// Spawns the orchestrator as a background tokio task; returns its handle
/// so the caller can abort it on shutdown.
pub fn spawn(
    ipc: IpcClient,
    router: Arc<Router>,
    supervisor: Arc<Supervisor>,
    config: RecoveryConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let binance = BinanceClient::new();
        let mut ticker = tokio::time::interval(config.poll_interval);
        loop {
            ticker.tick().await;
            run_sweep(&ipc, &router, &supervisor, &binance, &config).await;
        }
    })
}

async fn run_sweep(
    ipc: &IpcClient,
    router: &Router,
    supervisor: &Supervisor,
    binance: &BinanceClient,
    config: &RecoveryConfig,
) {
    let request = Request::GapLoad { exchange: None, symbol: None, synced: Some(false) };
    let gaps = match ipc.call(ActionClass::Gap, request).await {
        Ok(Response::GapRows { rows }) => rows,
        Ok(Response::Error { kind, message }) => {
            warn!(kind, message, "gap_load failed during recovery sweep");
            return;
        }
        Ok(other) => {
            warn!(?other, "unexpected response to gap_load");
            return;
        }
        Err(e) => {
            warn!(error = %e, "IPC call failed during recovery sweep");
            return;
        }
    };

    if gaps.is_empty() {
        return;
    }
    info!(count = gaps.len(), "recovery sweep: unsynced gaps found");

    let mut synced_ids = Vec::new();
    for gap in gaps {
        if gap.exchange != "binance" {
            warn!(exchange = %gap.exchange, "no REST adapter for exchange, skipping gap recovery");
            continue;
        }
        match recover_gap(&gap, binance, router, supervisor, config.max_pages_per_gap).await {
            Ok(true) => {
                if let Some(id) = gap.id {
                    synced_ids.push(id);
                }
            }
            Ok(false) => {
                info!(symbol = %gap.symbol, from = gap.from_trade_id, to = gap.to_trade_id, "gap partially recovered, will retry next sweep");
            }
            Err(e) => {
                warn!(symbol = %gap.symbol, error = %e, "gap recovery fetch failed, will retry next sweep");
            }
        }
    }

    if !synced_ids.is_empty() {
        let request = Request::GapMarkSynced { ids: synced_ids.clone() };
        match ipc.call(ActionClass::Gap, request).await {
            Ok(Response::Ok) => info!(count = synced_ids.len(), "gaps marked synced"),
            Ok(Response::Error { kind, message }) => warn!(kind, message, "gap_mark_synced failed"),
            Ok(other) => warn!(?other, "unexpected response to gap_mark_synced"),
            Err(e) => warn!(error = %e, "IPC call failed marking gaps synced"),
        }
    }
}

/// Fetches and replays trades covering `[gap.from_trade_id, gap.to_trade_id]`.
/// Returns `Ok(true)` only if the full range was retrieved and replayed.
async fn recover_gap(
    gap: &GapRecord,
    binance: &BinanceClient,
    router: &Router,
    supervisor: &Supervisor,
    max_pages: u32,
) -> anyhow::Result<bool> {
    let mut next_id = gap.from_trade_id;
    let mut collected: Vec<TradeData> = Vec::new();

    for _ in 0..max_pages {
        if next_id > gap.to_trade_id {
            break;
        }
        let remaining = (gap.to_trade_id - next_id + 1).clamp(1, crate::binance::client::MAX_AGG_TRADES_LIMIT as i64) as u32;
        let page = binance.fetch_agg_trades_from(&gap.symbol, next_id, remaining).await?;
        if page.is_empty() {
            break;
        }
        let last_id = page.last().map(|t| t.trade_id).unwrap_or(next_id);
        collected.extend(page.into_iter().filter(|t| t.trade_id >= gap.from_trade_id && t.trade_id <= gap.to_trade_id));
        next_id = last_id + 1;
    }

    if collected.is_empty() {
        return Ok(false);
    }
    let fully_covered = collected.last().map(|t| t.trade_id).unwrap_or(0) >= gap.to_trade_id
        && collected.first().map(|t| t.trade_id).unwrap_or(i64::MAX) <= gap.from_trade_id;

    let worker_id = router.route(&gap.symbol)?;
    supervisor.send_command(
        &worker_id,
        WorkerCommand::ProcessTrades { exchange: gap.exchange.clone(), symbol: gap.symbol.clone(), trades: collected },
    )?;

    Ok(fully_covered)
}
