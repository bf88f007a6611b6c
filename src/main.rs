// =============================================================================
// FlowTrace — Main Entry Point
// =============================================================================
//
// Boots the Router, the Worker Pool Supervisor, one WebSocket ingestor per
// configured exchange, the gap-recovery orchestrator, and the REST/WS
// façade, then runs until ctrl_c (§0, §4).
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{error, info, warn};

use flowtrace::app_state::AppState;
use flowtrace::config::EngineConfig;
use flowtrace::domain::{ExchangeMetadata, SymbolEntry, SymbolRegistry, SymbolStatus};
use flowtrace::ingestor::{spawn_exchange_ingestor, IngestorConfig};
use flowtrace::ipc::IpcClient;
use flowtrace::recovery::{self, RecoveryConfig};
use flowtrace::routing::Router;
use flowtrace::supervisor::{Supervisor, SupervisorConfig, WorkerCommand};

/// Builds the activation gate (§3, `domain::symbol_registry`) from the
/// persisted symbol/exchange lists. There is no signed exchange-info
/// endpoint left to source live metadata from (dropped with the HMAC
/// client — see DESIGN.md), so every configured symbol is registered as
/// admin-enabled and `TRADING` up front; operators take symbols out of
/// rotation by editing `flowtrace_config.json`, not this registry, but the
/// registry is still the single place the boot sequence checks before it
/// opens a subscription or asks the Router to route.
fn build_symbol_registry(config: &EngineConfig) -> SymbolRegistry {
    let registry = SymbolRegistry::new();
    let now = chrono::Utc::now();
    for exchange in &config.persisted.exchanges {
        for symbol in &config.persisted.symbols {
            let (tick_value, _) = symbol_seed(symbol);
            let metadata = match exchange.as_str() {
                "binance" => Some(ExchangeMetadata::Binance {
                    base_asset: symbol.trim_end_matches("USDT").to_string(),
                    quote_asset: "USDT".to_string(),
                    native_status: "TRADING".to_string(),
                }),
                "bybit" => Some(ExchangeMetadata::Bybit {
                    base_coin: symbol.trim_end_matches("USDT").to_string(),
                    quote_coin: "USDT".to_string(),
                    native_status: "Trading".to_string(),
                }),
                "okx" => Some(ExchangeMetadata::Okx {
                    base_ccy: symbol.trim_end_matches("USDT").to_string(),
                    quote_ccy: "USDT".to_string(),
                    native_status: "live".to_string(),
                }),
                other => {
                    warn!(exchange = other, "no exchange metadata mapping, symbol left inactive");
                    None
                }
            };
            registry.upsert(SymbolEntry {
                id: format!("{exchange}:{symbol}"),
                exchange: exchange.clone(),
                symbol: symbol.clone(),
                tick_value,
                bin_multiplier: 1,
                price_precision: 2,
                quantity_precision: 6,
                status: SymbolStatus::Active,
                enabled_by_admin: true,
                is_streaming: false,
                is_processing: false,
                metadata,
                created_at: now,
                updated_at: now,
            });
        }
    }
    registry
}

/// A minimal built-in seed for `tick_value`/a first reference price per
/// symbol, standing in for the exchange symbol-info lookup the teacher's
/// `BinanceClient::get_symbol_info` used to provide (dropped along with the
/// signed-REST machinery — see DESIGN.md). Unknown symbols fall back to
/// conservative defaults; the engine's own bin-multiplier adaptation
/// (§4.3) corrects for a rough reference price within a few updates.
fn symbol_seed(symbol: &str) -> (Decimal, Decimal) {
    let table: HashMap<&str, (Decimal, Decimal)> = HashMap::from([
        ("BTCUSDT", (dec!(0.01), dec!(60000))),
        ("ETHUSDT", (dec!(0.01), dec!(3000))),
        ("SOLUSDT", (dec!(0.001), dec!(150))),
    ]);
    table.get(symbol).copied().unwrap_or((dec!(0.01), dec!(100)))
}

const HEALTH_PROBE_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();
    flowtrace::init_tracing();

    info!("FlowTrace starting up");

    let config = EngineConfig::load("flowtrace_config.json");

    let router = Arc::new(Router::new());
    let supervisor = Arc::new(Supervisor::new(
        router.clone(),
        SupervisorConfig {
            worker_count: config.persisted.worker_count,
            socket_path: config.ipc_socket_path.clone(),
            flush_interval: config.state_flush_interval,
            batch_size: config.state_batch_size,
            ready_timeout: Duration::from_secs(30),
        },
    ));

    supervisor.initialize()?;
    info!(workers = supervisor.worker_ids().len(), "worker pool ready");

    let symbol_registry = build_symbol_registry(&config);

    for exchange in &config.persisted.exchanges {
        for symbol in symbol_registry.active_symbols(exchange) {
            let (tick_value, reference_price) = symbol_seed(&symbol);
            match router.route(&symbol) {
                Ok(worker_id) => {
                    let command = WorkerCommand::AssignSymbol {
                        exchange: exchange.clone(),
                        symbol: symbol.clone(),
                        tick_value,
                        bin_multiplier: None,
                        reference_price,
                    };
                    if let Err(e) = supervisor.send_command(&worker_id, command) {
                        error!(%symbol, %worker_id, error = %e, "failed to assign symbol to worker");
                    }
                }
                Err(e) => error!(%symbol, error = %e, "failed to route symbol at startup"),
            }
        }
    }

    // ── API facade state ─────────────────────────────────────────────────
    let api_ipc = IpcClient::spawn(config.ipc_socket_path.clone());
    let state = AppState::new(router.clone(), supervisor.clone(), api_ipc);
    state.spawn_event_bridge();

    let app = flowtrace::api::rest::router(state.clone());
    let bind_addr = config.bind_addr.clone();
    tokio::spawn(async move {
        let listener = tokio::net::TcpListener::bind(&bind_addr)
            .await
            .expect("failed to bind API server");
        info!(addr = %bind_addr, "API server listening");
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "API server exited");
        }
    });

    // ── Ingestors, one per configured exchange ───────────────────────────
    let mut ingestor_handles = Vec::new();
    for exchange in &config.persisted.exchanges {
        let active_symbols = symbol_registry.active_symbols(exchange);
        let ingestor_config = IngestorConfig {
            exchange: exchange.clone(),
            symbols: active_symbols.clone(),
            rotation: flowtrace::ingestor::rotation::RotationConfig {
                enabled: config.ws_rotation_enabled,
                trigger: Duration::from_millis(config.ws_rotation_trigger_ms),
                overlap: Duration::from_millis(config.ws_rotation_overlap_ms),
                retry_interval: Duration::from_millis(config.ws_rotation_retry_interval_ms),
            },
        };
        info!(%exchange, symbols = active_symbols.len(), "starting exchange ingestor");
        ingestor_handles.push(spawn_exchange_ingestor(ingestor_config, router.clone(), supervisor.clone()));
    }

    // ── Gap recovery orchestrator ────────────────────────────────────────
    let recovery_ipc = IpcClient::spawn(config.ipc_socket_path.clone());
    let recovery_handle = recovery::spawn(recovery_ipc, router.clone(), supervisor.clone(), RecoveryConfig::default());

    // ── Health probe loop ─────────────────────────────────────────────────
    let health_supervisor = supervisor.clone();
    let health_handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(HEALTH_PROBE_INTERVAL);
        loop {
            ticker.tick().await;
            let supervisor = health_supervisor.clone();
            tokio::task::spawn_blocking(move || supervisor.run_health_probe_once())
                .await
                .ok();
        }
    });

    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received, stopping");

    recovery_handle.abort();
    health_handle.abort();
    for handle in ingestor_handles {
        handle.abort();
    }

    let shutdown_supervisor = supervisor.clone();
    tokio::task::spawn_blocking(move || shutdown_supervisor.shutdown()).await?;

    if let Err(e) = config.save_persisted("flowtrace_config.json") {
        error!(error = %e, "failed to persist config on shutdown");
    }

    info!("FlowTrace shut down cleanly");
    Ok(())
}
