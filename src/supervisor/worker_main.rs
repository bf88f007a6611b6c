// =============================================================================
// Worker thread body — runs the Candle Engine for one worker
// =============================================================================
//
// Each worker is a dedicated `std::thread`. Trade application itself is
// synchronous and non-suspending (§5); the thread builds a tiny
// current-thread Tokio runtime purely to drive its IPC client for periodic
// checkpoint flushes, per SPEC_FULL §4.2.
// =============================================================================

use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, info, warn};

use crate::engine::WorkerRuntime;
use crate::ipc::{ActionClass, IpcClient, Request, Response};
use crate::ipc::protocol::StateEntry;
use crate::supervisor::protocol::{WorkerCommand, WorkerEvent};

pub struct WorkerMainConfig {
    pub worker_id: String,
    pub socket_path: String,
    pub flush_interval: Duration,
    pub batch_size: usize,
    pub idle_tick: Duration,
}

pub fn run(config: WorkerMainConfig, cmd_rx: Receiver<WorkerCommand>, event_tx: Sender<WorkerEvent>) {
    let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            let _ = event_tx.send(WorkerEvent::WorkerError {
                worker_id: config.worker_id.clone(),
                message: format!("failed to build worker runtime: {e}"),
            });
            return;
        }
    };

    let ipc_client = rt.block_on(async { IpcClient::spawn(config.socket_path.clone()) });
    let mut runtime = WorkerRuntime::new(config.worker_id.clone());
    let mut last_flush = Instant::now();

    let _ = event_tx.send(WorkerEvent::Ready {
        worker_id: config.worker_id.clone(),
        timestamp_ms: chrono::Utc::now().timestamp_millis(),
    });
    info!(worker_id = %config.worker_id, "worker thread ready");

    loop {
        match cmd_rx.recv_timeout(config.idle_tick) {
            Ok(WorkerCommand::Shutdown) => {
                flush_dirty(&config, &rt, &ipc_client, &mut runtime);
                let _ = event_tx.send(WorkerEvent::ShutdownComplete { worker_id: config.worker_id.clone() });
                info!(worker_id = %config.worker_id, "worker thread shut down gracefully");
                return;
            }
            Ok(WorkerCommand::AssignSymbol { exchange, symbol, tick_value, bin_multiplier, reference_price }) => {
                runtime.initialize_symbol(&exchange, &symbol, tick_value, bin_multiplier, reference_price);
            }
            Ok(WorkerCommand::RestoreSymbol { symbol, state_json, tick_value, bin_multiplier }) => {
                match serde_json::from_str(&state_json) {
                    Ok(group) => runtime.restore_group(&symbol, group, tick_value, bin_multiplier),
                    Err(e) => {
                        let _ = event_tx.send(WorkerEvent::WorkerError {
                            worker_id: config.worker_id.clone(),
                            message: format!("failed to restore symbol '{symbol}': {e}"),
                        });
                    }
                }
            }
            Ok(WorkerCommand::ProcessTrades { exchange, symbol, trades }) => {
                let started = Instant::now();
                match runtime.process_trades(&exchange, &symbol, &trades) {
                    Ok(outcome) => {
                        for candle in outcome.sealed {
                            let _ = event_tx.send(WorkerEvent::CandleComplete {
                                worker_id: config.worker_id.clone(),
                                candle: Box::new(candle),
                            });
                        }
                        for (symbol, timeframe) in outcome.updates_to_publish {
                            let _ = event_tx.send(WorkerEvent::CandleUpdate {
                                worker_id: config.worker_id.clone(),
                                symbol,
                                timeframe: timeframe.label().to_string(),
                            });
                        }
                        if let Some(gap) = outcome.gap {
                            let _ = event_tx.send(WorkerEvent::GapDetected { worker_id: config.worker_id.clone(), gap });
                        }
                    }
                    Err(e) => {
                        warn!(worker_id = %config.worker_id, error = %e, "process_trades failed");
                        let _ = event_tx.send(WorkerEvent::WorkerError {
                            worker_id: config.worker_id.clone(),
                            message: e.to_string(),
                        });
                    }
                }
                let _ = started.elapsed();
            }
            Ok(WorkerCommand::SyncMetrics) => {
                let _ = event_tx.send(WorkerEvent::metrics(config.worker_id.clone(), &sample_health()));
            }
            Err(RecvTimeoutError::Timeout) => {
                seal_idle(&config, &mut runtime, &event_tx);
                if last_flush.elapsed() >= config.flush_interval {
                    flush_dirty(&config, &rt, &ipc_client, &mut runtime);
                    last_flush = Instant::now();
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                debug!(worker_id = %config.worker_id, "command channel disconnected, exiting");
                return;
            }
        }
    }
}

fn seal_idle(config: &WorkerMainConfig, runtime: &mut WorkerRuntime, event_tx: &Sender<WorkerEvent>) {
    let now_ms = chrono::Utc::now().timestamp_millis();
    for (_, sealed) in runtime.seal_elapsed(now_ms) {
        for candle in sealed {
            let _ = event_tx.send(WorkerEvent::CandleComplete {
                worker_id: config.worker_id.clone(),
                candle: Box::new(candle),
            });
        }
    }
}

/// §4.5 checkpoint schedule: batch dirty groups and `save_batch` them;
/// on success clear dirty flags, on failure leave them set for retry.
fn flush_dirty(config: &WorkerMainConfig, rt: &tokio::runtime::Runtime, ipc_client: &IpcClient, runtime: &mut WorkerRuntime) {
    let dirty = runtime.dirty_symbols();
    if dirty.is_empty() {
        return;
    }
    for chunk in dirty.chunks(config.batch_size) {
        let states: Vec<StateEntry> = chunk
            .iter()
            .filter_map(|symbol| {
                runtime.checkpoint_state(symbol).map(|state| StateEntry {
                    exchange: "unknown".to_string(),
                    symbol: symbol.clone(),
                    state_json: state.to_string(),
                })
            })
            .collect();
        let response = rt.block_on(ipc_client.call(ActionClass::State, Request::StateSaveBatch { states }));
        match response {
            Ok(Response::Ok) => {
                for symbol in chunk {
                    runtime.clear_dirty(symbol);
                }
            }
            Ok(Response::Error { message, .. }) => {
                warn!(worker_id = %config.worker_id, error = %message, "checkpoint flush rejected, will retry next cycle");
            }
            Ok(_) => {}
            Err(e) => {
                warn!(worker_id = %config.worker_id, error = %e, "checkpoint flush failed, will retry next cycle");
            }
        }
    }
}

fn sample_health() -> crate::supervisor::worker_handle::HealthSnapshot {
    crate::supervisor::worker_handle::HealthSnapshot {
        last_heartbeat: chrono::Utc::now().timestamp_millis(),
        trades_processed_total: 0,
        events_published_total: 0,
        avg_processing_ms: 0.0,
        mem_bytes: 0,
        cpu_percent: 0.0,
        error_count: 0,
        last_error: None,
    }
}
