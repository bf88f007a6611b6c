// =============================================================================
// Persistence Service — single process, one listening socket, one database
// =============================================================================
//
// A dedicated OS thread owns the `rusqlite::Connection` and the
// `CandleStore`; every request is a message on a `crossbeam_channel`,
// processed strictly one at a time (single writer per table, §4.5/§5). The
// async IPC server bridges to this thread via a `tokio::sync::oneshot`
// reply per request — `oneshot::Sender::send` is synchronous, so the
// writer thread needs no async runtime of its own.
// =============================================================================

use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use crossbeam_channel::{Receiver, Sender};
use rusqlite::Connection;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use crate::error::{FlowtraceError, FlowtraceResult};
use crate::ipc::protocol::{Request, Response};
use crate::persistence::candle_store::{restamp, CandleStore};
use crate::persistence::{db, schema};

pub struct PersistenceConfig {
    pub socket_path: String,
    pub db_path: PathBuf,
    pub candle_store_root: PathBuf,
    pub queue_retention_hours: i64,
}

struct DbJob {
    request: Request,
    reply: oneshot::Sender<Response>,
}

#[derive(Clone)]
pub struct PersistenceService {
    job_tx: Sender<DbJob>,
}

impl PersistenceService {
    pub fn spawn(config: PersistenceConfig) -> FlowtraceResult<Self> {
        let (job_tx, job_rx) = crossbeam_channel::unbounded::<DbJob>();

        let conn = Connection::open(&config.db_path)
            .map_err(|e| FlowtraceError::Fatal(format!("failed to open runtime database: {e}")))?;
        schema::configure_pragmas(&conn)?;
        schema::apply_migrations(&conn)?;
        let candle_store = CandleStore::new(&config.candle_store_root)?;
        let retention_hours = config.queue_retention_hours;

        std::thread::Builder::new()
            .name("persistence-writer".to_string())
            .spawn(move || writer_loop(conn, candle_store, job_rx, retention_hours))
            .map_err(|e| FlowtraceError::Fatal(format!("failed to spawn persistence writer thread: {e}")))?;

        Ok(PersistenceService { job_tx })
    }

    pub async fn handle(&self, request: Request) -> Response {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.job_tx.send(DbJob { request, reply: reply_tx }).is_err() {
            return Response::Error {
                kind: "fatal".to_string(),
                message: "persistence writer thread is gone".to_string(),
            };
        }
        match reply_rx.await {
            Ok(response) => response,
            Err(_) => Response::Error {
                kind: "fatal".to_string(),
                message: "persistence writer thread dropped the reply".to_string(),
            },
        }
    }

    /// Spawns the background reader that purges processed queue rows older
    /// than `retention_hours` on a fixed schedule (§4.5).
    pub fn spawn_queue_cleanup_task(service: PersistenceService, interval: Duration) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let response = service.handle(Request::QueueCleanup).await;
                if let Response::Error { message, .. } = response {
                    warn!(error = %message, "queue cleanup failed");
                }
            }
        });
    }
}

fn writer_loop(mut conn: Connection, candle_store: CandleStore, job_rx: Receiver<DbJob>, retention_hours: i64) {
    info!("persistence writer thread started");
    for job in job_rx.iter() {
        let response = handle_request(&mut conn, &candle_store, job.request, retention_hours);
        if job.reply.send(response).is_err() {
            warn!("persistence caller dropped the reply channel before the response arrived");
        }
    }
    info!("persistence writer thread exiting");
}

fn err_response(e: FlowtraceError) -> Response {
    let kind = match &e {
        FlowtraceError::Transient(_) => "transient",
        FlowtraceError::Precondition(_) => "precondition",
        FlowtraceError::InvariantViolated(_) => "invariant_violated",
        FlowtraceError::NotFound(_) => "not_found",
        FlowtraceError::Timeout(_) => "timeout",
        FlowtraceError::Fatal(_) => "fatal",
    };
    if matches!(e, FlowtraceError::Fatal(_)) {
        error!(error = %e, "fatal persistence error");
    }
    Response::Error { kind: kind.to_string(), message: e.to_string() }
}

fn handle_request(conn: &mut Connection, candle_store: &CandleStore, request: Request, retention_hours: i64) -> Response {
    let now = Utc::now();
    let result: FlowtraceResult<Response> = (|| {
        match request {
            Request::StateSave { exchange, symbol, state_json } => {
                db::state_save(conn, &exchange, &symbol, &state_json, now)?;
                Ok(Response::Ok)
            }
            Request::StateSaveBatch { states } => {
                db::state_save_batch(conn, &states, now)?;
                Ok(Response::Ok)
            }
            Request::StateLoad { exchange, symbol } => {
                let state_json = db::state_load(conn, &exchange, &symbol)?;
                Ok(Response::StateValue { state_json })
            }
            Request::StateLoadBatch { exchange, symbols } => {
                let states = db::state_load_batch(conn, &exchange, &symbols)?;
                Ok(Response::StateBatch { states })
            }
            Request::StateLoadAll => {
                let states = db::state_load_all(conn)?;
                Ok(Response::StateBatch { states })
            }

            Request::GapSave { record } => {
                db::gap_save(conn, &record)?;
                Ok(Response::Ok)
            }
            Request::GapLoad { exchange, symbol, synced } => {
                let rows = db::gap_load(conn, exchange.as_deref(), symbol.as_deref(), synced)?;
                Ok(Response::GapRows { rows })
            }
            Request::GapMarkSynced { ids } => {
                db::gap_mark_synced(conn, &ids, now)?;
                Ok(Response::Ok)
            }

            Request::QueueEnqueue { message_type, payload } => {
                db::queue_enqueue(conn, &message_type, &payload, now)?;
                Ok(Response::Ok)
            }
            Request::QueueDequeue { n } => {
                let messages = db::queue_dequeue(conn, n)?;
                Ok(Response::QueueRows { messages })
            }
            Request::QueueMarkProcessed { message_id } => {
                db::queue_mark_processed(conn, message_id, now)?;
                Ok(Response::Ok)
            }
            Request::QueueCleanup => {
                db::queue_cleanup(conn, retention_hours, now)?;
                Ok(Response::Ok)
            }

            Request::CandleAppend { candles } => {
                for candle in &candles {
                    candle_store.append(candle)?;
                }
                Ok(Response::Ok)
            }
            Request::CandleFindBySymbol { exchange, symbol, timeframe, start, end, limit } => {
                let range = match (start, end) {
                    (Some(s), Some(e)) => Some((s, e)),
                    _ => None,
                };
                let tf = crate::domain::Timeframe::from_label(&timeframe)
                    .ok_or_else(|| FlowtraceError::Precondition(format!("unknown timeframe '{timeframe}'")))?;
                let candles = candle_store
                    .find_by_symbol(&exchange, &symbol, &timeframe, range, limit)?
                    .into_iter()
                    .map(|c| restamp(c, &exchange, &symbol, tf))
                    .collect();
                Ok(Response::Candles { candles })
            }
            Request::CandleCount { exchange, symbol, timeframe } => {
                let count = candle_store.count(&exchange, &symbol, &timeframe)?;
                Ok(Response::Count { count })
            }
            Request::CandleFindLatest { exchange, symbol, timeframe } => {
                let tf = crate::domain::Timeframe::from_label(&timeframe)
                    .ok_or_else(|| FlowtraceError::Precondition(format!("unknown timeframe '{timeframe}'")))?;
                let candle = candle_store
                    .find_latest(&exchange, &symbol, &timeframe)?
                    .map(|c| restamp(c, &exchange, &symbol, tf));
                Ok(Response::Candles { candles: candle.into_iter().collect() })
            }

            Request::SyncMetrics => Ok(Response::Ok),
        }
    })();

    result.unwrap_or_else(err_response)
}
