// =============================================================================
// Supervisor <-> Worker control protocol
// =============================================================================
//
// Travels over a `crossbeam_channel` pair per worker — the natural
// cross-thread, no-shared-memory handoff for the "one worker = one OS
// scheduling unit" model in §5.
// =============================================================================

use rust_decimal::Decimal;

use crate::domain::{GapRecord, TradeData};
use crate::supervisor::worker_handle::HealthSnapshot;

#[derive(Debug, Clone)]
pub enum WorkerCommand {
    AssignSymbol {
        exchange: String,
        symbol: String,
        tick_value: Decimal,
        bin_multiplier: Option<u32>,
        reference_price: Decimal,
    },
    RestoreSymbol {
        symbol: String,
        state_json: String,
        tick_value: Decimal,
        bin_multiplier: u32,
    },
    ProcessTrades {
        exchange: String,
        symbol: String,
        trades: Vec<TradeData>,
    },
    SyncMetrics,
    Shutdown,
}

#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Ready { worker_id: String, timestamp_ms: i64 },
    Metrics { worker_id: String, snapshot_json: String },
    CandleComplete { worker_id: String, candle: Box<crate::domain::FootprintCandle> },
    CandleUpdate { worker_id: String, symbol: String, timeframe: String },
    GapDetected { worker_id: String, gap: GapRecord },
    Backpressure { worker_id: String, symbol: String },
    WorkerError { worker_id: String, message: String },
    ShutdownComplete { worker_id: String },
}

impl WorkerEvent {
    pub fn metrics(worker_id: String, snapshot: &HealthSnapshot) -> Self {
        WorkerEvent::Metrics {
            worker_id,
            snapshot_json: serde_json::to_string(snapshot).expect("HealthSnapshot always serializable"),
        }
    }
}
