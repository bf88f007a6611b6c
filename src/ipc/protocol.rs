// =============================================================================
// IPC envelope and action payloads
// =============================================================================
//
// Every message carries `{id, type, payload, timestamp}`; responses carry
// the same `id` so the client can match them against its pending-request
// map regardless of interleaving (§4.4).
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{FootprintCandle, GapRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionClass {
    State,
    Gap,
    Queue,
    Candle,
    Metrics,
    Control,
}

impl ActionClass {
    /// Per-request-class timeout default (§4.4); env-overridable via
    /// `IPC_STATE_TIMEOUT_MS` / `IPC_GAP_TIMEOUT_MS` for state/gap.
    pub fn default_timeout_ms(self) -> u64 {
        match self {
            ActionClass::State => 10_000,
            ActionClass::Gap => 15_000,
            ActionClass::Metrics => 5_000,
            ActionClass::Queue | ActionClass::Candle | ActionClass::Control => 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<P> {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub action_class: ActionClass,
    pub payload: P,
    pub timestamp: DateTime<Utc>,
}

impl<P> Envelope<P> {
    pub fn new(id: Uuid, action_class: ActionClass, payload: P, timestamp: DateTime<Utc>) -> Self {
        Envelope { id, action_class, payload, timestamp }
    }
}

// ---------------------------------------------------------------------------
// Request bodies, one variant per action in §4.5's table
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Request {
    StateSave { exchange: String, symbol: String, state_json: String },
    StateSaveBatch { states: Vec<StateEntry> },
    StateLoad { exchange: String, symbol: String },
    StateLoadBatch { exchange: String, symbols: Vec<String> },
    StateLoadAll,

    GapSave { record: GapRecord },
    GapLoad { exchange: Option<String>, symbol: Option<String>, synced: Option<bool> },
    GapMarkSynced { ids: Vec<i64> },

    QueueEnqueue { message_type: String, payload: serde_json::Value },
    QueueDequeue { n: u32 },
    QueueMarkProcessed { message_id: Uuid },
    QueueCleanup,

    CandleAppend { candles: Vec<FootprintCandle> },
    CandleFindBySymbol {
        exchange: String,
        symbol: String,
        timeframe: String,
        start: Option<i64>,
        end: Option<i64>,
        limit: Option<u32>,
    },
    CandleCount { exchange: String, symbol: String, timeframe: String },
    CandleFindLatest { exchange: String, symbol: String, timeframe: String },

    SyncMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateEntry {
    pub exchange: String,
    pub symbol: String,
    pub state_json: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Response {
    Ok,
    StateValue { state_json: Option<String> },
    StateBatch { states: Vec<StateEntry> },
    GapRows { rows: Vec<GapRecord> },
    QueueRows { messages: Vec<crate::domain::QueueMessage> },
    Candles { candles: Vec<FootprintCandle> },
    Count { count: u64 },
    Metrics { worker_id: String, uptime_ms: u64, rss_bytes: u64, heap_used_bytes: u64, cpu_user_ms: u64, cpu_system_ms: u64 },
    Error { kind: String, message: String },
}
