// =============================================================================
// WorkerThread state machine and health snapshot
// =============================================================================
//
// Only the transitions in spec.md §4.2 are legal; anything else is a
// programmer error and panics rather than silently corrupting state.
// Health counters use lock-free atomics, grounded on
// `binance/rate_limit.rs::RateLimitTracker`'s `AtomicU32`/`AtomicU64`
// pattern.
// =============================================================================

use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Initializing,
    Ready,
    Busy,
    Unhealthy,
    Terminated,
}

impl WorkerState {
    fn can_transition_to(self, next: WorkerState) -> bool {
        use WorkerState::*;
        matches!(
            (self, next),
            (Initializing, Ready)
                | (Ready, Busy)
                | (Busy, Ready)
                | (Ready, Unhealthy)
                | (Busy, Unhealthy)
                | (Unhealthy, Initializing)
                | (_, Terminated)
        )
    }
}

fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis() as i64
}

#[derive(Debug, Serialize)]
pub struct HealthSnapshot {
    pub last_heartbeat: i64,
    pub trades_processed_total: u64,
    pub events_published_total: u64,
    pub avg_processing_ms: f64,
    pub mem_bytes: u64,
    pub cpu_percent: f64,
    pub error_count: u32,
    pub last_error: Option<String>,
}

pub struct Health {
    last_heartbeat: AtomicI64,
    trades_processed_total: AtomicU64,
    events_published_total: AtomicU64,
    processing_ms_total: AtomicU64,
    processing_batches: AtomicU64,
    mem_bytes: AtomicU64,
    cpu_percent_milli: AtomicU64,
    error_count: AtomicU32,
    last_error: Mutex<Option<String>>,
}

impl Default for Health {
    fn default() -> Self {
        Health {
            last_heartbeat: AtomicI64::new(now_ms()),
            trades_processed_total: AtomicU64::new(0),
            events_published_total: AtomicU64::new(0),
            processing_ms_total: AtomicU64::new(0),
            processing_batches: AtomicU64::new(0),
            mem_bytes: AtomicU64::new(0),
            cpu_percent_milli: AtomicU64::new(0),
            error_count: AtomicU32::new(0),
            last_error: Mutex::new(None),
        }
    }
}

impl Health {
    pub fn record_heartbeat(&self) {
        self.last_heartbeat.store(now_ms(), Ordering::Relaxed);
    }

    pub fn record_trades_processed(&self, n: u64, processing_ms: u64) {
        self.trades_processed_total.fetch_add(n, Ordering::Relaxed);
        self.processing_ms_total.fetch_add(processing_ms, Ordering::Relaxed);
        self.processing_batches.fetch_add(1, Ordering::Relaxed);
        self.record_heartbeat();
    }

    pub fn record_event_published(&self) {
        self.events_published_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self, message: String) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
        *self.last_error.lock() = Some(message);
    }

    pub fn set_resource_usage(&self, mem_bytes: u64, cpu_percent: f64) {
        self.mem_bytes.store(mem_bytes, Ordering::Relaxed);
        self.cpu_percent_milli.store((cpu_percent * 1000.0) as u64, Ordering::Relaxed);
    }

    pub fn millis_since_heartbeat(&self) -> i64 {
        now_ms() - self.last_heartbeat.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let batches = self.processing_batches.load(Ordering::Relaxed).max(1);
        HealthSnapshot {
            last_heartbeat: self.last_heartbeat.load(Ordering::Relaxed),
            trades_processed_total: self.trades_processed_total.load(Ordering::Relaxed),
            events_published_total: self.events_published_total.load(Ordering::Relaxed),
            avg_processing_ms: self.processing_ms_total.load(Ordering::Relaxed) as f64 / batches as f64,
            mem_bytes: self.mem_bytes.load(Ordering::Relaxed),
            cpu_percent: self.cpu_percent_milli.load(Ordering::Relaxed) as f64 / 1000.0,
            error_count: self.error_count.load(Ordering::Relaxed),
            last_error: self.last_error.lock().clone(),
        }
    }
}

pub struct WorkerThread {
    pub worker_id: String,
    state: Mutex<WorkerState>,
    pub health: Health,
    pub created_at: i64,
    pub last_activity_at: AtomicI64,
    pub ready_timestamp: AtomicI64,
}

impl WorkerThread {
    pub fn new(worker_id: String) -> Self {
        WorkerThread {
            worker_id,
            state: Mutex::new(WorkerState::Initializing),
            health: Health::default(),
            created_at: now_ms(),
            last_activity_at: AtomicI64::new(now_ms()),
            ready_timestamp: AtomicI64::new(0),
        }
    }

    pub fn state(&self) -> WorkerState {
        *self.state.lock()
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state(), WorkerState::Ready | WorkerState::Busy)
    }

    /// Panics if `next` is not a legal transition from the current state —
    /// per spec.md §4.2, any other transition is a programmer error.
    pub fn transition(&self, next: WorkerState) {
        let mut state = self.state.lock();
        assert!(
            state.can_transition_to(next),
            "illegal worker state transition {:?} -> {:?} for {}",
            *state,
            next,
            self.worker_id
        );
        *state = next;
        drop(state);
        self.last_activity_at.store(now_ms(), Ordering::Relaxed);
        if next == WorkerState::Ready && self.ready_timestamp.load(Ordering::Relaxed) == 0 {
            self.ready_timestamp.store(now_ms(), Ordering::Relaxed);
        }
    }

    /// Best-effort transition: no-op (instead of panicking) if illegal,
    /// used by the periodic health-probe path where concurrent state
    /// changes are expected and not fatal.
    pub fn try_transition(&self, next: WorkerState) -> bool {
        let mut state = self.state.lock();
        if !state.can_transition_to(next) {
            return false;
        }
        *state = next;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_lifecycle_transitions() {
        let w = WorkerThread::new("worker_0".to_string());
        assert_eq!(w.state(), WorkerState::Initializing);
        w.transition(WorkerState::Ready);
        w.transition(WorkerState::Busy);
        w.transition(WorkerState::Ready);
        w.transition(WorkerState::Unhealthy);
        w.transition(WorkerState::Initializing);
        w.transition(WorkerState::Terminated);
    }

    #[test]
    #[should_panic(expected = "illegal worker state transition")]
    fn illegal_transition_panics() {
        let w = WorkerThread::new("worker_0".to_string());
        w.transition(WorkerState::Busy);
    }

    #[test]
    fn any_state_can_terminate() {
        for start in [WorkerState::Initializing, WorkerState::Ready, WorkerState::Busy, WorkerState::Unhealthy] {
            let w = WorkerThread::new("worker_0".to_string());
            match start {
                WorkerState::Ready => w.transition(WorkerState::Ready),
                WorkerState::Busy => {
                    w.transition(WorkerState::Ready);
                    w.transition(WorkerState::Busy);
                }
                WorkerState::Unhealthy => {
                    w.transition(WorkerState::Ready);
                    w.transition(WorkerState::Unhealthy);
                }
                _ => {}
            }
            w.transition(WorkerState::Terminated);
        }
    }
}
