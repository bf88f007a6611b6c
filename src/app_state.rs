// =============================================================================
// Central Application State — FlowTrace ingestion engine
// =============================================================================
//
// The single piece of shared state the `flowtrace` binary's API façade and
// WebSocket feed read from. Unlike the teacher's `AppState` (which owned
// every trading subsystem directly), this holds only the handles the §6
// façade needs: the Router/Supervisor pair and an IPC client into the
// Persistence Service, plus a broadcast channel bridging Supervisor events
// to WebSocket pushes (§6).
// =============================================================================

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::ipc::IpcClient;
use crate::routing::Router;
use crate::supervisor::{Supervisor, WorkerEvent};

/// Bounded so a slow/disconnected WebSocket client can't grow this
/// unboundedly; excess events are silently dropped for that subscriber,
/// which then receives the next full `/api/v1/candles` poll anyway.
const CANDLE_EVENT_CHANNEL_CAPACITY: usize = 4096;

pub struct AppState {
    pub router: Arc<Router>,
    pub supervisor: Arc<Supervisor>,
    pub ipc: IpcClient,
    pub candle_events: broadcast::Sender<WorkerEvent>,
}

impl AppState {
    pub fn new(router: Arc<Router>, supervisor: Arc<Supervisor>, ipc: IpcClient) -> Arc<Self> {
        let (candle_events, _rx) = broadcast::channel(CANDLE_EVENT_CHANNEL_CAPACITY);
        Arc::new(AppState { router, supervisor, ipc, candle_events })
    }

    /// Spawns the bridging task that drains `Supervisor::events()` (a
    /// blocking `crossbeam_channel::Receiver`) onto the async broadcast
    /// channel WebSocket handlers subscribe to. Runs on a blocking thread
    /// since the crossbeam receiver is sync.
    pub fn spawn_event_bridge(self: &Arc<Self>) {
        let events = self.supervisor.events();
        let tx = self.candle_events.clone();
        std::thread::Builder::new()
            .name("event-bridge".to_string())
            .spawn(move || {
                while let Ok(event) = events.recv() {
                    let _ = tx.send(event);
                }
            })
            .expect("failed to spawn event bridge thread");
    }
}
