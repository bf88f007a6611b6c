// =============================================================================
// Supervisor — owns the worker pool, the hash ring, and the restart policy
// =============================================================================
//
// Grounded on the teacher's pool-of-workers orchestration shape (each
// worker a dedicated OS thread reached via a channel handle) generalized
// from a fixed strategy roster to a symbol-sharded Candle Engine pool, per
// spec.md §4.2.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::RwLock;
use tracing::{error, info, warn};

use crate::error::{FlowtraceError, FlowtraceResult};
use crate::routing::Router;
use crate::supervisor::protocol::{WorkerCommand, WorkerEvent};
use crate::supervisor::worker_handle::{WorkerState, WorkerThread};
use crate::supervisor::worker_main::{self, WorkerMainConfig};

/// Below this fraction of healthy/total workers the pool is considered
/// degraded (§4.2 health-probe loop).
const HEALTHY_FRACTION_WARN: f64 = 0.8;
const SYNC_METRICS_INTERVAL: Duration = Duration::from_secs(30);
const SYNC_METRICS_DEADLINE: Duration = Duration::from_secs(5);
const COMMAND_CHANNEL_CAPACITY: usize = 1024;

struct WorkerHandle {
    thread: Arc<WorkerThread>,
    cmd_tx: Sender<WorkerCommand>,
    join: Option<std::thread::JoinHandle<()>>,
}

pub struct SupervisorConfig {
    pub worker_count: usize,
    pub socket_path: String,
    pub flush_interval: Duration,
    pub batch_size: usize,
    pub ready_timeout: Duration,
}

pub struct Supervisor {
    router: Arc<Router>,
    workers: RwLock<HashMap<String, WorkerHandle>>,
    event_rx: Receiver<WorkerEvent>,
    event_tx: Sender<WorkerEvent>,
    config: SupervisorConfig,
}

impl Supervisor {
    pub fn new(router: Arc<Router>, config: SupervisorConfig) -> Self {
        let (event_tx, event_rx) = bounded(4096);
        Supervisor {
            router,
            workers: RwLock::new(HashMap::new()),
            event_rx,
            event_tx,
            config,
        }
    }

    pub fn router(&self) -> Arc<Router> {
        self.router.clone()
    }

    pub fn events(&self) -> Receiver<WorkerEvent> {
        self.event_rx.clone()
    }

    /// Spawns `worker_count` threads and adds each to the ring immediately
    /// (§4.2: "workers join the ring as soon as spawned, not once ready").
    pub fn initialize(&self) -> FlowtraceResult<()> {
        for i in 0..self.config.worker_count {
            self.spawn_worker(format!("worker_{i}"));
        }
        self.wait_for_all_ready(self.config.ready_timeout)
    }

    fn spawn_worker(&self, worker_id: String) {
        let (cmd_tx, cmd_rx) = bounded(COMMAND_CHANNEL_CAPACITY);
        let thread_handle = Arc::new(WorkerThread::new(worker_id.clone()));
        let event_tx = self.event_tx.clone();
        let worker_config = WorkerMainConfig {
            worker_id: worker_id.clone(),
            socket_path: self.config.socket_path.clone(),
            flush_interval: self.config.flush_interval,
            batch_size: self.config.batch_size,
            idle_tick: Duration::from_millis(500),
        };

        let join = std::thread::Builder::new()
            .name(worker_id.clone())
            .spawn(move || worker_main::run(worker_config, cmd_rx, event_tx))
            .expect("failed to spawn worker thread");

        self.router.add_worker(&worker_id);
        self.workers.write().insert(
            worker_id,
            WorkerHandle { thread: thread_handle, cmd_tx, join: Some(join) },
        );
    }

    /// Drains `WorkerEvent::Ready` off the event channel until every
    /// spawned worker has reported in, or `timeout` elapses.
    pub fn wait_for_all_ready(&self, timeout: Duration) -> FlowtraceResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let all_ready = self.workers.read().values().all(|w| w.thread.is_ready());
            if all_ready {
                return Ok(());
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                let not_ready: Vec<String> = self
                    .workers
                    .read()
                    .iter()
                    .filter(|(_, w)| !w.thread.is_ready())
                    .map(|(id, _)| id.clone())
                    .collect();
                return Err(FlowtraceError::Timeout(timeout))
                    .map_err(|e| { warn!(?not_ready, "workers failed to become ready in time"); e });
            }
            match self.event_rx.recv_timeout(remaining.min(Duration::from_millis(200))) {
                Ok(WorkerEvent::Ready { worker_id, .. }) => {
                    if let Some(handle) = self.workers.read().get(&worker_id) {
                        handle.thread.transition(WorkerState::Ready);
                    }
                }
                Ok(_) => continue,
                Err(_) => continue,
            }
        }
    }

    pub fn send_command(&self, worker_id: &str, command: WorkerCommand) -> FlowtraceResult<()> {
        let workers = self.workers.read();
        let handle = workers
            .get(worker_id)
            .ok_or_else(|| FlowtraceError::NotFound(format!("worker '{worker_id}'")))?;
        handle
            .cmd_tx
            .send(command)
            .map_err(|_| FlowtraceError::Fatal(format!("worker '{worker_id}' command channel closed")))
    }

    /// §4.2 health-probe loop: fan `SyncMetrics` out to every worker every
    /// 30s with a 5s collection deadline, and warn when the healthy
    /// fraction drops below 0.8.
    pub fn run_health_probe_once(&self) {
        let worker_ids: Vec<String> = self.workers.read().keys().cloned().collect();
        let total = worker_ids.len();
        if total == 0 {
            return;
        }
        for worker_id in &worker_ids {
            let _ = self.send_command(worker_id, WorkerCommand::SyncMetrics);
        }

        let deadline = Instant::now() + SYNC_METRICS_DEADLINE;
        let mut responded = std::collections::HashSet::new();
        while Instant::now() < deadline && responded.len() < total {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.event_rx.recv_timeout(remaining) {
                Ok(WorkerEvent::Metrics { worker_id, .. }) => {
                    responded.insert(worker_id);
                }
                Ok(_) => continue,
                Err(_) => break,
            }
        }

        let healthy = self
            .workers
            .read()
            .values()
            .filter(|w| responded.contains(&w.thread.worker_id) && w.thread.health.millis_since_heartbeat() < SYNC_METRICS_INTERVAL.as_millis() as i64 * 2)
            .count();

        for worker_id in &worker_ids {
            if let Some(handle) = self.workers.read().get(worker_id) {
                if responded.contains(worker_id) {
                    handle.thread.try_transition(WorkerState::Ready);
                } else {
                    handle.thread.try_transition(WorkerState::Unhealthy);
                    warn!(%worker_id, "worker missed health probe deadline");
                }
            }
        }

        let fraction = healthy as f64 / total as f64;
        if fraction < HEALTHY_FRACTION_WARN {
            warn!(healthy, total, fraction, "worker pool health below threshold");
        }
    }

    /// Restart policy (§4.2): remove the dead worker from the ring (its
    /// keys fail over to neighbors immediately), respawn the same
    /// `worker_id`, and wait for it to re-report ready. Ownership of its
    /// symbols reverts automatically once it rejoins, since the ring uses
    /// stable ids.
    pub fn restart_worker(&self, worker_id: &str) -> FlowtraceResult<()> {
        info!(%worker_id, "restarting worker");
        self.router.remove_worker(worker_id);
        if let Some(mut handle) = self.workers.write().remove(worker_id) {
            let _ = handle.cmd_tx.send(WorkerCommand::Shutdown);
            if let Some(join) = handle.join.take() {
                let _ = join.join();
            }
        }
        self.spawn_worker(worker_id.to_string());
        self.wait_for_all_ready(self.config.ready_timeout)
    }

    pub fn worker_ids(&self) -> Vec<String> {
        self.workers.read().keys().cloned().collect()
    }

    pub fn worker_state(&self, worker_id: &str) -> Option<WorkerState> {
        self.workers.read().get(worker_id).map(|w| w.thread.state())
    }

    /// Idempotent graceful shutdown: every worker is asked to flush and
    /// exit, then we join their threads.
    pub fn shutdown(&self) {
        let worker_ids: Vec<String> = self.workers.read().keys().cloned().collect();
        for worker_id in &worker_ids {
            if let Some(handle) = self.workers.read().get(worker_id) {
                handle.thread.try_transition(WorkerState::Terminated);
                let _ = handle.cmd_tx.send(WorkerCommand::Shutdown);
            }
        }
        let mut workers = self.workers.write();
        for (worker_id, handle) in workers.iter_mut() {
            if let Some(join) = handle.join.take() {
                if join.join().is_err() {
                    error!(%worker_id, "worker thread panicked during shutdown");
                }
            }
        }
        info!("supervisor shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(worker_count: usize) -> SupervisorConfig {
        SupervisorConfig {
            worker_count,
            socket_path: "/tmp/flowtrace-test-does-not-exist.sock".to_string(),
            flush_interval: Duration::from_secs(30),
            batch_size: 25,
            ready_timeout: Duration::from_secs(2),
        }
    }

    #[test]
    fn initialize_spawns_workers_and_populates_ring() {
        let router = Arc::new(Router::new());
        let supervisor = Supervisor::new(router.clone(), test_config(3));
        supervisor.initialize().unwrap();
        assert_eq!(supervisor.worker_ids().len(), 3);
        assert_eq!(router.worker_ids().len(), 3);
        supervisor.shutdown();
    }

    #[test]
    fn restart_worker_keeps_pool_size_stable() {
        let router = Arc::new(Router::new());
        let supervisor = Supervisor::new(router.clone(), test_config(2));
        supervisor.initialize().unwrap();
        supervisor.restart_worker("worker_0").unwrap();
        assert_eq!(supervisor.worker_ids().len(), 2);
        assert!(router.worker_ids().contains(&"worker_0".to_string()));
        supervisor.shutdown();
    }

    #[test]
    fn shutdown_is_idempotent() {
        let router = Arc::new(Router::new());
        let supervisor = Supervisor::new(router, test_config(1));
        supervisor.initialize().unwrap();
        supervisor.shutdown();
        supervisor.shutdown();
    }
}
