// =============================================================================
// IPC client — connects a worker (or the REST façade) to the Persistence
// Service over a Unix domain socket
// =============================================================================
//
// One background task owns the connection. Callers submit a `Request` and
// await a `oneshot` reply; the task multiplexes pending requests by `id`,
// matching §4.4's FIFO-per-socket-issue / any-order-response contract.
// Reconnection uses exponential backoff with jitter, grounded on the
// teacher's retry shape in `binance/client.rs` and the pack's shared use of
// `rand` for jitter.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use rand::Rng;
use tokio::net::UnixStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{FlowtraceError, FlowtraceResult};
use crate::ipc::framing::{read_frame, write_frame};
use crate::ipc::protocol::{ActionClass, Envelope, Request, Response};

const BACKOFF_BASE_MS: u64 = 5_000;
const BACKOFF_MAX_MS: u64 = 60_000;
const BACKOFF_MAX_ATTEMPTS: u32 = 300;

type PendingMap = Arc<Mutex<HashMap<Uuid, oneshot::Sender<Response>>>>;

struct Outbound {
    id: Uuid,
    action_class: ActionClass,
    request: Request,
    reply: oneshot::Sender<Response>,
}

pub struct IpcClient {
    outbound_tx: mpsc::UnboundedSender<Outbound>,
    connected: Arc<AtomicBool>,
}

impl IpcClient {
    /// Spawns the connection-owning task; returns immediately. The task
    /// connects lazily on first use and reconnects forever with backoff.
    pub fn spawn(socket_path: String) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(false));
        tokio::spawn(run_connection_loop(socket_path, outbound_rx, connected.clone()));
        IpcClient { outbound_tx, connected }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub async fn call(&self, action_class: ActionClass, request: Request) -> FlowtraceResult<Response> {
        if !self.is_connected() {
            return Err(FlowtraceError::not_connected());
        }
        let id = Uuid::new_v4();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.outbound_tx
            .send(Outbound { id, action_class, request, reply: reply_tx })
            .map_err(|_| FlowtraceError::connection_closed())?;

        let deadline = Duration::from_millis(action_class.default_timeout_ms());
        match timeout(deadline, reply_rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(FlowtraceError::connection_closed()),
            Err(_) => Err(FlowtraceError::Timeout(deadline)),
        }
    }
}

async fn run_connection_loop(
    socket_path: String,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    connected: Arc<AtomicBool>,
) {
    let mut attempt: u32 = 0;
    loop {
        match UnixStream::connect(&socket_path).await {
            Ok(stream) => {
                attempt = 0;
                connected.store(true, Ordering::Relaxed);
                info!(socket = %socket_path, "IPC client connected");
                serve_connection(stream, &mut outbound_rx).await;
                connected.store(false, Ordering::Relaxed);
                warn!(socket = %socket_path, "IPC connection lost — reconnecting");
            }
            Err(e) => {
                if attempt >= BACKOFF_MAX_ATTEMPTS {
                    warn!(socket = %socket_path, error = %e, "IPC reconnect attempts exhausted, giving up for now");
                }
                let delay = backoff_delay(attempt);
                debug!(socket = %socket_path, attempt, delay_ms = delay.as_millis() as u64, "IPC connect failed, backing off");
                tokio::time::sleep(delay).await;
                attempt = attempt.saturating_add(1);
            }
        }
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let exp = BACKOFF_BASE_MS.saturating_mul(1u64 << attempt.min(20));
    let jitter = rand::thread_rng().gen_range(0..=1000u64);
    Duration::from_millis(exp.min(BACKOFF_MAX_MS) + jitter)
}

/// Drives one live connection: a write loop draining `outbound_rx` (FIFO
/// per socket) and a read loop dispatching responses by id. Returns when
/// the connection drops, after rejecting all still-pending requests.
async fn serve_connection(stream: UnixStream, outbound_rx: &mut mpsc::UnboundedReceiver<Outbound>) {
    let (read_half, write_half) = stream.into_split();
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

    let mut write_half = write_half;
    let mut read_half = read_half;
    let pending_for_reader = pending.clone();

    let reader = async move {
        loop {
            match read_frame::<_, Envelope<Response>>(&mut read_half).await {
                Ok(envelope) => {
                    if let Some(tx) = pending_for_reader.lock().remove(&envelope.id) {
                        let _ = tx.send(envelope.payload);
                    } else {
                        debug!(id = %envelope.id, "IPC response for unknown/expired request id, discarding");
                    }
                }
                Err(_) => break,
            }
        }
    };

    let writer = async {
        while let Some(out) = outbound_rx.recv().await {
            pending.lock().insert(out.id, out.reply);
            let envelope = Envelope::new(out.id, out.action_class, out.request, Utc::now());
            if write_frame(&mut write_half, &envelope).await.is_err() {
                break;
            }
        }
    };

    tokio::select! {
        _ = reader => {}
        _ = writer => {}
    }

    for (_, tx) in pending.lock().drain() {
        let _ = tx.send(Response::Error {
            kind: "connection_closed".to_string(),
            message: "IPC connection closed with request outstanding".to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let small = backoff_delay(0);
        let large = backoff_delay(10);
        assert!(small.as_millis() >= BACKOFF_BASE_MS as u128);
        assert!(large.as_millis() <= BACKOFF_MAX_MS as u128 + 1000);
    }
}
