// =============================================================================
// IPC server — the Persistence Service's listening side
// =============================================================================
//
// Accepts connections on the Unix domain socket and, per connection,
// processes requests strictly in the order they arrive (FIFO per socket);
// separate connections have no ordering relationship. The handler is
// supplied by the caller (`persistence::service`) so this module stays pure
// transport, mirroring the framing/protocol split.
// =============================================================================

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use tokio::net::{UnixListener, UnixStream};
use tracing::{info, warn};

use crate::error::{FlowtraceError, FlowtraceResult};
use crate::ipc::framing::{read_frame, write_frame};
use crate::ipc::protocol::{Envelope, Request, Response};

pub async fn serve<F, Fut>(socket_path: &str, handler: F) -> FlowtraceResult<()>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    if Path::new(socket_path).exists() {
        std::fs::remove_file(socket_path)
            .map_err(|e| FlowtraceError::Fatal(format!("failed to remove stale socket: {e}")))?;
    }
    let listener = UnixListener::bind(socket_path)
        .map_err(|e| FlowtraceError::Fatal(format!("failed to bind IPC socket {socket_path}: {e}")))?;
    info!(socket = %socket_path, "IPC server listening");

    let handler = Arc::new(handler);
    loop {
        let (stream, _addr) = listener
            .accept()
            .await
            .map_err(|e| FlowtraceError::Transient(format!("IPC accept failed: {e}")))?;
        let handler = handler.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_connection(stream, handler).await {
                warn!(error = %e, "IPC connection ended");
            }
        });
    }
}

async fn serve_connection<F, Fut>(stream: UnixStream, handler: Arc<F>) -> FlowtraceResult<()>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    let (mut read_half, mut write_half) = stream.into_split();
    loop {
        let envelope: Envelope<Request> = match read_frame(&mut read_half).await {
            Ok(e) => e,
            Err(_) => return Ok(()),
        };
        let response = handler(envelope.payload).await;
        let reply = Envelope::new(envelope.id, envelope.action_class, response, chrono::Utc::now());
        write_frame(&mut write_half, &reply).await?;
    }
}
