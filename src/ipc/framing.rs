// =============================================================================
// Length-prefixed JSON framing
// =============================================================================
//
// `[u32 big-endian length][JSON payload of that length]`. No other framing.
// Shared by both the worker-side IPC client and the Persistence Service's
// listener so the two processes can never drift on wire format.
// =============================================================================

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{FlowtraceError, FlowtraceResult};

/// Frames larger than this are refused; guards against a corrupted length
/// prefix turning into an unbounded allocation.
const MAX_FRAME_BYTES: u32 = 64 * 1024 * 1024;

pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> FlowtraceResult<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = serde_json::to_vec(value)
        .map_err(|e| FlowtraceError::Fatal(format!("failed to serialize IPC frame: {e}")))?;
    let len = u32::try_from(body.len())
        .map_err(|_| FlowtraceError::Fatal("IPC frame exceeds u32 length prefix".to_string()))?;
    writer
        .write_all(&len.to_be_bytes())
        .await
        .map_err(|e| FlowtraceError::Transient(format!("IPC write failed: {e}")))?;
    writer
        .write_all(&body)
        .await
        .map_err(|e| FlowtraceError::Transient(format!("IPC write failed: {e}")))?;
    writer
        .flush()
        .await
        .map_err(|e| FlowtraceError::Transient(format!("IPC flush failed: {e}")))?;
    Ok(())
}

pub async fn read_frame<R, T>(reader: &mut R) -> FlowtraceResult<T>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| FlowtraceError::Transient(format!("IPC read failed: {e}")))?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_BYTES {
        return Err(FlowtraceError::Precondition(format!(
            "IPC frame length {len} exceeds max {MAX_FRAME_BYTES}"
        )));
    }
    let mut body = vec![0u8; len as usize];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| FlowtraceError::Transient(format!("IPC read failed: {e}")))?;
    serde_json::from_slice(&body)
        .map_err(|e| FlowtraceError::Fatal(format!("failed to deserialize IPC frame: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        a: u32,
        b: String,
    }

    #[tokio::test]
    async fn round_trips_through_a_pipe() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let value = Sample { a: 7, b: "hi".to_string() };
        write_frame(&mut client, &value).await.unwrap();
        let got: Sample = read_frame(&mut server).await.unwrap();
        assert_eq!(got, value);
    }

    #[tokio::test]
    async fn oversize_length_prefix_is_rejected() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        client.write_all(&(MAX_FRAME_BYTES + 1).to_be_bytes()).await.unwrap();
        let result: FlowtraceResult<Sample> = read_frame(&mut server).await;
        assert!(result.is_err());
    }
}
