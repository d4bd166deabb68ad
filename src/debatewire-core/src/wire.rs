//! Framing over a byte stream.
//!
//! Every logical payload crosses the socket as a 4-byte big-endian length
//! header followed by the payload bytes, so one `recv_frame` always yields
//! exactly one payload regardless of how the kernel slices the stream.
//!
//! The legacy convention (read fixed-size chunks until one comes back
//! short) is kept as [`recv_legacy_short_read`] for reference: it breaks
//! when a payload is an exact multiple of the chunk size and when two
//! back-to-back payloads coalesce into one read.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use crate::error::DebateError;

/// Read granularity of the legacy convention.
pub const CHUNK_SIZE: usize = 1024;

/// Upper bound on a single frame; a larger length header is treated as
/// corrupt rather than honored with an allocation.
pub const MAX_FRAME_LEN: usize = 8 * 1024 * 1024;

/// Write one length-prefixed frame, fully flushed before returning.
pub async fn send_frame<S>(stream: &mut S, payload: &[u8]) -> Result<(), DebateError>
where
    S: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME_LEN {
        return Err(DebateError::PayloadDecode(format!(
            "payload of {} bytes exceeds the frame limit",
            payload.len()
        )));
    }
    let header = (payload.len() as u32).to_be_bytes();
    stream.write_all(&header).await?;
    stream.write_all(payload).await?;
    stream.flush().await?;
    Ok(())
}

/// Read exactly one length-prefixed frame.
pub async fn recv_frame<S>(stream: &mut S) -> Result<Vec<u8>, DebateError>
where
    S: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await?;
    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(DebateError::PayloadDecode(format!(
            "frame length {len} exceeds the frame limit"
        )));
    }
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await?;
    Ok(payload)
}

/// [`recv_frame`] with a bound; elapsing yields [`DebateError::Timeout`],
/// distinct from a transport failure.
pub async fn recv_frame_timeout<S>(stream: &mut S, wait: Duration) -> Result<Vec<u8>, DebateError>
where
    S: AsyncRead + Unpin,
{
    match timeout(wait, recv_frame(stream)).await {
        Ok(result) => result,
        Err(_) => Err(DebateError::Timeout(wait)),
    }
}

/// Legacy framing: concatenate fixed-size chunks until a short read.
///
/// Do not use for new code; see the module docs for the two failure
/// modes. The regression tests below pin them down.
pub async fn recv_legacy_short_read<S>(stream: &mut S) -> Result<Vec<u8>, DebateError>
where
    S: AsyncRead + Unpin,
{
    let mut data = Vec::new();
    let mut chunk = [0u8; CHUNK_SIZE];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            if data.is_empty() {
                return Err(DebateError::peer_closed());
            }
            break;
        }
        data.extend_from_slice(&chunk[..n]);
        if n < CHUNK_SIZE {
            break;
        }
    }
    Ok(data)
}
