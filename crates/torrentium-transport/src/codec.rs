//! Length-prefixed framing.
//!
//! A frame is a big-endian `u32` payload length followed by the payload.

use crate::transport::{TransportError, TransportResult};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest accepted payload (32 MiB), enough for a maximum-size chunk plus envelope
pub const MAX_FRAME_SIZE: usize = 32 * 1024 * 1024;

/// Write one frame and flush
///
/// # Errors
///
/// Returns [`TransportError::FrameTooLarge`] if `payload` exceeds
/// [`MAX_FRAME_SIZE`], or an I/O error.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> TransportResult<()>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME_SIZE {
        return Err(TransportError::FrameTooLarge {
            size: payload.len(),
            max: MAX_FRAME_SIZE,
        });
    }

    let len = payload.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame
///
/// Returns `Ok(None)` if the stream ends cleanly before a new frame starts.
///
/// # Errors
///
/// Returns [`TransportError::FrameTooLarge`] for an oversized length prefix
/// (the payload is not read), or an I/O error for a truncated frame.
pub async fn read_frame<R>(reader: &mut R) -> TransportResult<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(TransportError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}
