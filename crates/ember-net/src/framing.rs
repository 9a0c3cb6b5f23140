//! Length-prefixed framing for TCP streams.
//!
//! TCP gives us a byte stream; messages are delimited by prefixing each one
//! with its length:
//!
//! ```text
//! +-------------------+--------------------+
//! | length (4 bytes)  |   message bytes    |
//! | u32 little-endian |   (length bytes)   |
//! +-------------------+--------------------+
//! ```
//!
//! The prefix counts only the message bytes, not itself. The content of a
//! frame is opaque to this layer; [`crate::wire`] interprets it.

use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Errors raised while reading or writing a frame.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame declares more payload than the configured limit allows.
    #[error("frame of {size} bytes exceeds limit of {limit}")]
    Oversized {
        /// Declared payload size.
        size: u32,
        /// Configured maximum.
        limit: u32,
    },

    /// The peer closed the connection at a frame boundary or mid-frame.
    #[error("connection closed")]
    Closed,

    /// An I/O error occurred on the stream.
    #[error("stream error: {0}")]
    Io(#[from] std::io::Error),
}

fn classify(e: std::io::Error) -> FrameError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        FrameError::Closed
    } else {
        FrameError::Io(e)
    }
}

/// Read one frame from the stream, returning its message bytes.
///
/// Waits until the full frame is available. A declared length above
/// `max_payload` fails with [`FrameError::Oversized`] before any payload
/// byte is consumed, leaving the stream unusable; callers are expected to
/// drop the connection on any frame error.
pub async fn read_frame<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    max_payload: u32,
) -> Result<Vec<u8>, FrameError> {
    let mut prefix = [0u8; 4];
    reader.read_exact(&mut prefix).await.map_err(classify)?;

    let len = u32::from_le_bytes(prefix);
    if len > max_payload {
        return Err(FrameError::Oversized {
            size: len,
            limit: max_payload,
        });
    }

    let mut payload = vec![0u8; len as usize];
    if len > 0 {
        reader.read_exact(&mut payload).await.map_err(classify)?;
    }
    Ok(payload)
}

/// Write one frame to the stream and flush it.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    payload: &[u8],
    max_payload: u32,
) -> Result<(), FrameError> {
    let len = payload.len() as u32;
    if len > max_payload {
        return Err(FrameError::Oversized {
            size: len,
            limit: max_payload,
        });
    }

    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(payload);
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncWriteExt, duplex};

    const LIMIT: u32 = 1024;

    #[tokio::test]
    async fn test_roundtrip_preserves_payload() {
        let (mut a, mut b) = duplex(4096);
        write_frame(&mut a, b"hello ember", LIMIT).await.unwrap();
        let got = read_frame(&mut b, LIMIT).await.unwrap();
        assert_eq!(got, b"hello ember");
    }

    #[tokio::test]
    async fn test_frames_stay_separate() {
        let (mut a, mut b) = duplex(4096);
        write_frame(&mut a, b"one", LIMIT).await.unwrap();
        write_frame(&mut a, b"two", LIMIT).await.unwrap();
        assert_eq!(read_frame(&mut b, LIMIT).await.unwrap(), b"one");
        assert_eq!(read_frame(&mut b, LIMIT).await.unwrap(), b"two");
    }

    #[tokio::test]
    async fn test_prefix_is_little_endian() {
        let (mut a, mut b) = duplex(4096);
        a.write_all(&3u32.to_le_bytes()).await.unwrap();
        a.write_all(b"abc").await.unwrap();
        a.flush().await.unwrap();
        assert_eq!(read_frame(&mut b, LIMIT).await.unwrap(), b"abc");
    }

    #[tokio::test]
    async fn test_oversized_declaration_rejected() {
        let (mut a, mut b) = duplex(4096);
        a.write_all(&(LIMIT + 1).to_le_bytes()).await.unwrap();
        a.flush().await.unwrap();
        let err = read_frame(&mut b, LIMIT).await.unwrap_err();
        assert!(matches!(err, FrameError::Oversized { size, limit } if size == LIMIT + 1 && limit == LIMIT));
    }

    #[tokio::test]
    async fn test_oversized_payload_rejected_on_write() {
        let (mut a, _b) = duplex(4096);
        let big = vec![0u8; (LIMIT + 1) as usize];
        let err = write_frame(&mut a, &big, LIMIT).await.unwrap_err();
        assert!(matches!(err, FrameError::Oversized { .. }));
    }

    #[tokio::test]
    async fn test_eof_before_prefix_is_closed() {
        let (a, mut b) = duplex(4096);
        drop(a);
        let err = read_frame(&mut b, LIMIT).await.unwrap_err();
        assert!(matches!(err, FrameError::Closed));
    }

    #[tokio::test]
    async fn test_eof_mid_payload_is_closed() {
        let (mut a, mut b) = duplex(4096);
        a.write_all(&10u32.to_le_bytes()).await.unwrap();
        a.write_all(b"abc").await.unwrap();
        a.flush().await.unwrap();
        drop(a);
        let err = read_frame(&mut b, LIMIT).await.unwrap_err();
        assert!(matches!(err, FrameError::Closed));
    }

    #[tokio::test]
    async fn test_empty_frame_is_valid() {
        let (mut a, mut b) = duplex(4096);
        write_frame(&mut a, &[], LIMIT).await.unwrap();
        assert!(read_frame(&mut b, LIMIT).await.unwrap().is_empty());
    }
}
