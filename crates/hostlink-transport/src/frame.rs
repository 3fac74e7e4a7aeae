//! Length-prefixed framing over a byte stream.
//!
//! TCP delivers a stream of bytes, not messages: one `read` may return half
//! a message or three of them. Every frame is therefore explicit:
//!
//! ```text
//! [4-byte big-endian length][payload]
//! ```
//!
//! The reader suspends inside `read` until bytes arrive; there is no
//! readiness polling.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::TransportError;

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Largest payload a single frame may carry (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Reads one complete frame and returns its payload.
///
/// Returns `Ok(None)` when the stream ends cleanly on a frame boundary.
///
/// # Errors
/// - [`TransportError::IncompleteFrame`] if the stream ends mid-frame
/// - [`TransportError::EmptyFrame`] / [`TransportError::FrameTooLarge`] for
///   a bad length prefix
/// - [`TransportError::ReceiveFailed`] on any I/O error
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; LENGTH_PREFIX_LEN];
    let mut filled = 0;
    while filled < LENGTH_PREFIX_LEN {
        let n = reader
            .read(&mut prefix[filled..])
            .await
            .map_err(TransportError::ReceiveFailed)?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(TransportError::IncompleteFrame {
                expected: LENGTH_PREFIX_LEN,
                received: filled,
            });
        }
        filled += n;
    }

    let len = u32::from_be_bytes(prefix) as usize;
    if len == 0 {
        return Err(TransportError::EmptyFrame);
    }
    if len > MAX_FRAME_SIZE {
        return Err(TransportError::FrameTooLarge {
            len,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut payload = vec![0u8; len];
    let mut received = 0;
    while received < len {
        let n = reader
            .read(&mut payload[received..])
            .await
            .map_err(TransportError::ReceiveFailed)?;
        if n == 0 {
            return Err(TransportError::IncompleteFrame {
                expected: len,
                received,
            });
        }
        received += n;
    }

    Ok(Some(payload))
}

/// Writes `payload` as one frame and flushes.
///
/// Prefix and payload go out in a single `write_all`. Callers sharing a
/// stream must still hold a lock around this call, since `write_all` may
/// take several syscalls.
///
/// # Errors
/// - [`TransportError::EmptyFrame`] / [`TransportError::FrameTooLarge`] for
///   a payload the reader would reject
/// - [`TransportError::SendFailed`] on any I/O error
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    if payload.is_empty() {
        return Err(TransportError::EmptyFrame);
    }
    if payload.len() > MAX_FRAME_SIZE {
        return Err(TransportError::FrameTooLarge {
            len: payload.len(),
            max: MAX_FRAME_SIZE,
        });
    }

    let mut buf = Vec::with_capacity(LENGTH_PREFIX_LEN + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(payload);

    writer
        .write_all(&buf)
        .await
        .map_err(TransportError::SendFailed)?;
    writer.flush().await.map_err(TransportError::SendFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frame_round_trip() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"hello").await.unwrap();
        assert_eq!(&buf[..4], &[0, 0, 0, 5]);

        let mut reader = buf.as_slice();
        let payload = read_frame(&mut reader).await.unwrap();
        assert_eq!(payload.as_deref(), Some(&b"hello"[..]));
    }

    #[tokio::test]
    async fn test_back_to_back_frames_stay_separate() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"one").await.unwrap();
        write_frame(&mut buf, b"two").await.unwrap();

        let mut reader = buf.as_slice();
        assert_eq!(read_frame(&mut reader).await.unwrap().unwrap(), b"one");
        assert_eq!(read_frame(&mut reader).await.unwrap().unwrap(), b"two");
        assert!(read_frame(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_clean_eof_returns_none() {
        let mut reader: &[u8] = &[];
        assert!(read_frame(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_eof_inside_prefix_is_incomplete() {
        let mut reader: &[u8] = &[0, 0];
        match read_frame(&mut reader).await {
            Err(TransportError::IncompleteFrame { expected, received }) => {
                assert_eq!(expected, 4);
                assert_eq!(received, 2);
            }
            other => panic!("expected IncompleteFrame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_eof_inside_payload_is_incomplete() {
        let mut reader: &[u8] = &[0, 0, 0, 10, b'a', b'b', b'c'];
        match read_frame(&mut reader).await {
            Err(TransportError::IncompleteFrame { expected, received }) => {
                assert_eq!(expected, 10);
                assert_eq!(received, 3);
            }
            other => panic!("expected IncompleteFrame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_frame_rejected() {
        let mut reader: &[u8] = &[0, 0, 0, 0];
        assert!(matches!(
            read_frame(&mut reader).await,
            Err(TransportError::EmptyFrame)
        ));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let len = ((MAX_FRAME_SIZE + 1) as u32).to_be_bytes();
        let mut reader: &[u8] = &len;
        assert!(matches!(
            read_frame(&mut reader).await,
            Err(TransportError::FrameTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn test_frame_split_across_small_reads() {
        // A duplex pipe with a tiny buffer forces many partial reads.
        let (mut tx, mut rx) = tokio::io::duplex(7);
        let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let expected = payload.clone();

        let writer = tokio::spawn(async move {
            write_frame(&mut tx, &payload).await.unwrap();
        });

        let received = read_frame(&mut rx).await.unwrap().unwrap();
        writer.await.unwrap();
        assert_eq!(received, expected);
    }

    #[tokio::test]
    async fn test_write_empty_payload_rejected() {
        let mut buf = Vec::new();
        assert!(matches!(
            write_frame(&mut buf, b"").await,
            Err(TransportError::EmptyFrame)
        ));
        assert!(buf.is_empty());
    }
}
