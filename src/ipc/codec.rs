//! Frame codec for the command wire protocol.
//!
//! Frame format:
//! ```text
//! ┌──────────┬──────────┬────────────────────────┐
//! │ len (4B) │ kind(1B) │   msgpack payload      │
//! │ u32 BE   │ u8       │                        │
//! └──────────┴──────────┴────────────────────────┘
//! ```
//! Length = sizeof(kind byte) + sizeof(payload), NOT including the 4-byte prefix.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Frame discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// Command from the chat platform adapter.
    Request = 0x01,
    /// Single response.
    Response = 0x02,
    /// One item of a streamed response.
    StreamChunk = 0x03,
    /// Stream finished.
    StreamEnd = 0x04,
    /// Error response.
    Error = 0xFF,
}

impl FrameKind {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(FrameKind::Request),
            0x02 => Some(FrameKind::Response),
            0x03 => Some(FrameKind::StreamChunk),
            0x04 => Some(FrameKind::StreamEnd),
            0xFF => Some(FrameKind::Error),
            _ => None,
        }
    }
}

/// Encode `value` as a msgpack map (field names kept).
pub fn encode<T: Serialize>(value: &T) -> io::Result<Vec<u8>> {
    rmp_serde::to_vec_named(value).map_err(|e| {
        tracing::error!("Msgpack encoding failed: {}", e);
        io::Error::new(io::ErrorKind::InvalidData, e.to_string())
    })
}

pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> io::Result<T> {
    rmp_serde::from_slice(payload).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
}

/// Read one frame from the stream.
///
/// Returns the raw kind byte and the payload; `None` on clean EOF.
/// `max_frame_bytes` caps the accepted frame length.
pub async fn read_frame<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    max_frame_bytes: u32,
) -> io::Result<Option<(u8, Vec<u8>)>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let frame_len = u32::from_be_bytes(len_buf);
    if frame_len > max_frame_bytes {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Frame too large: {} bytes", frame_len),
        ));
    }
    if frame_len < 1 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "Frame too short: missing kind byte",
        ));
    }

    let mut frame = vec![0u8; frame_len as usize];
    reader.read_exact(&mut frame).await?;
    let payload = frame.split_off(1);
    Ok(Some((frame[0], payload)))
}

/// Write one frame to the stream.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    kind: FrameKind,
    payload: &[u8],
) -> io::Result<()> {
    let frame_len = u32::try_from(payload.len() + 1)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "payload too large"))?;
    writer.write_all(&frame_len.to_be_bytes()).await?;
    writer.write_all(&[kind as u8]).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_frame_over_duplex() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let body = encode(&json!({"method": "GetStatus"})).unwrap();
        write_frame(&mut client, FrameKind::Request, &body).await.unwrap();

        let (kind, payload) = read_frame(&mut server, 1024).await.unwrap().unwrap();
        assert_eq!(FrameKind::from_byte(kind), Some(FrameKind::Request));
        let value: serde_json::Value = decode(&payload).unwrap();
        assert_eq!(value["method"], "GetStatus");
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        write_frame(&mut client, FrameKind::Request, &[0u8; 64]).await.unwrap();
        let err = read_frame(&mut server, 16).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_clean_eof() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);
        assert!(read_frame(&mut server, 64).await.unwrap().is_none());
    }

    #[test]
    fn test_unknown_kind() {
        assert_eq!(FrameKind::from_byte(0x7A), None);
    }
}
