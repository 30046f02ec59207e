// src/protocol/codec.rs

//! Length-framed message codec.
//!
//! A frame is a 4-byte big-endian payload length followed by exactly that
//! many bytes of JSON: `{"schema": 1, "message": {...}}`.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::protocol::ProtocolError;
use crate::protocol::message::Message;

/// Payload schema this build speaks.
pub const SCHEMA_VERSION: u32 = 1;

/// Largest accepted payload.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

#[derive(Serialize)]
struct EnvelopeOut<'a> {
    schema: u32,
    message: &'a Message,
}

#[derive(Deserialize)]
struct EnvelopeIn {
    schema: u32,
    message: serde_json::Value,
}

/// Serialize a message into a frame payload (without the length prefix).
pub fn encode(message: &Message) -> Result<Vec<u8>, ProtocolError> {
    let payload = serde_json::to_vec(&EnvelopeOut {
        schema: SCHEMA_VERSION,
        message,
    })?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge {
            len: payload.len(),
            max: MAX_FRAME_LEN,
        });
    }
    Ok(payload)
}

/// Decode a frame payload, checking the schema number first.
pub fn decode(payload: &[u8]) -> Result<Message, ProtocolError> {
    let envelope: EnvelopeIn = serde_json::from_slice(payload)?;
    if envelope.schema != SCHEMA_VERSION {
        return Err(ProtocolError::UnsupportedSchema(envelope.schema));
    }
    Ok(serde_json::from_value(envelope.message)?)
}

/// Write one frame and flush.
pub async fn send<W>(writer: &mut W, message: &Message) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let payload = encode(message)?;
    // encode() bounds the length well below u32::MAX.
    writer.write_u32(payload.len() as u32).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    trace!(message_type = %message.kind, len = payload.len(), "frame sent");
    Ok(())
}

/// Read exactly one frame and decode it.
///
/// A clean end of stream before the first header byte is
/// [`ProtocolError::ConnectionClosed`]; an end of stream anywhere else is
/// [`ProtocolError::Truncated`].
pub async fn receive<R>(reader: &mut R) -> Result<Message, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    let mut filled = 0;
    while filled < header.len() {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            return Err(if filled == 0 {
                ProtocolError::ConnectionClosed
            } else {
                ProtocolError::Truncated {
                    expected: header.len(),
                }
            });
        }
        filled += n;
    }

    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            ProtocolError::Truncated { expected: len }
        } else {
            ProtocolError::Io(e)
        }
    })?;

    let message = decode(&payload)?;
    trace!(message_type = %message.kind, len, "frame received");
    Ok(message)
}
