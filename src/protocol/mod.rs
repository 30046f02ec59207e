// src/protocol/mod.rs

//! Worker coordination protocol.
//!
//! - [`message`] defines the message schema.
//! - [`codec`] frames messages over any async byte stream.

pub mod codec;
pub mod message;

use thiserror::Error;

use crate::types::JobId;

pub use codec::{MAX_FRAME_LEN, SCHEMA_VERSION, receive, send};
pub use message::{JobContext, Message, MessageType, OutputSpec, ValueRecord};

/// Failures that end a worker connection.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("connection closed")]
    ConnectionClosed,

    #[error("truncated frame: expected {expected} bytes")]
    Truncated { expected: usize },

    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },

    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unsupported schema version {0}")]
    UnsupportedSchema(u32),

    #[error("unexpected {got} message, expected {expected}")]
    UnexpectedMessage {
        got: MessageType,
        expected: &'static str,
    },

    #[error("{message_type} message is missing '{field}'")]
    MissingField {
        message_type: MessageType,
        field: &'static str,
    },

    #[error("message for {got} while running {expected}")]
    WrongJob { got: JobId, expected: JobId },

    #[error("worker rejected: {0}")]
    Rejected(String),

    #[error("incarnation mismatch: coordinator runs {expected}, worker sent {got}")]
    IncarnationMismatch { expected: u64, got: u64 },

    #[error("no message within {secs}s")]
    Timeout { secs: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
