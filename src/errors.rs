// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

use crate::protocol::{MessageType, ProtocolError};
use crate::storage::StorageError;
use crate::types::JobLabel;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Cycle detected in dependency graph: {path}")]
    DependencyCycle { path: String },

    #[error("Protocol error{}: {source}", context_suffix(.label, .message_type))]
    Protocol {
        label: Option<JobLabel>,
        message_type: Option<MessageType>,
        #[source]
        source: ProtocolError,
    },

    #[error("Worker failure for {label} ({message_type} message): {reason}")]
    WorkerFailure {
        label: JobLabel,
        message_type: MessageType,
        reason: String,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    /// Attach the job triple and message type to a protocol failure.
    pub fn protocol(
        label: Option<JobLabel>,
        message_type: Option<MessageType>,
        source: ProtocolError,
    ) -> Self {
        PipelineError::Protocol {
            label,
            message_type,
            source,
        }
    }
}

impl From<ProtocolError> for PipelineError {
    fn from(source: ProtocolError) -> Self {
        PipelineError::protocol(None, None, source)
    }
}

fn context_suffix(label: &Option<JobLabel>, message_type: &Option<MessageType>) -> String {
    match (label, message_type) {
        (Some(label), Some(ty)) => format!(" for {label} ({ty} message)"),
        (Some(label), None) => format!(" for {label}"),
        (None, Some(ty)) => format!(" ({ty} message)"),
        (None, None) => String::new(),
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NodeId, NodeKind, PlanKey};

    #[test]
    fn protocol_errors_name_the_job_and_message_type() {
        let label = JobLabel::new(
            &PlanKey::new(5, "HD209458b"),
            &NodeId::new(NodeKind::Task, "transit", "whitelight"),
        );
        let err = PipelineError::protocol(
            Some(label),
            Some(MessageType::Status),
            ProtocolError::Truncated { expected: 12 },
        );
        let text = err.to_string();
        assert!(text.contains("run 5 target HD209458b node transit.whitelight"));
        assert!(text.contains("status message"));
    }

    #[test]
    fn bare_protocol_errors_have_no_suffix() {
        let err = PipelineError::from(ProtocolError::ConnectionClosed);
        assert_eq!(err.to_string(), "Protocol error: connection closed");
    }
}
