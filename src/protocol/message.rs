// src/protocol/message.rs

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::names::NamePath;
use crate::model::version::Version;
use crate::types::{JobId, JobLabel, NodeId, PlanKey, RunId, Timing};

/// Kind of a protocol message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// Worker announces itself and asks for work.
    Register,
    /// Acknowledgement, status answer or final job result.
    Response,
    /// Coordinator hands a job to a worker.
    Task,
    /// Coordinator has no work yet; a `task` follows later.
    Wait,
    /// Worker asks whether its running job should continue.
    Status,
    /// Like `register`, from a cloud-provisioned worker.
    Cloud,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageType::Register => "register",
            MessageType::Response => "response",
            MessageType::Task => "task",
            MessageType::Wait => "wait",
            MessageType::Status => "status",
            MessageType::Cloud => "cloud",
        };
        f.write_str(s)
    }
}

/// A value a job is expected to produce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSpec {
    pub state_vector: String,
    pub value: String,
    pub version: Version,
}

/// What a worker needs to know to run a job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobContext {
    pub cmd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Version>,
    #[serde(default)]
    pub outputs: Vec<OutputSpec>,
    /// Free-form failure reason on an unsuccessful `response`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// One persisted value travelling with a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueRecord {
    pub name: NamePath,
    pub version: Version,
    pub data: Vec<u8>,
}

/// A single protocol message. Which fields are meaningful depends on
/// `kind`; the rest keep their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default)]
    pub context: Option<JobContext>,
    #[serde(default)]
    pub factory: Option<NodeId>,
    pub incarnation: u64,
    #[serde(default)]
    pub jobid: Option<JobId>,
    #[serde(default)]
    pub ps_hint: u32,
    #[serde(default)]
    pub revision: String,
    #[serde(default)]
    pub runid: Option<RunId>,
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub timing: Timing,
    #[serde(default)]
    pub values: Vec<ValueRecord>,
}

impl Message {
    pub fn new(kind: MessageType, incarnation: u64) -> Self {
        Self {
            kind,
            context: None,
            factory: None,
            incarnation,
            jobid: None,
            ps_hint: 0,
            revision: String::new(),
            runid: None,
            success: false,
            target: None,
            timing: Timing::new(),
            values: Vec::new(),
        }
    }

    pub fn register(incarnation: u64, ps_hint: u32) -> Self {
        Self {
            ps_hint,
            ..Self::new(MessageType::Register, incarnation)
        }
    }

    pub fn cloud(incarnation: u64, ps_hint: u32) -> Self {
        Self {
            ps_hint,
            ..Self::new(MessageType::Cloud, incarnation)
        }
    }

    pub fn wait(incarnation: u64) -> Self {
        Self::new(MessageType::Wait, incarnation)
    }

    pub fn status(incarnation: u64, job: JobId) -> Self {
        Self {
            jobid: Some(job),
            ..Self::new(MessageType::Status, incarnation)
        }
    }

    pub fn response(incarnation: u64, job: Option<JobId>, success: bool) -> Self {
        Self {
            jobid: job,
            success,
            ..Self::new(MessageType::Response, incarnation)
        }
    }

    /// Whether this message asks the coordinator for work.
    pub fn is_registration(&self) -> bool {
        matches!(self.kind, MessageType::Register | MessageType::Cloud)
    }

    /// The (run, target, node) triple, when the message carries one.
    pub fn label(&self) -> Option<JobLabel> {
        let run_id = self.runid?;
        let target = self.target.as_ref()?;
        let node = self.factory.as_ref()?;
        Some(JobLabel::new(&PlanKey::new(run_id, target.clone()), node))
    }

    pub fn detail(&self) -> Option<&str> {
        self.context.as_ref()?.detail.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NodeKind;

    #[test]
    fn type_field_is_lowercase() {
        let json = serde_json::to_value(Message::status(3, JobId(9))).unwrap();
        assert_eq!(json["type"], "status");
        assert_eq!(json["jobid"], 9);
        assert_eq!(json["incarnation"], 3);
    }

    #[test]
    fn sparse_messages_decode_with_defaults() {
        let msg: Message =
            serde_json::from_str(r#"{"type":"register","incarnation":1}"#).unwrap();
        assert!(msg.is_registration());
        assert!(msg.values.is_empty());
        assert_eq!(msg.label(), None);
    }

    #[test]
    fn label_needs_run_target_and_factory() {
        let mut msg = Message::response(1, Some(JobId(1)), true);
        msg.runid = Some(5);
        msg.target = Some("HD209458b".to_string());
        assert_eq!(msg.label(), None);
        msg.factory = Some(NodeId::new(NodeKind::Task, "transit", "whitelight"));
        assert_eq!(
            msg.label().unwrap().to_string(),
            "run 5 target HD209458b node transit.whitelight"
        );
    }
}
