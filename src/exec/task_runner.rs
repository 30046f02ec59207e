// src/exec/task_runner.rs

//! Worker-side job execution.

use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::model::names::NamePath;
use crate::protocol::{JobContext, Message, MessageType, ProtocolError, ValueRecord};
use crate::types::{JobId, JobLabel};

/// A job as the worker sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem {
    pub job_id: JobId,
    pub label: JobLabel,
    pub context: JobContext,
    pub inputs: Vec<ValueRecord>,
}

impl WorkItem {
    /// Extract the job from a `task` message.
    pub fn from_task(message: &Message) -> Result<Self, ProtocolError> {
        let missing = |field| ProtocolError::MissingField {
            message_type: message.kind,
            field,
        };
        if message.kind != MessageType::Task {
            return Err(ProtocolError::UnexpectedMessage {
                got: message.kind,
                expected: "task",
            });
        }
        Ok(Self {
            job_id: message.jobid.ok_or_else(|| missing("jobid"))?,
            label: message.label().ok_or_else(|| missing("runid/target/factory"))?,
            context: message.context.clone().ok_or_else(|| missing("context"))?,
            inputs: message.values.clone(),
        })
    }
}

/// How a job ended on the worker.
#[derive(Debug, Clone, PartialEq)]
pub enum JobResult {
    Completed(Vec<ValueRecord>),
    Failed(String),
    Aborted,
}

/// Executes jobs on a worker.
///
/// Production uses [`CommandRunner`]; tests provide scripted runners.
/// Implementations must stop promptly once `cancel` fires and report
/// [`JobResult::Aborted`].
pub trait JobRunner: Send + Sync {
    fn run(
        &self,
        item: WorkItem,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = JobResult> + Send + '_>>;
}

/// Runs the component's command through the shell.
///
/// - environment: `VECTORFARM_RUN_ID`, `VECTORFARM_TARGET`,
///   `VECTORFARM_FACTORY`, `VECTORFARM_COMPONENT`
/// - stdin: a JSON object mapping each input's name path to its value
/// - stdout: a JSON object `{ "<state_vector>": { "<value>": <json> } }`
#[derive(Debug, Clone, Default)]
pub struct CommandRunner;

impl CommandRunner {
    pub fn new() -> Self {
        Self
    }
}

impl JobRunner for CommandRunner {
    fn run(
        &self,
        item: WorkItem,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = JobResult> + Send + '_>> {
        Box::pin(async move {
            let job_id = item.job_id;
            let label = item.label.clone();
            match run_command(item, cancel).await {
                Ok(result) => result,
                Err(err) => {
                    warn!(job_id = %job_id, %label, error = %err, "job execution error");
                    JobResult::Failed(format!("{err:#}"))
                }
            }
        })
    }
}

async fn run_command(item: WorkItem, cancel: CancellationToken) -> Result<JobResult> {
    info!(
        job_id = %item.job_id,
        label = %item.label,
        cmd = %item.context.cmd,
        "starting job process"
    );

    // Build a shell command appropriate for the platform.
    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(&item.context.cmd);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(&item.context.cmd);
        c
    };

    cmd.env("VECTORFARM_RUN_ID", item.label.run_id.to_string())
        .env("VECTORFARM_TARGET", &item.label.target)
        .env("VECTORFARM_FACTORY", &item.label.node.factory)
        .env("VECTORFARM_COMPONENT", &item.label.node.component)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning process for {}", item.label))?;

    let payload = inputs_json(&item.inputs)?;
    if let Some(mut stdin) = child.stdin.take() {
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(&payload).await {
                debug!(error = %e, "job process closed stdin early");
            }
        });
    }

    // Either the process exits on its own, or the coordinator asks us to
    // abort; dropping the child then kills it.
    tokio::select! {
        output = child.wait_with_output() => {
            let output = output.with_context(|| format!("waiting for process of {}", item.label))?;
            let code = output.status.code().unwrap_or(-1);
            info!(
                job_id = %item.job_id,
                label = %item.label,
                exit_code = code,
                success = output.status.success(),
                "job process exited"
            );

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let tail = stderr.trim().lines().last().unwrap_or("").to_string();
                return Ok(JobResult::Failed(format!("exit code {code}: {tail}")));
            }
            Ok(JobResult::Completed(parse_outputs(&item, &output.stdout)?))
        }

        _ = cancel.cancelled() => {
            info!(job_id = %item.job_id, label = %item.label, "abort requested; killing job process");
            Ok(JobResult::Aborted)
        }
    }
}

/// `{ "<name path>": <value> }`, decoding each value as JSON when it is
/// JSON and as a string otherwise.
fn inputs_json(inputs: &[ValueRecord]) -> Result<Vec<u8>> {
    let map: IndexMap<String, Value> = inputs
        .iter()
        .map(|record| {
            let value = serde_json::from_slice(&record.data).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&record.data).into_owned())
            });
            (record.name.to_string(), value)
        })
        .collect();
    serde_json::to_vec(&map).context("encoding job inputs")
}

/// Keep the declared outputs the process printed; warn about the rest.
fn parse_outputs(item: &WorkItem, stdout: &[u8]) -> Result<Vec<ValueRecord>> {
    if stdout.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    let produced: IndexMap<String, IndexMap<String, Value>> = serde_json::from_slice(stdout)
        .with_context(|| format!("parsing stdout of {} as a JSON object of state vectors", item.label))?;

    let mut records = Vec::new();
    for (sv, values) in &produced {
        for (value, data) in values {
            let declared = item
                .context
                .outputs
                .iter()
                .find(|o| &o.state_vector == sv && &o.value == value);
            let Some(output) = declared else {
                warn!(label = %item.label, state_vector = %sv, value = %value, "ignoring undeclared output");
                continue;
            };
            records.push(ValueRecord {
                name: NamePath::value(item.label.run_id, &item.label.node, sv.as_str(), value.as_str())?,
                version: output.version,
                data: serde_json::to_vec(data)?,
            });
        }
    }
    Ok(records)
}
