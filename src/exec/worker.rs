// src/exec/worker.rs

//! Worker side of the protocol: connect, register, run jobs, report.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::{PipelineError, Result};
use crate::exec::task_runner::{JobResult, JobRunner, WorkItem};
use crate::protocol::{self, JobContext, Message, MessageType, ProtocolError};
use crate::types::Timing;

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub hostname: String,
    pub port: u16,
    pub incarnation: u64,
    /// Number of concurrent slots, each with its own connection.
    pub pool_size: usize,
    pub ps_hint: u32,
    pub status_interval: Duration,
    /// Register as a cloud-provisioned worker.
    pub cloud: bool,
    /// Stop a slot after this many jobs.
    pub max_jobs: Option<usize>,
}

/// Run `pool_size` slots against the coordinator until cancelled or until
/// the coordinator goes away.
///
/// Every slot connects before any job runs, so an unreachable coordinator
/// is reported as an error instead of a silent empty run.
pub async fn run_worker<R>(options: WorkerOptions, runner: Arc<R>, cancel: CancellationToken) -> Result<()>
where
    R: JobRunner + 'static,
{
    let address = format!("{}:{}", options.hostname, options.port);
    let slots = options.pool_size.max(1);

    let mut streams = Vec::with_capacity(slots);
    for slot in 0..slots {
        let stream = TcpStream::connect(&address).await.map_err(|e| {
            PipelineError::Other(anyhow::anyhow!("slot {slot}: cannot connect to coordinator at {address}: {e}"))
        })?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(slot, error = %e, "could not set TCP_NODELAY");
        }
        streams.push(stream);
    }
    info!(%address, slots, incarnation = options.incarnation, "worker connected");

    let mut set = JoinSet::new();
    for (slot, stream) in streams.into_iter().enumerate() {
        let options = options.clone();
        let runner = Arc::clone(&runner);
        let cancel = cancel.clone();
        set.spawn(async move { (slot, run_slot(stream, &options, runner.as_ref(), cancel).await) });
    }

    let mut first_error = None;
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((slot, Ok(jobs))) => info!(slot, jobs, "worker slot finished"),
            Ok((slot, Err(err))) => {
                warn!(slot, error = %err, "worker slot failed");
                first_error.get_or_insert(err);
            }
            Err(join_err) => {
                warn!(error = %join_err, "worker slot panicked");
                first_error.get_or_insert(PipelineError::Other(join_err.into()));
            }
        }
    }

    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// One slot's register / task / response loop. Returns the number of jobs
/// completed.
pub async fn run_slot<S, R>(stream: S, options: &WorkerOptions, runner: &R, cancel: CancellationToken) -> Result<usize>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    R: JobRunner + ?Sized,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let incarnation = options.incarnation;
    let mut completed = 0;

    loop {
        if options.max_jobs.is_some_and(|max| completed >= max) || cancel.is_cancelled() {
            return Ok(completed);
        }

        let hello = if options.cloud {
            Message::cloud(incarnation, options.ps_hint)
        } else {
            Message::register(incarnation, options.ps_hint)
        };
        let hello_type = hello.kind;
        protocol::send(&mut writer, &hello)
            .await
            .map_err(|e| PipelineError::protocol(None, Some(hello_type), e))?;

        // `wait` may precede the task; keep reading until work arrives.
        let task = loop {
            let msg = tokio::select! {
                received = protocol::receive(&mut reader) => match received {
                    Ok(msg) => msg,
                    Err(ProtocolError::ConnectionClosed) => {
                        info!("coordinator closed the connection");
                        return Ok(completed);
                    }
                    Err(e) => return Err(PipelineError::protocol(None, None, e)),
                },
                _ = cancel.cancelled() => return Ok(completed),
            };

            match msg.kind {
                MessageType::Wait => debug!("no work yet; waiting"),
                MessageType::Task => break msg,
                MessageType::Response if !msg.success => {
                    return Err(PipelineError::protocol(
                        None,
                        Some(MessageType::Response),
                        ProtocolError::Rejected(format!("coordinator refused incarnation {incarnation}")),
                    ));
                }
                other => {
                    return Err(PipelineError::protocol(
                        None,
                        Some(other),
                        ProtocolError::UnexpectedMessage {
                            got: other,
                            expected: "task or wait",
                        },
                    ));
                }
            }
        };

        let item = WorkItem::from_task(&task).map_err(|e| PipelineError::protocol(task.label(), Some(task.kind), e))?;
        run_job(&mut reader, &mut writer, options, runner, item, task.timing).await?;
        completed += 1;
    }
}

/// Run a single job, answering to the coordinator's abort requests via
/// periodic `status` messages, and send the final `response`.
async fn run_job<Rd, W, R>(
    reader: &mut Rd,
    writer: &mut W,
    options: &WorkerOptions,
    runner: &R,
    item: WorkItem,
    mut timing: Timing,
) -> Result<()>
where
    Rd: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    R: JobRunner + ?Sized,
{
    let incarnation = options.incarnation;
    let job_id = item.job_id;
    let label = item.label.clone();
    let fail = |ty: MessageType, e: ProtocolError| PipelineError::protocol(Some(label.clone()), Some(ty), e);

    info!(job_id = %job_id, %label, "job started");
    timing.insert("started".to_string(), Utc::now());

    let cancel = CancellationToken::new();
    let job = runner.run(item, cancel.clone());
    tokio::pin!(job);

    let mut ticker = tokio::time::interval(options.status_interval);
    // The first tick completes immediately.
    ticker.tick().await;

    let result = loop {
        tokio::select! {
            result = &mut job => break result,
            _ = ticker.tick(), if !cancel.is_cancelled() => {
                protocol::send(&mut *writer, &Message::status(incarnation, job_id))
                    .await
                    .map_err(|e| fail(MessageType::Status, e))?;
                let reply = protocol::receive(&mut *reader)
                    .await
                    .map_err(|e| fail(MessageType::Response, e))?;
                if reply.kind != MessageType::Response {
                    return Err(fail(
                        reply.kind,
                        ProtocolError::UnexpectedMessage { got: reply.kind, expected: "response" },
                    ));
                }
                if !reply.success {
                    info!(job_id = %job_id, %label, "abort requested by coordinator");
                    cancel.cancel();
                }
            }
        }
    };

    timing.insert("finished".to_string(), Utc::now());
    let mut response = Message::response(incarnation, Some(job_id), false);
    response.runid = Some(label.run_id);
    response.target = Some(label.target.clone());
    response.factory = Some(label.node.clone());
    response.timing = timing;

    match result {
        JobResult::Completed(values) => {
            info!(job_id = %job_id, %label, values = values.len(), "job succeeded");
            response.success = true;
            response.values = values;
        }
        JobResult::Failed(reason) => {
            warn!(job_id = %job_id, %label, %reason, "job failed");
            response.context = Some(JobContext {
                detail: Some(reason),
                ..JobContext::default()
            });
        }
        JobResult::Aborted => {
            info!(job_id = %job_id, %label, "job aborted");
            response.context = Some(JobContext {
                detail: Some("aborted".to_string()),
                ..JobContext::default()
            });
        }
    }

    protocol::send(&mut *writer, &response)
        .await
        .map_err(|e| fail(MessageType::Response, e))
}

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::pin::Pin;

    use super::*;
    use crate::protocol::ValueRecord;
    use crate::types::JobId;

    struct Echo;

    impl JobRunner for Echo {
        fn run(
            &self,
            item: WorkItem,
            _cancel: CancellationToken,
        ) -> Pin<Box<dyn Future<Output = JobResult> + Send + '_>> {
            Box::pin(async move { JobResult::Completed(item.inputs) })
        }
    }

    fn options() -> WorkerOptions {
        WorkerOptions {
            hostname: "localhost".to_string(),
            port: 0,
            incarnation: 2,
            pool_size: 1,
            ps_hint: 1,
            status_interval: Duration::from_secs(60),
            cloud: false,
            max_jobs: Some(1),
        }
    }

    fn task() -> Message {
        let mut task = Message::new(MessageType::Task, 2);
        task.jobid = Some(JobId(1));
        task.runid = Some(5);
        task.target = Some("HD209458b".to_string());
        task.factory = Some(crate::types::NodeId::new(crate::types::NodeKind::Task, "transit", "whitelight"));
        task.context = Some(JobContext {
            cmd: "true".to_string(),
            ..JobContext::default()
        });
        task.values = vec![ValueRecord {
            name: "5.system.finalize.parameters.mass".parse().unwrap(),
            version: crate::model::Version::new(1, 0, 0),
            data: b"1.38".to_vec(),
        }];
        task
    }

    #[tokio::test]
    async fn slot_runs_one_job_and_reports_values() {
        let (worker_side, mut coordinator_side) = tokio::io::duplex(64);
        let opts = options();
        let slot = tokio::spawn(async move { run_slot(worker_side, &opts, &Echo, CancellationToken::new()).await });

        let hello = protocol::receive(&mut coordinator_side).await.unwrap();
        assert_eq!(hello.kind, MessageType::Register);
        protocol::send(&mut coordinator_side, &Message::wait(2)).await.unwrap();
        protocol::send(&mut coordinator_side, &task()).await.unwrap();

        let response = protocol::receive(&mut coordinator_side).await.unwrap();
        assert_eq!(response.kind, MessageType::Response);
        assert!(response.success);
        assert_eq!(response.jobid, Some(JobId(1)));
        assert_eq!(response.values.len(), 1);
        assert!(response.timing.contains_key("started"));
        assert!(response.timing.contains_key("finished"));

        assert_eq!(slot.await.unwrap().unwrap(), 1);
    }

    #[tokio::test]
    async fn rejected_registration_is_an_error() {
        let (worker_side, mut coordinator_side) = tokio::io::duplex(64);
        let opts = options();
        let slot = tokio::spawn(async move { run_slot(worker_side, &opts, &Echo, CancellationToken::new()).await });

        protocol::receive(&mut coordinator_side).await.unwrap();
        protocol::send(&mut coordinator_side, &Message::response(9, None, false))
            .await
            .unwrap();

        let err = slot.await.unwrap().unwrap_err();
        assert!(err.to_string().contains("refused incarnation 2"), "{err}");
    }
}
