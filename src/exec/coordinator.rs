// src/exec/coordinator.rs

//! Coordinator side of the worker protocol.
//!
//! The runtime hands dispatched jobs to a [`CoordinatorHandle`]; every worker
//! connection runs [`CoordinatorHandle::handle_connection`] in its own Tokio
//! task, pulling jobs from the shared queue and reporting their results back
//! to the runtime as [`RuntimeEvent::JobFinished`].

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::engine::{DispatchedJob, JobOutcome, RuntimeEvent};
use crate::errors::{PipelineError, Result};
use crate::protocol::{self, Message, MessageType, ProtocolError};
use crate::types::{JobId, Timing};

#[derive(Debug, Clone, Copy)]
pub struct CoordinatorOptions {
    pub incarnation: u64,
    /// Longest silence tolerated from a worker while it holds a job.
    pub job_timeout: Duration,
}

#[derive(Debug, Default)]
struct Shared {
    pending: Mutex<VecDeque<DispatchedJob>>,
    /// Jobs handed to a connection, with their abort flag. Always locked
    /// after `pending` when both are held.
    running: Mutex<HashMap<JobId, bool>>,
    notify: Notify,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cloneable handle onto the coordinator's job queue.
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    shared: Arc<Shared>,
    options: CoordinatorOptions,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    shutdown: CancellationToken,
}

impl CoordinatorHandle {
    pub fn new(options: CoordinatorOptions, runtime_tx: mpsc::Sender<RuntimeEvent>) -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            options,
            runtime_tx,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn options(&self) -> CoordinatorOptions {
        self.options
    }

    /// Jobs waiting for a worker.
    pub fn pending(&self) -> usize {
        lock(&self.shared.pending).len()
    }

    /// Queue jobs for the next free workers.
    pub fn enqueue(&self, jobs: Vec<DispatchedJob>) {
        if jobs.is_empty() {
            return;
        }
        lock(&self.shared.pending).extend(jobs);
        self.shared.notify.notify_waiters();
    }

    /// Jobs currently held by worker connections.
    pub fn running(&self) -> usize {
        lock(&self.shared.running).len()
    }

    /// Ask for these jobs to stop.
    ///
    /// A job no worker has picked up yet is dropped from the queue and
    /// reported as failed; a running job is told to abort on the worker's
    /// next `status`. Ids the coordinator does not hold are ignored.
    ///
    /// Never waits on the runtime channel: the runtime itself calls this.
    pub fn request_abort(&self, jobs: Vec<JobId>) {
        for job_id in jobs {
            let removed = {
                let mut pending = lock(&self.shared.pending);
                let removed = pending
                    .iter()
                    .position(|j| j.id() == job_id)
                    .and_then(|pos| pending.remove(pos));
                if removed.is_none() {
                    match lock(&self.shared.running).get_mut(&job_id) {
                        Some(flag) => {
                            debug!(job_id = %job_id, "abort will be delivered on next status");
                            *flag = true;
                        }
                        None => debug!(job_id = %job_id, "abort for a job the coordinator does not hold; ignoring"),
                    }
                }
                removed
            };

            if let Some(job) = removed {
                info!(job_id = %job_id, label = %job.label(), "aborted before reaching a worker");
                self.report_detached(RuntimeEvent::JobFinished {
                    job_id,
                    outcome: JobOutcome::Failed("aborted".to_string()),
                    values: Vec::new(),
                    timing: Timing::new(),
                });
            }
        }
    }

    fn abort_requested(&self, job_id: JobId) -> bool {
        lock(&self.shared.running).get(&job_id).copied().unwrap_or(false)
    }

    /// Deliver an event without waiting for room in the runtime channel.
    fn report_detached(&self, event: RuntimeEvent) {
        match self.runtime_tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                let tx = self.runtime_tx.clone();
                tokio::spawn(async move {
                    if tx.send(event).await.is_err() {
                        debug!("runtime gone; dropping abort result");
                    }
                });
            }
            Err(TrySendError::Closed(_)) => debug!("runtime gone; dropping abort result"),
        }
    }

    /// Stop accepting connections and wake idle workers' tasks.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Take the next queued job and mark it running in one step.
    fn try_pop(&self) -> Option<DispatchedJob> {
        let mut pending = lock(&self.shared.pending);
        let job = pending.pop_front()?;
        lock(&self.shared.running).insert(job.id(), false);
        Some(job)
    }

    fn requeue(&self, job: DispatchedJob) {
        let mut pending = lock(&self.shared.pending);
        lock(&self.shared.running).remove(&job.id());
        pending.push_front(job);
        drop(pending);
        self.shared.notify.notify_waiters();
    }

    /// Wait until a job is queued, or `None` on shutdown.
    async fn next_job(&self) -> Option<DispatchedJob> {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            // Register before checking so an enqueue in between is not lost.
            notified.as_mut().enable();

            if let Some(job) = self.try_pop() {
                return Some(job);
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = self.shutdown.cancelled() => return None,
            }
        }
    }

    async fn report(&self, job_id: JobId, outcome: JobOutcome, values: Vec<protocol::ValueRecord>, timing: Timing) {
        lock(&self.shared.running).remove(&job_id);
        let event = RuntimeEvent::JobFinished {
            job_id,
            outcome,
            values,
            timing,
        };
        if self.runtime_tx.send(event).await.is_err() {
            debug!(job_id = %job_id, "runtime gone; dropping job result");
        }
    }

    /// Accept worker connections until shutdown.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let local = listener.local_addr()?;
        info!(address = %local, incarnation = self.options.incarnation, "coordinator listening");

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = accepted?;
                    // Keep frames moving; status round trips are small.
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(peer = %peer, error = %e, "could not set TCP_NODELAY");
                    }
                    info!(peer = %peer, "worker connected");

                    let handle = self.clone();
                    tokio::spawn(async move {
                        match handle.handle_connection(stream).await {
                            Ok(()) => info!(peer = %peer, "worker disconnected"),
                            Err(err) => warn!(peer = %peer, error = %err, "worker connection ended with error"),
                        }
                    });
                }
                _ = self.shutdown.cancelled() => {
                    info!("coordinator shutting down");
                    return Ok(());
                }
            }
        }
    }

    /// Drive one worker connection until it closes.
    pub async fn handle_connection<S>(&self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let (mut reader, mut writer) = tokio::io::split(stream);
        let incarnation = self.options.incarnation;

        loop {
            let hello = tokio::select! {
                received = protocol::receive(&mut reader) => match received {
                    Ok(msg) => msg,
                    Err(ProtocolError::ConnectionClosed) => return Ok(()),
                    Err(e) => return Err(PipelineError::protocol(None, None, e)),
                },
                _ = self.shutdown.cancelled() => return Ok(()),
            };

            if !hello.is_registration() {
                return Err(PipelineError::protocol(
                    None,
                    Some(hello.kind),
                    ProtocolError::UnexpectedMessage {
                        got: hello.kind,
                        expected: "register or cloud",
                    },
                ));
            }

            if hello.incarnation != incarnation {
                warn!(
                    expected = incarnation,
                    got = hello.incarnation,
                    message_type = %hello.kind,
                    "rejecting worker from another incarnation"
                );
                protocol::send(&mut writer, &Message::response(incarnation, None, false))
                    .await
                    .map_err(|e| PipelineError::protocol(None, Some(MessageType::Response), e))?;
                return Err(PipelineError::protocol(
                    None,
                    Some(hello.kind),
                    ProtocolError::IncarnationMismatch {
                        expected: incarnation,
                        got: hello.incarnation,
                    },
                ));
            }

            debug!(message_type = %hello.kind, ps_hint = hello.ps_hint, "worker registered");

            let job = match self.try_pop() {
                Some(job) => job,
                None => {
                    protocol::send(&mut writer, &Message::wait(incarnation))
                        .await
                        .map_err(|e| PipelineError::protocol(None, Some(MessageType::Wait), e))?;
                    // A waiting worker sends nothing; watch the socket so a
                    // hang-up leaves queued jobs for live connections.
                    tokio::select! {
                        job = self.next_job() => match job {
                            Some(job) => job,
                            None => return Ok(()),
                        },
                        received = protocol::receive(&mut reader) => {
                            return match received {
                                Err(ProtocolError::ConnectionClosed) => {
                                    debug!("worker hung up while waiting");
                                    Ok(())
                                }
                                Err(e) => Err(PipelineError::protocol(None, None, e)),
                                Ok(msg) => Err(PipelineError::protocol(
                                    None,
                                    Some(msg.kind),
                                    ProtocolError::UnexpectedMessage {
                                        got: msg.kind,
                                        expected: "nothing while waiting",
                                    },
                                )),
                            };
                        }
                    }
                }
            };

            let mut task = job.task_message();
            task.timing.insert("sent".to_string(), Utc::now());
            if let Err(e) = protocol::send(&mut writer, &task).await {
                // The worker never saw the job; give it to someone else.
                let label = job.label().clone();
                self.requeue(job);
                return Err(PipelineError::protocol(Some(label), Some(MessageType::Task), e));
            }
            info!(job_id = %job.id(), label = %job.label(), "job sent to worker");

            if let Err(err) = self.supervise(&mut reader, &mut writer, &job).await {
                error!(job_id = %job.id(), label = %job.label(), error = %err, "worker lost");
                self.report(job.id(), JobOutcome::Failed(err.to_string()), Vec::new(), Timing::new())
                    .await;
                return Err(err);
            }
        }
    }

    /// Answer `status` messages until the job's final `response`.
    async fn supervise<R, W>(&self, reader: &mut R, writer: &mut W, job: &DispatchedJob) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let incarnation = self.options.incarnation;
        let label = job.label().clone();
        let fail = |ty: Option<MessageType>, e: ProtocolError| PipelineError::protocol(Some(label.clone()), ty, e);

        loop {
            let received = tokio::time::timeout(self.options.job_timeout, protocol::receive(&mut *reader))
                .await
                .map_err(|_| {
                    fail(
                        None,
                        ProtocolError::Timeout {
                            secs: self.options.job_timeout.as_secs(),
                        },
                    )
                })?;
            let msg = received.map_err(|e| fail(None, e))?;

            if msg.jobid != Some(job.id()) {
                let got = msg.jobid.ok_or_else(|| {
                    fail(
                        Some(msg.kind),
                        ProtocolError::MissingField {
                            message_type: msg.kind,
                            field: "jobid",
                        },
                    )
                })?;
                return Err(fail(
                    Some(msg.kind),
                    ProtocolError::WrongJob {
                        got,
                        expected: job.id(),
                    },
                ));
            }

            match msg.kind {
                MessageType::Status => {
                    let keep_going = !self.abort_requested(job.id());
                    debug!(job_id = %job.id(), %label, keep_going, "status");
                    protocol::send(&mut *writer, &Message::response(incarnation, Some(job.id()), keep_going))
                        .await
                        .map_err(|e| fail(Some(MessageType::Response), e))?;
                }
                MessageType::Response => {
                    let outcome = if msg.success {
                        JobOutcome::Success
                    } else {
                        JobOutcome::Failed(msg.detail().unwrap_or("worker reported failure").to_string())
                    };
                    let mut timing = job.job.timing.clone();
                    timing.extend(msg.timing);
                    timing.insert("received".to_string(), Utc::now());
                    info!(job_id = %job.id(), %label, success = msg.success, "job finished on worker");
                    self.report(job.id(), outcome, msg.values, timing).await;
                    return Ok(());
                }
                other => {
                    return Err(fail(
                        Some(other),
                        ProtocolError::UnexpectedMessage {
                            got: other,
                            expected: "status or response",
                        },
                    ));
                }
            }
        }
    }
}
