// tests/coordinator_protocol.rs

mod common;
use crate::common::{TARGET, init_tracing, task_node, with_timeout};

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use vectorfarm::dag::ScheduledJob;
use vectorfarm::engine::{DispatchedJob, JobOutcome, RuntimeEvent};
use vectorfarm::errors::PipelineError;
use vectorfarm::exec::{CoordinatorHandle, CoordinatorOptions, JobResult, JobRunner, WorkItem, WorkerOptions, run_slot};
use vectorfarm::model::{NamePath, Version};
use vectorfarm::protocol::{self, JobContext, Message, MessageType, OutputSpec, ProtocolError, ValueRecord};
use vectorfarm::types::{JobId, JobLabel, PlanKey, Timing};

const INCARNATION: u64 = 7;

fn job(id: u64) -> DispatchedJob {
    DispatchedJob {
        job: ScheduledJob {
            id: JobId(id),
            label: JobLabel::new(&PlanKey::new(5, TARGET), &task_node("t1")),
            incarnation: INCARNATION,
            ps_hint: 1,
            timing: Timing::new(),
        },
        context: JobContext {
            cmd: "fit".to_string(),
            version: Some(Version::new(1, 0, 0)),
            outputs: vec![OutputSpec {
                state_vector: "result".to_string(),
                value: "depth".to_string(),
                version: Version::new(1, 0, 0),
            }],
            detail: None,
        },
        inputs: Vec::new(),
        revision: "rev".to_string(),
    }
}

fn coordinator(job_timeout: Duration) -> (CoordinatorHandle, mpsc::Receiver<RuntimeEvent>) {
    let (tx, rx) = mpsc::channel(8);
    let options = CoordinatorOptions {
        incarnation: INCARNATION,
        job_timeout,
    };
    (CoordinatorHandle::new(options, tx), rx)
}

fn worker_options(incarnation: u64) -> WorkerOptions {
    WorkerOptions {
        hostname: "unused".to_string(),
        port: 0,
        incarnation,
        pool_size: 1,
        ps_hint: 1,
        status_interval: Duration::from_millis(10),
        cloud: false,
        max_jobs: Some(1),
    }
}

/// Produces every declared output with value `0.0146`.
struct Produce;

impl JobRunner for Produce {
    fn run(&self, item: WorkItem, _cancel: CancellationToken) -> Pin<Box<dyn Future<Output = JobResult> + Send + '_>> {
        Box::pin(async move {
            let values = item
                .context
                .outputs
                .iter()
                .map(|o| ValueRecord {
                    name: NamePath::value(item.label.run_id, &item.label.node, o.state_vector.as_str(), o.value.as_str())
                        .unwrap(),
                    version: o.version,
                    data: b"0.0146".to_vec(),
                })
                .collect();
            JobResult::Completed(values)
        })
    }
}

/// Runs until told to stop.
struct UntilAborted;

impl JobRunner for UntilAborted {
    fn run(&self, _item: WorkItem, cancel: CancellationToken) -> Pin<Box<dyn Future<Output = JobResult> + Send + '_>> {
        Box::pin(async move {
            cancel.cancelled().await;
            JobResult::Aborted
        })
    }
}

async fn next_finished(rx: &mut mpsc::Receiver<RuntimeEvent>) -> (JobId, JobOutcome, Vec<ValueRecord>) {
    match with_timeout(rx.recv()).await {
        Some(RuntimeEvent::JobFinished {
            job_id, outcome, values, ..
        }) => (job_id, outcome, values),
        other => panic!("expected JobFinished, got {other:?}"),
    }
}

#[tokio::test]
async fn job_round_trip_over_a_one_byte_pipe() {
    init_tracing();

    let (coordinator, mut rx) = coordinator(Duration::from_secs(5));
    coordinator.enqueue(vec![job(1)]);

    // A buffer of one byte forces every frame through many partial reads.
    let (coordinator_side, worker_side) = tokio::io::duplex(1);
    let serving = {
        let c = coordinator.clone();
        tokio::spawn(async move { c.handle_connection(coordinator_side).await })
    };
    let worker = tokio::spawn(async move {
        run_slot(worker_side, &worker_options(INCARNATION), &Produce, CancellationToken::new()).await
    });

    let (job_id, outcome, values) = next_finished(&mut rx).await;
    assert_eq!(job_id, JobId(1));
    assert_eq!(outcome, JobOutcome::Success);
    assert_eq!(values.len(), 1);
    assert_eq!(values[0].name.to_string(), "5.t1.fit.result.depth");
    assert_eq!(values[0].data, b"0.0146");

    assert_eq!(with_timeout(worker).await.unwrap().unwrap(), 1);
    // The worker hung up after its one job.
    assert!(with_timeout(serving).await.unwrap().is_ok());
}

#[tokio::test]
async fn mismatched_incarnation_is_rejected() {
    init_tracing();

    let (coordinator, _rx) = coordinator(Duration::from_secs(5));
    let (coordinator_side, worker_side) = tokio::io::duplex(256);
    let serving = {
        let c = coordinator.clone();
        tokio::spawn(async move { c.handle_connection(coordinator_side).await })
    };

    let err = run_slot(worker_side, &worker_options(3), &Produce, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("refused incarnation 3"), "{err}");

    match with_timeout(serving).await.unwrap() {
        Err(PipelineError::Protocol {
            source: ProtocolError::IncarnationMismatch { expected: 7, got: 3 },
            ..
        }) => {}
        other => panic!("expected incarnation mismatch, got {other:?}"),
    }
}

#[tokio::test]
async fn abort_reaches_the_worker_through_status() {
    init_tracing();

    let (coordinator, mut rx) = coordinator(Duration::from_secs(5));
    coordinator.enqueue(vec![job(2)]);

    let (coordinator_side, worker_side) = tokio::io::duplex(4096);
    {
        let c = coordinator.clone();
        tokio::spawn(async move { c.handle_connection(coordinator_side).await });
    }
    let worker = tokio::spawn(async move {
        run_slot(worker_side, &worker_options(INCARNATION), &UntilAborted, CancellationToken::new()).await
    });

    // Wait until the worker has picked the job up.
    with_timeout(async {
        while coordinator.pending() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    coordinator.request_abort(vec![JobId(2)]);

    let (job_id, outcome, _) = next_finished(&mut rx).await;
    assert_eq!(job_id, JobId(2));
    assert_eq!(outcome, JobOutcome::Failed("aborted".to_string()));
    assert_eq!(with_timeout(worker).await.unwrap().unwrap(), 1);
}

#[tokio::test]
async fn worker_disconnect_fails_the_job() {
    init_tracing();

    let (coordinator, mut rx) = coordinator(Duration::from_secs(5));
    coordinator.enqueue(vec![job(3)]);

    let (coordinator_side, mut worker_side) = tokio::io::duplex(4096);
    let serving = {
        let c = coordinator.clone();
        tokio::spawn(async move { c.handle_connection(coordinator_side).await })
    };

    protocol::send(&mut worker_side, &Message::register(INCARNATION, 1))
        .await
        .unwrap();
    let task = protocol::receive(&mut worker_side).await.unwrap();
    assert_eq!(task.kind, MessageType::Task);
    assert_eq!(task.jobid, Some(JobId(3)));
    drop(worker_side);

    let (job_id, outcome, _) = next_finished(&mut rx).await;
    assert_eq!(job_id, JobId(3));
    match outcome {
        JobOutcome::Failed(reason) => assert!(reason.contains("connection closed"), "{reason}"),
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(with_timeout(serving).await.unwrap().is_err());
}

#[tokio::test]
async fn silent_worker_times_out() {
    init_tracing();

    let (coordinator, mut rx) = coordinator(Duration::from_millis(50));
    coordinator.enqueue(vec![job(4)]);

    let (coordinator_side, mut worker_side) = tokio::io::duplex(4096);
    {
        let c = coordinator.clone();
        tokio::spawn(async move { c.handle_connection(coordinator_side).await });
    }

    protocol::send(&mut worker_side, &Message::register(INCARNATION, 1))
        .await
        .unwrap();
    protocol::receive(&mut worker_side).await.unwrap();

    let (job_id, outcome, _) = next_finished(&mut rx).await;
    assert_eq!(job_id, JobId(4));
    match outcome {
        JobOutcome::Failed(reason) => assert!(reason.contains("no message within"), "{reason}"),
        other => panic!("expected failure, got {other:?}"),
    }
    drop(worker_side);
}

#[tokio::test]
async fn idle_worker_is_told_to_wait() {
    init_tracing();

    let (coordinator, mut rx) = coordinator(Duration::from_secs(5));
    let (coordinator_side, mut worker_side) = tokio::io::duplex(4096);
    {
        let c = coordinator.clone();
        tokio::spawn(async move { c.handle_connection(coordinator_side).await });
    }

    protocol::send(&mut worker_side, &Message::cloud(INCARNATION, 4))
        .await
        .unwrap();
    let wait = protocol::receive(&mut worker_side).await.unwrap();
    assert_eq!(wait.kind, MessageType::Wait);

    coordinator.enqueue(vec![job(5)]);
    let task = with_timeout(protocol::receive(&mut worker_side)).await.unwrap();
    assert_eq!(task.jobid, Some(JobId(5)));
    assert_eq!(task.context.unwrap().outputs.len(), 1);

    let mut done = Message::response(INCARNATION, Some(JobId(5)), true);
    done.timing.insert("finished".to_string(), chrono::Utc::now());
    protocol::send(&mut worker_side, &done).await.unwrap();

    let (job_id, outcome, _) = next_finished(&mut rx).await;
    assert_eq!(job_id, JobId(5));
    assert_eq!(outcome, JobOutcome::Success);
}

#[tokio::test]
async fn unexpected_first_message_closes_the_connection() {
    init_tracing();

    let (coordinator, _rx) = coordinator(Duration::from_secs(5));
    let (coordinator_side, mut worker_side) = tokio::io::duplex(4096);
    let serving = {
        let c = coordinator.clone();
        tokio::spawn(async move { c.handle_connection(coordinator_side).await })
    };

    protocol::send(&mut worker_side, &Message::status(INCARNATION, JobId(1)))
        .await
        .unwrap();

    match with_timeout(serving).await.unwrap() {
        Err(PipelineError::Protocol {
            message_type: Some(MessageType::Status),
            source: ProtocolError::UnexpectedMessage { .. },
            ..
        }) => {}
        other => panic!("expected unexpected-message error, got {other:?}"),
    }
}

#[tokio::test]
async fn worker_hanging_up_while_waiting_leaves_jobs_queued() {
    init_tracing();

    let (coordinator, mut rx) = coordinator(Duration::from_secs(5));
    let (coordinator_side, mut worker_side) = tokio::io::duplex(4096);
    let serving = {
        let c = coordinator.clone();
        tokio::spawn(async move { c.handle_connection(coordinator_side).await })
    };

    protocol::send(&mut worker_side, &Message::register(INCARNATION, 1))
        .await
        .unwrap();
    let wait = protocol::receive(&mut worker_side).await.unwrap();
    assert_eq!(wait.kind, MessageType::Wait);
    drop(worker_side);

    // The connection ends cleanly once the hang-up is seen.
    assert!(with_timeout(serving).await.unwrap().is_ok());

    coordinator.enqueue(vec![job(6)]);
    assert_eq!(coordinator.pending(), 1);
    assert_eq!(coordinator.running(), 0);
    assert!(rx.try_recv().is_err(), "no job may be reported for a dead connection");
}
