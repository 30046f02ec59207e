use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::mpsc;
use vectorfarm::engine::{DispatchedJob, JobOutcome, RuntimeEvent};
use vectorfarm::errors::Result;
use vectorfarm::exec::ExecutorBackend;
use vectorfarm::model::NamePath;
use vectorfarm::protocol::ValueRecord;
use vectorfarm::types::{JobId, JobLabel, Timing};

/// What the fake executor does with a job for a given node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scripted {
    /// Report success with every declared output set to `1`.
    Succeed,
    /// Report failure with this reason.
    Fail(String),
    /// Never report on its own; an abort reports it as failed.
    Hang,
}

/// What the fake executor saw, shared with the test after the executor
/// moves into the runtime.
#[derive(Debug, Clone, Default)]
pub struct ExecutionLog {
    pub dispatched: Arc<Mutex<Vec<JobLabel>>>,
    pub aborted: Arc<Mutex<Vec<JobId>>>,
}

impl ExecutionLog {
    /// Dispatched nodes as `factory.component`, in dispatch order.
    pub fn dispatched_nodes(&self) -> Vec<String> {
        self.dispatched
            .lock()
            .unwrap()
            .iter()
            .map(|l| l.node.to_string())
            .collect()
    }

    pub fn aborted_jobs(&self) -> Vec<JobId> {
        self.aborted.lock().unwrap().clone()
    }
}

/// A fake executor that:
/// - records which jobs were dispatched
/// - immediately reports a scripted `JobFinished` for each one
///   (success unless told otherwise).
pub struct FakeExecutor {
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    script: HashMap<String, Scripted>,
    hanging: HashSet<JobId>,
    log: ExecutionLog,
}

impl FakeExecutor {
    pub fn new(runtime_tx: mpsc::Sender<RuntimeEvent>) -> Self {
        Self {
            runtime_tx,
            script: HashMap::new(),
            hanging: HashSet::new(),
            log: ExecutionLog::default(),
        }
    }

    /// Script the behaviour for `factory.component`.
    pub fn with(mut self, node: &str, behaviour: Scripted) -> Self {
        self.script.insert(node.to_string(), behaviour);
        self
    }

    pub fn log(&self) -> ExecutionLog {
        self.log.clone()
    }
}

fn outputs_of(job: &DispatchedJob) -> Vec<ValueRecord> {
    let label = job.label();
    job.context
        .outputs
        .iter()
        .map(|o| ValueRecord {
            name: NamePath::value(label.run_id, &label.node, o.state_vector.as_str(), o.value.as_str()).unwrap(),
            version: o.version,
            data: b"1".to_vec(),
        })
        .collect()
}

impl ExecutorBackend for FakeExecutor {
    fn dispatch(&mut self, jobs: Vec<DispatchedJob>) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            for job in jobs {
                self.log.dispatched.lock().unwrap().push(job.label().clone());

                let behaviour = self
                    .script
                    .get(&job.label().node.to_string())
                    .cloned()
                    .unwrap_or(Scripted::Succeed);

                let (outcome, values) = match behaviour {
                    Scripted::Succeed => (JobOutcome::Success, outputs_of(&job)),
                    Scripted::Fail(reason) => (JobOutcome::Failed(reason), Vec::new()),
                    Scripted::Hang => {
                        self.hanging.insert(job.id());
                        continue;
                    }
                };

                let mut timing = Timing::new();
                timing.insert("finished".to_string(), Utc::now());
                self.runtime_tx
                    .send(RuntimeEvent::JobFinished {
                        job_id: job.id(),
                        outcome,
                        values,
                        timing,
                    })
                    .await
                    .map_err(anyhow::Error::from)?;
            }
            Ok(())
        })
    }

    fn abort(&mut self, jobs: Vec<JobId>) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            for job_id in jobs {
                self.log.aborted.lock().unwrap().push(job_id);
                if self.hanging.remove(&job_id) {
                    self.runtime_tx
                        .send(RuntimeEvent::JobFinished {
                            job_id,
                            outcome: JobOutcome::Failed("aborted".to_string()),
                            values: Vec::new(),
                            timing: Timing::new(),
                        })
                        .await
                        .map_err(anyhow::Error::from)?;
                }
            }
            Ok(())
        })
    }
}
