// src/engine/event_handlers.rs

//! Event handling logic for the core runtime.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::dag::{AbortScope, PlanRequest, ScheduledJob, SchedulerStep};
use crate::engine::core::CoreRuntime;
use crate::engine::queue::PlanStart;
use crate::engine::{JobOutcome, RunRequest};
use crate::errors::{PipelineError, Result};
use crate::model::names::NamePath;
use crate::model::reference::ValueRef;
use crate::protocol::{JobContext, Message, MessageType, OutputSpec, ValueRecord};
use crate::storage::{StorageError, node_versions};
use crate::types::{JobId, JobLabel, PlanKey, Timing};

const COMPUTE: &str = "compute";
const PERSIST: &str = "persist";

/// A job ready to go over the wire: the scheduled job plus what the worker
/// needs to run it.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchedJob {
    pub job: ScheduledJob,
    pub context: JobContext,
    /// Input values loaded from storage. Missing inputs are omitted.
    pub inputs: Vec<ValueRecord>,
    pub revision: String,
}

impl DispatchedJob {
    pub fn id(&self) -> JobId {
        self.job.id
    }

    pub fn label(&self) -> &JobLabel {
        &self.job.label
    }

    /// The `task` message handed to a worker.
    pub fn task_message(&self) -> Message {
        Message {
            context: Some(self.context.clone()),
            factory: Some(self.job.label.node.clone()),
            jobid: Some(self.job.id),
            ps_hint: self.job.ps_hint,
            revision: self.revision.clone(),
            runid: Some(self.job.label.run_id),
            target: Some(self.job.label.target.clone()),
            timing: self.job.timing.clone(),
            values: self.inputs.clone(),
            ..Message::new(MessageType::Task, self.job.incarnation)
        }
    }
}

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug, Clone)]
pub enum CoreCommand {
    /// Hand these jobs to the coordinator.
    Dispatch(Vec<DispatchedJob>),
    /// Ask the workers running these jobs to abort.
    Abort(Vec<JobId>),
    /// Request that the process exits (every plan is terminal).
    RequestExit,
}

/// Decision returned by the core after handling a single `RuntimeEvent`.
#[derive(Debug, Clone)]
pub struct CoreStep {
    /// Commands the IO shell should execute.
    pub commands: Vec<CoreCommand>,
    /// Whether the outer runtime loop should keep running.
    pub keep_running: bool,
}

impl CoreRuntime {
    /// Start one plan per target, or queue the request for targets whose
    /// plan is still active.
    pub(super) fn handle_run_request(&mut self, request: RunRequest) -> CoreStep {
        info!(
            run_id = request.run_id,
            targets = ?request.targets,
            force = request.force,
            "run requested"
        );

        let mut step = SchedulerStep::default();
        for target in &request.targets {
            let key = PlanKey::new(request.run_id, target.clone());
            let start = PlanStart {
                nodes: request.nodes.clone(),
                force: request.force,
            };

            if self.scheduler.is_active(&key) {
                info!(
                    plan = %key,
                    behaviour = ?self.queue.behaviour(),
                    "plan still active; queuing request"
                );
                self.queue.record(&key, start);
            } else {
                step.merge(self.start_plan(key, start));
            }
        }

        self.finish_step(step)
    }

    /// Apply a terminal job result: persist produced values on success, then
    /// let the scheduler advance.
    pub(super) fn handle_job_finished(
        &mut self,
        job_id: JobId,
        outcome: JobOutcome,
        values: Vec<ValueRecord>,
        timing: Timing,
    ) -> CoreStep {
        self.in_flight.remove(&job_id);

        let Some(label) = self.scheduler.job_label(job_id).cloned() else {
            debug!(job_id = %job_id, "result for a job that is already terminal; ignoring");
            return self.finish_step(SchedulerStep::default());
        };
        self.locks.end_task(&label.to_string(), COMPUTE);

        let outcome = match outcome {
            JobOutcome::Success => match self.persist_results(&label, &values, &timing) {
                Ok(()) => JobOutcome::Success,
                Err(e) => {
                    error!(job_id = %job_id, %label, error = %e, "failed to persist results");
                    JobOutcome::Failed(format!("persisting results: {e}"))
                }
            },
            JobOutcome::Failed(reason) => {
                let err = PipelineError::WorkerFailure {
                    label: label.clone(),
                    message_type: MessageType::Response,
                    reason: reason.clone(),
                };
                warn!(job_id = %job_id, error = %err, "job did not succeed");
                JobOutcome::Failed(reason)
            }
        };

        let step = self.scheduler.step_completion(job_id, outcome);
        self.finish_step(step)
    }

    pub(super) fn handle_abort(&mut self, scope: AbortScope) -> CoreStep {
        info!(?scope, "abort requested");
        let step = self.scheduler.request_abort(&scope);
        self.finish_step(step)
    }

    fn start_plan(&mut self, key: PlanKey, start: PlanStart) -> SchedulerStep {
        let graph = Arc::clone(self.scheduler.graph());
        let persisted = node_versions(
            self.storage.as_ref(),
            key.run_id,
            &key.target,
            graph.topological_order(),
        );
        self.scheduler.start_plan(PlanRequest {
            key,
            nodes: start.nodes,
            force: start.force,
            persisted,
        })
    }

    /// Turn scheduler output into commands: queue ready jobs, forward abort
    /// signals, start queued requests for finished plans, then fill the
    /// pool.
    fn finish_step(&mut self, mut step: SchedulerStep) -> CoreStep {
        let mut commands = Vec::new();

        loop {
            for label in &step.newly_skipped {
                debug!(%label, "node current; skipped");
            }
            for (label, reason) in &step.newly_failed {
                warn!(%label, %reason, "node failed");
            }
            for label in &step.newly_aborted {
                info!(%label, "node aborted");
            }

            self.ready.extend(step.newly_ready.drain(..));

            if !step.abort_signals.is_empty() {
                commands.push(CoreCommand::Abort(std::mem::take(&mut step.abort_signals)));
            }

            let mut next = SchedulerStep::default();
            for report in std::mem::take(&mut step.finished_plans) {
                let key = report.key.clone();
                self.reports.push(report);
                if let Some(start) = self.queue.take_next(&key) {
                    info!(plan = %key, "starting queued request");
                    next.merge(self.start_plan(key, start));
                }
            }

            if next.is_empty() {
                break;
            }
            step = next;
        }

        let dispatch = self.fill_pool();
        if !dispatch.is_empty() {
            commands.push(CoreCommand::Dispatch(dispatch));
        }

        let mut keep_running = true;
        if self.options.exit_when_idle
            && self.scheduler.is_idle()
            && self.queue.is_empty()
            && self.ready.is_empty()
            && self.in_flight.is_empty()
        {
            keep_running = false;
            commands.push(CoreCommand::RequestExit);
        }

        CoreStep {
            commands,
            keep_running,
        }
    }

    /// Move ready jobs into flight, oldest first, while capacity lasts.
    fn fill_pool(&mut self) -> Vec<DispatchedJob> {
        let capacity = self.options.pool_size.max(1);
        let mut out = Vec::new();

        while self.in_flight.len() < capacity {
            let Some(job) = self.ready.pop_front() else {
                break;
            };
            if !self.scheduler.mark_dispatched(job.id) {
                debug!(job_id = %job.id, label = %job.label, "job no longer ready; not dispatching");
                continue;
            }

            let dispatched = self.prepare(job);
            self.in_flight.insert(dispatched.id());
            self.locks.add_task(dispatched.label().to_string(), COMPUTE);
            out.push(dispatched);
        }

        if !self.ready.is_empty() {
            debug!(
                waiting = self.ready.len(),
                in_flight = self.in_flight.len(),
                "pool saturated"
            );
        }
        out
    }

    fn prepare(&self, mut job: ScheduledJob) -> DispatchedJob {
        job.timing.insert("dispatched".to_string(), Utc::now());

        let graph = self.scheduler.graph();
        let node = graph.node(&job.label.node);

        let context = node
            .map(|n| JobContext {
                cmd: n.spec.cmd.clone(),
                version: Some(n.spec.version),
                outputs: n
                    .spec
                    .outputs
                    .values()
                    .map(|(sv, value, version)| OutputSpec {
                        state_vector: sv.to_string(),
                        value: value.to_string(),
                        version,
                    })
                    .collect(),
                detail: None,
            })
            .unwrap_or_default();
        let inputs = node
            .map(|n| self.load_inputs(&job.label, &n.inputs))
            .unwrap_or_default();

        DispatchedJob {
            job,
            context,
            inputs,
            revision: self.revision.clone(),
        }
    }

    fn load_inputs(&self, label: &JobLabel, inputs: &[ValueRef]) -> Vec<ValueRecord> {
        inputs
            .iter()
            .filter_map(|input| {
                let name = match input.name_path(label.run_id) {
                    Ok(name) => name,
                    Err(e) => {
                        warn!(%label, error = %e, "unaddressable input; omitting");
                        return None;
                    }
                };
                match self.storage.get(&label.target, &name) {
                    Ok((version, data)) => Some(ValueRecord {
                        name,
                        version,
                        data,
                    }),
                    Err(StorageError::NotFound { .. }) => {
                        warn!(%label, input = %name, "input value missing; omitting from payload");
                        None
                    }
                    Err(e) => {
                        warn!(%label, input = %name, error = %e, "failed to load input; omitting from payload");
                        None
                    }
                }
            })
            .collect()
    }

    fn persist_results(
        &mut self,
        label: &JobLabel,
        values: &[ValueRecord],
        timing: &Timing,
    ) -> Result<()> {
        self.locks.add_task(label.to_string(), PERSIST);
        let result = self.write_results(label, values, timing);
        self.locks.end_task(&label.to_string(), PERSIST);
        result
    }

    /// Store every declared value the worker returned, then the node's own
    /// record (its declared version, with the job timing as payload).
    fn write_results(&self, label: &JobLabel, values: &[ValueRecord], timing: &Timing) -> Result<()> {
        let graph = self.scheduler.graph();
        let node = graph.node(&label.node).ok_or_else(|| {
            PipelineError::Configuration(format!("{label} is not in the dependency graph"))
        })?;

        let mut stored = 0usize;
        for record in values {
            if record.name.run_id() != label.run_id || !record.name.belongs_to(&label.node) {
                warn!(%label, name = %record.name, "worker returned a value for another node; ignoring");
                continue;
            }

            let declared = match (record.name.state_vector(), record.name.value_name()) {
                (Some(sv), Some(value)) => node
                    .spec
                    .outputs
                    .state_vector(sv)
                    .and_then(|sv| sv.values.get(value))
                    .copied(),
                _ => None,
            };
            let Some(version) = declared else {
                warn!(%label, name = %record.name, "worker returned an undeclared value; ignoring");
                continue;
            };
            if record.version != version {
                debug!(
                    %label,
                    name = %record.name,
                    returned = %record.version,
                    declared = %version,
                    "storing value under its declared version"
                );
            }

            self.storage
                .put(&label.target, &record.name, version, &record.data)?;
            stored += 1;
        }

        let declared_count = node.spec.outputs.values().count();
        if stored < declared_count {
            warn!(
                %label,
                stored,
                declared = declared_count,
                "job succeeded without returning every declared value"
            );
        }

        let body = serde_json::to_vec(timing).map_err(StorageError::from)?;
        let key = self.storage.put(
            &label.target,
            &NamePath::node(label.run_id, &label.node),
            node.spec.version,
            &body,
        )?;
        debug!(%label, %key, stored, "persisted node record");
        Ok(())
    }
}
