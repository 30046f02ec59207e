// src/engine/core.rs

//! Pure core runtime state machine.
//!
//! This module contains a synchronous, deterministic "core runtime" that
//! consumes [`RuntimeEvent`]s and produces:
//! - an updated core state
//! - a list of "commands" describing what the IO shell should do next
//!
//! The async/IO-heavy shell (`engine::runtime::Runtime`) is responsible for:
//! - reading events from channels
//! - handing dispatched jobs and abort signals to the executor backend
//! - handling Ctrl+C / shutdown
//!
//! The core has no Tokio types and no sockets. Its only side effects go
//! through the [`Storage`] collaborator, so it can be unit tested with
//! in-memory storage.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use crate::dag::{PlanOutcome, PlanReport, ScheduledJob, Scheduler};
use crate::engine::event_handlers::CoreStep;
use crate::engine::queue::RequestQueue;
use crate::engine::{RuntimeEvent, RuntimeOptions};
use crate::storage::Storage;
use crate::tasklock::TaskLockLog;
use crate::types::{JobId, ResubmitBehaviour};

/// Pure core runtime state.
///
/// This owns:
/// - the scheduler
/// - the request queue
/// - the FIFO of ready jobs waiting for pool capacity
/// - the set of jobs in flight
/// - the task-lock log
/// - finished plan reports
#[derive(Debug)]
pub struct CoreRuntime {
    pub(super) scheduler: Scheduler,
    pub(super) queue: RequestQueue,
    pub(super) ready: VecDeque<ScheduledJob>,
    pub(super) in_flight: HashSet<JobId>,
    pub(super) storage: Arc<dyn Storage>,
    pub(super) locks: TaskLockLog,
    pub(super) revision: String,
    pub(super) options: RuntimeOptions,
    pub(super) reports: Vec<PlanReport>,
}

/// Everything a finished runtime hands back to its caller.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub plans: Vec<PlanReport>,
    pub locks: TaskLockLog,
}

impl RunReport {
    /// Whether every finished plan succeeded.
    pub fn succeeded(&self) -> bool {
        self.plans.iter().all(|p| p.outcome == PlanOutcome::Succeeded)
    }
}

impl CoreRuntime {
    pub fn new(
        scheduler: Scheduler,
        storage: Arc<dyn Storage>,
        revision: impl Into<String>,
        behaviour: ResubmitBehaviour,
        queue_length: usize,
        options: RuntimeOptions,
    ) -> Self {
        Self {
            scheduler,
            queue: RequestQueue::new(behaviour, queue_length),
            ready: VecDeque::new(),
            in_flight: HashSet::new(),
            storage,
            locks: TaskLockLog::new(),
            revision: revision.into(),
            options,
            reports: Vec::new(),
        }
    }

    /// Whether no plan is active.
    pub fn is_idle(&self) -> bool {
        self.scheduler.is_idle()
    }

    pub fn queue_is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn waiting_for_capacity(&self) -> usize {
        self.ready.len()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn reports(&self) -> &[PlanReport] {
        &self.reports
    }

    pub fn locks(&self) -> &TaskLockLog {
        &self.locks
    }

    pub fn into_report(self) -> RunReport {
        RunReport {
            plans: self.reports,
            locks: self.locks,
        }
    }

    /// Handle a single runtime event, updating core state and returning the
    /// resulting commands for the IO shell.
    pub fn step(&mut self, event: RuntimeEvent) -> CoreStep {
        match event {
            RuntimeEvent::RunRequested(request) => self.handle_run_request(request),
            RuntimeEvent::JobFinished {
                job_id,
                outcome,
                values,
                timing,
            } => self.handle_job_finished(job_id, outcome, values, timing),
            RuntimeEvent::AbortRequested(scope) => self.handle_abort(scope),
            RuntimeEvent::ShutdownRequested => CoreStep {
                commands: Vec::new(),
                keep_running: false,
            },
        }
    }
}
