// src/exec/backend.rs

//! Pluggable executor backend abstraction.
//!
//! The runtime talks to an `ExecutorBackend` instead of the coordinator
//! directly. This makes it easy to swap in a fake executor in tests while
//! keeping the production wiring in [`RemoteExecutorBackend`].
//!
//! - `RemoteExecutorBackend` queues jobs on the [`CoordinatorHandle`], from
//!   where connected workers pick them up.
//! - Tests can provide their own `ExecutorBackend` that, for example, records
//!   which jobs were dispatched and directly emits `JobFinished` events.

use std::future::Future;
use std::pin::Pin;

use tracing::debug;

use crate::engine::DispatchedJob;
use crate::errors::Result;
use crate::exec::coordinator::CoordinatorHandle;
use crate::types::JobId;

/// Trait abstracting how dispatched jobs are executed.
pub trait ExecutorBackend: Send {
    /// Hand the given jobs over for execution.
    fn dispatch(&mut self, jobs: Vec<DispatchedJob>) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Ask for the given jobs to stop. Results still flow back as
    /// `JobFinished` events.
    fn abort(&mut self, jobs: Vec<JobId>) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Backend used in production: jobs go to remote workers through the
/// coordinator.
#[derive(Debug, Clone)]
pub struct RemoteExecutorBackend {
    handle: CoordinatorHandle,
}

impl RemoteExecutorBackend {
    pub fn new(handle: CoordinatorHandle) -> Self {
        Self { handle }
    }
}

impl ExecutorBackend for RemoteExecutorBackend {
    fn dispatch(&mut self, jobs: Vec<DispatchedJob>) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            debug!(jobs = jobs.len(), "queueing jobs for workers");
            self.handle.enqueue(jobs);
            Ok(())
        })
    }

    fn abort(&mut self, jobs: Vec<JobId>) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.handle.request_abort(jobs);
            Ok(())
        })
    }
}
