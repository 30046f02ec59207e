// src/exec/mod.rs

//! Job execution layer.
//!
//! - [`backend`] provides the `ExecutorBackend` trait the runtime dispatches
//!   through, and the production `RemoteExecutorBackend`.
//! - [`coordinator`] serves worker connections and feeds job results back
//!   to the runtime.
//! - [`worker`] is the other end of the connection: register, run, report.
//! - [`task_runner`] runs a single job on a worker by spawning its command.

pub mod backend;
pub mod coordinator;
pub mod task_runner;
pub mod worker;

pub use backend::{ExecutorBackend, RemoteExecutorBackend};
pub use coordinator::{CoordinatorHandle, CoordinatorOptions};
pub use task_runner::{CommandRunner, JobResult, JobRunner, WorkItem};
pub use worker::{WorkerOptions, run_slot, run_worker};
