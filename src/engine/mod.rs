// src/engine/mod.rs

//! Orchestration engine for vectorfarm.
//!
//! This module ties together:
//! - the scheduler
//! - the request queue (what happens when a run request arrives for a plan
//!   that is still active)
//! - the pool-bounded dispatch queue
//! - the main runtime event loop that reacts to:
//!   - run requests
//!   - job results from the coordinator
//!   - abort and shutdown signals
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`].

use crate::dag::AbortScope;
use crate::protocol::ValueRecord;
use crate::types::{JobId, NodeId, RunId, Timing};

/// Outcome of a job for the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Success,
    Failed(String),
}

/// Runtime options used by both the core and the async shell.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeOptions {
    /// If true, exit the runtime once every plan is terminal and nothing is
    /// queued (used by `vectorfarm run`).
    pub exit_when_idle: bool,
    /// Maximum number of jobs in flight.
    pub pool_size: usize,
}

/// Ask for one plan per target of `run_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub run_id: RunId,
    pub targets: Vec<String>,
    /// Restrict the plans to these nodes and their dependents.
    pub nodes: Option<Vec<NodeId>>,
    pub force: bool,
}

/// Events flowing into the runtime from the CLI, the coordinator, and
/// signal handlers.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    RunRequested(RunRequest),
    /// A job reached a terminal result (worker response, protocol error or
    /// worker loss).
    JobFinished {
        job_id: JobId,
        outcome: JobOutcome,
        values: Vec<ValueRecord>,
        timing: Timing,
    },
    AbortRequested(AbortScope),
    /// Stop immediately (e.g. a second Ctrl-C).
    ShutdownRequested,
}

pub mod core;
pub mod event_handlers;
pub mod queue;
pub mod runtime;

pub use core::{CoreRuntime, RunReport};
pub use event_handlers::{CoreCommand, CoreStep, DispatchedJob};
pub use queue::RequestQueue;
pub use runtime::Runtime;
