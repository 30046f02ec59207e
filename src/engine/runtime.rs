// src/engine/runtime.rs

use std::fmt;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::errors::Result;
use crate::exec::ExecutorBackend;

use super::core::{CoreRuntime, RunReport};
use super::{CoreCommand, DispatchedJob, RuntimeEvent};
use crate::types::JobId;

/// Drives the scheduler in response to `RuntimeEvent`s, and delegates job
/// execution to an `ExecutorBackend`.
///
/// This is a pure IO shell around `CoreRuntime`, which contains all the
/// runtime semantics. This struct handles async IO: reading events from
/// channels and handing jobs and abort signals to the executor.
pub struct Runtime<E: ExecutorBackend> {
    core: CoreRuntime,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    executor: E,
}

impl<E: ExecutorBackend> fmt::Debug for Runtime<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

impl<E: ExecutorBackend> Runtime<E> {
    pub fn new(core: CoreRuntime, event_rx: mpsc::Receiver<RuntimeEvent>, executor: E) -> Self {
        Self {
            core,
            event_rx,
            executor,
        }
    }

    /// Main event loop.
    ///
    /// - Consumes `RuntimeEvent`s from `event_rx`.
    /// - Feeds them into the core runtime.
    /// - Executes commands returned by the core (dispatch, abort, exit).
    ///
    /// Returns the finished plans and the task-lock log.
    pub async fn run(mut self) -> Result<RunReport> {
        info!(
            incarnation = self.core.scheduler().incarnation(),
            nodes = self.core.scheduler().graph().len(),
            "vectorfarm runtime started"
        );

        loop {
            let Some(event) = self.event_rx.recv().await else {
                info!("runtime event channel closed; exiting");
                break;
            };

            debug!(?event, "runtime received event");

            let step = self.core.step(event);

            for command in step.commands {
                self.execute_command(command).await?;
            }

            if !step.keep_running {
                info!("core requested exit; stopping runtime");
                break;
            }
        }

        info!(
            plans = self.core.reports().len(),
            in_flight = self.core.in_flight(),
            "runtime exiting"
        );
        Ok(self.core.into_report())
    }

    async fn execute_command(&mut self, command: CoreCommand) -> Result<()> {
        match command {
            CoreCommand::Dispatch(jobs) => self.dispatch(jobs).await?,
            CoreCommand::Abort(jobs) => self.abort(jobs).await?,
            CoreCommand::RequestExit => {
                // keep_running is already false; nothing to do but note it.
                info!("core issued RequestExit command");
            }
        }
        Ok(())
    }

    async fn dispatch(&mut self, jobs: Vec<DispatchedJob>) -> Result<()> {
        if jobs.is_empty() {
            return Ok(());
        }
        let labels: Vec<String> = jobs.iter().map(|j| j.label().to_string()).collect();
        debug!(?labels, "dispatching jobs");
        self.executor.dispatch(jobs).await
    }

    async fn abort(&mut self, jobs: Vec<JobId>) -> Result<()> {
        if jobs.is_empty() {
            return Ok(());
        }
        debug!(?jobs, "forwarding abort signals");
        self.executor.abort(jobs).await
    }
}
