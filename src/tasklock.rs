// src/tasklock.rs

//! Order-preserving log of per-(name, action) lock lifecycles, kept for
//! progress introspection. Nothing in scheduling reads it.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LockState {
    Busy,
    Done,
}

impl fmt::Display for LockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LockState::Busy => "busy",
            LockState::Done => "done",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskLock {
    pub name: String,
    pub action: String,
    pub started: DateTime<Utc>,
    pub finished: Option<DateTime<Utc>>,
    pub state: LockState,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskLockLog {
    entries: Vec<TaskLock>,
}

impl TaskLockLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `name` started `action`.
    pub fn add_task(&mut self, name: impl Into<String>, action: impl Into<String>) {
        let lock = TaskLock {
            name: name.into(),
            action: action.into(),
            started: Utc::now(),
            finished: None,
            state: LockState::Busy,
        };
        debug!(name = %lock.name, action = %lock.action, "task lock busy");
        self.entries.push(lock);
    }

    /// Mark the most recent busy lock for `(name, action)` done.
    ///
    /// Returns `false` if no such lock is busy.
    pub fn end_task(&mut self, name: &str, action: &str) -> bool {
        let found = self
            .entries
            .iter_mut()
            .rev()
            .find(|l| l.state == LockState::Busy && l.name == name && l.action == action);

        match found {
            Some(lock) => {
                lock.state = LockState::Done;
                lock.finished = Some(Utc::now());
                debug!(name, action, "task lock done");
                true
            }
            None => {
                warn!(name, action, "end_task without a matching busy lock");
                false
            }
        }
    }

    /// All locks in the order they were added.
    pub fn entries(&self) -> &[TaskLock] {
        &self.entries
    }

    pub fn busy(&self) -> impl Iterator<Item = &TaskLock> {
        self.entries.iter().filter(|l| l.state == LockState::Busy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locks_keep_insertion_order_and_transition_once() {
        let mut log = TaskLockLog::new();
        log.add_task("transit.whitelight", "compute");
        log.add_task("transit.spectrum", "compute");
        assert_eq!(log.busy().count(), 2);

        assert!(log.end_task("transit.whitelight", "compute"));
        assert!(!log.end_task("transit.whitelight", "compute"));
        assert!(!log.end_task("transit.spectrum", "persist"));

        let names: Vec<_> = log.entries().iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["transit.whitelight", "transit.spectrum"]);
        assert_eq!(log.entries()[0].state, LockState::Done);
        assert!(log.entries()[0].finished.is_some());
        assert_eq!(log.entries()[1].state, LockState::Busy);
    }
}
