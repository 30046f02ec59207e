// src/engine/queue.rs

use std::collections::{HashMap, VecDeque};

use tracing::{debug, warn};

use crate::types::{NodeId, PlanKey, ResubmitBehaviour};

/// What a queued request asks of its plan once it can start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanStart {
    pub nodes: Option<Vec<NodeId>>,
    pub force: bool,
}

/// Requests that arrive while their (run, target) plan is still active.
///
/// Semantics:
/// - Each entry is one future start of that plan.
/// - `queue_length` bounds how many future starts are kept per plan; the
///   default of 1 means "at most one re-plan is queued".
/// - When the active plan finishes, the runtime calls [`Self::take_next`]
///   to start the oldest remaining request.
#[derive(Debug)]
pub struct RequestQueue {
    behaviour: ResubmitBehaviour,
    max_per_plan: usize,
    pending: HashMap<PlanKey, VecDeque<PlanStart>>,
}

impl RequestQueue {
    /// `max_per_plan` is clamped to at least 1, as a zero-length queue would
    /// make queuing semantics meaningless.
    pub fn new(behaviour: ResubmitBehaviour, max_per_plan: usize) -> Self {
        Self {
            behaviour,
            max_per_plan: max_per_plan.max(1),
            pending: HashMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pending.values().all(VecDeque::is_empty)
    }

    pub fn behaviour(&self) -> ResubmitBehaviour {
        self.behaviour
    }

    pub fn len_for(&self, key: &PlanKey) -> usize {
        self.pending.get(key).map_or(0, VecDeque::len)
    }

    /// Remember a request for an active plan.
    ///
    /// - `Queue`: append; when the bound is exceeded the oldest entries are
    ///   dropped.
    /// - `Replace`: forget whatever was queued and keep only this request.
    pub fn record(&mut self, key: &PlanKey, start: PlanStart) {
        let entries = self.pending.entry(key.clone()).or_default();

        match self.behaviour {
            ResubmitBehaviour::Queue => {
                entries.push_back(start);
                debug!(plan = %key, queued = entries.len(), "queued run request (queue mode)");

                if entries.len() > self.max_per_plan {
                    warn!(
                        plan = %key,
                        queued = entries.len(),
                        max = self.max_per_plan,
                        "exceeded queue_length; dropping oldest queued requests"
                    );
                    while entries.len() > self.max_per_plan {
                        entries.pop_front();
                    }
                }
            }
            ResubmitBehaviour::Replace => {
                debug!(plan = %key, "replacing queued run requests (replace mode)");
                entries.clear();
                entries.push_back(start);
            }
        }
    }

    /// Next queued request for `key`, if any.
    pub fn take_next(&mut self, key: &PlanKey) -> Option<PlanStart> {
        let entries = self.pending.get_mut(key)?;
        let next = entries.pop_front();
        if entries.is_empty() {
            self.pending.remove(key);
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start(force: bool) -> PlanStart {
        PlanStart { nodes: None, force }
    }

    #[test]
    fn queue_mode_keeps_the_newest_within_bound() {
        let key = PlanKey::new(5, "HD209458b");
        let mut q = RequestQueue::new(ResubmitBehaviour::Queue, 2);
        q.record(&key, start(false));
        q.record(&key, start(true));
        q.record(&key, start(false));
        assert_eq!(q.len_for(&key), 2);
        assert_eq!(q.take_next(&key), Some(start(true)));
        assert_eq!(q.take_next(&key), Some(start(false)));
        assert_eq!(q.take_next(&key), None);
        assert!(q.is_empty());
    }

    #[test]
    fn replace_mode_keeps_only_the_latest() {
        let key = PlanKey::new(5, "HD209458b");
        let mut q = RequestQueue::new(ResubmitBehaviour::Replace, 4);
        q.record(&key, start(false));
        q.record(&key, start(true));
        assert_eq!(q.len_for(&key), 1);
        assert_eq!(q.take_next(&key), Some(start(true)));
    }

    #[test]
    fn plans_queue_independently() {
        let a = PlanKey::new(5, "HD209458b");
        let b = PlanKey::new(5, "WASP-12b");
        let mut q = RequestQueue::new(ResubmitBehaviour::Queue, 0);
        q.record(&a, start(false));
        q.record(&b, start(true));
        assert_eq!(q.take_next(&b), Some(start(true)));
        assert!(!q.is_empty());
    }
}
