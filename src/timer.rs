//! Shared timer abstraction
//!
//! All scheduled work (registration update, pmin, pmax, re-bootstrap) goes
//! through one queue. Firing a timer produces an event for the caller to
//! feed into the state machine or observation engine; no logic runs inline.
//! Time is caller-supplied seconds, so tests can drive the clock.

use crate::base::NodePath;

/// What a timer entry is for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Periodic registration update
    RegistrationUpdate,
    /// pmin window closed for an observed node
    PminElapsed,
    /// pmax interval expired for an observed node
    PmaxElapsed,
    /// Scheduled re-bootstrap after a bootstrap failure
    Rebootstrap,
}

/// A fired timer, handed back from [`TimerQueue::poll`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerEvent {
    pub kind: TimerKind,
    /// Node the timer belongs to; registration timers carry none
    pub path: Option<NodePath>,
}

#[derive(Debug)]
struct TimerEntry {
    kind: TimerKind,
    path: Option<NodePath>,
    deadline: u64,
    /// Re-armed after firing when set
    period: Option<u64>,
}

/// Single-shot and periodic timers against one shared queue
#[derive(Debug, Default)]
pub struct TimerQueue {
    entries: Vec<TimerEntry>,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a single-shot timer; an existing timer of the same kind and
    /// path is replaced
    pub fn schedule(&mut self, kind: TimerKind, path: Option<NodePath>, deadline: u64) {
        self.cancel(kind, path);
        self.entries.push(TimerEntry {
            kind,
            path,
            deadline,
            period: None,
        });
    }

    /// Arm a periodic timer firing every `period` seconds from `now`
    pub fn schedule_periodic(&mut self, kind: TimerKind, path: Option<NodePath>, now: u64, period: u64) {
        self.cancel(kind, path);
        self.entries.push(TimerEntry {
            kind,
            path,
            deadline: now + period,
            period: Some(period),
        });
    }

    /// Remove a timer; cancellation is synchronous, the entry is gone on
    /// return
    pub fn cancel(&mut self, kind: TimerKind, path: Option<NodePath>) {
        self.entries.retain(|e| !(e.kind == kind && e.path == path));
    }

    /// Remove every timer attached to the given node subtree
    pub fn cancel_node(&mut self, path: &NodePath) {
        self.entries.retain(|e| match e.path {
            Some(p) => !path_covers(path, &p),
            None => true,
        });
    }

    /// Drain due entries into events; periodic entries re-arm themselves
    pub fn poll(&mut self, now: u64) -> Vec<TimerEvent> {
        let mut fired = Vec::new();
        let mut index = 0;
        while index < self.entries.len() {
            if self.entries[index].deadline <= now {
                let entry = &mut self.entries[index];
                fired.push(TimerEvent {
                    kind: entry.kind,
                    path: entry.path,
                });
                if let Some(period) = entry.period {
                    entry.deadline = now + period;
                    index += 1;
                } else {
                    self.entries.remove(index);
                }
            } else {
                index += 1;
            }
        }
        fired
    }

    /// Deadline of the next pending timer, if any
    pub fn next_deadline(&self) -> Option<u64> {
        self.entries.iter().map(|e| e.deadline).min()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// True when `parent` addresses `child` or one of its ancestors
fn path_covers(parent: &NodePath, child: &NodePath) -> bool {
    if parent.object != child.object {
        return false;
    }
    for (p, c) in [
        (parent.instance, child.instance),
        (parent.resource, child.resource),
        (parent.resource_instance, child.resource_instance),
    ] {
        match (p, c) {
            (None, _) => return true,
            (Some(a), Some(b)) if a == b => {}
            _ => return false,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_shot_fires_once() {
        let mut queue = TimerQueue::new();
        queue.schedule(TimerKind::Rebootstrap, None, 100);

        assert!(queue.poll(99).is_empty());
        let fired = queue.poll(100);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].kind, TimerKind::Rebootstrap);
        assert!(queue.poll(200).is_empty());
    }

    #[test]
    fn test_periodic_rearms() {
        let mut queue = TimerQueue::new();
        queue.schedule_periodic(TimerKind::RegistrationUpdate, None, 0, 60);

        assert_eq!(queue.poll(60).len(), 1);
        assert!(queue.poll(100).is_empty());
        assert_eq!(queue.poll(120).len(), 1);
    }

    #[test]
    fn test_reschedule_replaces() {
        let mut queue = TimerQueue::new();
        queue.schedule(TimerKind::Rebootstrap, None, 100);
        queue.schedule(TimerKind::Rebootstrap, None, 200);

        assert!(queue.poll(100).is_empty());
        assert_eq!(queue.poll(200).len(), 1);
    }

    #[test]
    fn test_cancel_node_covers_subtree() {
        let mut queue = TimerQueue::new();
        let resource = NodePath::resource(3, 0, 1);
        let sibling = NodePath::resource(3, 1, 1);
        queue.schedule(TimerKind::PminElapsed, Some(resource), 10);
        queue.schedule(TimerKind::PmaxElapsed, Some(sibling), 10);
        queue.schedule(TimerKind::Rebootstrap, None, 10);

        queue.cancel_node(&NodePath::instance(3, 0));
        let fired = queue.poll(10);
        assert_eq!(fired.len(), 2);
        assert!(fired.iter().all(|e| e.path != Some(resource)));
    }
}
