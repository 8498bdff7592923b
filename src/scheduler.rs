//! Delayed-task scheduler.
//!
//! The loop core needs two kinds of timed side effects: the debounced
//! device-status snapshot and the retry of a cycle after a failed bolus.
//! Both are one-shot and **replaceable** — scheduling a task that is
//! already pending moves it instead of duplicating it, so bursts of
//! triggers coalesce into a single fire.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     Trigger Sources                          │
//! │  new dosing result · TBR enact · SMB enact · SMB failure     │
//! │        │              │              │              │        │
//! │        ▼              ▼              ▼              ▼        │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │   TaskScheduler (one pending slot per TaskId)          │  │
//! │  └───────────────────────┬────────────────────────────────┘  │
//! │                          │  host main loop polls             │
//! │                          ▼                                   │
//! │                LoopService::poll_tasks()                     │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The scheduler itself knows nothing about what a task does; the
//! [`LoopService`](crate::app::service::LoopService) dispatches fired task
//! ids.  This keeps it independently testable.

use log::debug;

/// The timed side effects the loop core schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskId {
    /// Debounced device-status snapshot write.
    DeviceStatusSnapshot,
    /// Re-run the whole invocation cycle after a failed bolus.
    SmbRetryInvoke,
}

/// Internal bookkeeping for a pending one-shot.
#[derive(Debug, Clone, Copy)]
struct Entry {
    task: TaskId,
    due_ms: u64,
}

/// One-shot, replaceable task scheduler.
#[derive(Debug, Default)]
pub struct TaskScheduler {
    entries: Vec<Entry>,
}

impl TaskScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `task` to fire at `due_ms`.  A pending instance of the same
    /// task is replaced, never duplicated.
    pub fn schedule(&mut self, task: TaskId, due_ms: u64) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.task == task) {
            debug!("scheduler: {task:?} rescheduled for {due_ms}");
            entry.due_ms = due_ms;
        } else {
            debug!("scheduler: {task:?} scheduled for {due_ms}");
            self.entries.push(Entry { task, due_ms });
        }
    }

    /// Cancel a pending task.  Returns whether one was pending.
    pub fn cancel(&mut self, task: TaskId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.task != task);
        before != self.entries.len()
    }

    /// When the given task will fire, if pending.
    pub fn pending(&self, task: TaskId) -> Option<u64> {
        self.entries.iter().find(|e| e.task == task).map(|e| e.due_ms)
    }

    /// Remove and return every task due at `now_ms`, earliest first.
    pub fn poll(&mut self, now_ms: u64) -> Vec<TaskId> {
        let mut due: Vec<Entry> = Vec::new();
        self.entries.retain(|e| {
            if e.due_ms <= now_ms {
                due.push(*e);
                false
            } else {
                true
            }
        });
        due.sort_by_key(|e| e.due_ms);
        due.into_iter().map(|e| e.task).collect()
    }

    /// Number of pending tasks.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_at_due_time() {
        let mut sched = TaskScheduler::new();
        sched.schedule(TaskId::DeviceStatusSnapshot, 5_000);

        assert!(sched.poll(4_999).is_empty());
        assert_eq!(sched.poll(5_000), vec![TaskId::DeviceStatusSnapshot]);
        // One-shot: gone after firing.
        assert!(sched.poll(10_000).is_empty());
    }

    #[test]
    fn reschedule_replaces_pending_instance() {
        let mut sched = TaskScheduler::new();
        sched.schedule(TaskId::DeviceStatusSnapshot, 5_000);
        sched.schedule(TaskId::DeviceStatusSnapshot, 8_000);

        assert_eq!(sched.len(), 1);
        // The original deadline no longer fires.
        assert!(sched.poll(5_000).is_empty());
        assert_eq!(sched.poll(8_000), vec![TaskId::DeviceStatusSnapshot]);
    }

    #[test]
    fn cancel_removes_pending() {
        let mut sched = TaskScheduler::new();
        sched.schedule(TaskId::SmbRetryInvoke, 1_000);
        assert!(sched.cancel(TaskId::SmbRetryInvoke));
        assert!(!sched.cancel(TaskId::SmbRetryInvoke));
        assert!(sched.poll(2_000).is_empty());
    }

    #[test]
    fn independent_tasks_coexist() {
        let mut sched = TaskScheduler::new();
        sched.schedule(TaskId::DeviceStatusSnapshot, 5_000);
        sched.schedule(TaskId::SmbRetryInvoke, 3_000);

        assert_eq!(sched.poll(3_000), vec![TaskId::SmbRetryInvoke]);
        assert_eq!(sched.pending(TaskId::DeviceStatusSnapshot), Some(5_000));
    }

    #[test]
    fn poll_returns_earliest_first() {
        let mut sched = TaskScheduler::new();
        sched.schedule(TaskId::DeviceStatusSnapshot, 5_000);
        sched.schedule(TaskId::SmbRetryInvoke, 2_000);

        assert_eq!(
            sched.poll(10_000),
            vec![TaskId::SmbRetryInvoke, TaskId::DeviceStatusSnapshot]
        );
    }
}
