//! Admission control: pending queue ordered by priority plus the admitted set.
//!
//! Pure bookkeeping shared by the lifecycle engine. It never fails; operations
//! on unknown ids are no-ops. The engine is responsible for keeping queue
//! membership consistent with task state.

use std::collections::HashSet;
use std::collections::VecDeque;

use crate::task::TaskId;

/// One pending entry: exists only while a task is Pending and not yet admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct QueueEntry {
    task_id: TaskId,
    priority: i32,
    /// Monotonic enqueue sequence; gives the FIFO tiebreak for equal priority.
    seq: u64,
}

/// Priority queue of pending task ids plus the set of admitted (active) ids,
/// capped at a fixed concurrency limit.
#[derive(Debug)]
pub struct AdmissionQueue {
    entries: VecDeque<QueueEntry>,
    admitted: HashSet<TaskId>,
    limit: usize,
    next_seq: u64,
}

impl AdmissionQueue {
    pub fn new(limit: usize) -> Self {
        AdmissionQueue {
            entries: VecDeque::new(),
            admitted: HashSet::new(),
            limit: limit.max(1),
            next_seq: 0,
        }
    }

    /// Insert a pending entry. Strictly higher priority dequeues first; among
    /// equal priorities the first enqueued wins. The insertion point is the
    /// first position whose existing priority is not greater than the new
    /// entry's, scanning from the front.
    ///
    /// Callers must not enqueue an id that is already queued or admitted; the
    /// engine enforces this at the resume boundary.
    pub fn enqueue(&mut self, task_id: TaskId, priority: i32) {
        let entry = QueueEntry {
            task_id,
            priority,
            seq: self.next_seq,
        };
        self.next_seq += 1;

        let pos = self
            .entries
            .iter()
            .position(|e| e.priority < priority)
            .unwrap_or(self.entries.len());
        self.entries.insert(pos, entry);
    }

    /// Admit the highest-priority pending entry if a slot is free.
    /// Returns None when at the concurrency limit or the queue is empty.
    pub fn dequeue_if_capacity(&mut self) -> Option<TaskId> {
        if self.admitted.len() >= self.limit {
            return None;
        }
        let entry = self.entries.pop_front()?;
        self.admitted.insert(entry.task_id);
        Some(entry.task_id)
    }

    /// Free the slot held by `task_id`. No-op if it was not admitted.
    /// Must be called exactly once per admission, on every outcome that
    /// parks or terminates the task.
    pub fn release(&mut self, task_id: TaskId) {
        self.admitted.remove(&task_id);
    }

    /// Purge `task_id` from both the pending entries and the admitted set.
    pub fn remove(&mut self, task_id: TaskId) {
        self.entries.retain(|e| e.task_id != task_id);
        self.admitted.remove(&task_id);
    }

    pub fn has_capacity(&self) -> bool {
        self.admitted.len() < self.limit
    }

    pub fn pending_count(&self) -> usize {
        self.entries.len()
    }

    pub fn active_count(&self) -> usize {
        self.admitted.len()
    }

    pub fn is_admitted(&self, task_id: TaskId) -> bool {
        self.admitted.contains(&task_id)
    }

    pub fn is_queued(&self, task_id: TaskId) -> bool {
        self.entries.iter().any(|e| e.task_id == task_id)
    }
}
