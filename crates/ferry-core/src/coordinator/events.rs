//! Lifecycle events and the per-task progress rate limiter.

use std::time::{Duration, Instant};

use crate::error::TaskError;
use crate::task::{TaskId, TaskState};

/// Event broadcast to subscribers. Per-task ordering follows state-change
/// order; there is no ordering guarantee across tasks. Late subscribers do
/// not receive past events.
#[derive(Debug, Clone)]
pub enum Event {
    Progress {
        id: TaskId,
        bytes_done: u64,
        bytes_total: u64,
        pct: u8,
    },
    StatusChanged {
        id: TaskId,
        from: TaskState,
        to: TaskState,
    },
    Completed {
        id: TaskId,
    },
    Error {
        id: TaskId,
        error: TaskError,
    },
    Cancelled {
        id: TaskId,
    },
}

/// What to do with an offered progress event.
#[derive(Debug)]
pub(crate) enum GateDecision {
    /// Interval elapsed (or first emission): broadcast now.
    Emit(Event),
    /// Too early: the event is held and a trailing flush must be scheduled
    /// for the given deadline.
    Defer(Instant),
    /// Too early and a flush is already scheduled; the held event was
    /// replaced with this newer one.
    Coalesced,
}

/// Rate limiter for one task's progress events: at most one emission per
/// interval, with early arrivals coalesced into a trailing emission rather
/// than dropped.
#[derive(Debug, Default)]
pub(crate) struct ProgressGate {
    last_emit: Option<Instant>,
    pending: Option<Event>,
    timer_armed: bool,
}

impl ProgressGate {
    pub(crate) fn offer(&mut self, now: Instant, interval: Duration, ev: Event) -> GateDecision {
        if let Some(last) = self.last_emit {
            if now.duration_since(last) < interval {
                self.pending = Some(ev);
                if self.timer_armed {
                    return GateDecision::Coalesced;
                }
                self.timer_armed = true;
                return GateDecision::Defer(last + interval);
            }
        }
        self.last_emit = Some(now);
        GateDecision::Emit(ev)
    }

    /// Take the held event when the trailing timer fires.
    pub(crate) fn flush(&mut self, now: Instant) -> Option<Event> {
        self.timer_armed = false;
        let ev = self.pending.take()?;
        self.last_emit = Some(now);
        Some(ev)
    }
}
