//! Cooperative deadline objects
//!
//! A deadline is threaded through every drain call. Timing out is expected
//! and normal: completed work is retained and a later call resumes the
//! remainder. There is no preemption; the deadline is only consulted
//! between work items.

use std::cell::Cell;
use std::time::Instant;

/// Cooperative deadline consulted by the scheduler between work items.
pub trait DeadlineTimer {
    fn timed_out(&self) -> bool;
}

/// Deadline that never expires; a drain with it always runs to completion.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverExpires;

impl DeadlineTimer for NeverExpires {
    fn timed_out(&self) -> bool {
        false
    }
}

/// Expires on the Nth deadline check. Deterministic, which makes
/// timeout-resumption behavior testable without wall-clock sleeps.
#[derive(Debug)]
pub struct CountdownTimer {
    remaining: Cell<u32>,
}

impl CountdownTimer {
    pub fn new(checks: u32) -> Self {
        Self {
            remaining: Cell::new(checks),
        }
    }
}

impl DeadlineTimer for CountdownTimer {
    fn timed_out(&self) -> bool {
        let left = self.remaining.get();
        if left == 0 {
            return true;
        }
        self.remaining.set(left - 1);
        left == 1
    }
}

/// Wall-clock deadline for host drive loops.
#[derive(Debug, Clone, Copy)]
pub struct WallClockDeadline {
    expires_at: Instant,
}

impl WallClockDeadline {
    pub fn after(budget: std::time::Duration) -> Self {
        Self {
            expires_at: Instant::now() + budget,
        }
    }
}

impl DeadlineTimer for WallClockDeadline {
    fn timed_out(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}
