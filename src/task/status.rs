//! Two-level task status taxonomy.
//!
//! A status code is a small integer whose hundreds digit (the "head") carries
//! the coarse classification used for retry and reporting decisions, while the
//! full value selects a specific display message.

use std::fmt;

/// Coarse classification derived from the hundreds digit of a [`StatusCode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusHead {
    Pending,
    Done,
    Skipped,
    Error,
    Missing,
}

impl StatusHead {
    /// Short label used in notification titles.
    pub fn label(self) -> &'static str {
        match self {
            StatusHead::Pending => "pending",
            StatusHead::Done => "done",
            StatusHead::Skipped => "skipped",
            StatusHead::Error => "error",
            StatusHead::Missing => "missing",
        }
    }

    /// Index into per-head count tables.
    pub fn index(self) -> usize {
        match self {
            StatusHead::Pending => 0,
            StatusHead::Done => 1,
            StatusHead::Skipped => 2,
            StatusHead::Error => 3,
            StatusHead::Missing => 4,
        }
    }
}

/// Number of distinct heads, i.e. the size of a per-head count table.
pub const HEAD_COUNT: usize = 5;

/// Full task status code.
///
/// The head (code / 100) is monotonically resolved: once a task leaves the
/// pending head it is never executed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusCode(pub u16);

impl StatusCode {
    /// Waiting for the first execution attempt.
    pub const WAITING: StatusCode = StatusCode(0);
    /// A generic failure occurred; the task stays pending and is retried.
    pub const RETRY_PENDING: StatusCode = StatusCode(1);
    /// The portal reports the task as already completed.
    pub const ALREADY_DONE: StatusCode = StatusCode(100);
    /// The task ran to completion normally.
    pub const COMPLETED: StatusCode = StatusCode(101);
    /// The user configured this task not to run.
    pub const USER_SKIPPED: StatusCode = StatusCode(200);
    /// The current time falls outside the task's execution window.
    pub const OUT_OF_WINDOW: StatusCode = StatusCode(201);
    /// The task failed terminally.
    pub const FAILED: StatusCode = StatusCode(300);
    /// The task cannot be completed under current conditions.
    pub const IMPOSSIBLE: StatusCode = StatusCode(301);
    /// The portal has no pending item matching this task.
    pub const NOTHING_TO_DO: StatusCode = StatusCode(400);

    /// Coarse head classification (hundreds digit).
    pub fn head(self) -> StatusHead {
        match self.0 / 100 {
            0 => StatusHead::Pending,
            1 => StatusHead::Done,
            2 => StatusHead::Skipped,
            3 => StatusHead::Error,
            _ => StatusHead::Missing,
        }
    }

    /// Display message from the fixed taxonomy.
    pub fn message(self) -> &'static str {
        match self.0 {
            0 => "waiting to execute",
            1 => "failed, awaiting retry",
            100 => "task was already completed",
            101 => "task completed normally",
            200 => "task disabled by user configuration",
            201 => "task is outside its execution window",
            300 => "task failed",
            301 => "task cannot be completed right now",
            400 => "no pending task was found",
            _ => "unknown status",
        }
    }

    pub fn is_terminal(self) -> bool {
        self.head() != StatusHead::Pending
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.0, self.message())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn head_follows_hundreds_digit() {
        assert_eq!(StatusCode::WAITING.head(), StatusHead::Pending);
        assert_eq!(StatusCode::RETRY_PENDING.head(), StatusHead::Pending);
        assert_eq!(StatusCode::COMPLETED.head(), StatusHead::Done);
        assert_eq!(StatusCode::OUT_OF_WINDOW.head(), StatusHead::Skipped);
        assert_eq!(StatusCode::IMPOSSIBLE.head(), StatusHead::Error);
        assert_eq!(StatusCode::NOTHING_TO_DO.head(), StatusHead::Missing);
    }

    #[test]
    fn retry_pending_is_not_terminal() {
        // Code 1 shares the pending head: the round loop re-enters it.
        assert!(!StatusCode::RETRY_PENDING.is_terminal());
        assert!(StatusCode::FAILED.is_terminal());
        assert!(StatusCode::OUT_OF_WINDOW.is_terminal());
    }

    #[test]
    fn messages_cover_the_taxonomy() {
        for code in [0u16, 1, 100, 101, 200, 201, 300, 301, 400] {
            assert_ne!(StatusCode(code).message(), "unknown status");
        }
    }
}
