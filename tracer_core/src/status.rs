//! Run status returned from each foreground step, and the final report.

use crate::drive::MarkRecord;

/// Public status of a single foreground step of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Keep going; no terminal condition yet.
    Running,
    /// Second end marker seen; the velocity command is ramping to zero.
    Complete,
    /// Line-out watchdog expired; motors must stop immediately.
    LineOut,
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    LineOut,
}

impl RunOutcome {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::LineOut => "line_out",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub outcome: RunOutcome,
    /// Live marks in the order they were classified.
    pub marks: Vec<MarkRecord>,
    /// Mean traveled ticks of both wheels at termination.
    pub traveled_ticks: i32,
    pub duration_ms: u64,
    /// Replay only: whether the log was still in sync at the end.
    pub in_sync: bool,
}
