//! Run orchestration: drive the scheduler and the drive state machine until
//! a terminal condition, enforce the safety guards, stop the motors.
//!
//! `run_cooperative` services the scheduler from the calling thread (virtual
//! or wall-clock time); `run_threaded` leaves servicing to a
//! `SchedulerThread` and polls the drive through its lock.
use crate::drive::{Collaborators, Drive, MarkRecord, RunMode};
use crate::error::{AbortReason, Result, TracerError};
use crate::robot::{Robot, Telemetry};
use crate::scheduler::{Scheduler, SchedulerThread};
use crate::status::{RunOutcome, RunReport, RunStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Foreground poll period while a background thread services the slots.
const THREAD_POLL: Duration = Duration::from_micros(100);

#[derive(Debug, Clone)]
pub struct RunParams {
    pub mode: RunMode,
    /// Log to replay; ignored while exploring.
    pub recorded: Vec<MarkRecord>,
}

impl RunParams {
    pub fn explore() -> Self {
        Self {
            mode: RunMode::Explore,
            recorded: Vec::new(),
        }
    }

    pub fn replay(recorded: Vec<MarkRecord>) -> Self {
        Self {
            mode: RunMode::Replay,
            recorded,
        }
    }
}

/// Abort reason for the current moment, if any. Emergency stop wins over
/// the run-time cap.
#[inline]
fn guard(shutdown: &AtomicBool, elapsed_ms: u64, max_run_ms: u64) -> Option<AbortReason> {
    if shutdown.load(Ordering::Relaxed) {
        Some(AbortReason::Estop)
    } else if max_run_ms > 0 && elapsed_ms >= max_run_ms {
        Some(AbortReason::MaxRuntime)
    } else {
        None
    }
}

#[inline]
fn settle_limit(settle_timeout_ms: u64) -> Option<Duration> {
    (settle_timeout_ms > 0).then(|| Duration::from_millis(settle_timeout_ms))
}

fn outcome_of(status: RunStatus) -> Option<RunOutcome> {
    match status {
        RunStatus::Running => None,
        RunStatus::Complete => Some(RunOutcome::Completed),
        RunStatus::LineOut => Some(RunOutcome::LineOut),
    }
}

fn force_stop(robot: &mut Robot, sched: &mut Scheduler<Robot>) {
    if let Err(e) = robot.motor_control_stop(sched) {
        tracing::warn!(error = %e, "motor stop failed");
    }
}

/// Run to completion on the calling thread.
pub fn run_cooperative(
    drive: &mut Drive,
    sched: &mut Scheduler<Robot>,
    robot: &mut Robot,
    params: &RunParams,
    ui: &mut Collaborators<'_>,
    shutdown: &AtomicBool,
) -> Result<RunReport> {
    let clock = sched.clock().clone();
    let start = clock.now();
    let safety = *drive.safety();
    let now_us = sched.now_us();
    drive.begin(robot, sched, params.mode, &params.recorded, now_us)?;

    let outcome = loop {
        sched.service(robot);
        let status = match drive.step(robot, sched.now_us(), ui) {
            Ok(s) => s,
            Err(e) => {
                force_stop(robot, sched);
                tracing::error!(error = %e, "run failed");
                return Err(e);
            }
        };
        if let Some(outcome) = outcome_of(status) {
            break outcome;
        }
        if let Some(reason) = guard(shutdown, clock.ms_since(start), safety.max_run_ms) {
            force_stop(robot, sched);
            tracing::error!(%reason, "run aborted");
            return Err(TracerError::Abort(reason).into());
        }
        sched.idle();
    };

    if outcome == RunOutcome::Completed {
        let settle_v = drive.cfg().settle_velocity;
        let stopped = sched.wait_until(
            robot,
            |r| r.profile.command() <= settle_v,
            settle_limit(safety.settle_timeout_ms),
        );
        if !stopped {
            tracing::warn!("velocity did not settle before the stop timeout");
        }
    }
    robot.motor_control_stop(sched)?;
    let report = drive.report(outcome, clock.ms_since(start));
    tracing::info!(
        outcome = outcome.as_str(),
        marks = report.marks.len(),
        traveled = report.traveled_ticks,
        duration_ms = report.duration_ms,
        "run finished"
    );
    Ok(report)
}

/// Run to completion while `thread` services the slots.
pub fn run_threaded(
    drive: &mut Drive,
    thread: &SchedulerThread<Robot, Telemetry>,
    params: &RunParams,
    ui: &mut Collaborators<'_>,
    shutdown: &AtomicBool,
) -> Result<RunReport> {
    let clock = thread.with(|s, _| s.clock().clone())?;
    let start = clock.now();
    let safety = *drive.safety();
    thread.with(|s, r| {
        let now_us = s.now_us();
        drive.begin(r, s, params.mode, &params.recorded, now_us)
    })??;

    let stop = |why: &str| {
        if let Err(e) = thread.with(|s, r| force_stop(r, s)) {
            tracing::warn!(error = %e, why, "motor stop failed");
        }
    };

    let outcome = loop {
        let step = thread.with(|s, r| drive.step(r, s.now_us(), ui))?;
        let status = match step {
            Ok(s) => s,
            Err(e) => {
                stop("fault");
                tracing::error!(error = %e, "run failed");
                return Err(e);
            }
        };
        if let Some(outcome) = outcome_of(status) {
            break outcome;
        }
        if let Some(reason) = guard(shutdown, clock.ms_since(start), safety.max_run_ms) {
            stop("abort");
            tracing::error!(%reason, "run aborted");
            return Err(TracerError::Abort(reason).into());
        }
        if let Some(t) = thread.latest() {
            tracing::trace!(sweeps = t.sweeps, position = t.position, command = t.command, "telemetry");
        }
        clock.sleep(THREAD_POLL);
    };

    if outcome == RunOutcome::Completed {
        let settle_v = drive.cfg().settle_velocity;
        let limit = settle_limit(safety.settle_timeout_ms);
        let t0 = clock.now();
        loop {
            if thread.with(|_, r| r.profile.command() <= settle_v)? {
                break;
            }
            if limit.is_some_and(|l| clock.now().saturating_duration_since(t0) >= l) {
                tracing::warn!("velocity did not settle before the stop timeout");
                break;
            }
            clock.sleep(THREAD_POLL);
        }
    }
    thread.with(|s, r| r.motor_control_stop(s))??;
    let report = drive.report(outcome, clock.ms_since(start));
    tracing::info!(
        outcome = outcome.as_str(),
        marks = report.marks.len(),
        traveled = report.traveled_ticks,
        duration_ms = report.duration_ms,
        "run finished"
    );
    Ok(report)
}
