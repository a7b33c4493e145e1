//! Explore / replay navigation.
//!
//! The foreground calls `Drive::step` after servicing the scheduler. Each
//! fresh sensor sweep feeds the line-out watchdog and the mark detector;
//! classified marks are logged (explore) or matched against the recorded
//! log (replay). Between two identical non-cross marks in the log the track
//! is straight, so replay runs at peak velocity inside a window that leaves
//! room to brake back to base velocity before the segment ends.
use crate::config::{DriveCfg, MarkCfg, SafetyCfg};
use crate::error::{Result, TracerError};
use crate::mark::{Mark, MarkDetector};
use crate::robot::{Robot, SENSING_SLOT};
use crate::scheduler::Scheduler;
use crate::status::{RunOutcome, RunReport, RunStatus};
use crate::util::meters_to_ticks;
use crate::velocity::{reentry_distance, stop_decel};
use crate::watchdog::{LineOutPhase, LineOutWatchdog};
use tracer_traits::{Feedback, StatusSink};

/// Upper bound of the in-memory mark log.
pub const MAX_MARKS: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Explore,
    Replay,
}

impl RunMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Explore => "explore",
            Self::Replay => "replay",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkRecord {
    pub kind: Mark,
    /// Mean traveled ticks from the run origin when the mark was decided.
    pub tick: i32,
}

/// Tick range in which replay may run at peak velocity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StraightWindow {
    pub start: i32,
    pub end: i32,
}

impl StraightWindow {
    pub fn contains(&self, tick: i32) -> bool {
        self.start <= tick && tick < self.end
    }
}

/// `[start + safety, end - safety - reentry]`, or `None` when the segment is
/// too short to leave anything.
pub fn straight_window(
    start_tick: i32,
    end_tick: i32,
    safety_ticks: i32,
    reentry_ticks: i32,
) -> Option<StraightWindow> {
    let start = start_tick.saturating_add(safety_ticks);
    let end = end_tick
        .saturating_sub(safety_ticks)
        .saturating_sub(reentry_ticks);
    (start < end).then_some(StraightWindow { start, end })
}

/// Window margins in ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Margins {
    pub safety_ticks: i32,
    pub reentry_ticks: i32,
}

impl Margins {
    pub fn new(cfg: &DriveCfg, ticks_per_meter: f32) -> Self {
        let reentry = reentry_distance(cfg.peak_velocity, cfg.base_velocity, cfg.decel);
        Self {
            safety_ticks: meters_to_ticks(cfg.safety_m, ticks_per_meter),
            reentry_ticks: meters_to_ticks(reentry, ticks_per_meter),
        }
    }
}

/// Per-run bookkeeping.
#[derive(Debug, Clone)]
pub struct DriveRun {
    pub mode: RunMode,
    /// Live marks of this run.
    pub marks: Vec<MarkRecord>,
    /// Marks classified, including any the log had no room for.
    pub mark_count: usize,
    /// The log being replayed (empty while exploring).
    pub recorded: Vec<MarkRecord>,
    /// Next recorded entry expected.
    pub replay_index: usize,
    pub straight_window: Option<StraightWindow>,
    pub end_mark_count: u32,
    pub is_mark_valid: bool,
}

impl DriveRun {
    pub fn new(mode: RunMode, recorded: &[MarkRecord]) -> Self {
        Self {
            mode,
            marks: Vec::new(),
            mark_count: 0,
            recorded: recorded.to_vec(),
            replay_index: 0,
            straight_window: None,
            end_mark_count: 0,
            is_mark_valid: true,
        }
    }

    /// Match a live mark against the recorded log.
    ///
    /// A match advances the index and plans the straight window that starts
    /// at the matched entry, if there is one. A mismatch suspends planning
    /// until a live cross finds the next recorded cross.
    pub fn sync(&mut self, mark: Mark, margins: Margins) {
        let expected = self.recorded.get(self.replay_index).map(|r| r.kind);
        if self.is_mark_valid && expected == Some(mark) {
            let i = self.replay_index;
            self.replay_index += 1;
            self.straight_window = self.plan(i, margins);
            return;
        }
        if mark == Mark::Cross {
            let from = self.replay_index.min(self.recorded.len());
            if let Some(j) = self.recorded[from..]
                .iter()
                .position(|r| r.kind == Mark::Cross)
            {
                self.replay_index = from + j + 1;
                self.is_mark_valid = true;
                self.straight_window = None;
                tracing::info!(replay_index = self.replay_index, "replay resynchronized");
                return;
            }
        }
        if self.is_mark_valid {
            tracing::info!(
                expected = ?expected,
                seen = ?mark,
                replay_index = self.replay_index,
                "replay out of sync"
            );
        }
        self.is_mark_valid = false;
        self.straight_window = None;
    }

    fn plan(&self, i: usize, margins: Margins) -> Option<StraightWindow> {
        let a = self.recorded.get(i)?;
        let b = self.recorded.get(i + 1)?;
        if a.kind != b.kind || a.kind == Mark::Cross {
            return None;
        }
        let w = straight_window(a.tick, b.tick, margins.safety_ticks, margins.reentry_ticks);
        if let Some(w) = w {
            tracing::debug!(start = w.start, end = w.end, "straight window");
        }
        w
    }

    /// Whether `tick` lies in a window planned from an in-sync log.
    pub fn boost(&self, tick: i32) -> bool {
        self.is_mark_valid && self.straight_window.is_some_and(|w| w.contains(tick))
    }
}

/// Outward collaborators the drive reports to.
pub struct Collaborators<'a> {
    pub feedback: &'a mut dyn Feedback,
    pub status: &'a mut dyn StatusSink,
}

pub struct Drive {
    cfg: DriveCfg,
    safety: SafetyCfg,
    detector: MarkDetector,
    watchdog: LineOutWatchdog,
    margins: Margins,
    run: DriveRun,
    origin: [i32; 2],
    last_sweep: u64,
    traveled: i32,
    status: RunStatus,
}

impl Drive {
    pub fn new(cfg: DriveCfg, marks: &MarkCfg, safety: SafetyCfg, ticks_per_meter: f32) -> Self {
        Self {
            detector: MarkDetector::new(marks, ticks_per_meter),
            watchdog: LineOutWatchdog::new(safety.line_out_ms),
            margins: Margins::new(&cfg, ticks_per_meter),
            run: DriveRun::new(RunMode::Explore, &[]),
            origin: [0; 2],
            last_sweep: 0,
            traveled: 0,
            status: RunStatus::Running,
            cfg,
            safety,
        }
    }

    pub fn cfg(&self) -> &DriveCfg {
        &self.cfg
    }

    pub fn safety(&self) -> &SafetyCfg {
        &self.safety
    }

    pub fn margins(&self) -> Margins {
        self.margins
    }

    pub fn run(&self) -> &DriveRun {
        &self.run
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    /// Mean traveled ticks at the last processed sweep.
    pub fn traveled(&self) -> i32 {
        self.traveled
    }

    /// Reset run state, start sensing if needed and put both wheels under
    /// velocity control.
    pub fn begin(
        &mut self,
        robot: &mut Robot,
        sched: &mut Scheduler<Robot>,
        mode: RunMode,
        recorded: &[MarkRecord],
        now_us: u64,
    ) -> Result<()> {
        if mode == RunMode::Replay && recorded.is_empty() {
            return Err(TracerError::State("replay needs a recorded mark log".into()).into());
        }
        self.run = DriveRun::new(mode, recorded);
        self.detector.reset();
        self.watchdog.reset();
        self.status = RunStatus::Running;
        self.traveled = 0;

        if !sched.is_armed(SENSING_SLOT) {
            robot.sensing_start(sched)?;
        }
        robot.velocity_control_start(sched)?;
        self.origin = robot.odometry()?;
        self.last_sweep = robot.sensing.sweeps();
        let v = match mode {
            RunMode::Explore => self.cfg.explore_velocity,
            RunMode::Replay => self.cfg.base_velocity,
        };
        robot.profile.set_target(v);
        tracing::info!(
            mode = mode.as_str(),
            velocity = v,
            recorded = recorded.len(),
            at_us = now_us,
            "run start"
        );
        Ok(())
    }

    /// One foreground iteration. Does nothing until a new sweep completes.
    pub fn step(
        &mut self,
        robot: &mut Robot,
        now_us: u64,
        ui: &mut Collaborators<'_>,
    ) -> Result<RunStatus> {
        if let Some(e) = robot.take_fault() {
            return Err(e.into());
        }
        if self.status != RunStatus::Running {
            return Ok(self.status);
        }
        let sweeps = robot.sensing.sweeps();
        if sweeps == self.last_sweep {
            return Ok(RunStatus::Running);
        }
        self.last_sweep = sweeps;

        let state = robot.sensing.state();
        if self.watchdog.update(state != 0, now_us) == LineOutPhase::Exit {
            self.status = RunStatus::LineOut;
            tracing::info!(traveled = self.traveled, "run ended: line out");
            return Ok(self.status);
        }

        self.detector.recenter(robot.sensing.position());
        let odo = robot.odometry()?;
        let ticks = [
            odo[0].wrapping_sub(self.origin[0]),
            odo[1].wrapping_sub(self.origin[1]),
        ];
        self.traveled = mean_abs(ticks);

        let mark = self.detector.update(state, ticks);
        if mark != Mark::None {
            self.on_mark(robot, mark, ui);
        }
        if self.status != RunStatus::Running {
            return Ok(self.status);
        }
        if self.run.mode == RunMode::Replay {
            let v = if self.run.boost(self.traveled) {
                self.cfg.peak_velocity
            } else {
                self.cfg.base_velocity
            };
            robot.profile.set_target(v);
        }
        Ok(RunStatus::Running)
    }

    fn on_mark(&mut self, robot: &mut Robot, mark: Mark, ui: &mut Collaborators<'_>) {
        let record = MarkRecord {
            kind: mark,
            tick: self.traveled,
        };
        self.run.mark_count += 1;
        if self.run.marks.len() < MAX_MARKS {
            self.run.marks.push(record);
        } else {
            tracing::warn!(capacity = MAX_MARKS, "mark log full");
        }
        tracing::info!(kind = ?mark, tick = record.tick, n = self.run.mark_count, "mark");
        ui.status
            .status(&format!("{} {:>3} {}", mark.symbol(), self.run.mark_count, record.tick));

        match self.run.mode {
            RunMode::Explore => {
                if mark != Mark::Cross {
                    ui.feedback.pulse(self.cfg.feedback_ms);
                }
            }
            RunMode::Replay => self.run.sync(mark, self.margins),
        }

        if mark == Mark::Both {
            self.run.end_mark_count += 1;
            if self.run.end_mark_count >= 2 {
                self.finish(robot);
            }
        }
    }

    /// Second end marker: brake to a stop within `fit_in_m`.
    fn finish(&mut self, robot: &mut Robot) {
        let v = robot.profile.command();
        let decel = stop_decel(v, self.cfg.fit_in_m);
        robot.profile.set_decel(decel);
        robot.profile.set_target(0.0);
        self.status = RunStatus::Complete;
        tracing::info!(velocity = v, decel, traveled = self.traveled, "run ended: end marker");
    }

    pub fn report(&self, outcome: RunOutcome, duration_ms: u64) -> RunReport {
        RunReport {
            outcome,
            marks: self.run.marks.clone(),
            traveled_ticks: self.traveled,
            duration_ms,
            in_sync: self.run.is_mark_valid,
        }
    }
}

fn mean_abs(ticks: [i32; 2]) -> i32 {
    let sum = i64::from(ticks[0]).abs() + i64::from(ticks[1]).abs();
    i32::try_from(sum / 2).unwrap_or(i32::MAX)
}
