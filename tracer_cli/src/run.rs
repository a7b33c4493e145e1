//! Command execution: config mapping, simulated board assembly, runs.

use crate::cli::{CliSafety, LAST_SAFETY, RtLock, RunArgs};
use crate::rt::setup_rt_once;
use eyre::{Result, WrapErr};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;
use tracer_config::{Config, MarkKind, PersistedCalibration};
use tracer_core::conversions::{entries_from_records, records_from_entries};
use tracer_core::drive::Drive;
use tracer_core::mocks::FixedGate;
use tracer_core::robot::{DRIVE_SLOT, MOTOR_SLOT, SENSING_SLOT, telemetry};
use tracer_core::{
    CalibrationTracker, Collaborators, DriveCfg, IrCalibration, MarkCfg, MarkRecord, MotorCfg,
    RecordStore, Robot, RunMode, RunOutcome, RunParams, RunReport, SafetyCfg, Scheduler,
    SchedulerThread, SensingCfg, SlotStats, TracerError, run_cooperative, run_threaded,
};
use tracer_hardware::{SimBoard, SimParams, SimTrack, TapeKind};
use tracer_traits::{Clock, Feedback, Gate, IR_COUNT, ManualClock, MonotonicClock, StatusSink};

/// Line offset swept by `calibrate`, in position units from the center.
const CALIBRATION_SPAN: i32 = 18_000;

pub fn abort_reason_name(r: &tracer_core::AbortReason) -> &'static str {
    use tracer_core::AbortReason::*;
    match r {
        Estop => "Estop",
        MaxRuntime => "MaxRuntime",
    }
}

fn tape_kind(k: MarkKind) -> TapeKind {
    match k {
        MarkKind::Left => TapeKind::Left,
        MarkKind::Right => TapeKind::Right,
        MarkKind::Both => TapeKind::Both,
        MarkKind::Cross => TapeKind::Cross,
    }
}

/// Course described by the `[sim]` section.
pub fn sim_track(cfg: &Config) -> SimTrack {
    let sim = &cfg.sim;
    let mut track = SimTrack::new(f64::from(sim.tape_length_m));
    for m in &sim.marks {
        track = track.with_tape(tape_kind(m.kind), f64::from(m.at_m));
    }
    if let Some(len) = sim.line_length_m {
        track = track.ending_at(f64::from(len));
    }
    track
}

fn sim_params(cfg: &Config) -> SimParams {
    let motor = MotorCfg::from(&cfg.motor);
    SimParams {
        supply_v: f64::from(cfg.sim.supply_v),
        kv: f64::from(cfg.sim.kv),
        tau_s: f64::from(cfg.sim.tau_s),
        ticks_per_meter: f64::from(motor.ticks_per_meter()),
        pwm_top: motor.pwm_top,
        black: cfg.sim.black,
        white: cfg.sim.white,
        adc_ref_v: f64::from(cfg.sensing.adc_ref_v),
        supply_divider: f64::from(cfg.sensing.supply_divider),
        // Counts come out in whatever sense the compensation expects.
        encoder_sign: motor.encoder_comp,
        invert: motor.invert,
        ..SimParams::default()
    }
}

/// Calibration matching the simulated floor and line levels.
pub fn nominal_calibration(cfg: &Config) -> IrCalibration {
    let black = i32::from(cfg.sim.black);
    let white = i32::from(cfg.sim.white);
    IrCalibration {
        bias: [black; IR_COUNT],
        range: [(white - black).max(1); IR_COUNT],
        threshold: cfg.sensing.threshold,
    }
}

/// CSV import wins over the stored calibration, which wins over the
/// nominal one.
pub fn resolve_calibration(
    cfg: &Config,
    csv: Option<&PersistedCalibration>,
    stored: Option<&PersistedCalibration>,
) -> Result<IrCalibration> {
    match csv.or(stored) {
        Some(p) => Ok(IrCalibration::try_from(p)?),
        None => Ok(nominal_calibration(cfg)),
    }
}

fn clock_for(cfg: &Config, threaded: bool) -> Arc<dyn Clock + Send + Sync> {
    if threaded || cfg.sim.realtime {
        Arc::new(MonotonicClock::new())
    } else {
        Arc::new(ManualClock::new())
    }
}

pub struct Rig {
    pub board: SimBoard,
    pub robot: Robot,
    pub sched: Scheduler<Robot>,
}

pub fn build_rig(
    cfg: &Config,
    cal: IrCalibration,
    drive: DriveCfg,
    clock: Arc<dyn Clock + Send + Sync>,
) -> Result<Rig> {
    let board = SimBoard::new(sim_track(cfg), sim_params(cfg), clock.clone());
    let left = tracer_traits::Wheel::Left;
    let right = tracer_traits::Wheel::Right;
    let robot = Robot::builder()
        .with_analog(board.analog())
        .with_encoders(board.encoder(left), board.encoder(right))
        .with_bridges(board.bridge(left), board.bridge(right))
        .with_sensing(SensingCfg::from(&cfg.sensing))
        .with_calibration(cal)
        .with_motor(MotorCfg::from(&cfg.motor))
        .with_drive(drive)
        .try_build()
        .wrap_err("assemble robot")?;
    Ok(Rig {
        board,
        robot,
        sched: Scheduler::new(clock),
    })
}

/// Feedback pulses become debug events; the host has no buzzer.
struct LogFeedback;

impl Feedback for LogFeedback {
    fn pulse(&mut self, ms: u32) {
        tracing::debug!(ms, "feedback pulse");
    }
}

/// Stands in for the display.
struct LogStatus;

impl StatusSink for LogStatus {
    fn status(&mut self, text: &str) {
        tracing::info!(target: "tracer::display", "{text}");
    }
}

/// Asks on stderr/stdin before a replay starts.
pub struct PromptGate;

impl Gate for PromptGate {
    fn proceed(&mut self) -> bool {
        eprint!("Replay now? [y/N] ");
        let mut line = String::new();
        match std::io::stdin().read_line(&mut line) {
            Ok(_) => matches!(line.trim(), "y" | "Y" | "yes"),
            Err(_) => false,
        }
    }
}

#[derive(Debug)]
pub struct RunOutput {
    pub mode: RunMode,
    pub report: RunReport,
    pub ticks_per_meter: f32,
    /// Whether the mark log was flushed; `None` when not requested.
    pub saved: Option<bool>,
    pub stats: Vec<(usize, SlotStats)>,
}

fn safety_for(cfg: &Config, args: &RunArgs) -> SafetyCfg {
    let mut safety = SafetyCfg::from(&cfg.safety);
    if let Some(ms) = args.max_run_ms {
        safety.max_run_ms = ms;
    }
    let _ = LAST_SAFETY.set(CliSafety {
        max_run_ms: safety.max_run_ms,
        line_out_ms: safety.line_out_ms,
    });
    safety
}

fn slot_stats(sched: &Scheduler<Robot>) -> Vec<(usize, SlotStats)> {
    [SENSING_SLOT, MOTOR_SLOT, DRIVE_SLOT]
        .into_iter()
        .filter_map(|slot| sched.stats(slot).map(|st| (slot, st)))
        .collect()
}

fn run_once(
    cfg: &Config,
    cal: IrCalibration,
    drive_cfg: DriveCfg,
    params: &RunParams,
    args: &RunArgs,
    shutdown: &AtomicBool,
) -> Result<RunOutput> {
    // Real-time mode setup; applied once per process.
    let lock = args.rt_lock.unwrap_or(RtLock::os_default());
    setup_rt_once(args.rt, args.rt_prio, lock, args.rt_cpu);

    let threaded = args.threaded || cfg.runner.mode == tracer_config::RunMode::Threaded;
    let safety = safety_for(cfg, args);
    let Rig {
        board: _board,
        mut robot,
        mut sched,
    } = build_rig(cfg, cal, drive_cfg.clone(), clock_for(cfg, threaded))?;
    let tpm = robot.ticks_per_meter();
    let mut drive = Drive::new(drive_cfg, &MarkCfg::from(&cfg.marks), safety, tpm);
    let mut feedback = LogFeedback;
    let mut status = LogStatus;
    let mut ui = Collaborators {
        feedback: &mut feedback,
        status: &mut status,
    };

    let (report, stats) = if threaded {
        let thread = SchedulerThread::spawn(sched, robot, telemetry);
        let report = run_threaded(&mut drive, &thread, params, &mut ui, shutdown)?;
        let stats = thread.with(|s, _| slot_stats(s))?;
        (report, stats)
    } else {
        let report = run_cooperative(&mut drive, &mut sched, &mut robot, params, &mut ui, shutdown)?;
        (report, slot_stats(&sched))
    };

    Ok(RunOutput {
        mode: params.mode,
        report,
        ticks_per_meter: tpm,
        saved: None,
        stats,
    })
}

/// Follow the course at exploration speed; optionally persist the log.
pub fn explore(
    cfg: &Config,
    cal: IrCalibration,
    velocity: Option<f32>,
    save: bool,
    args: &RunArgs,
    store: &mut dyn RecordStore,
    shutdown: &AtomicBool,
) -> Result<RunOutput> {
    let mut drive_cfg = DriveCfg::from(&cfg.drive);
    if let Some(v) = velocity {
        if !(v.is_finite() && v > 0.0) {
            eyre::bail!("--velocity must be > 0, got {v}");
        }
        drive_cfg.explore_velocity = v;
    }
    let mut out = run_once(cfg, cal, drive_cfg, &RunParams::explore(), args, shutdown)?;
    if save {
        out.saved = Some(save_log(&out, store)?);
    }
    Ok(out)
}

fn save_log(out: &RunOutput, store: &mut dyn RecordStore) -> Result<bool> {
    if out.report.outcome != RunOutcome::Completed {
        tracing::warn!(outcome = out.report.outcome.as_str(), "incomplete run; log not saved");
        return Ok(false);
    }
    let mut rec = store.load().wrap_err("load record store")?;
    rec.marks = entries_from_records(&out.report.marks);
    Ok(store.flush(&rec))
}

/// Stored mark log, refusing an empty one.
pub fn stored_log(store: &mut dyn RecordStore) -> Result<Vec<MarkRecord>> {
    let rec = store.load().wrap_err("load record store")?;
    if rec.marks.is_empty() {
        return Err(TracerError::State(
            "no stored mark log; run `tracer explore --save` first".into(),
        )
        .into());
    }
    Ok(records_from_entries(&rec.marks))
}

pub fn replay(
    cfg: &Config,
    cal: IrCalibration,
    peak: Option<f32>,
    base: Option<f32>,
    args: &RunArgs,
    store: &mut dyn RecordStore,
    shutdown: &AtomicBool,
) -> Result<RunOutput> {
    let mut drive_cfg = DriveCfg::from(&cfg.drive);
    if let Some(v) = base {
        drive_cfg.base_velocity = v;
    }
    if let Some(v) = peak {
        drive_cfg.peak_velocity = v;
    }
    if !(drive_cfg.base_velocity > 0.0 && drive_cfg.peak_velocity >= drive_cfg.base_velocity) {
        eyre::bail!(
            "replay velocities must satisfy 0 < base <= peak, got base {} and peak {}",
            drive_cfg.base_velocity,
            drive_cfg.peak_velocity
        );
    }
    let recorded = stored_log(store)?;
    run_once(cfg, cal, drive_cfg, &RunParams::replay(recorded), args, shutdown)
}

/// Explore and save, then replay if the gate agrees.
pub fn course(
    cfg: &Config,
    cal: IrCalibration,
    yes: bool,
    args: &RunArgs,
    store: &mut dyn RecordStore,
    shutdown: &AtomicBool,
) -> Result<Vec<RunOutput>> {
    let first = explore(cfg, cal.clone(), None, true, args, store, shutdown)?;
    if first.saved != Some(true) {
        tracing::warn!("explore log unavailable; skipping replay");
        return Ok(vec![first]);
    }
    let mut gate: Box<dyn Gate> = if yes {
        Box::new(FixedGate(true))
    } else {
        Box::new(PromptGate)
    };
    if !gate.proceed() {
        return Ok(vec![first]);
    }
    let second = replay(cfg, cal, None, None, args, store, shutdown)?;
    Ok(vec![first, second])
}

/// Sweep the line across the bar and track per-sensor extremes.
pub fn calibrate(cfg: &Config, sweeps: u32) -> Result<IrCalibration> {
    if sweeps < 2 {
        eyre::bail!("--sweeps must be >= 2, got {sweeps}");
    }
    let clock = clock_for(cfg, false);
    let Rig {
        board,
        mut robot,
        mut sched,
    } = build_rig(cfg, nominal_calibration(cfg), DriveCfg::from(&cfg.drive), clock)?;
    robot.sensing_start(&mut sched)?;

    let mut tracker = CalibrationTracker::new();
    let limit = Some(Duration::from_millis(100));
    for i in 0..sweeps {
        let t = i as f32 / (sweeps - 1) as f32;
        let offset = -CALIBRATION_SPAN + (2.0 * CALIBRATION_SPAN as f32 * t) as i32;
        board.set_lateral_override(Some(offset));
        // Two sweeps, so the observed one saw the new offset throughout.
        let target = robot.sensing.sweeps() + 2;
        if !sched.wait_until(&mut robot, |r| r.sensing.sweeps() >= target, limit) {
            return Err(TracerError::Timeout.into());
        }
        if let Some(e) = robot.take_fault() {
            return Err(e.into());
        }
        tracker.observe(robot.sensing.raw());
    }
    robot.sensing_stop(&mut sched)?;
    board.set_lateral_override(None);
    let cal = tracker.finish(cfg.sensing.threshold)?;
    tracing::info!(sweeps = tracker.samples(), "calibration finished");
    Ok(cal)
}

#[derive(Debug, Clone, Copy)]
pub struct SelfCheck {
    pub supply_v: f32,
    pub sweeps: u64,
    pub odometry: [i32; 2],
}

/// Sense for a few sweeps and read back supply and encoders.
pub fn self_check(cfg: &Config, cal: IrCalibration) -> Result<SelfCheck> {
    let clock = clock_for(cfg, false);
    let Rig {
        board: _board,
        mut robot,
        mut sched,
    } = build_rig(cfg, cal, DriveCfg::from(&cfg.drive), clock)?;
    robot.sensing_start(&mut sched)?;
    let ok = sched.wait_until(
        &mut robot,
        |r| r.has_fault() || r.sensing.sweeps() >= 4,
        Some(Duration::from_millis(50)),
    );
    if let Some(e) = robot.take_fault() {
        return Err(e.into());
    }
    if !ok {
        return Err(TracerError::Timeout.into());
    }
    robot.sensing_stop(&mut sched)?;
    let supply_v = robot.sensing.supply_voltage();
    let min = cfg.motor.min_supply_v;
    if supply_v < min {
        return Err(TracerError::Hardware(format!(
            "supply {supply_v:.2} V below motor.min_supply_v {min:.2} V"
        ))
        .into());
    }
    Ok(SelfCheck {
        supply_v,
        sweeps: robot.sensing.sweeps(),
        odometry: robot.odometry()?,
    })
}

pub fn slot_name(slot: usize) -> &'static str {
    match slot {
        SENSING_SLOT => "sensing",
        MOTOR_SLOT => "motor",
        DRIVE_SLOT => "drive",
        _ => "other",
    }
}

/// Print per-slot timing statistics to stderr.
pub fn print_stats(stats: &[(usize, SlotStats)]) {
    eprintln!("\n--- Scheduler Stats ---");
    for (slot, st) in stats {
        eprintln!(
            "slot {slot} ({}): fired {} / late {} / max late {} us / last period {} us",
            slot_name(*slot),
            st.fired,
            st.late,
            st.max_late_us,
            st.last_period_us
        );
    }
    eprintln!("-----------------------\n");
}
