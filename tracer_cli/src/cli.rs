//! CLI argument definitions and shared statics.

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Effective safety knobs used for the current run (for JSON details).
pub static LAST_SAFETY: OnceLock<CliSafety> = OnceLock::new();

#[derive(Copy, Clone, Debug)]
pub struct CliSafety {
    pub max_run_ms: u64,
    pub line_out_ms: u64,
}

#[derive(Parser, Debug)]
#[command(name = "tracer", version, about = "Line tracer drive control")]
pub struct Cli {
    /// Path to config TOML (typed)
    #[arg(long, value_name = "FILE", default_value = "etc/tracer.toml")]
    pub config: PathBuf,

    /// Optional sensor calibration CSV (sensor,bias,range)
    #[arg(long, value_name = "FILE")]
    pub calibration: Option<PathBuf>,

    /// Log and print results as JSON instead of text
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

/// Memory locking mode for real-time operation.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum RtLock {
    /// Do not lock memory
    None,
    /// Lock currently resident pages
    Current,
    /// Lock current and future pages
    All,
}

impl RtLock {
    #[inline]
    pub fn os_default() -> Self {
        if cfg!(target_os = "linux") {
            Self::Current
        } else {
            Self::None
        }
    }
}

/// Options shared by every command that drives the robot.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Override safety: max run time in ms (takes precedence over config)
    #[arg(long, value_name = "MS")]
    pub max_run_ms: Option<u64>,
    /// Service the control slots from a background thread on wall-clock time
    #[arg(long, action = ArgAction::SetTrue)]
    pub threaded: bool,
    /// Print per-slot scheduler statistics after the run
    #[arg(long, action = ArgAction::SetTrue)]
    pub stats: bool,
    /// Enable real-time mode (SCHED_FIFO, affinity, mlockall)
    #[arg(
        long,
        action = ArgAction::SetTrue,
        long_help = "Enable real-time mode on Linux: SCHED_FIFO priority, CPU pinning and mlockall.\n\nThis reduces jitter of the 500 us control slots but may require CAP_SYS_NICE, CAP_IPC_LOCK or a raised 'ulimit -l'. Failures are reported as warnings and the run continues."
    )]
    pub rt: bool,
    /// Real-time priority for SCHED_FIFO (1..=max)
    #[arg(long, value_name = "PRIO")]
    pub rt_prio: Option<i32>,
    /// Memory locking mode for --rt
    #[arg(long, value_enum, value_name = "MODE")]
    pub rt_lock: Option<RtLock>,
    /// CPU index to pin the process to for --rt (default 0)
    #[arg(long, value_name = "CPU")]
    pub rt_cpu: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Follow the course at exploration speed and log its marks
    Explore {
        /// Persist the mark log to the record store
        #[arg(long, action = ArgAction::SetTrue)]
        save: bool,
        /// Override drive.explore_velocity (m/s)
        #[arg(long, value_name = "M/S")]
        velocity: Option<f32>,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Run the course again using the stored mark log
    Replay {
        /// Override drive.peak_velocity (m/s)
        #[arg(long, value_name = "M/S")]
        peak: Option<f32>,
        /// Override drive.base_velocity (m/s)
        #[arg(long, value_name = "M/S")]
        base: Option<f32>,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Explore, save the log, then replay once confirmed
    Course {
        /// Start the replay without asking
        #[arg(long, short = 'y', action = ArgAction::SetTrue)]
        yes: bool,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Sweep the sensor bar across the line and derive a calibration
    Calibrate {
        /// Full sensor sweeps to observe
        #[arg(long, default_value_t = 200)]
        sweeps: u32,
        /// Persist the calibration to the record store
        #[arg(long, action = ArgAction::SetTrue)]
        save: bool,
    },
    /// Print the stored mark log
    Marks,
    /// Quick health check (sensing, supply, encoders)
    SelfCheck,
}
