#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Drive-control core of the line tracer (hardware-agnostic).
//!
//! All hardware is reached through the traits in `tracer_traits`; the core
//! runs unchanged on the simulated board and on real peripherals.
//!
//! ## Architecture
//!
//! - **Scheduler**: periodic slots on one counter, servicing a `Robot`
//!   context (`scheduler`)
//! - **Sensing**: mux sweep, median-of-3, calibration, windowed position
//!   (`sensing`)
//! - **Marks**: distance-gated READY / ACCUMULATION / DECISION detector
//!   (`mark`)
//! - **Motors**: per-wheel position PID fed by a target updater (`motor`),
//!   velocity shaping and tick integration (`velocity`)
//! - **Drive**: explore / replay state machine, line-out watchdog (`drive`,
//!   `watchdog`), run orchestration and safety guards (`runner`)
//!
//! Positions are integer units where adjacent sensors are 2000 apart and
//! positive means the line is left of center; distances are encoder ticks.

pub mod atomic;
pub mod config;
pub mod conversions;
pub mod drive;
pub mod error;
pub mod hw_error;
pub mod mark;
pub mod mocks;
pub mod motor;
pub mod robot;
pub mod runner;
pub mod scheduler;
pub mod sensing;
pub mod status;
pub mod store;
pub mod util;
pub mod velocity;
pub mod watchdog;

pub use config::{DriveCfg, IrCalibration, MarkCfg, MotorCfg, SafetyCfg, SensingCfg};
pub use drive::{Collaborators, Drive, DriveRun, MarkRecord, RunMode, StraightWindow};
pub use error::{AbortReason, BuildError, Report, Result, TracerError};
pub use mark::{Mark, MarkDetector, MarkWindowMask};
pub use motor::{MotorController, TargetUpdater};
pub use robot::{Robot, RobotBuilder, Telemetry};
pub use runner::{RunParams, run_cooperative, run_threaded};
pub use scheduler::{Scheduler, SchedulerThread, SlotStats};
pub use sensing::{CalibrationTracker, IrState, SensorBank, normalize};
pub use status::{RunOutcome, RunReport, RunStatus};
pub use store::{FileStore, MemStore, RecordStore};
