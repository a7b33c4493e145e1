#![allow(dead_code)]

use std::sync::Arc;
use tracer_core::{
    DriveCfg, IrCalibration, MarkCfg, MotorCfg, Robot, SafetyCfg, Scheduler, SensingCfg,
};
use tracer_core::drive::Drive;
use tracer_hardware::{SimBoard, SimParams, SimTrack};
use tracer_traits::{Clock, IR_COUNT, ManualClock, Wheel};

/// Calibration matching the simulated floor (400) and line (3600).
pub fn sim_calibration() -> IrCalibration {
    IrCalibration {
        bias: [400; IR_COUNT],
        range: [3200; IR_COUNT],
        threshold: 0.5,
    }
}

pub struct Rig {
    pub board: SimBoard,
    pub robot: Robot,
    pub sched: Scheduler<Robot>,
    pub drive: Drive,
}

pub fn rig_with(track: SimTrack, clock: Arc<dyn Clock + Send + Sync>, drive: DriveCfg, safety: SafetyCfg) -> Rig {
    let board = SimBoard::new(track, SimParams::default(), clock.clone());
    let motor = MotorCfg::default();
    let robot = Robot::builder()
        .with_analog(board.analog())
        .with_encoders(board.encoder(Wheel::Left), board.encoder(Wheel::Right))
        .with_bridges(board.bridge(Wheel::Left), board.bridge(Wheel::Right))
        .with_sensing(SensingCfg::default())
        .with_calibration(sim_calibration())
        .with_motor(motor)
        .with_drive(drive.clone())
        .try_build()
        .expect("robot build");
    let tpm = robot.ticks_per_meter();
    Rig {
        board,
        robot,
        sched: Scheduler::new(clock),
        drive: Drive::new(drive, &MarkCfg::default(), safety, tpm),
    }
}

/// Rig on virtual time.
pub fn rig(track: SimTrack) -> (Rig, ManualClock) {
    let clock = ManualClock::new();
    let r = rig_with(track, Arc::new(clock.clone()), DriveCfg::default(), SafetyCfg::default());
    (r, clock)
}
