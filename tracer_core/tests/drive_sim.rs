//! Full runs on the simulated board, on virtual time.

mod common;

use common::{rig, rig_with};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tracer_core::mocks::{NoopFeedback, NoopStatus, PulseLog, StatusLog};
use tracer_core::{
    AbortReason, Collaborators, DriveCfg, Mark, RunOutcome, RunParams, RunStatus, SafetyCfg,
    TracerError, run_cooperative,
};
use tracer_hardware::{SimTrack, TapeKind};
use tracer_traits::{ManualClock, Wheel};

fn scenario() -> SimTrack {
    SimTrack::new(0.02)
        .with_tape(TapeKind::Left, 0.5)
        .with_tape(TapeKind::Cross, 0.9)
        .with_tape(TapeKind::Right, 1.3)
        .with_tape(TapeKind::Both, 1.7)
        .with_tape(TapeKind::Cross, 2.1)
        .with_tape(TapeKind::Both, 2.5)
}

#[test]
fn explore_logs_six_marks_and_stops_at_second_end_marker() {
    let (mut r, _clock) = rig(scenario());
    let mut pulses = PulseLog::default();
    let mut status = StatusLog::default();
    let mut ui = Collaborators {
        feedback: &mut pulses,
        status: &mut status,
    };
    let stop = AtomicBool::new(false);

    let report = run_cooperative(
        &mut r.drive,
        &mut r.sched,
        &mut r.robot,
        &RunParams::explore(),
        &mut ui,
        &stop,
    )
    .expect("explore run");

    assert_eq!(report.outcome, RunOutcome::Completed);
    let kinds: Vec<Mark> = report.marks.iter().map(|m| m.kind).collect();
    assert_eq!(
        kinds,
        vec![
            Mark::Left,
            Mark::Cross,
            Mark::Right,
            Mark::Both,
            Mark::Cross,
            Mark::Both
        ]
    );
    assert!(report.marks.windows(2).all(|w| w[0].tick < w[1].tick));

    // Each mark is decided shortly after its tape starts.
    let tpm = r.robot.ticks_per_meter();
    for (m, at) in report.marks.iter().zip([0.5, 0.9, 1.3, 1.7, 2.1, 2.5]) {
        let d = m.tick as f32 / tpm - at;
        assert!((0.0..0.1).contains(&d), "{:?} decided {d} m after its tape", m.kind);
    }

    // Crosses are silent.
    assert_eq!(pulses.0.len(), 4);
    assert_eq!(status.0.len(), 6);
    assert!(status.0[0].starts_with('L'));

    // Stopped within the fit-in distance plus the settle tolerance.
    let traveled_m = r.board.distance_m() as f32;
    assert!(traveled_m < 2.5 + 0.1 + 0.3, "overran to {traveled_m} m");
    assert!(!r.board.bridge_enabled(Wheel::Left));
    assert!(!r.board.bridge_enabled(Wheel::Right));
    assert!(!r.robot.motors.is_running());
}

#[test]
fn replay_boosts_inside_the_straight_window() {
    let track = || {
        SimTrack::new(0.02)
            .with_tape(TapeKind::Both, 0.3)
            .with_tape(TapeKind::Left, 0.6)
            .with_tape(TapeKind::Left, 1.6)
            .with_tape(TapeKind::Cross, 2.0)
            .with_tape(TapeKind::Right, 2.4)
            .with_tape(TapeKind::Both, 2.8)
    };
    let stop = AtomicBool::new(false);

    let (mut r, _) = rig(track());
    let explore = run_cooperative(
        &mut r.drive,
        &mut r.sched,
        &mut r.robot,
        &RunParams::explore(),
        &mut Collaborators {
            feedback: &mut NoopFeedback,
            status: &mut NoopStatus,
        },
        &stop,
    )
    .expect("explore run");
    assert_eq!(explore.marks.len(), 6);

    // Replay on a fresh robot, stepping by hand to watch the command.
    let (mut r, _) = rig(track());
    let now = r.sched.now_us();
    r.drive
        .begin(
            &mut r.robot,
            &mut r.sched,
            tracer_core::RunMode::Replay,
            &explore.marks,
            now,
        )
        .expect("begin replay");
    let mut ui = Collaborators {
        feedback: &mut NoopFeedback,
        status: &mut NoopStatus,
    };
    let mut peak_cmd = 0.0_f32;
    let mut boosted_outside = false;
    let tpm = r.robot.ticks_per_meter();
    loop {
        r.sched.service(&mut r.robot);
        let st = r.drive.step(&mut r.robot, r.sched.now_us(), &mut ui).expect("step");
        let cmd = r.robot.profile.command();
        peak_cmd = peak_cmd.max(cmd);
        let at_m = r.drive.traveled() as f32 / tpm;
        if cmd > 1.05 && !(0.6..1.7).contains(&at_m) {
            boosted_outside = true;
        }
        if st != RunStatus::Running {
            assert_eq!(st, RunStatus::Complete);
            break;
        }
        assert!(r.sched.now_us() < 20_000_000, "replay did not finish");
        r.sched.idle();
    }
    assert!(peak_cmd > 1.8, "peak command {peak_cmd}");
    assert!(!boosted_outside);
    assert!(r.drive.run().is_mark_valid);
    assert_eq!(r.drive.run().replay_index, 6);
    r.robot.motor_control_stop(&mut r.sched).expect("stop");
}

#[test]
fn side_mark_inside_a_bend_is_read_while_the_curve_slows_the_robot() {
    let (mut r, _) = rig(
        SimTrack::new(0.02)
            .with_bend(0.3, 1.3, 6_000)
            .with_tape(TapeKind::Left, 0.8)
            .with_tape(TapeKind::Both, 1.6)
            .with_tape(TapeKind::Both, 2.0),
    );
    let now = r.sched.now_us();
    r.drive
        .begin(
            &mut r.robot,
            &mut r.sched,
            tracer_core::RunMode::Explore,
            &[],
            now,
        )
        .expect("begin explore");
    let mut ui = Collaborators {
        feedback: &mut NoopFeedback,
        status: &mut NoopStatus,
    };
    let tpm = r.robot.ticks_per_meter();
    let mut straight_peak = 0.0_f32;
    let mut curve_low = f32::MAX;
    let mut peak_limited = 0_u32;
    loop {
        r.sched.service(&mut r.robot);
        let st = r.drive.step(&mut r.robot, r.sched.now_us(), &mut ui).expect("step");
        let cmd = r.robot.profile.command();
        let limited = r.robot.sensing.position_limited();
        peak_limited = peak_limited.max(limited);
        if (r.drive.traveled() as f32 / tpm) < 0.3 {
            straight_peak = straight_peak.max(cmd);
        }
        if limited >= 5_500 {
            curve_low = curve_low.min(cmd);
        }
        if st != RunStatus::Running {
            assert_eq!(st, RunStatus::Complete);
            break;
        }
        assert!(r.sched.now_us() < 20_000_000, "explore did not finish");
        r.sched.idle();
    }

    let kinds: Vec<Mark> = r
        .drive
        .report(RunOutcome::Completed, 0)
        .marks
        .iter()
        .map(|m| m.kind)
        .collect();
    assert_eq!(kinds, vec![Mark::Left, Mark::Both, Mark::Both]);
    assert!(peak_limited >= 5_500, "position_limited peaked at {peak_limited}");
    assert!(straight_peak > 0.95, "straight command {straight_peak}");
    // 1 / (1 + 0.00005 * 6000) of the explore velocity on the plateau.
    assert!(curve_low < 0.8, "curve command {curve_low}");
    assert!(curve_low > 0.7, "curve command {curve_low}");
    r.robot.motor_control_stop(&mut r.sched).expect("stop");
}

#[test]
fn losing_the_line_ends_the_run_and_stops_the_motors() {
    let (mut r, _) = rig(SimTrack::new(0.02).ending_at(0.4));
    let stop = AtomicBool::new(false);
    let report = run_cooperative(
        &mut r.drive,
        &mut r.sched,
        &mut r.robot,
        &RunParams::explore(),
        &mut Collaborators {
            feedback: &mut NoopFeedback,
            status: &mut NoopStatus,
        },
        &stop,
    )
    .expect("line-out is an outcome, not an error");
    assert_eq!(report.outcome, RunOutcome::LineOut);
    assert!(report.marks.is_empty());
    // 100 ms at about 1 m/s past the end of the line.
    let m = report.traveled_ticks as f32 / r.robot.ticks_per_meter();
    assert!((0.4..0.6).contains(&m), "stopped after {m} m");
    assert!(!r.board.bridge_enabled(Wheel::Left));
}

#[test]
fn replay_without_a_log_is_rejected() {
    let (mut r, _) = rig(scenario());
    let stop = AtomicBool::new(false);
    let err = run_cooperative(
        &mut r.drive,
        &mut r.sched,
        &mut r.robot,
        &RunParams::replay(Vec::new()),
        &mut Collaborators {
            feedback: &mut NoopFeedback,
            status: &mut NoopStatus,
        },
        &stop,
    )
    .expect_err("empty log");
    assert!(matches!(err.downcast_ref::<TracerError>(), Some(TracerError::State(_))));
}

#[test]
fn emergency_stop_aborts_and_disables_the_bridges() {
    let (mut r, _) = rig(scenario());
    let stop = AtomicBool::new(true);
    let err = run_cooperative(
        &mut r.drive,
        &mut r.sched,
        &mut r.robot,
        &RunParams::explore(),
        &mut Collaborators {
            feedback: &mut NoopFeedback,
            status: &mut NoopStatus,
        },
        &stop,
    )
    .expect_err("estop");
    assert!(matches!(
        err.downcast_ref::<TracerError>(),
        Some(TracerError::Abort(AbortReason::Estop))
    ));
    assert!(!r.board.bridge_enabled(Wheel::Right));
}

#[test]
fn run_time_cap_aborts_an_endless_course() {
    let clock = ManualClock::new();
    let safety = SafetyCfg {
        max_run_ms: 200,
        ..SafetyCfg::default()
    };
    let mut r = rig_with(SimTrack::new(0.02), Arc::new(clock), DriveCfg::default(), safety);
    let stop = AtomicBool::new(false);
    let err = run_cooperative(
        &mut r.drive,
        &mut r.sched,
        &mut r.robot,
        &RunParams::explore(),
        &mut Collaborators {
            feedback: &mut NoopFeedback,
            status: &mut NoopStatus,
        },
        &stop,
    )
    .expect_err("max runtime");
    assert!(matches!(
        err.downcast_ref::<TracerError>(),
        Some(TracerError::Abort(AbortReason::MaxRuntime))
    ));
}

#[test]
fn converter_fault_in_a_slot_surfaces_from_the_run() {
    let (mut r, _) = rig(scenario());
    r.board.set_adc_fault(true);
    let stop = AtomicBool::new(false);
    let err = run_cooperative(
        &mut r.drive,
        &mut r.sched,
        &mut r.robot,
        &RunParams::explore(),
        &mut Collaborators {
            feedback: &mut NoopFeedback,
            status: &mut NoopStatus,
        },
        &stop,
    )
    .expect_err("fault");
    assert!(matches!(
        err.downcast_ref::<TracerError>(),
        Some(TracerError::HardwareFault(s)) if s.contains("adc")
    ));
    assert!(!r.robot.motors.is_running());
}
