use rstest::rstest;
use std::sync::Arc;
use tracer_core::{BuildError, DriveCfg, MotorCfg, Robot, SensingCfg};
use tracer_hardware::{SimBoard, SimParams, SimTrack};
use tracer_traits::{ManualClock, Wheel};

fn board() -> SimBoard {
    SimBoard::new(
        SimTrack::new(0.02),
        SimParams::default(),
        Arc::new(ManualClock::new()),
    )
}

fn build_error(res: tracer_core::Result<Robot>) -> BuildError {
    res.expect_err("build should fail")
        .downcast::<BuildError>()
        .expect("typed build error")
}

#[test]
fn missing_parts_are_reported_in_order() {
    let b = board();
    let e = build_error(Robot::builder().try_build());
    assert!(matches!(e, BuildError::MissingAnalog));

    let e = build_error(Robot::builder().with_analog(b.analog()).try_build());
    assert!(matches!(e, BuildError::MissingEncoders));

    let e = build_error(
        Robot::builder()
            .with_analog(b.analog())
            .with_encoders(b.encoder(Wheel::Left), b.encoder(Wheel::Right))
            .try_build(),
    );
    assert!(matches!(e, BuildError::MissingBridges));
}

fn complete(sensing: SensingCfg, motor: MotorCfg, drive: DriveCfg) -> tracer_core::Result<Robot> {
    let b = board();
    Robot::builder()
        .with_analog(b.analog())
        .with_encoders(b.encoder(Wheel::Left), b.encoder(Wheel::Right))
        .with_bridges(b.bridge(Wheel::Left), b.bridge(Wheel::Right))
        .with_sensing(sensing)
        .with_motor(motor)
        .with_drive(drive)
        .try_build()
}

#[rstest]
#[case::zero_sensing_interval(
    SensingCfg { tick_interval_us: 0, ..SensingCfg::default() },
    MotorCfg::default(),
    "intervals"
)]
#[case::window_too_wide(
    SensingCfg { window_half_width: 8, ..SensingCfg::default() },
    MotorCfg::default(),
    "window_half_width"
)]
#[case::window_empty(
    SensingCfg { window_half_width: 0, ..SensingCfg::default() },
    MotorCfg::default(),
    "window_half_width"
)]
#[case::dead_zone_at_top(
    SensingCfg::default(),
    MotorCfg { dead_zone: 6249, ..MotorCfg::default() },
    "dead_zone"
)]
#[case::encoder_sign(
    SensingCfg::default(),
    MotorCfg { encoder_comp: [1, 0], ..MotorCfg::default() },
    "encoder_comp"
)]
#[case::no_wheel(
    SensingCfg::default(),
    MotorCfg { wheel_diameter_m: 0.0, ..MotorCfg::default() },
    "ticks per meter"
)]
fn invalid_config_is_rejected(
    #[case] sensing: SensingCfg,
    #[case] motor: MotorCfg,
    #[case] needle: &str,
) {
    match build_error(complete(sensing, motor, DriveCfg::default())) {
        BuildError::InvalidConfig(msg) => assert!(msg.contains(needle), "{msg}"),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn zero_drive_interval_is_rejected() {
    let drive = DriveCfg {
        interval_us: 0,
        ..DriveCfg::default()
    };
    let e = build_error(complete(SensingCfg::default(), MotorCfg::default(), drive));
    assert!(matches!(e, BuildError::InvalidConfig(_)));
}

#[test]
fn defaults_build_with_wheel_geometry() {
    let robot = complete(SensingCfg::default(), MotorCfg::default(), DriveCfg::default())
        .expect("defaults are valid");
    let tpm = robot.ticks_per_meter();
    assert!((69_000.0..70_000.0).contains(&tpm), "{tpm}");
    assert!(!robot.motors.is_running());
    assert!(!robot.has_fault());
}
