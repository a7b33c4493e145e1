use rstest::rstest;
use tracer_config::{MarkKind, RunMode, load_toml};

fn full_config() -> &'static str {
    r#"
[sensing]
tick_interval_us = 500
threshold = 0.5
window_half_width = 3

[marks]
length_m = 0.03
line_half_width = 3
cross_center_min = 6

[motor]
gain_p = 0.04
gain_d = 0.02
derivative = false
pwm_top = 6249
encoder_comp = [-1, -1]
invert = [true, false]

[drive]
explore_velocity = 1.2
base_velocity = 1.5
peak_velocity = 3.0

[safety]
max_run_ms = 30000
line_out_ms = 150

[runner]
mode = "threaded"

[sim]
line_length_m = 4.0
marks = [
    { kind = "both", at_m = 0.3 },
    { kind = "cross", at_m = 1.0 },
]
"#
}

#[test]
fn accepts_full_config() {
    let cfg = load_toml(full_config()).expect("parse TOML");
    cfg.validate().expect("valid config should pass");
    assert_eq!(cfg.motor.encoder_comp, [-1, -1]);
    assert_eq!(cfg.runner.mode, RunMode::Threaded);
    assert_eq!(cfg.sim.marks.len(), 2);
    assert_eq!(cfg.sim.marks[1].kind, MarkKind::Cross);
    assert_eq!(cfg.sim.line_length_m, Some(4.0));
}

#[rstest]
#[case("[sensing]\ntick_interval_us = 0", "sensing.tick_interval_us must be > 0")]
#[case("[sensing]\nthreshold = 1.5", "sensing.threshold must be in")]
#[case("[sensing]\nwindow_half_width = 8", "sensing.window_half_width must be in")]
#[case("[marks]\nlength_m = 0.0", "marks.length_m must be > 0")]
#[case("[marks]\ncross_center_min = 9", "marks.cross_center_min must be in")]
#[case("[motor]\npwm_top = 100\ndead_zone = 100", "motor.dead_zone must be < motor.pwm_top")]
#[case("[motor]\nencoder_comp = [2, 1]", "motor.encoder_comp entries must be 1 or -1")]
#[case("[drive]\ndecel = 0.0", "drive.decel must be > 0")]
#[case("[drive]\nfit_in_m = -0.1", "drive.fit_in_m must be > 0")]
#[case(
    "[drive]\nbase_velocity = 2.0\npeak_velocity = 1.0",
    "drive.peak_velocity must be >= drive.base_velocity"
)]
#[case("[safety]\nline_out_ms = 0", "safety.line_out_ms must be >= 1")]
#[case("[logging]\nrotation = \"weekly\"", "logging.rotation must be one of")]
#[case("[store]\npath = \"  \"", "store.path must not be empty")]
#[case("[sim]\nwhite = 100\nblack = 200", "sim.white must be > sim.black")]
fn rejects_out_of_range(#[case] toml: &str, #[case] needle: &str) {
    let cfg = load_toml(toml).expect("parse TOML");
    let err = cfg.validate().expect_err("should reject");
    assert!(
        format!("{err}").contains(needle),
        "expected '{needle}' in '{err}'"
    );
}

#[test]
fn unknown_mark_kind_fails_to_parse() {
    let toml = r#"
[sim]
marks = [{ kind = "diagonal", at_m = 1.0 }]
"#;
    assert!(load_toml(toml).is_err());
}
