use std::error::Error;
use std::sync::{Arc, Mutex};
use tracer_core::{MotorCfg, MotorController, TracerError};
use tracer_traits::{HBridge, QuadratureEncoder, Wheel};

type BoxErr = Box<dyn Error + Send + Sync>;

#[derive(Clone, Default)]
struct SpyEncoder(Arc<Mutex<i32>>);

impl QuadratureEncoder for SpyEncoder {
    fn count(&mut self) -> Result<i32, BoxErr> {
        Ok(*self.0.lock().unwrap())
    }
}

#[derive(Debug, Default)]
struct BridgeLog {
    enabled: bool,
    drives: Vec<(bool, u16)>,
    fail: bool,
}

#[derive(Clone, Default)]
struct SpyBridge(Arc<Mutex<BridgeLog>>);

impl HBridge for SpyBridge {
    fn set_enabled(&mut self, on: bool) -> Result<(), BoxErr> {
        let mut log = self.0.lock().unwrap();
        if log.fail {
            return Err("bridge offline".into());
        }
        log.enabled = on;
        Ok(())
    }

    fn drive(&mut self, forward: bool, level: u16) -> Result<(), BoxErr> {
        self.0.lock().unwrap().drives.push((forward, level));
        Ok(())
    }
}

struct Spies {
    enc: [SpyEncoder; 2],
    br: [SpyBridge; 2],
}

fn controller(cfg: MotorCfg) -> (MotorController<SpyEncoder, SpyBridge>, Spies) {
    let spies = Spies {
        enc: [SpyEncoder::default(), SpyEncoder::default()],
        br: [SpyBridge::default(), SpyBridge::default()],
    };
    let mc = MotorController::new(spies.enc.clone(), spies.br.clone(), cfg);
    (mc, spies)
}

fn last_drive(b: &SpyBridge) -> (bool, u16) {
    *b.0.lock().unwrap().drives.last().unwrap()
}

#[test]
fn targets_advance_before_the_error_is_computed() {
    let (mut mc, spies) = controller(MotorCfg::default());
    mc.start(Box::new(|l: &mut i32, r: &mut i32| {
        *l += 100;
        *r += 50;
    }))
    .unwrap();
    assert!(spies.br[0].0.lock().unwrap().enabled);

    mc.control_tick(8.0).unwrap();
    let left = mc.state(Wheel::Left);
    assert_eq!(left.target, 100);
    assert_eq!(left.error, 100);
    // 0.04 * 100 = 4 V of 8 V
    assert_eq!(last_drive(&spies.br[0]), (true, 3124));
    assert_eq!(mc.state(Wheel::Right).error, 50);
}

#[test]
fn wheel_ahead_of_target_is_driven_backwards() {
    let (mut mc, spies) = controller(MotorCfg::default());
    mc.start(Box::new(|_: &mut i32, _: &mut i32| {})).unwrap();
    *spies.enc[1].0.lock().unwrap() = 25;
    mc.control_tick(8.0).unwrap();
    let (fwd, level) = last_drive(&spies.br[1]);
    assert!(!fwd);
    assert_eq!(level, 781);
}

#[test]
fn low_supply_holds_the_outputs_at_zero() {
    let (mut mc, spies) = controller(MotorCfg::default());
    mc.start(Box::new(|l: &mut i32, r: &mut i32| {
        *l += 1_000;
        *r += 1_000;
    }))
    .unwrap();
    mc.control_tick(0.5).unwrap();
    assert_eq!(last_drive(&spies.br[0]), (true, 0));
    assert_eq!(mc.state(Wheel::Left).error, 1_000);
}

#[test]
fn inverted_wheel_flips_the_direction_pin() {
    let (mut mc, spies) = controller(MotorCfg {
        invert: [true, false],
        ..MotorCfg::default()
    });
    mc.start(Box::new(|l: &mut i32, r: &mut i32| {
        *l += 10;
        *r += 10;
    }))
    .unwrap();
    mc.control_tick(8.0).unwrap();
    assert!(!last_drive(&spies.br[0]).0);
    assert!(last_drive(&spies.br[1]).0);
    assert!(mc.state(Wheel::Left).forward);
}

#[test]
fn start_rebases_targets_on_compensated_counts() {
    let (mut mc, spies) = controller(MotorCfg {
        encoder_comp: [-1, 1],
        ..MotorCfg::default()
    });
    *spies.enc[0].0.lock().unwrap() = -500;
    *spies.enc[1].0.lock().unwrap() = 300;
    assert_eq!(mc.encoder_value(Wheel::Left).unwrap(), 500);
    mc.start(Box::new(|_: &mut i32, _: &mut i32| {})).unwrap();
    assert_eq!(mc.state(Wheel::Left).target, 500);
    assert_eq!(mc.state(Wheel::Right).target, 300);
    mc.control_tick(8.0).unwrap();
    assert_eq!(mc.state(Wheel::Left).error, 0);
}

#[test]
fn stop_disables_and_later_ticks_do_nothing() {
    let (mut mc, spies) = controller(MotorCfg::default());
    mc.start(Box::new(|l: &mut i32, _: &mut i32| *l += 10)).unwrap();
    mc.control_tick(8.0).unwrap();
    mc.stop().unwrap();
    assert!(!mc.is_running());
    assert!(!spies.br[0].0.lock().unwrap().enabled);
    assert_eq!(last_drive(&spies.br[0]), (true, 0));

    let n = spies.br[0].0.lock().unwrap().drives.len();
    mc.control_tick(8.0).unwrap();
    assert_eq!(spies.br[0].0.lock().unwrap().drives.len(), n);
    mc.stop().unwrap();
}

#[test]
fn stop_reaches_every_bridge_and_reports_the_first_failure() {
    let (mut mc, spies) = controller(MotorCfg::default());
    mc.start(Box::new(|_: &mut i32, _: &mut i32| {})).unwrap();
    spies.br[0].0.lock().unwrap().fail = true;
    let err = mc.stop().unwrap_err();
    assert!(matches!(err, TracerError::Hardware(ref s) if s == "bridge offline"));
    assert!(!spies.br[1].0.lock().unwrap().enabled);
    assert!(!mc.is_running());
}
