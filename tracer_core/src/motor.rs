//! Per-wheel position loop.
//!
//! Each control tick asks the target updater to advance both wheels' target
//! positions, reads the encoders and turns the tick error into a voltage
//! (`gain_p * e`, plus `gain_d * Δe` and a clamped integral when enabled).
//! The voltage becomes a PWM level relative to the measured supply.
use crate::config::MotorCfg;
use crate::error::TracerError;
use crate::hw_error::hw;
use tracer_traits::{HBridge, QuadratureEncoder, Wheel};

/// Advances both wheels' target positions (encoder ticks) by one tick.
pub trait TargetUpdater: Send {
    fn update_targets(&mut self, left: &mut i32, right: &mut i32);
}

impl<F: FnMut(&mut i32, &mut i32) + Send> TargetUpdater for F {
    fn update_targets(&mut self, left: &mut i32, right: &mut i32) {
        self(left, right);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MotorControlState {
    pub target: i32,
    pub current: i32,
    pub error: i32,
    pub error_prev: i32,
    pub error_sum: f32,
    pub gain_p: f32,
    pub gain_d: f32,
    pub gain_i: f32,
    pub voltage: f32,
    pub level: u16,
    pub forward: bool,
}

impl MotorControlState {
    fn new(cfg: &MotorCfg) -> Self {
        Self {
            gain_p: cfg.gain_p,
            gain_d: cfg.gain_d,
            gain_i: cfg.gain_i,
            forward: true,
            ..Self::default()
        }
    }

    fn rebase(&mut self, position: i32) {
        self.target = position;
        self.current = position;
        self.error = 0;
        self.error_prev = 0;
        self.error_sum = 0.0;
        self.voltage = 0.0;
        self.level = 0;
    }

    /// Recompute `error` and `voltage` from `target` and `current`.
    pub fn step(&mut self, derivative: bool, integral_limit: f32) -> f32 {
        self.error_prev = self.error;
        self.error = self.target.wrapping_sub(self.current);
        let e = self.error as f32;
        let mut v = self.gain_p * e;
        if derivative {
            v += self.gain_d * (self.error.wrapping_sub(self.error_prev)) as f32;
        }
        if self.gain_i != 0.0 {
            let limit = integral_limit.abs();
            self.error_sum = (self.error_sum + e).clamp(-limit, limit);
            v += self.gain_i * self.error_sum;
        }
        self.voltage = v;
        v
    }
}

/// Direction and compare level for `voltage` at the measured `supply_v`.
/// Any non-zero output gets at least `dead_zone`.
pub fn duty_level(voltage: f32, supply_v: f32, top: u16, dead_zone: u16) -> (bool, u16) {
    if !voltage.is_finite() || !supply_v.is_finite() || supply_v <= 0.0 || voltage == 0.0 {
        return (true, 0);
    }
    let duty = voltage / supply_v;
    let top_f = f32::from(top);
    let level = (f32::from(dead_zone) + duty.abs() * top_f).clamp(f32::from(dead_zone), top_f);
    (duty > 0.0, level as u16)
}

pub struct MotorController<E, B> {
    encoders: [E; 2],
    bridges: [B; 2],
    cfg: MotorCfg,
    state: [MotorControlState; 2],
    updater: Option<Box<dyn TargetUpdater>>,
}

impl<E: QuadratureEncoder, B: HBridge> MotorController<E, B> {
    pub fn new(encoders: [E; 2], bridges: [B; 2], cfg: MotorCfg) -> Self {
        let state = [MotorControlState::new(&cfg); 2];
        Self {
            encoders,
            bridges,
            cfg,
            state,
            updater: None,
        }
    }

    pub fn cfg(&self) -> &MotorCfg {
        &self.cfg
    }

    /// Encoder count with the wheel's sign compensation applied.
    pub fn encoder_value(&mut self, wheel: Wheel) -> Result<i32, TracerError> {
        let raw = self.encoders[wheel.index()].count().map_err(hw)?;
        Ok(raw.wrapping_mul(i32::from(self.cfg.encoder_comp[wheel.index()])))
    }

    /// Take over both wheels: targets start where the wheels are.
    pub fn start(&mut self, updater: Box<dyn TargetUpdater>) -> Result<(), TracerError> {
        for wheel in Wheel::ALL {
            let pos = self.encoder_value(wheel)?;
            self.state[wheel.index()].rebase(pos);
        }
        for b in &mut self.bridges {
            b.drive(true, 0).map_err(hw)?;
            b.set_enabled(true).map_err(hw)?;
        }
        self.updater = Some(updater);
        tracing::debug!("motor control started");
        Ok(())
    }

    /// Zero both outputs and disable the bridges. Safe to call repeatedly.
    pub fn stop(&mut self) -> Result<(), TracerError> {
        self.updater = None;
        let mut first_err = None;
        for (b, s) in self.bridges.iter_mut().zip(self.state.iter_mut()) {
            s.voltage = 0.0;
            s.level = 0;
            let r = b.drive(true, 0).and_then(|()| b.set_enabled(false));
            if let Err(e) = r {
                if first_err.is_none() {
                    first_err = Some(hw(e));
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.updater.is_some()
    }

    pub fn state(&self, wheel: Wheel) -> &MotorControlState {
        &self.state[wheel.index()]
    }

    /// One control period. A no-op while stopped.
    pub fn control_tick(&mut self, supply_v: f32) -> Result<(), TracerError> {
        let Some(updater) = self.updater.as_mut() else {
            return Ok(());
        };
        let [l, r] = &mut self.state;
        updater.update_targets(&mut l.target, &mut r.target);

        let starved = supply_v < self.cfg.min_supply_v;
        for wheel in Wheel::ALL {
            let i = wheel.index();
            let current = self.encoders[i]
                .count()
                .map_err(hw)?
                .wrapping_mul(i32::from(self.cfg.encoder_comp[i]));
            let s = &mut self.state[i];
            s.current = current;
            let v = s.step(self.cfg.derivative, self.cfg.integral_limit);
            let (forward, level) = if starved {
                (true, 0)
            } else {
                duty_level(v, supply_v, self.cfg.pwm_top, self.cfg.dead_zone)
            };
            s.forward = forward;
            s.level = level;
            self.bridges[i]
                .drive(forward ^ self.cfg.invert[i], level)
                .map_err(hw)?;
        }
        Ok(())
    }
}
