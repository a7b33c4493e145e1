//! Velocity command shaping and the ticks-per-step integrator.
//!
//! The drive slot ramps a center velocity toward its target, attenuates it
//! in curves and splits it into left/right wheel velocities. The motor slot
//! reads those through `WheelVelocities` and integrates them into target
//! positions, one fractional step at a time.
use crate::atomic::AtomicF32;
use crate::config::DriveCfg;
use crate::motor::TargetUpdater;
use crate::util::interval_s;
use std::sync::Arc;

/// Wheel velocities (m/s) handed from the drive slot to the motor slot.
#[derive(Debug, Default)]
pub struct WheelVelocities {
    pub left: AtomicF32,
    pub right: AtomicF32,
}

impl WheelVelocities {
    pub fn get(&self) -> (f32, f32) {
        (self.left.load(), self.right.load())
    }

    pub fn set(&self, left: f32, right: f32) {
        self.left.store(left);
        self.right.store(right);
    }
}

/// `center / (1 + curve_decel * position_limited)`.
#[inline]
pub fn curve_attenuated(center: f32, curve_decel: f32, position_limited: u32) -> f32 {
    center / (1.0 + curve_decel * position_limited as f32)
}

/// `(c (1 - k·pos), c (1 + k·pos))`; a positive position (line to the left)
/// slows the left wheel.
#[inline]
pub fn split(center: f32, steer_gain: f32, position: i32) -> (f32, f32) {
    let k = steer_gain * position as f32;
    (center * (1.0 - k), center * (1.0 + k))
}

/// Move `current` toward `target` by at most `up` (rising) or `down` (falling).
/// A non-positive `down` never lowers the command.
#[inline]
pub fn ramp(current: f32, target: f32, up: f32, down: f32) -> f32 {
    if target > current {
        (current + up.max(0.0)).min(target)
    } else if down > 0.0 {
        (current - down).max(target)
    } else {
        current
    }
}

/// Deceleration that stops from `v` within `fit_in_m`.
#[inline]
pub fn stop_decel(v: f32, fit_in_m: f32) -> f32 {
    if fit_in_m <= 0.0 {
        return f32::INFINITY;
    }
    v * v / (2.0 * fit_in_m)
}

/// Distance needed to slow from `peak` to `base` at `decel`.
#[inline]
pub fn reentry_distance(peak: f32, base: f32, decel: f32) -> f32 {
    if decel <= 0.0 || peak <= base {
        return 0.0;
    }
    (peak + base) * (peak - base) / (2.0 * decel)
}

/// Turns the shared wheel velocities into per-step target increments.
/// The fractional part of each step carries over so no distance is lost.
pub struct VelocityIntegrator {
    cells: Arc<WheelVelocities>,
    ticks_per_step: f32,
    residual: [f32; 2],
}

impl VelocityIntegrator {
    pub fn new(cells: Arc<WheelVelocities>, ticks_per_meter: f32, interval_us: u32) -> Self {
        Self {
            cells,
            ticks_per_step: ticks_per_meter * interval_s(interval_us),
            residual: [0.0; 2],
        }
    }

    fn advance(&mut self, i: usize, v: f32) -> i32 {
        let exact = v * self.ticks_per_step + self.residual[i];
        if !exact.is_finite() {
            self.residual[i] = 0.0;
            return 0;
        }
        let whole = exact.trunc();
        self.residual[i] = exact - whole;
        whole as i32
    }
}

impl TargetUpdater for VelocityIntegrator {
    fn update_targets(&mut self, left: &mut i32, right: &mut i32) {
        let (vl, vr) = self.cells.get();
        *left = left.wrapping_add(self.advance(0, vl));
        *right = right.wrapping_add(self.advance(1, vr));
    }
}

/// Center-velocity state of the drive slot.
pub struct VelocityProfile {
    cfg: DriveCfg,
    dt: f32,
    target: f32,
    command: f32,
    decel: f32,
    cells: Arc<WheelVelocities>,
}

impl VelocityProfile {
    pub fn new(cfg: &DriveCfg) -> Self {
        Self {
            dt: interval_s(cfg.interval_us),
            target: 0.0,
            command: 0.0,
            decel: cfg.decel,
            cells: Arc::new(WheelVelocities::default()),
            cfg: cfg.clone(),
        }
    }

    pub fn cells(&self) -> Arc<WheelVelocities> {
        self.cells.clone()
    }

    pub fn integrator(&self, ticks_per_meter: f32, interval_us: u32) -> VelocityIntegrator {
        VelocityIntegrator::new(self.cells(), ticks_per_meter, interval_us)
    }

    pub fn set_target(&mut self, v: f32) {
        self.target = v;
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    /// Replace the falling ramp rate (m/s²).
    pub fn set_decel(&mut self, decel: f32) {
        self.decel = decel;
    }

    /// Current ramped center velocity.
    pub fn command(&self) -> f32 {
        self.command
    }

    /// Zero everything at once, without ramping.
    pub fn reset(&mut self) {
        self.target = 0.0;
        self.command = 0.0;
        self.decel = self.cfg.decel;
        self.cells.set(0.0, 0.0);
    }

    /// One drive period: ramp, attenuate for curves, split, publish.
    pub fn tick(&mut self, position: i32, position_limited: u32) {
        let center = curve_attenuated(self.target, self.cfg.curve_decel, position_limited);
        self.command = ramp(
            self.command,
            center,
            self.cfg.accel * self.dt,
            self.decel * self.dt,
        );
        let (l, r) = split(self.command, self.cfg.steer_gain, position);
        self.cells.set(l, r);
    }
}
