use crate::error::HwError;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tracer_traits::{
    AdcInput, AnalogFrontEnd, Clock, HBridge, MUX_STEPS, QuadratureEncoder, Wheel, ir_bit,
    sensor_weight,
};

/// Distance from the line center at which a sensor stops seeing it.
const LINE_FALLOFF: f64 = 3000.0;
/// Lateral span of a side tape, measured outward from the line center.
const TAPE_SPAN: std::ops::RangeInclusive<i32> = 8000..=14000;
/// Length over which a bend eases in and out of its offset.
const BEND_EASE_M: f64 = 0.1;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapeKind {
    Left,
    Right,
    Both,
    Cross,
}

#[derive(Debug, Clone, Copy)]
struct Tape {
    kind: TapeKind,
    at_m: f64,
}

#[derive(Debug, Clone, Copy)]
struct Bend {
    from_m: f64,
    to_m: f64,
    offset: i32,
}

/// One-dimensional course: tapes and lateral line offsets keyed by distance
/// traveled from the start.
#[derive(Debug, Clone)]
pub struct SimTrack {
    tapes: Vec<Tape>,
    bends: Vec<Bend>,
    tape_length_m: f64,
    line_length_m: Option<f64>,
}

impl Default for SimTrack {
    fn default() -> Self {
        Self::new(0.02)
    }
}

impl SimTrack {
    pub fn new(tape_length_m: f64) -> Self {
        Self {
            tapes: Vec::new(),
            bends: Vec::new(),
            tape_length_m,
            line_length_m: None,
        }
    }

    #[must_use]
    pub fn with_tape(mut self, kind: TapeKind, at_m: f64) -> Self {
        self.tapes.push(Tape { kind, at_m });
        self
    }

    /// Shift the line by `offset` position units (positive: towards the left
    /// edge of the bar) between `from_m` and `to_m`. The shift eases in and
    /// out linearly over the first and last `BEND_EASE_M`. Tapes inside a
    /// bend follow the line.
    #[must_use]
    pub fn with_bend(mut self, from_m: f64, to_m: f64, offset: i32) -> Self {
        self.bends.push(Bend {
            from_m,
            to_m,
            offset,
        });
        self
    }

    /// The line stops at `len_m`; past it the bar sees only floor.
    #[must_use]
    pub fn ending_at(mut self, len_m: f64) -> Self {
        self.line_length_m = Some(len_m);
        self
    }

    fn line_present(&self, d: f64) -> bool {
        self.line_length_m.is_none_or(|len| d < len)
    }

    fn offset_at(&self, d: f64) -> i32 {
        self.bends
            .iter()
            .find(|b| d >= b.from_m && d < b.to_m)
            .map_or(0, |b| {
                let ease = ((d - b.from_m).min(b.to_m - d) / BEND_EASE_M).min(1.0);
                (f64::from(b.offset) * ease).round() as i32
            })
    }

    fn tape_at(&self, d: f64) -> Option<TapeKind> {
        self.tapes
            .iter()
            .find(|t| d >= t.at_m && d < t.at_m + self.tape_length_m)
            .map(|t| t.kind)
    }
}

/// Electrical and mechanical constants of the simulated robot.
#[derive(Debug, Clone)]
pub struct SimParams {
    pub supply_v: f64,
    /// Steady-state wheel speed per applied volt (m/s/V).
    pub kv: f64,
    /// Wheel speed time constant (s).
    pub tau_s: f64,
    pub ticks_per_meter: f64,
    pub pwm_top: u16,
    pub black: u16,
    pub white: u16,
    /// Reading with emitters off.
    pub ambient: u16,
    pub adc_max: u16,
    pub adc_ref_v: f64,
    pub supply_divider: f64,
    /// Encoder sign per wheel.
    pub encoder_sign: [i8; 2],
    /// Direction pin sense per wheel.
    pub invert: [bool; 2],
}

impl Default for SimParams {
    fn default() -> Self {
        Self {
            supply_v: 8.0,
            kv: 0.5,
            tau_s: 0.002,
            ticks_per_meter: 69_630.0,
            pwm_top: 6249,
            black: 400,
            white: 3600,
            ambient: 50,
            adc_max: 4095,
            adc_ref_v: 3.3,
            supply_divider: 4.0,
            encoder_sign: [1, 1],
            invert: [false, false],
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct WheelPlant {
    pos_m: f64,
    vel: f64,
    enabled: bool,
    forward: bool,
    level: u16,
}

#[derive(Debug)]
struct World {
    track: SimTrack,
    params: SimParams,
    wheels: [WheelPlant; 2],
    last: Instant,
    mux_step: u8,
    emitters: bool,
    lateral_override: Option<i32>,
    adc_fault: bool,
    conversions: u64,
}

impl World {
    /// Integrate wheel dynamics up to `now` with the outputs held since the
    /// last access (exact solution of the first-order lag).
    fn advance(&mut self, now: Instant) {
        let dt = now.saturating_duration_since(self.last).as_secs_f64();
        self.last = self.last.max(now);
        if dt <= 0.0 {
            return;
        }
        let p = &self.params;
        let decay = (-dt / p.tau_s).exp();
        for (i, w) in self.wheels.iter_mut().enumerate() {
            let target = if w.enabled {
                let duty = f64::from(w.level.min(p.pwm_top)) / f64::from(p.pwm_top);
                let sign = if w.forward != p.invert[i] { 1.0 } else { -1.0 };
                sign * duty * p.supply_v * p.kv
            } else {
                0.0
            };
            let gap = w.vel - target;
            w.pos_m += target * dt + gap * p.tau_s * (1.0 - decay);
            w.vel = target + gap * decay;
        }
    }

    fn distance_m(&self) -> f64 {
        (self.wheels[0].pos_m + self.wheels[1].pos_m) / 2.0
    }

    fn ir_reading(&self, bit: usize) -> u16 {
        if !self.emitters {
            return self.params.ambient;
        }
        let d = self.distance_m();
        let track = &self.track;
        let offset = self.lateral_override.unwrap_or_else(|| track.offset_at(d));
        let rel = sensor_weight(bit) - offset;
        let mut intensity = 0.0_f64;
        if track.line_present(d) {
            intensity = (1.0 - f64::from(rel.abs()) / LINE_FALLOFF).max(0.0);
        }
        let left = TAPE_SPAN.contains(&rel);
        let right = TAPE_SPAN.contains(&-rel);
        let taped = match track.tape_at(d) {
            Some(TapeKind::Cross) => true,
            Some(TapeKind::Both) => left || right,
            Some(TapeKind::Left) => left,
            Some(TapeKind::Right) => right,
            None => false,
        };
        if taped {
            intensity = 1.0;
        }
        let span = f64::from(self.params.white - self.params.black);
        (f64::from(self.params.black) + intensity * span).round() as u16
    }

    fn supply_reading(&self) -> u16 {
        let p = &self.params;
        let v = p.supply_v / p.supply_divider / p.adc_ref_v * f64::from(p.adc_max);
        v.round().clamp(0.0, f64::from(p.adc_max)) as u16
    }
}

fn lock(world: &Mutex<World>) -> Result<MutexGuard<'_, World>, HwError> {
    world.lock().map_err(|_| HwError::Disconnected)
}

/// Simulated robot; hands out the analog front end, encoders and bridges as
/// independent handles sharing one plant.
#[derive(Clone)]
pub struct SimBoard {
    world: Arc<Mutex<World>>,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl SimBoard {
    pub fn new(track: SimTrack, params: SimParams, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        let world = World {
            track,
            params,
            wheels: [WheelPlant::default(); 2],
            last: clock.now(),
            mux_step: 0,
            emitters: false,
            lateral_override: None,
            adc_fault: false,
            conversions: 0,
        };
        Self {
            world: Arc::new(Mutex::new(world)),
            clock,
        }
    }

    pub fn analog(&self) -> SimAnalog {
        SimAnalog {
            world: self.world.clone(),
            clock: self.clock.clone(),
        }
    }

    pub fn encoder(&self, wheel: Wheel) -> SimEncoder {
        SimEncoder {
            world: self.world.clone(),
            clock: self.clock.clone(),
            wheel,
        }
    }

    pub fn bridge(&self, wheel: Wheel) -> SimBridge {
        SimBridge {
            world: self.world.clone(),
            clock: self.clock.clone(),
            wheel,
        }
    }

    fn with_world<R>(&self, f: impl FnOnce(&mut World) -> R) -> Result<R, HwError> {
        let mut w = lock(&self.world)?;
        w.advance(self.clock.now());
        Ok(f(&mut w))
    }

    /// Mean wheel travel from the start (m).
    pub fn distance_m(&self) -> f64 {
        self.with_world(|w| w.distance_m()).unwrap_or(0.0)
    }

    pub fn wheel_velocity(&self, wheel: Wheel) -> f64 {
        self.with_world(|w| w.wheels[wheel.index()].vel)
            .unwrap_or(0.0)
    }

    pub fn bridge_enabled(&self, wheel: Wheel) -> bool {
        self.with_world(|w| w.wheels[wheel.index()].enabled)
            .unwrap_or(false)
    }

    /// Pin the line at a fixed lateral offset regardless of distance (used
    /// while sweeping the bar over the line for calibration).
    pub fn set_lateral_override(&self, offset: Option<i32>) {
        let _ = self.with_world(|w| w.lateral_override = offset);
    }

    /// Make every subsequent conversion fail.
    pub fn set_adc_fault(&self, on: bool) {
        let _ = self.with_world(|w| w.adc_fault = on);
    }

    pub fn conversions(&self) -> u64 {
        self.with_world(|w| w.conversions).unwrap_or(0)
    }
}

pub struct SimAnalog {
    world: Arc<Mutex<World>>,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl AnalogFrontEnd for SimAnalog {
    fn select_mux(&mut self, step: u8) -> Result<(), BoxError> {
        if step >= MUX_STEPS {
            return Err(Box::new(HwError::MuxStep(step)));
        }
        lock(&self.world)?.mux_step = step;
        Ok(())
    }

    fn set_emitters(&mut self, on: bool) -> Result<(), BoxError> {
        lock(&self.world)?.emitters = on;
        Ok(())
    }

    fn convert(&mut self, input: AdcInput) -> Result<u16, BoxError> {
        // The whole select + convert happens under one lock.
        let mut w = lock(&self.world)?;
        w.advance(self.clock.now());
        if w.adc_fault {
            return Err(Box::new(HwError::Adc("conversion failed".into())));
        }
        w.conversions += 1;
        let value = match ir_bit(w.mux_step, input) {
            Some(bit) => w.ir_reading(bit),
            None => w.supply_reading(),
        };
        Ok(value)
    }
}

pub struct SimEncoder {
    world: Arc<Mutex<World>>,
    clock: Arc<dyn Clock + Send + Sync>,
    wheel: Wheel,
}

impl QuadratureEncoder for SimEncoder {
    fn count(&mut self) -> Result<i32, BoxError> {
        let mut w = lock(&self.world)?;
        w.advance(self.clock.now());
        let i = self.wheel.index();
        let ticks = (w.wheels[i].pos_m * w.params.ticks_per_meter).round();
        let ticks = ticks.clamp(f64::from(i32::MIN), f64::from(i32::MAX)) as i32;
        Ok(ticks.wrapping_mul(i32::from(w.params.encoder_sign[i])))
    }
}

pub struct SimBridge {
    world: Arc<Mutex<World>>,
    clock: Arc<dyn Clock + Send + Sync>,
    wheel: Wheel,
}

impl HBridge for SimBridge {
    fn set_enabled(&mut self, on: bool) -> Result<(), BoxError> {
        let mut w = lock(&self.world)?;
        w.advance(self.clock.now());
        let wheel = &mut w.wheels[self.wheel.index()];
        wheel.enabled = on;
        if !on {
            wheel.level = 0;
        }
        tracing::trace!(wheel = ?self.wheel, on, "sim bridge enable");
        Ok(())
    }

    fn drive(&mut self, forward: bool, level: u16) -> Result<(), BoxError> {
        let mut w = lock(&self.world)?;
        w.advance(self.clock.now());
        let wheel = &mut w.wheels[self.wheel.index()];
        wheel.forward = forward;
        wheel.level = level;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tracer_traits::{IR_COUNT, ManualClock};

    fn board(track: SimTrack) -> (SimBoard, ManualClock) {
        let clock = ManualClock::new();
        let b = SimBoard::new(track, SimParams::default(), Arc::new(clock.clone()));
        (b, clock)
    }

    fn read_all(a: &mut SimAnalog) -> [u16; IR_COUNT] {
        let mut out = [0; IR_COUNT];
        a.set_emitters(true).unwrap();
        for step in 0..MUX_STEPS {
            a.select_mux(step).unwrap();
            for input in [AdcInput::IrLow, AdcInput::IrHigh] {
                out[ir_bit(step, input).unwrap()] = a.convert(input).unwrap();
            }
        }
        out
    }

    #[test]
    fn centered_line_lights_the_two_middle_sensors() {
        let (b, _) = board(SimTrack::default());
        let raw = read_all(&mut b.analog());
        assert!(raw[7] > 2000 && raw[8] > 2000);
        assert_eq!(raw[7], raw[8]);
        assert_eq!(raw[0], 400);
        assert_eq!(raw[15], 400);
    }

    #[test]
    fn left_tape_lights_high_bits() {
        let (b, _) = board(SimTrack::default().with_tape(TapeKind::Left, 0.0));
        let raw = read_all(&mut b.analog());
        assert_eq!(raw[12], 3600);
        assert_eq!(raw[14], 3600);
        assert_eq!(raw[11], 400);
        assert_eq!(raw[15], 400);
        assert_eq!(raw[0], 400);
    }

    #[test]
    fn tapes_follow_a_shifted_line() {
        let (b, _) = board(SimTrack::default().with_tape(TapeKind::Both, 0.0));
        b.set_lateral_override(Some(6_000));
        let raw = read_all(&mut b.analog());
        assert!(raw[10] > 2000 && raw[11] > 2000);
        assert_eq!(raw[15], 3600);
        for bit in 4..=6 {
            assert_eq!(raw[bit], 3600, "right tape misses sensor {bit}");
        }
        assert_eq!(raw[3], 400);
        assert_eq!(raw[13], 400);
    }

    #[test]
    fn bends_ease_in_and_out() {
        let track = SimTrack::default().with_bend(1.0, 2.0, 6_000);
        assert_eq!(track.offset_at(0.99), 0);
        assert_eq!(track.offset_at(1.05), 3_000);
        assert_eq!(track.offset_at(1.5), 6_000);
        assert_eq!(track.offset_at(1.95), 3_000);
        assert_eq!(track.offset_at(2.0), 0);
    }

    #[test]
    fn emitters_off_reads_ambient() {
        let (b, _) = board(SimTrack::default());
        let mut a = b.analog();
        a.select_mux(3).unwrap();
        assert_eq!(a.convert(AdcInput::IrLow).unwrap(), 50);
    }

    #[test]
    fn full_duty_approaches_supply_times_kv() {
        let (b, clock) = board(SimTrack::default());
        let mut left = b.bridge(Wheel::Left);
        left.set_enabled(true).unwrap();
        left.drive(true, 6249).unwrap();
        clock.advance(Duration::from_millis(50));
        assert!((b.wheel_velocity(Wheel::Left) - 4.0).abs() < 1e-3);
        assert!(b.wheel_velocity(Wheel::Right).abs() < f64::EPSILON);
        let ticks = b.encoder(Wheel::Left).count().unwrap();
        assert!(ticks > 0);
    }

    #[test]
    fn supply_channel_reflects_divider() {
        let (b, _) = board(SimTrack::default());
        let raw = b.analog().convert(AdcInput::Supply).unwrap();
        let volts = f64::from(raw) / 4095.0 * 3.3 * 4.0;
        assert!((volts - 8.0).abs() < 0.01);
    }

    #[test]
    fn injected_fault_surfaces_as_hw_error() {
        let (b, _) = board(SimTrack::default());
        b.set_adc_fault(true);
        let err = b.analog().convert(AdcInput::IrLow).unwrap_err();
        assert!(err.downcast_ref::<HwError>().is_some());
    }
}
