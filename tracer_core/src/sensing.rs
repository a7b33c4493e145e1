//! Multiplexed reflectance sensing.
//!
//! Sixteen sensors sit behind an 8-step analog multiplexer with two converter
//! channels, so each tick refreshes two sensors and a full sweep takes eight
//! ticks. Every reading is the median of three conversions. At the end of a
//! sweep the pipeline derives:
//!
//! - the state bitmap (`normalized > threshold * 255`),
//! - the line position, a weighted mean over a window of sensors centered on
//!   the previous estimate, so edge sensors lit by a mark do not pull it,
//! - `position_limited`, |position| ramped up quickly and down slowly.
//!
//! Bit `k` of every bitmap is sensor `k`, bit 0 being the rightmost sensor.
//! Positive positions mean the line is left of center.
use crate::config::{IrCalibration, SensingCfg, validate_threshold};
use crate::error::TracerError;
use crate::hw_error::hw;
use crate::util::median3;
use tracer_traits::{AdcInput, AnalogFrontEnd, IR_COUNT, MUX_STEPS, ir_bit};

pub use tracer_traits::{SENSOR_PITCH, sensor_weight};

/// One bit per sensor.
pub type IrState = u16;

/// Every sensor set.
pub const ALL_SENSORS: IrState = ((1_u32 << IR_COUNT) - 1) as IrState;

pub const FULL_SCALE: i32 = 255;

/// Sensor closest to `position`, clamped to the bar.
#[inline]
pub fn nearest_sensor(position: i32) -> usize {
    let span = IR_COUNT as i64 * i64::from(SENSOR_PITCH) / 2;
    let idx = (i64::from(position) + span).div_euclid(i64::from(SENSOR_PITCH));
    idx.clamp(0, IR_COUNT as i64 - 1) as usize
}

/// `clamp(255 * (raw - bias) / range, 0, 255)`. A non-positive range is a
/// calibration defect and is rejected instead of divided by.
pub fn normalize(raw: i32, bias: i32, range: i32) -> Result<u8, TracerError> {
    if range <= 0 {
        return Err(TracerError::Config(format!(
            "calibration range must be > 0, got {range}"
        )));
    }
    let scaled = (i64::from(raw) - i64::from(bias)) * i64::from(FULL_SCALE) / i64::from(range);
    Ok(scaled.clamp(0, i64::from(FULL_SCALE)) as u8)
}

/// Weighted mean position over sensors `center - half ..= center + half`.
/// `None` when every sensor in the window reads zero.
pub fn windowed_position(normalized: &[u8; IR_COUNT], center: usize, half: usize) -> Option<i32> {
    let lo = center.saturating_sub(half);
    let hi = (center + half).min(IR_COUNT - 1);
    let (mut sum, mut acc) = (0_i64, 0_i64);
    for (bit, n) in normalized.iter().enumerate().take(hi + 1).skip(lo) {
        let n = i64::from(*n);
        sum += n;
        acc += n * i64::from(sensor_weight(bit));
    }
    if sum == 0 {
        None
    } else {
        Some((acc / sum) as i32)
    }
}

/// Latest complete view of the sensor bar.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SensorFrame {
    pub raw: [u16; IR_COUNT],
    pub normalized: [u8; IR_COUNT],
    pub state: IrState,
    pub position: i32,
    pub position_limited: u32,
    pub supply_v: f32,
    pub sweeps: u64,
}

pub struct SensorBank<A> {
    afe: A,
    cfg: SensingCfg,
    cal: IrCalibration,
    step: u8,
    frame: SensorFrame,
}

impl<A: AnalogFrontEnd> SensorBank<A> {
    pub fn new(afe: A, cfg: SensingCfg, cal: IrCalibration) -> Result<Self, TracerError> {
        cal.validate()?;
        Ok(Self {
            afe,
            cfg,
            cal,
            step: 0,
            frame: SensorFrame::default(),
        })
    }

    /// One mux step: two sensors (and the supply on step 0).
    pub fn tick(&mut self) -> Result<(), TracerError> {
        let step = self.step;
        self.afe.select_mux(step).map_err(hw)?;
        self.afe.set_emitters(true).map_err(hw)?;
        let low = self.read_median(AdcInput::IrLow);
        let high = self.read_median(AdcInput::IrHigh);
        self.afe.set_emitters(false).map_err(hw)?;

        for (input, raw) in [(AdcInput::IrLow, low?), (AdcInput::IrHigh, high?)] {
            if let Some(bit) = ir_bit(step, input) {
                self.store(bit, raw)?;
            }
        }
        if step == 0 {
            let raw = self.read_median(AdcInput::Supply)?;
            let cfg = &self.cfg;
            self.frame.supply_v =
                f32::from(raw) / f32::from(cfg.adc_max.max(1)) * cfg.adc_ref_v * cfg.supply_divider;
        }

        self.step = (step + 1) % MUX_STEPS;
        if self.step == 0 {
            self.finish_sweep();
        }
        Ok(())
    }

    fn read_median(&mut self, input: AdcInput) -> Result<u16, TracerError> {
        let a = self.afe.convert(input).map_err(hw)?;
        let b = self.afe.convert(input).map_err(hw)?;
        let c = self.afe.convert(input).map_err(hw)?;
        Ok(median3(a, b, c))
    }

    fn store(&mut self, bit: usize, raw: u16) -> Result<(), TracerError> {
        self.frame.raw[bit] = raw;
        let range = self.cal.range[bit];
        let n = normalize(i32::from(raw), self.cal.bias[bit], range).inspect_err(|_| {
            tracing::error!(sensor = bit, range, "calibration range rejected");
        })?;
        self.frame.normalized[bit] = n;
        Ok(())
    }

    fn finish_sweep(&mut self) {
        let level = self.cal.threshold * FULL_SCALE as f32;
        let f = &mut self.frame;
        f.state = f
            .normalized
            .iter()
            .enumerate()
            .filter(|(_, n)| f32::from(**n) > level)
            .fold(0, |acc, (bit, _)| acc | (1 << bit));

        let center = nearest_sensor(f.position);
        if let Some(p) = windowed_position(&f.normalized, center, self.cfg.window_half_width) {
            f.position = p;
        }

        let target = f.position.unsigned_abs();
        let cur = f.position_limited;
        f.position_limited = if target > cur {
            cur + (target - cur).min(self.cfg.rise_step)
        } else {
            cur - (cur - target).min(self.cfg.fall_step)
        };
        f.sweeps += 1;
        tracing::trace!(
            state = format_args!("{:#06x}", f.state),
            position = f.position,
            limited = f.position_limited,
            "sweep"
        );
    }

    pub fn state(&self) -> IrState {
        self.frame.state
    }

    pub fn position(&self) -> i32 {
        self.frame.position
    }

    pub fn position_limited(&self) -> u32 {
        self.frame.position_limited
    }

    pub fn normalized(&self, i: usize) -> Option<u8> {
        self.frame.normalized.get(i).copied()
    }

    pub fn raw(&self) -> &[u16; IR_COUNT] {
        &self.frame.raw
    }

    pub fn supply_voltage(&self) -> f32 {
        self.frame.supply_v
    }

    /// Completed sweeps since creation.
    pub fn sweeps(&self) -> u64 {
        self.frame.sweeps
    }

    pub fn frame(&self) -> &SensorFrame {
        &self.frame
    }

    pub fn calibration(&self) -> &IrCalibration {
        &self.cal
    }

    pub fn set_calibration(&mut self, cal: IrCalibration) -> Result<(), TracerError> {
        cal.validate()?;
        self.cal = cal;
        Ok(())
    }

    pub fn set_bias(&mut self, bias: [i32; IR_COUNT]) {
        self.cal.bias = bias;
    }

    pub fn set_range(&mut self, range: [i32; IR_COUNT]) -> Result<(), TracerError> {
        let cal = IrCalibration {
            range,
            ..self.cal.clone()
        };
        cal.validate()?;
        self.cal = cal;
        Ok(())
    }

    pub fn set_threshold(&mut self, threshold: f32) -> Result<(), TracerError> {
        validate_threshold(threshold)?;
        self.cal.threshold = threshold;
        Ok(())
    }
}

/// Collects per-sensor extremes while the bar is swept over line and floor.
#[derive(Debug, Clone)]
pub struct CalibrationTracker {
    min: [u16; IR_COUNT],
    max: [u16; IR_COUNT],
    samples: u32,
}

impl Default for CalibrationTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl CalibrationTracker {
    pub fn new() -> Self {
        Self {
            min: [u16::MAX; IR_COUNT],
            max: [0; IR_COUNT],
            samples: 0,
        }
    }

    pub fn observe(&mut self, raw: &[u16; IR_COUNT]) {
        for (i, r) in raw.iter().enumerate() {
            self.min[i] = self.min[i].min(*r);
            self.max[i] = self.max[i].max(*r);
        }
        self.samples += 1;
    }

    pub fn samples(&self) -> u32 {
        self.samples
    }

    /// `bias = min`, `range = max - min` (at least 1).
    pub fn finish(&self, threshold: f32) -> Result<IrCalibration, TracerError> {
        if self.samples == 0 {
            return Err(TracerError::State("no calibration sweeps observed".into()));
        }
        let mut cal = IrCalibration {
            threshold,
            ..IrCalibration::default()
        };
        for i in 0..IR_COUNT {
            cal.bias[i] = i32::from(self.min[i]);
            cal.range[i] = (i32::from(self.max[i]) - i32::from(self.min[i])).max(1);
        }
        cal.validate()?;
        Ok(cal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Every sensor reads mid scale.
    struct Flat;

    impl AnalogFrontEnd for Flat {
        fn select_mux(&mut self, _: u8) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            Ok(())
        }
        fn set_emitters(&mut self, _: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            Ok(())
        }
        fn convert(&mut self, _: AdcInput) -> Result<u16, Box<dyn std::error::Error + Send + Sync>> {
            Ok(2000)
        }
    }

    #[test]
    fn zero_range_fails_the_tick_instead_of_reading_dark() {
        let mut bank = SensorBank::new(Flat, SensingCfg::default(), IrCalibration::default()).unwrap();
        bank.tick().unwrap();
        assert!(bank.normalized(0).unwrap() > 0);
        // Step 1 refreshes sensors 1 and 9.
        bank.cal.range[9] = 0;
        let err = bank.tick().unwrap_err();
        assert!(matches!(err, TracerError::Config(ref m) if m.contains("range")));
        assert_eq!(bank.sweeps(), 0);
    }

    #[test]
    fn weights_span_the_bar_symmetrically() {
        assert_eq!(sensor_weight(0), -15_000);
        assert_eq!(sensor_weight(IR_COUNT - 1), 15_000);
        assert_eq!(sensor_weight(7) + sensor_weight(8), 0);
    }

    #[test]
    fn nearest_sensor_clamps_to_the_bar() {
        assert_eq!(nearest_sensor(0), 8);
        assert_eq!(nearest_sensor(-1_000), 7);
        assert_eq!(nearest_sensor(15_000), 15);
        assert_eq!(nearest_sensor(i32::MAX), 15);
        assert_eq!(nearest_sensor(i32::MIN), 0);
    }

    #[test]
    fn normalize_guards_zero_range() {
        assert!(normalize(100, 0, 0).is_err());
        assert!(normalize(100, 0, -5).is_err());
        assert_eq!(normalize(4095, 0, 4095).unwrap(), 255);
        assert_eq!(normalize(-10, 0, 4095).unwrap(), 0);
        assert_eq!(normalize(5000, 0, 4095).unwrap(), 255);
    }

    #[test]
    fn empty_window_reports_no_update() {
        let n = [0; IR_COUNT];
        assert_eq!(windowed_position(&n, 8, 3), None);
    }

    #[test]
    fn tracker_floors_range_at_one() {
        let mut t = CalibrationTracker::new();
        t.observe(&[500; IR_COUNT]);
        let cal = t.finish(0.5).unwrap();
        assert_eq!(cal.bias, [500; IR_COUNT]);
        assert_eq!(cal.range, [1; IR_COUNT]);
        assert!(CalibrationTracker::new().finish(0.5).is_err());
    }
}
