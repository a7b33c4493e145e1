//! Configuration types for the drive-control core.
//!
//! These are the runtime structs consumed by the sensing, mark, motor and
//! drive modules. They are separate from the TOML-deserialized config in
//! `tracer_config`; see `conversions` for the mapping.

use crate::error::TracerError;
use tracer_traits::IR_COUNT;

/// Sensing pipeline configuration.
#[derive(Debug, Clone)]
pub struct SensingCfg {
    /// Scheduler interval of one mux step.
    pub tick_interval_us: u32,
    /// Sensors on each side of the previous contact point used for position.
    pub window_half_width: usize,
    /// Per-sweep ramp of `position_limited` while |position| grows.
    pub rise_step: u32,
    /// Per-sweep ramp of `position_limited` while |position| shrinks.
    pub fall_step: u32,
    pub adc_ref_v: f32,
    pub adc_max: u16,
    /// Battery divider ratio in front of the supply channel.
    pub supply_divider: f32,
}

impl Default for SensingCfg {
    fn default() -> Self {
        Self {
            tick_interval_us: 500,
            window_half_width: 3,
            rise_step: 500,
            fall_step: 50,
            adc_ref_v: 3.3,
            adc_max: 4095,
            supply_divider: 4.0,
        }
    }
}

/// Per-sensor calibration: `normalized = 255 * (raw - bias) / range`.
#[derive(Debug, Clone, PartialEq)]
pub struct IrCalibration {
    pub bias: [i32; IR_COUNT],
    pub range: [i32; IR_COUNT],
    /// Fraction of full scale above which a sensor is "on the line".
    pub threshold: f32,
}

impl Default for IrCalibration {
    fn default() -> Self {
        Self {
            bias: [0; IR_COUNT],
            range: [4095; IR_COUNT],
            threshold: 0.5,
        }
    }
}

impl IrCalibration {
    pub fn validate(&self) -> Result<(), TracerError> {
        if let Some(i) = self.range.iter().position(|r| *r <= 0) {
            return Err(TracerError::Config(format!(
                "calibration range[{i}] must be > 0, got {}",
                self.range[i]
            )));
        }
        validate_threshold(self.threshold)
    }
}

pub(crate) fn validate_threshold(t: f32) -> Result<(), TracerError> {
    if t > 0.0 && t < 1.0 {
        Ok(())
    } else {
        Err(TracerError::Config(format!(
            "threshold must be in (0.0, 1.0), got {t}"
        )))
    }
}

/// Mark detector configuration.
#[derive(Debug, Clone)]
pub struct MarkCfg {
    /// Distance the gating wheel travels before a mark is decided (m).
    pub length_m: f32,
    /// Sensors on each side of the contact point that belong to the line.
    pub line_half_width: usize,
    /// Lit center sensors that start an accumulation on their own.
    pub cross_center_min: u32,
}

impl Default for MarkCfg {
    fn default() -> Self {
        Self {
            length_m: 0.03,
            line_half_width: 3,
            cross_center_min: 6,
        }
    }
}

/// Motor controller configuration.
#[derive(Debug, Clone)]
pub struct MotorCfg {
    pub interval_us: u32,
    pub gain_p: f32,
    pub gain_d: f32,
    /// The derivative term only contributes when enabled.
    pub derivative: bool,
    /// Integral gain; 0.0 disables the integrator.
    pub gain_i: f32,
    /// Anti-windup clamp of the error sum.
    pub integral_limit: f32,
    pub dead_zone: u16,
    pub pwm_top: u16,
    pub encoder_resolution: u32,
    pub wheel_diameter_m: f32,
    pub gear_ratio: f32,
    /// Encoder sign per wheel so that forward travel counts up.
    pub encoder_comp: [i8; 2],
    /// Direction pin sense per wheel.
    pub invert: [bool; 2],
    pub min_supply_v: f32,
}

impl Default for MotorCfg {
    fn default() -> Self {
        Self {
            interval_us: 500,
            gain_p: 0.04,
            gain_d: 0.02,
            derivative: false,
            gain_i: 0.0,
            integral_limit: 5000.0,
            dead_zone: 0,
            pwm_top: 6249,
            encoder_resolution: 2048,
            wheel_diameter_m: 0.038,
            gear_ratio: 17.0 / 69.0,
            encoder_comp: [1, 1],
            invert: [false, false],
            min_supply_v: 1.0,
        }
    }
}

impl MotorCfg {
    pub fn ticks_per_meter(&self) -> f32 {
        crate::util::ticks_per_meter(
            self.encoder_resolution,
            self.wheel_diameter_m,
            self.gear_ratio,
        )
    }
}

/// Drive orchestrator configuration. Velocities in m/s, accelerations in m/s².
#[derive(Debug, Clone)]
pub struct DriveCfg {
    pub interval_us: u32,
    pub explore_velocity: f32,
    pub base_velocity: f32,
    pub peak_velocity: f32,
    pub accel: f32,
    pub decel: f32,
    pub fit_in_m: f32,
    pub curve_decel: f32,
    pub steer_gain: f32,
    pub safety_m: f32,
    pub feedback_ms: u32,
    pub settle_velocity: f32,
}

impl Default for DriveCfg {
    fn default() -> Self {
        Self {
            interval_us: 500,
            explore_velocity: 1.0,
            base_velocity: 1.0,
            peak_velocity: 2.0,
            accel: 6.0,
            decel: 4.0,
            fit_in_m: 0.25,
            curve_decel: 0.000_05,
            steer_gain: 0.000_02,
            safety_m: 0.05,
            feedback_ms: 50,
            settle_velocity: 0.1,
        }
    }
}

/// Safety configuration.
#[derive(Debug, Clone, Copy)]
pub struct SafetyCfg {
    /// Abort after this long (0 disables).
    pub max_run_ms: u64,
    /// Line-out watchdog timeout.
    pub line_out_ms: u64,
    /// Graceful stop wait bound (0 waits unbounded).
    pub settle_timeout_ms: u64,
}

impl Default for SafetyCfg {
    fn default() -> Self {
        Self {
            max_run_ms: 60_000,
            line_out_ms: 100,
            settle_timeout_ms: 2_000,
        }
    }
}
