//! Conversions between `tracer_config` types and `tracer_core` types.

use crate::config::{DriveCfg, IrCalibration, MarkCfg, MotorCfg, SafetyCfg, SensingCfg};
use crate::drive::MarkRecord;
use crate::error::TracerError;
use crate::mark::Mark;
use tracer_config::{MarkEntry, MarkKind, PersistedCalibration};
use tracer_traits::IR_COUNT;

// ── SensingCfg ───────────────────────────────────────────────────────────────

impl From<&tracer_config::SensingCfg> for SensingCfg {
    fn from(c: &tracer_config::SensingCfg) -> Self {
        Self {
            tick_interval_us: c.tick_interval_us,
            window_half_width: c.window_half_width,
            rise_step: c.rise_step,
            fall_step: c.fall_step,
            adc_ref_v: c.adc_ref_v,
            supply_divider: c.supply_divider,
            ..Self::default()
        }
    }
}

// ── MarkCfg ──────────────────────────────────────────────────────────────────

impl From<&tracer_config::MarksCfg> for MarkCfg {
    fn from(c: &tracer_config::MarksCfg) -> Self {
        Self {
            length_m: c.length_m,
            line_half_width: c.line_half_width,
            cross_center_min: c.cross_center_min,
        }
    }
}

// ── MotorCfg ─────────────────────────────────────────────────────────────────

impl From<&tracer_config::MotorCfg> for MotorCfg {
    fn from(c: &tracer_config::MotorCfg) -> Self {
        Self {
            interval_us: c.interval_us,
            gain_p: c.gain_p,
            gain_d: c.gain_d,
            derivative: c.derivative,
            gain_i: c.gain_i,
            integral_limit: c.integral_limit,
            dead_zone: c.dead_zone,
            pwm_top: c.pwm_top,
            encoder_resolution: c.encoder_resolution,
            wheel_diameter_m: c.wheel_diameter_m,
            gear_ratio: c.gear_ratio,
            encoder_comp: c.encoder_comp,
            invert: c.invert,
            min_supply_v: c.min_supply_v,
        }
    }
}

// ── DriveCfg ─────────────────────────────────────────────────────────────────

impl From<&tracer_config::DriveCfg> for DriveCfg {
    fn from(c: &tracer_config::DriveCfg) -> Self {
        Self {
            interval_us: c.interval_us,
            explore_velocity: c.explore_velocity,
            base_velocity: c.base_velocity,
            peak_velocity: c.peak_velocity,
            accel: c.accel,
            decel: c.decel,
            fit_in_m: c.fit_in_m,
            curve_decel: c.curve_decel,
            steer_gain: c.steer_gain,
            safety_m: c.safety_m,
            feedback_ms: c.feedback_ms,
            settle_velocity: c.settle_velocity,
        }
    }
}

// ── SafetyCfg ────────────────────────────────────────────────────────────────

impl From<&tracer_config::Safety> for SafetyCfg {
    fn from(c: &tracer_config::Safety) -> Self {
        Self {
            max_run_ms: c.max_run_ms,
            line_out_ms: c.line_out_ms,
            settle_timeout_ms: c.settle_timeout_ms,
        }
    }
}

// ── Calibration ──────────────────────────────────────────────────────────────

impl TryFrom<&PersistedCalibration> for IrCalibration {
    type Error = TracerError;

    fn try_from(c: &PersistedCalibration) -> Result<Self, Self::Error> {
        let bias: [i32; IR_COUNT] = c.bias.as_slice().try_into().map_err(|_| {
            TracerError::Config(format!("calibration needs {IR_COUNT} bias entries"))
        })?;
        let range: [i32; IR_COUNT] = c.range.as_slice().try_into().map_err(|_| {
            TracerError::Config(format!("calibration needs {IR_COUNT} range entries"))
        })?;
        let cal = Self {
            bias,
            range,
            threshold: c.threshold,
        };
        cal.validate()?;
        Ok(cal)
    }
}

impl From<&IrCalibration> for PersistedCalibration {
    fn from(c: &IrCalibration) -> Self {
        Self {
            bias: c.bias.to_vec(),
            range: c.range.to_vec(),
            threshold: c.threshold,
        }
    }
}

// ── Marks ────────────────────────────────────────────────────────────────────

impl From<MarkKind> for Mark {
    fn from(k: MarkKind) -> Self {
        match k {
            MarkKind::Left => Self::Left,
            MarkKind::Right => Self::Right,
            MarkKind::Both => Self::Both,
            MarkKind::Cross => Self::Cross,
        }
    }
}

impl TryFrom<Mark> for MarkKind {
    type Error = TracerError;

    fn try_from(m: Mark) -> Result<Self, Self::Error> {
        match m {
            Mark::Left => Ok(Self::Left),
            Mark::Right => Ok(Self::Right),
            Mark::Both => Ok(Self::Both),
            Mark::Cross => Ok(Self::Cross),
            Mark::None => Err(TracerError::State("an empty mark is never logged".into())),
        }
    }
}

impl From<&MarkEntry> for MarkRecord {
    fn from(e: &MarkEntry) -> Self {
        Self {
            kind: e.kind.into(),
            tick: e.tick,
        }
    }
}

impl TryFrom<&MarkRecord> for MarkEntry {
    type Error = TracerError;

    fn try_from(r: &MarkRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            kind: r.kind.try_into()?,
            tick: r.tick,
        })
    }
}

/// Recorded log for a replay run.
pub fn records_from_entries(entries: &[MarkEntry]) -> Vec<MarkRecord> {
    entries.iter().map(MarkRecord::from).collect()
}

/// Log entries for persistence; `Mark::None` never reaches the log.
pub fn entries_from_records(records: &[MarkRecord]) -> Vec<MarkEntry> {
    records
        .iter()
        .filter_map(|r| MarkEntry::try_from(r).ok())
        .collect()
}
