#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schemas, persisted record layout and calibration parsing for the
//! line tracer.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//! - `PersistedRecord` is the on-disk layout of calibration and mark log.
//! - Calibration CSV loader enforces headers and one row per sensor.
use serde::{Deserialize, Serialize};

/// Sensors on the bar; persisted arrays must have exactly this many entries.
pub const SENSOR_COUNT: usize = 16;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SensingCfg {
    /// Mux step interval; a full sweep takes 8 ticks.
    pub tick_interval_us: u32,
    /// Fraction of full scale above which a sensor counts as "on the line".
    pub threshold: f32,
    /// Sensors on each side of the previous contact point used for position.
    pub window_half_width: usize,
    /// Per-sweep ramp of the rate-limited position while |position| grows.
    pub rise_step: u32,
    /// Per-sweep ramp of the rate-limited position while |position| shrinks.
    pub fall_step: u32,
    /// ADC reference voltage.
    pub adc_ref_v: f32,
    /// Battery divider ratio in front of the supply channel.
    pub supply_divider: f32,
}

impl Default for SensingCfg {
    fn default() -> Self {
        Self {
            tick_interval_us: 500,
            threshold: 0.5,
            window_half_width: 3,
            rise_step: 500,
            fall_step: 50,
            adc_ref_v: 3.3,
            supply_divider: 4.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MarksCfg {
    /// Physical length the gating wheel must travel before deciding (m).
    pub length_m: f32,
    /// Sensors on each side of the contact point that count as line, not mark.
    pub line_half_width: usize,
    /// Center sensors that must be lit at once to treat a frame as a cross.
    pub cross_center_min: u32,
}

impl Default for MarksCfg {
    fn default() -> Self {
        Self {
            length_m: 0.03,
            line_half_width: 3,
            cross_center_min: 6,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MotorCfg {
    pub interval_us: u32,
    pub gain_p: f32,
    pub gain_d: f32,
    /// Enable the derivative term (off on the reference build).
    pub derivative: bool,
    pub gain_i: f32,
    /// Anti-windup band for the integrator (tick·steps).
    pub integral_limit: f32,
    /// Minimum compare value added to every non-idle output.
    pub dead_zone: u16,
    pub pwm_top: u16,
    pub encoder_resolution: u32,
    pub wheel_diameter_m: f32,
    pub gear_ratio: f32,
    /// Encoder sign per wheel, `[left, right]`.
    pub encoder_comp: [i8; 2],
    /// Swap the direction pin per wheel, `[left, right]`.
    pub invert: [bool; 2],
    /// Output is forced off below this supply voltage.
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

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DriveCfg {
    pub interval_us: u32,
    /// Constant target velocity of the exploratory pass (m/s).
    pub explore_velocity: f32,
    /// Replay velocity outside straight windows (m/s).
    pub base_velocity: f32,
    /// Replay velocity inside straight windows (m/s).
    pub peak_velocity: f32,
    /// Command ramp while accelerating (m/s²).
    pub accel: f32,
    /// Command ramp while decelerating (m/s²); also sizes the reentry distance.
    pub decel: f32,
    /// Stopping distance after the second end marker (m).
    pub fit_in_m: f32,
    /// Center velocity is divided by `1 + curve_decel * position_limited`.
    pub curve_decel: f32,
    /// Steering split gain `k` in `v (1 ∓ k·pos)`.
    pub steer_gain: f32,
    /// Margin kept at both ends of a straight segment (m).
    pub safety_m: f32,
    /// Buzzer pulse length for logged marks.
    pub feedback_ms: u32,
    /// Commanded velocity considered "stopped" by a graceful stop (m/s).
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

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Safety {
    /// Abort a run after this many ms (0 disables).
    pub max_run_ms: u64,
    /// Line-out watchdog timeout.
    pub line_out_ms: u64,
    /// Upper bound for the graceful stop wait (0 waits unbounded).
    pub settle_timeout_ms: u64,
}

impl Default for Safety {
    fn default() -> Self {
        Self {
            max_run_ms: 60_000,
            line_out_ms: 100,
            settle_timeout_ms: 2_000,
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StoreCfg {
    /// TOML file holding calibration and the mark log.
    pub path: String,
}

impl Default for StoreCfg {
    fn default() -> Self {
        Self {
            path: "etc/tracer_store.toml".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Foreground loop services the scheduler itself.
    #[default]
    Cooperative,
    /// A background thread owns the scheduler.
    Threaded,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct RunnerCfg {
    pub mode: RunMode,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MarkKind {
    Left,
    Right,
    Both,
    Cross,
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct SimMark {
    pub kind: MarkKind,
    /// Distance from the start where the tape begins (m).
    pub at_m: f32,
}

/// Simulated course and plant used when no hardware backend is compiled in.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SimCfg {
    pub supply_v: f32,
    /// Steady-state wheel speed per applied volt (m/s/V).
    pub kv: f32,
    /// Wheel speed time constant (s).
    pub tau_s: f32,
    pub black: u16,
    pub white: u16,
    pub tape_length_m: f32,
    /// The line ends here (None: endless).
    pub line_length_m: Option<f32>,
    /// Run on wall-clock time instead of virtual time.
    pub realtime: bool,
    pub marks: Vec<SimMark>,
}

impl Default for SimCfg {
    fn default() -> Self {
        let at = |kind, at_m| SimMark { kind, at_m };
        Self {
            supply_v: 8.0,
            kv: 0.5,
            tau_s: 0.002,
            black: 400,
            white: 3600,
            tape_length_m: 0.02,
            line_length_m: None,
            realtime: false,
            marks: vec![
                at(MarkKind::Both, 0.3),
                at(MarkKind::Left, 0.7),
                at(MarkKind::Left, 1.9),
                at(MarkKind::Cross, 2.3),
                at(MarkKind::Right, 2.7),
                at(MarkKind::Both, 3.1),
            ],
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub sensing: SensingCfg,
    #[serde(default)]
    pub marks: MarksCfg,
    #[serde(default)]
    pub motor: MotorCfg,
    #[serde(default)]
    pub drive: DriveCfg,
    #[serde(default)]
    pub safety: Safety,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub store: StoreCfg,
    /// Runner/orchestration defaults
    #[serde(default)]
    pub runner: RunnerCfg,
    #[serde(default)]
    pub sim: SimCfg,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

// ── Persisted record ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct PersistedCalibration {
    pub bias: Vec<i32>,
    pub range: Vec<i32>,
    pub threshold: f32,
}

impl PersistedCalibration {
    pub fn validate(&self) -> eyre::Result<()> {
        if self.bias.len() != SENSOR_COUNT || self.range.len() != SENSOR_COUNT {
            eyre::bail!(
                "calibration must have {SENSOR_COUNT} bias and range entries, got {} and {}",
                self.bias.len(),
                self.range.len()
            );
        }
        if let Some(i) = self.range.iter().position(|r| *r <= 0) {
            eyre::bail!("calibration.range[{i}] must be > 0");
        }
        if !(self.threshold > 0.0 && self.threshold < 1.0) {
            eyre::bail!("calibration.threshold must be in (0.0, 1.0)");
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct MarkEntry {
    pub kind: MarkKind,
    pub tick: i32,
}

/// Everything that survives between runs.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct PersistedRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calibration: Option<PersistedCalibration>,
    #[serde(default)]
    pub marks: Vec<MarkEntry>,
}

pub fn load_record(s: &str) -> Result<PersistedRecord, toml::de::Error> {
    toml::from_str::<PersistedRecord>(s)
}

pub fn render_record(rec: &PersistedRecord) -> Result<String, toml::ser::Error> {
    toml::to_string(rec)
}

// ── Calibration CSV ─────────────────────────────────────────────────────────

/// Calibration CSV schema.
///
/// Expected headers:
/// sensor,bias,range
///
/// Example:
/// sensor,bias,range
/// 0,312,3405
/// 1,298,3377
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct CalibrationRow {
    pub sensor: usize,
    pub bias: i32,
    pub range: i32,
}

impl PersistedCalibration {
    /// Build per-sensor calibration from one row per sensor, in any order.
    pub fn from_rows(rows: &[CalibrationRow], threshold: f32) -> eyre::Result<Self> {
        if rows.len() != SENSOR_COUNT {
            eyre::bail!(
                "calibration requires {SENSOR_COUNT} rows, got {}",
                rows.len()
            );
        }
        let mut bias = vec![0; SENSOR_COUNT];
        let mut range = vec![0; SENSOR_COUNT];
        let mut seen = [false; SENSOR_COUNT];
        for row in rows {
            if row.sensor >= SENSOR_COUNT {
                eyre::bail!("calibration sensor index {} out of range", row.sensor);
            }
            if seen[row.sensor] {
                eyre::bail!("calibration sensor {} listed twice", row.sensor);
            }
            seen[row.sensor] = true;
            bias[row.sensor] = row.bias;
            range[row.sensor] = row.range;
        }
        let cal = Self {
            bias,
            range,
            threshold,
        };
        cal.validate()?;
        Ok(cal)
    }
}

pub fn load_calibration_csv(
    path: &std::path::Path,
    threshold: f32,
) -> eyre::Result<PersistedCalibration> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| eyre::eyre!("open calibration CSV {:?}: {}", path, e))?;

    let headers = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read CSV headers {:?}: {}", path, e))?
        .clone();
    let expected = ["sensor", "bias", "range"];
    let actual: Vec<String> = headers.iter().map(ToString::to_string).collect();
    if actual != expected {
        eyre::bail!(
            "calibration CSV must have headers 'sensor,bias,range', got: {}",
            actual.join(",")
        );
    }

    let mut rows = Vec::with_capacity(SENSOR_COUNT);
    for (idx, rec) in rdr.deserialize::<CalibrationRow>().enumerate() {
        match rec {
            Ok(row) => rows.push(row),
            Err(e) => {
                eyre::bail!("invalid CSV row {}: {}", idx + 2, e);
            }
        }
    }

    PersistedCalibration::from_rows(&rows, threshold)
}

// ── Validation ──────────────────────────────────────────────────────────────

fn positive(v: f32) -> bool {
    v.is_finite() && v > 0.0
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Sensing
        if self.sensing.tick_interval_us == 0 {
            eyre::bail!("sensing.tick_interval_us must be > 0");
        }
        if !(self.sensing.threshold > 0.0 && self.sensing.threshold < 1.0) {
            eyre::bail!("sensing.threshold must be in (0.0, 1.0)");
        }
        if self.sensing.window_half_width == 0 || self.sensing.window_half_width >= SENSOR_COUNT / 2
        {
            eyre::bail!("sensing.window_half_width must be in [1, {}]", SENSOR_COUNT / 2 - 1);
        }
        if self.sensing.rise_step == 0 || self.sensing.fall_step == 0 {
            eyre::bail!("sensing.rise_step and sensing.fall_step must be > 0");
        }
        if !positive(self.sensing.adc_ref_v) || !positive(self.sensing.supply_divider) {
            eyre::bail!("sensing.adc_ref_v and sensing.supply_divider must be > 0");
        }

        // Marks
        if !positive(self.marks.length_m) {
            eyre::bail!("marks.length_m must be > 0");
        }
        if self.marks.line_half_width >= SENSOR_COUNT / 2 {
            eyre::bail!("marks.line_half_width must be < {}", SENSOR_COUNT / 2);
        }
        let center = 2 * self.marks.line_half_width + 1;
        if self.marks.cross_center_min == 0 || self.marks.cross_center_min as usize > center {
            eyre::bail!("marks.cross_center_min must be in [1, {center}]");
        }

        // Motor
        if self.motor.interval_us == 0 {
            eyre::bail!("motor.interval_us must be > 0");
        }
        if !(self.motor.gain_p.is_finite() && self.motor.gain_p >= 0.0) {
            eyre::bail!("motor.gain_p must be >= 0");
        }
        if !(self.motor.gain_d.is_finite() && self.motor.gain_d >= 0.0) {
            eyre::bail!("motor.gain_d must be >= 0");
        }
        if !(self.motor.gain_i.is_finite() && self.motor.gain_i >= 0.0) {
            eyre::bail!("motor.gain_i must be >= 0");
        }
        if !positive(self.motor.integral_limit) {
            eyre::bail!("motor.integral_limit must be > 0");
        }
        if self.motor.pwm_top == 0 {
            eyre::bail!("motor.pwm_top must be > 0");
        }
        if self.motor.dead_zone >= self.motor.pwm_top {
            eyre::bail!("motor.dead_zone must be < motor.pwm_top");
        }
        if self.motor.encoder_resolution == 0 {
            eyre::bail!("motor.encoder_resolution must be > 0");
        }
        if !positive(self.motor.wheel_diameter_m) || !positive(self.motor.gear_ratio) {
            eyre::bail!("motor.wheel_diameter_m and motor.gear_ratio must be > 0");
        }
        if self.motor.encoder_comp.iter().any(|c| c.abs() != 1) {
            eyre::bail!("motor.encoder_comp entries must be 1 or -1");
        }
        if !(self.motor.min_supply_v.is_finite() && self.motor.min_supply_v >= 0.0) {
            eyre::bail!("motor.min_supply_v must be >= 0");
        }

        // Drive
        if self.drive.interval_us == 0 {
            eyre::bail!("drive.interval_us must be > 0");
        }
        for (name, v) in [
            ("explore_velocity", self.drive.explore_velocity),
            ("base_velocity", self.drive.base_velocity),
            ("peak_velocity", self.drive.peak_velocity),
            ("accel", self.drive.accel),
            ("decel", self.drive.decel),
            ("fit_in_m", self.drive.fit_in_m),
            ("settle_velocity", self.drive.settle_velocity),
        ] {
            if !positive(v) {
                eyre::bail!("drive.{name} must be > 0");
            }
        }
        if self.drive.peak_velocity < self.drive.base_velocity {
            eyre::bail!("drive.peak_velocity must be >= drive.base_velocity");
        }
        if !(self.drive.curve_decel.is_finite() && self.drive.curve_decel >= 0.0) {
            eyre::bail!("drive.curve_decel must be >= 0");
        }
        if !(self.drive.steer_gain.is_finite() && self.drive.steer_gain >= 0.0) {
            eyre::bail!("drive.steer_gain must be >= 0");
        }
        if !(self.drive.safety_m.is_finite() && self.drive.safety_m >= 0.0) {
            eyre::bail!("drive.safety_m must be >= 0");
        }

        // Safety
        if self.safety.line_out_ms == 0 {
            eyre::bail!("safety.line_out_ms must be >= 1");
        }
        if self.safety.max_run_ms > 60 * 60 * 1000 {
            eyre::bail!("safety.max_run_ms is unreasonably large (>1h)");
        }

        // Logging
        if let Some(rot) = self.logging.rotation.as_deref() {
            if !matches!(rot, "never" | "daily" | "hourly") {
                eyre::bail!("logging.rotation must be one of never|daily|hourly");
            }
        }

        // Store
        if self.store.path.trim().is_empty() {
            eyre::bail!("store.path must not be empty");
        }

        // Sim
        if !positive(self.sim.supply_v) || !positive(self.sim.kv) || !positive(self.sim.tau_s) {
            eyre::bail!("sim.supply_v, sim.kv and sim.tau_s must be > 0");
        }
        if self.sim.white <= self.sim.black {
            eyre::bail!("sim.white must be > sim.black");
        }
        if !positive(self.sim.tape_length_m) {
            eyre::bail!("sim.tape_length_m must be > 0");
        }
        if self.sim.marks.iter().any(|m| !(m.at_m.is_finite() && m.at_m >= 0.0)) {
            eyre::bail!("sim.marks[].at_m must be >= 0");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let cfg = load_toml("").unwrap();
        assert_eq!(cfg.motor.pwm_top, 6249);
        assert_eq!(cfg.runner.mode, RunMode::Cooperative);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn record_omits_missing_calibration() {
        let rec = PersistedRecord {
            calibration: None,
            marks: vec![MarkEntry {
                kind: MarkKind::Left,
                tick: 1000,
            }],
        };
        let text = render_record(&rec).unwrap();
        assert!(!text.contains("calibration"));
        assert_eq!(load_record(&text).unwrap(), rec);
    }
}
