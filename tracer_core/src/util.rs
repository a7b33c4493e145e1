//! Common time, distance and filtering helpers for tracer_core.

/// Number of microseconds in one second.
pub const MICROS_PER_SEC: u64 = 1_000_000;
/// Number of microseconds in one millisecond.
pub const MICROS_PER_MILLI: u64 = 1_000;

/// Interval length in seconds.
#[inline]
pub fn interval_s(interval_us: u32) -> f32 {
    interval_us as f32 / MICROS_PER_SEC as f32
}

/// Encoder ticks per meter of wheel travel for a motor-side encoder.
#[inline]
pub fn ticks_per_meter(resolution: u32, wheel_diameter_m: f32, gear_ratio: f32) -> f32 {
    resolution as f32 / (wheel_diameter_m * std::f32::consts::PI) / gear_ratio
}

/// Round a distance to whole ticks, saturating at the i32 range.
#[inline]
pub fn meters_to_ticks(m: f32, ticks_per_meter: f32) -> i32 {
    let t = (m * ticks_per_meter).round();
    if !t.is_finite() {
        return 0;
    }
    t.clamp(i32::MIN as f32, i32::MAX as f32) as i32
}

#[inline]
pub fn ticks_to_meters(ticks: i32, ticks_per_meter: f32) -> f32 {
    ticks as f32 / ticks_per_meter
}

/// Median of three samples.
#[inline]
pub fn median3(a: u16, b: u16, c: u16) -> u16 {
    a.max(b).min(a.min(b).max(c))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_rejects_single_spike() {
        assert_eq!(median3(100, 4095, 102), 102);
        assert_eq!(median3(4095, 100, 102), 102);
        assert_eq!(median3(100, 102, 0), 100);
        assert_eq!(median3(7, 7, 7), 7);
    }

    #[test]
    fn reference_wheel_ticks_per_meter() {
        let tpm = ticks_per_meter(2048, 0.038, 17.0 / 69.0);
        assert!((tpm - 69_630.0).abs() < 5.0, "got {tpm}");
    }

    #[test]
    fn distance_round_trip_is_tick_exact() {
        let tpm = 69_630.0;
        assert_eq!(meters_to_ticks(0.03, tpm), 2089);
        assert_eq!(meters_to_ticks(f32::NAN, tpm), 0);
        assert!((ticks_to_meters(69_630, tpm) - 1.0).abs() < 1e-6);
    }
}
