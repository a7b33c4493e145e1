//! Hardware and collaborator boundaries for the line tracer.
//!
//! Core logic only ever sees these traits. Fallible hardware calls return
//! `Box<dyn Error + Send + Sync>` so backends can surface their own error types;
//! `tracer_core::hw_error` maps them back to typed errors.
pub mod clock;

pub use clock::{Clock, ManualClock, MonotonicClock};

/// Number of reflectance sensors on the bar. Bit `k` of the state bitmap is
/// sensor `k`, with bit 0 the rightmost sensor.
pub const IR_COUNT: usize = 16;

/// Multiplexer steps per full sweep; each step exposes two sensors.
pub const MUX_STEPS: u8 = 8;

/// Position units between adjacent sensors.
pub const SENSOR_PITCH: i32 = 2000;

/// Weight of sensor `bit`, symmetric about zero at a constant pitch. Line
/// positions are expressed in the same units.
#[inline]
pub const fn sensor_weight(bit: usize) -> i32 {
    (2 * bit as i32 - (IR_COUNT as i32 - 1)) * SENSOR_PITCH / 2
}

const _: () = assert!(IR_COUNT <= u16::BITS as usize);
const _: () = assert!(IR_COUNT == 2 * MUX_STEPS as usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Wheel {
    Left,
    Right,
}

impl Wheel {
    pub const ALL: [Self; 2] = [Self::Left, Self::Right];

    #[inline]
    pub const fn index(self) -> usize {
        match self {
            Self::Left => 0,
            Self::Right => 1,
        }
    }
}

/// Analog converter inputs reachable from the front end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdcInput {
    /// Multiplexed channel carrying sensors `0..MUX_STEPS`.
    IrLow,
    /// Multiplexed channel carrying sensors `MUX_STEPS..IR_COUNT`.
    IrHigh,
    /// Battery divider.
    Supply,
}

/// Sensor index read through `input` while the multiplexer sits on `step`.
#[inline]
pub fn ir_bit(step: u8, input: AdcInput) -> Option<usize> {
    let step = usize::from(step % MUX_STEPS);
    match input {
        AdcInput::IrLow => Some(step),
        AdcInput::IrHigh => Some(step + MUX_STEPS as usize),
        AdcInput::Supply => None,
    }
}

pub trait AnalogFrontEnd {
    fn select_mux(&mut self, step: u8) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
    fn set_emitters(&mut self, on: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
    /// Route `input` to the converter and run one conversion. Implementations
    /// must make select + convert indivisible (interrupts masked on target).
    fn convert(&mut self, input: AdcInput)
    -> Result<u16, Box<dyn std::error::Error + Send + Sync>>;
}

pub trait QuadratureEncoder {
    fn count(&mut self) -> Result<i32, Box<dyn std::error::Error + Send + Sync>>;
}

pub trait HBridge {
    fn set_enabled(&mut self, on: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
    /// `level` is the compare value in `0..=top` of the PWM slice.
    fn drive(
        &mut self,
        forward: bool,
        level: u16,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Short audible pulse (buzzer).
pub trait Feedback {
    fn pulse(&mut self, ms: u32);
}

/// Renders short diagnostic strings (display).
pub trait StatusSink {
    fn status(&mut self, text: &str);
}

/// Binary proceed / don't decision taken after a run (buttons).
pub trait Gate {
    fn proceed(&mut self) -> bool;
}

impl<T: AnalogFrontEnd + ?Sized> AnalogFrontEnd for Box<T> {
    fn select_mux(&mut self, step: u8) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        (**self).select_mux(step)
    }
    fn set_emitters(&mut self, on: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        (**self).set_emitters(on)
    }
    fn convert(
        &mut self,
        input: AdcInput,
    ) -> Result<u16, Box<dyn std::error::Error + Send + Sync>> {
        (**self).convert(input)
    }
}

impl<T: QuadratureEncoder + ?Sized> QuadratureEncoder for Box<T> {
    fn count(&mut self) -> Result<i32, Box<dyn std::error::Error + Send + Sync>> {
        (**self).count()
    }
}

impl<T: HBridge + ?Sized> HBridge for Box<T> {
    fn set_enabled(&mut self, on: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        (**self).set_enabled(on)
    }
    fn drive(
        &mut self,
        forward: bool,
        level: u16,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        (**self).drive(forward, level)
    }
}

impl<T: Feedback + ?Sized> Feedback for Box<T> {
    fn pulse(&mut self, ms: u32) {
        (**self).pulse(ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mux_channels_cover_every_sensor_once() {
        let mut seen = [false; IR_COUNT];
        for step in 0..MUX_STEPS {
            for input in [AdcInput::IrLow, AdcInput::IrHigh] {
                let bit = ir_bit(step, input).unwrap();
                assert!(!seen[bit], "sensor {bit} mapped twice");
                seen[bit] = true;
            }
        }
        assert!(seen.iter().all(|s| *s));
        assert_eq!(ir_bit(3, AdcInput::Supply), None);
    }

    #[test]
    fn weights_step_by_one_pitch() {
        assert_eq!(sensor_weight(0), -15_000);
        assert_eq!(sensor_weight(IR_COUNT - 1), 15_000);
        for bit in 1..IR_COUNT {
            assert_eq!(sensor_weight(bit) - sensor_weight(bit - 1), SENSOR_PITCH);
        }
    }
}
