//! Mark classification.
//!
//! A mark is a tape segment crossing the line. The detector watches the
//! sensor bitmap against masks centered on the current line contact point:
//!
//! ```text
//!   bit 15 ........................................ bit 0
//!   [   left   ][        center (line)        ][  right  ]
//! ```
//!
//! READY waits for a lit side sensor (or a nearly fully lit center), then
//! ACCUMULATION ORs frames together until the gating wheel has traveled the
//! mark length, and DECISION classifies what was seen. Gating on distance
//! keeps the result independent of speed.
use crate::config::MarkCfg;
use crate::sensing::{ALL_SENSORS, IrState, nearest_sensor};
use crate::util::meters_to_ticks;
use tracer_traits::{IR_COUNT, Wheel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mark {
    None,
    Left,
    Right,
    /// Both sides; the paired start/end markers.
    Both,
    /// Full-width crossing line.
    Cross,
}

impl Mark {
    pub const fn symbol(self) -> char {
        match self {
            Self::None => '-',
            Self::Left => 'L',
            Self::Right => 'R',
            Self::Both => 'B',
            Self::Cross => 'X',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkWindowMask {
    pub left: IrState,
    pub right: IrState,
    pub center: IrState,
    pub both: IrState,
    pub window_index: usize,
}

impl MarkWindowMask {
    /// Masks for a line touching sensor `index`, `line_half_width` sensors
    /// on each side belonging to the line.
    pub fn centered(index: usize, line_half_width: usize) -> Self {
        let index = index.min(IR_COUNT - 1);
        let lo = index.saturating_sub(line_half_width);
        let hi = (index + line_half_width).min(IR_COUNT - 1);
        let below = |n: usize| ((1_u32 << n) - 1) as IrState;
        let right = below(lo);
        let upto_hi = below(hi + 1);
        let center = upto_hi & !right;
        let left = ALL_SENSORS & !upto_hi;
        Self {
            left,
            right,
            center,
            both: left | right,
            window_index: index,
        }
    }
}

/// Classify an accumulated bitmap against `mask`.
pub fn classify(accumulate: IrState, mask: &MarkWindowMask) -> Mark {
    if accumulate == ALL_SENSORS {
        return Mark::Cross;
    }
    match (accumulate & mask.left != 0, accumulate & mask.right != 0) {
        (true, true) => Mark::Both,
        (true, false) => Mark::Left,
        (false, true) => Mark::Right,
        (false, false) => Mark::None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkPhase {
    Ready,
    Accumulation,
    Decision,
}

#[derive(Debug, Clone)]
pub struct MarkDetector {
    mask: MarkWindowMask,
    line_half_width: usize,
    cross_center_min: u32,
    mark_length_ticks: u32,
    phase: MarkPhase,
    accumulate: IrState,
    encoder_threshold: u32,
    motor_ref: Wheel,
}

impl MarkDetector {
    pub fn new(cfg: &MarkCfg, ticks_per_meter: f32) -> Self {
        let len = meters_to_ticks(cfg.length_m, ticks_per_meter).max(1).unsigned_abs();
        Self::with_length_ticks(cfg, len)
    }

    pub fn with_length_ticks(cfg: &MarkCfg, mark_length_ticks: u32) -> Self {
        Self {
            mask: MarkWindowMask::centered(IR_COUNT / 2, cfg.line_half_width),
            line_half_width: cfg.line_half_width,
            cross_center_min: cfg.cross_center_min,
            mark_length_ticks,
            phase: MarkPhase::Ready,
            accumulate: 0,
            encoder_threshold: 0,
            motor_ref: Wheel::Left,
        }
    }

    pub fn reset(&mut self) {
        self.phase = MarkPhase::Ready;
        self.accumulate = 0;
        self.encoder_threshold = 0;
        self.mask = MarkWindowMask::centered(IR_COUNT / 2, self.line_half_width);
    }

    /// Follow the line contact point. Masks only move between marks so an
    /// episode is classified against the masks it started with.
    pub fn recenter(&mut self, position: i32) {
        if self.phase != MarkPhase::Ready {
            return;
        }
        let idx = nearest_sensor(position);
        if idx != self.mask.window_index {
            self.mask = MarkWindowMask::centered(idx, self.line_half_width);
        }
    }

    /// Feed one sensor frame and the wheels' traveled ticks. Returns the
    /// classified mark once per episode, `Mark::None` otherwise.
    pub fn update(&mut self, state: IrState, ticks: [i32; 2]) -> Mark {
        match self.phase {
            MarkPhase::Ready => {
                let side = state & self.mask.both;
                let center = (state & self.mask.center).count_ones();
                if side != 0 || center >= self.cross_center_min {
                    self.phase = MarkPhase::Accumulation;
                    self.accumulate = state;
                    self.motor_ref = if state & self.mask.right != 0 && state & self.mask.left == 0
                    {
                        Wheel::Right
                    } else {
                        Wheel::Left
                    };
                    self.encoder_threshold = ticks[self.motor_ref.index()]
                        .unsigned_abs()
                        .saturating_add(self.mark_length_ticks);
                }
                Mark::None
            }
            MarkPhase::Accumulation => {
                self.accumulate |= state;
                let traveled = ticks[self.motor_ref.index()].unsigned_abs();
                if traveled >= self.encoder_threshold {
                    if state & self.mask.both != 0 {
                        // Still on tape: give it another half length.
                        self.encoder_threshold =
                            traveled.saturating_add(self.mark_length_ticks / 2);
                    } else {
                        self.phase = MarkPhase::Decision;
                    }
                }
                Mark::None
            }
            MarkPhase::Decision => {
                let mark = classify(self.accumulate, &self.mask);
                self.phase = MarkPhase::Ready;
                self.accumulate = 0;
                if mark == Mark::None {
                    tracing::debug!("inconsistent mark read discarded");
                }
                mark
            }
        }
    }

    pub fn phase(&self) -> MarkPhase {
        self.phase
    }

    pub fn mask(&self) -> &MarkWindowMask {
        &self.mask
    }

    pub fn accumulate(&self) -> IrState {
        self.accumulate
    }

    pub fn motor_ref(&self) -> Wheel {
        self.motor_ref
    }

    pub fn encoder_threshold(&self) -> u32 {
        self.encoder_threshold
    }
}
