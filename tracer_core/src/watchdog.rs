//! Line-out watchdog: fires once no sensor has seen the line for
//! `timeout_ms` of continuous time.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOutPhase {
    /// Line seen on the last update.
    Idle,
    /// Line lost; counting.
    Trig,
    /// Timeout elapsed.
    Exit,
}

#[derive(Debug, Clone)]
pub struct LineOutWatchdog {
    timeout_us: u64,
    phase: LineOutPhase,
    lost_at_us: u64,
}

impl LineOutWatchdog {
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            timeout_us: timeout_ms.saturating_mul(crate::util::MICROS_PER_MILLI),
            phase: LineOutPhase::Idle,
            lost_at_us: 0,
        }
    }

    pub fn reset(&mut self) {
        self.phase = LineOutPhase::Idle;
        self.lost_at_us = 0;
    }

    pub fn phase(&self) -> LineOutPhase {
        self.phase
    }

    /// Feed one observation. Seeing the line again before the timeout
    /// rearms; `Exit` is sticky until `reset`.
    pub fn update(&mut self, on_line: bool, now_us: u64) -> LineOutPhase {
        self.phase = match (self.phase, on_line) {
            (LineOutPhase::Exit, _) => LineOutPhase::Exit,
            (_, true) => LineOutPhase::Idle,
            (LineOutPhase::Idle, false) => {
                self.lost_at_us = now_us;
                LineOutPhase::Trig
            }
            (LineOutPhase::Trig, false) => {
                if now_us.saturating_sub(self.lost_at_us) >= self.timeout_us {
                    tracing::warn!(
                        lost_for_us = now_us.saturating_sub(self.lost_at_us),
                        "line lost"
                    );
                    LineOutPhase::Exit
                } else {
                    LineOutPhase::Trig
                }
            }
        };
        self.phase
    }
}
