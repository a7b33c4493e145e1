//! Collaborator stand-ins for tests and headless runs.
use tracer_traits::{Feedback, Gate, StatusSink};

/// Discards feedback pulses.
pub struct NoopFeedback;

impl Feedback for NoopFeedback {
    fn pulse(&mut self, _ms: u32) {}
}

/// Records pulse lengths.
#[derive(Debug, Default)]
pub struct PulseLog(pub Vec<u32>);

impl Feedback for PulseLog {
    fn pulse(&mut self, ms: u32) {
        self.0.push(ms);
    }
}

pub struct NoopStatus;

impl StatusSink for NoopStatus {
    fn status(&mut self, _text: &str) {}
}

/// Keeps every status line.
#[derive(Debug, Default)]
pub struct StatusLog(pub Vec<String>);

impl StatusSink for StatusLog {
    fn status(&mut self, text: &str) {
        self.0.push(text.to_owned());
    }
}

/// Always answers the same way.
pub struct FixedGate(pub bool);

impl Gate for FixedGate {
    fn proceed(&mut self) -> bool {
        self.0
    }
}
