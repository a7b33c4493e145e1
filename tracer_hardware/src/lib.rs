//! Hardware backends for the line tracer.
//!
//! Only the simulated board ships today: a two-wheel plant with first-order
//! motor dynamics, quadrature counts derived from wheel travel, and a sensor
//! bar model that renders the line and tape marks of a one-dimensional track.
pub mod error;
pub mod sim;

pub use sim::{SimAnalog, SimBoard, SimBridge, SimEncoder, SimParams, SimTrack, TapeKind};
