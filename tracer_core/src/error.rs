use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum TracerError {
    #[error("hardware error: {0}")]
    Hardware(String),
    #[error("hardware fault: {0}")]
    HardwareFault(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("timeout waiting for hardware")]
    Timeout,
    #[error("invalid state: {0}")]
    State(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("run aborted: {0}")]
    Abort(AbortReason),
}

/// Why a run was cut short before reaching a terminal drive condition.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    #[error("emergency stop")]
    Estop,
    #[error("max run time exceeded")]
    MaxRuntime,
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing analog front end")]
    MissingAnalog,
    #[error("missing wheel encoders")]
    MissingEncoders,
    #[error("missing motor bridges")]
    MissingBridges,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
