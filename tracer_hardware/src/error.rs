use thiserror::Error;

#[derive(Debug, Error)]
pub enum HwError {
    #[error("adc error: {0}")]
    Adc(String),
    #[error("mux step {0} out of range")]
    MuxStep(u8),
    #[error("board state unavailable")]
    Disconnected,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HwError>;
