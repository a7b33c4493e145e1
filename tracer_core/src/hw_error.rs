//! Maps `Box<dyn Error>` from trait boundaries to typed `TracerError`.
//!
//! The traits in `tracer_traits` use `Box<dyn Error + Send + Sync>`; this
//! module converts those to our typed error enum, with an optional
//! feature-gated path for `tracer_hardware::error::HwError` downcasting.

use crate::error::TracerError;

/// Map a trait-boundary error to a typed `TracerError`.
///
/// Attempts to downcast known hardware error types first, then falls back
/// to string-based heuristics.
pub fn map_hw_error(e: &(dyn std::error::Error + 'static)) -> TracerError {
    #[cfg(feature = "hardware-errors")]
    {
        use tracer_hardware::error::HwError;
        if let Some(hw) = e.downcast_ref::<HwError>() {
            return match hw {
                HwError::Io(io) if io.kind() == std::io::ErrorKind::TimedOut => TracerError::Timeout,
                other => TracerError::HardwareFault(other.to_string()),
            };
        }
    }

    // Fallback: string-based detection
    let s = e.to_string();
    if s.to_lowercase().contains("timeout") {
        TracerError::Timeout
    } else {
        TracerError::Hardware(s)
    }
}

/// Convenience for `map_err` on trait calls.
#[inline]
pub fn hw(e: Box<dyn std::error::Error + Send + Sync>) -> TracerError {
    map_hw_error(e.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_errors_fall_back_to_message() {
        let e = std::io::Error::other("bus glitch");
        assert!(matches!(map_hw_error(&e), TracerError::Hardware(s) if s == "bus glitch"));
        let t = std::io::Error::other("conversion timeout");
        assert!(matches!(map_hw_error(&t), TracerError::Timeout));
    }

    #[cfg(feature = "hardware-errors")]
    #[test]
    fn board_errors_map_to_faults() {
        let e = tracer_hardware::error::HwError::MuxStep(9);
        assert!(matches!(map_hw_error(&e), TracerError::HardwareFault(s) if s.contains("mux step 9")));
    }
}
