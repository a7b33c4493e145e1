//! Human-readable error descriptions and structured JSON error formatting.

use crate::cli::LAST_SAFETY;
use crate::run::abort_reason_name;

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    use tracer_core::error::{BuildError, TracerError};

    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingAnalog => {
                "What happened: No analog front end was provided to the robot.\nLikely causes: The sensor board failed to initialize or was not wired into the builder.\nHow to fix: Pass the front end via with_analog(...).".to_string()
            }
            BuildError::MissingEncoders => {
                "What happened: Wheel encoders were not provided to the robot.\nLikely causes: Encoder counters failed to initialize.\nHow to fix: Pass both encoders via with_encoders(...).".to_string()
            }
            BuildError::MissingBridges => {
                "What happened: Motor bridges were not provided to the robot.\nLikely causes: PWM outputs failed to initialize.\nHow to fix: Pass both bridges via with_bridges(...).".to_string()
            }
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun."
            ),
        };
    }

    if let Some(te) = err.downcast_ref::<TracerError>() {
        return match te {
            TracerError::Timeout => "What happened: The sensor sweep did not complete in time.\nLikely causes: ADC not converting or the sensing slot was never armed.\nHow to fix: Check the sensor board and sensing.tick_interval_us.".to_string(),
            TracerError::Abort(tracer_core::AbortReason::Estop) => "What happened: Emergency stop was triggered.\nLikely causes: Ctrl-C or the stop input was asserted.\nHow to fix: Clear the stop condition, place the robot on the start line and run again.".to_string(),
            TracerError::Abort(tracer_core::AbortReason::MaxRuntime) => "max run time was exceeded.\nLikely causes: Speeds too low for the course, or the end markers were never seen.\nHow to fix: Increase safety.max_run_ms or check the start/end tape.".to_string(),
            TracerError::State(msg) if msg.contains("mark log") => format!(
                "What happened: {msg}.\nLikely causes: No exploration run has been saved yet.\nHow to fix: Run `tracer explore --save`, then replay."
            ),
            TracerError::HardwareFault(msg) | TracerError::Hardware(msg) => format!(
                "What happened: Hardware reported an error ({msg}).\nLikely causes: Wiring, power, or a peripheral that stopped responding.\nHow to fix: Check the connections and run `tracer self-check`."
            ),
            other => format!(
                "What happened: {other}.\nLikely causes: See logs.\nHow to fix: Re-run with --log-level=debug or set RUST_LOG for more detail."
            ),
        };
    }

    let msg = err.to_string();
    let lower = msg.to_ascii_lowercase();

    if lower.contains("calibration csv must have headers") {
        return "Invalid headers in calibration CSV. Expected 'sensor,bias,range'.".to_string();
    }

    if lower.contains("invalid configuration") || lower.contains("parse config") {
        let root = err.root_cause();
        return format!(
            "What happened: Configuration is invalid ({root}).\nLikely causes: Missing or out-of-range values.\nHow to fix: Edit the TOML config and try again."
        );
    }

    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable exit codes for aborts; every other error returns 1.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    use tracer_core::error::{AbortReason, TracerError};
    match err.downcast_ref::<TracerError>() {
        Some(TracerError::Abort(AbortReason::Estop)) => 2,
        Some(TracerError::Abort(AbortReason::MaxRuntime)) => 4,
        _ => 1,
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use serde_json::json;
    use tracer_core::error::{AbortReason, TracerError};

    if let Some(TracerError::Abort(reason)) = err.downcast_ref::<TracerError>() {
        let msg = humanize(err);
        let details = match reason {
            AbortReason::MaxRuntime => LAST_SAFETY.get().map(|s| json!({ "max_run_ms": s.max_run_ms })),
            AbortReason::Estop => None,
        };
        let obj = match details {
            Some(d) => json!({ "reason": abort_reason_name(reason), "details": d, "message": msg }),
            None => json!({ "reason": abort_reason_name(reason), "message": msg }),
        };
        return obj.to_string();
    }

    json!({ "reason": "Error", "message": humanize(err) }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracer_core::{AbortReason, TracerError};

    #[test]
    fn abort_codes_are_stable() {
        let e = eyre::Report::new(TracerError::Abort(AbortReason::MaxRuntime));
        assert_eq!(exit_code_for_error(&e), 4);
        let e = eyre::Report::new(TracerError::Abort(AbortReason::Estop));
        assert_eq!(exit_code_for_error(&e), 2);
        assert_eq!(exit_code_for_error(&eyre::eyre!("boom")), 1);
    }

    #[test]
    fn csv_header_error_is_explained() {
        let e = eyre::eyre!("calibration CSV must have headers 'sensor,bias,range', got: a,b");
        assert_eq!(
            humanize(&e),
            "Invalid headers in calibration CSV. Expected 'sensor,bias,range'."
        );
    }

    #[test]
    fn json_carries_the_reason() {
        let e = eyre::Report::new(TracerError::Abort(AbortReason::Estop));
        let v: serde_json::Value = serde_json::from_str(&format_error_json(&e)).unwrap();
        assert_eq!(v["reason"], "Estop");
        assert!(v["message"].as_str().unwrap().contains("Emergency stop"));
    }
}
