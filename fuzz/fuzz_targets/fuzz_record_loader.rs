#![no_main]
use libfuzzer_sys::fuzz_target;

// Stored records come from disk; loading, validating and re-rendering must not panic.
fuzz_target!(|data: &str| {
    let Ok(rec) = tracer_config::load_record(data) else {
        return;
    };
    if let Some(cal) = &rec.calibration {
        let _ = cal.validate();
    }
    if let Ok(text) = tracer_config::render_record(&rec) {
        let _ = tracer_config::load_record(&text);
    }
});
