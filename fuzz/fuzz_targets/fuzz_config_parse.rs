//! Fuzz target for analysis config parsing (TOML and JSON).

#![no_main]

use dt_config::{validate_config, AnalysisConfig};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    for parsed in [
        AnalysisConfig::from_toml_str(text),
        AnalysisConfig::from_json_str(text),
    ] {
        if let Ok(config) = parsed {
            // Validation must not panic on any parsed value.
            let _ = validate_config(&config);
        }
    }
});
