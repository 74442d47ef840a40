//! Fuzz target for busprobe.toml parsing and validation.

#![no_main]

use bp_core::config::validation::validate_config;
use bp_core::config::ProbeConfig;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    if let Ok(config) = toml::from_str::<ProbeConfig>(data) {
        let _ = validate_config(&config);
    }
});
