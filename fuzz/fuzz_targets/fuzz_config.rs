#![no_main]

use libfuzzer_sys::fuzz_target;
use reqrev_core::{ConfigError, InjectConfig};

fuzz_target!(|data: &[u8]| {
    let Ok(source) = std::str::from_utf8(data) else {
        return;
    };
    if source.len() > 8192 {
        return;
    }

    match InjectConfig::from_toml_validated(source) {
        Ok(config) => {
            assert!(config.validate().is_empty());
            assert!(config.timing.deactivate_delay_ms < config.timing.reconcile_interval_ms);
        }
        Err(ConfigError::Validation(problems)) => assert!(!problems.is_empty()),
        Err(_) => {}
    }
});
