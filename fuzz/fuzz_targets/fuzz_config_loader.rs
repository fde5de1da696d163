#![no_main]
use libfuzzer_sys::fuzz_target;

// Arbitrary TOML must parse or fail cleanly, and validate() must never panic.
fuzz_target!(|data: &str| {
    if let Ok(cfg) = lightctl_config::load_toml(data) {
        let _ = cfg.validate();
    }
});
