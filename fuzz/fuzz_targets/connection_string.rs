#![no_main]

use libfuzzer_sys::fuzz_target;
use sqlpool::Config;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        // Parsing must never panic; accepted configs must validate without panicking too.
        if let Ok(config) = Config::from_connection_string(s) {
            let _ = config.validate();
            let _ = format!("{config:?}");
        }
    }
});
