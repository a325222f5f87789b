#![no_main]

use libfuzzer_sys::fuzz_target;
use signalman::config::loader::ConfigLoader;

fuzz_target!(|data: &[u8]| {
    if let Ok(yaml_str) = std::str::from_utf8(data) {
        // Errors are fine; panics are not
        let _ = ConfigLoader::with_defaults().load_from_str(yaml_str);
    }
});
