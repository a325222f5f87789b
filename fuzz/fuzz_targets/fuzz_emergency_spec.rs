#![no_main]

use libfuzzer_sys::fuzz_target;
use signalman::controller::ScheduledEmergency;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(parsed) = s.parse::<ScheduledEmergency>() {
            // Display output that parses must describe the same request
            if let Ok(again) = parsed.to_string().parse::<ScheduledEmergency>() {
                assert_eq!(parsed, again);
            }
        }
    }
});
