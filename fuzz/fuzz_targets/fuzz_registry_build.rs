#![no_main]

use std::sync::Arc;

use libfuzzer_sys::fuzz_target;
use signalman::config::loader::ConfigLoader;
use signalman::scheduler::Scheduler;
use signalman::signal::{Actuator, RecordingActuator};

fuzz_target!(|data: &[u8]| {
    let Ok(yaml_str) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(loaded) = ConfigLoader::with_defaults().load_from_str(yaml_str) else {
        return;
    };

    // A config that passes validation must either build or fail cleanly,
    // and a built registry starts with no conflicting phases active.
    let actuator: Arc<dyn Actuator> = Arc::new(RecordingActuator::new());
    if let Ok(scheduler) = Scheduler::from_config(&loaded.config, actuator) {
        assert_eq!(scheduler.registry().conflicting_active_pair(), None);
    }
});
