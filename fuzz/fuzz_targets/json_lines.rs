#![no_main]

use libfuzzer_sys::fuzz_target;
use tracefold::event::TraceEvent;

fuzz_target!(|data: &[u8]| {
    // Each line must either parse or fail cleanly
    if let Ok(input) = std::str::from_utf8(data) {
        for line in input.lines() {
            let _ = serde_json::from_str::<TraceEvent>(line);
        }
    }
});
