#![no_main]

use libfuzzer_sys::fuzz_target;
use message_template::schema::compiler::compile;

fuzz_target!(|data: &[u8]| {
    // Arbitrary template text must compile or fail cleanly
    if let Ok(text) = std::str::from_utf8(data) {
        let _ = compile(text);
    }
});
