#![no_main]

use libfuzzer_sys::fuzz_target;
use message_template::utils::compression::{compress, expand};

fuzz_target!(|data: &[u8]| {
    // Round trip must be lossless
    let encoded = compress(data);
    let decoded = expand(&encoded).expect("zero-coded output must expand");
    assert_eq!(decoded, data);

    // Raw input must never panic and must respect the expansion limit
    let _ = expand(data);
});
