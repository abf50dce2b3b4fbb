//! Fuzz target for zlib-compressed loose object decoding.

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(object) = kiln_storage::GitObject::from_loose(data) {
        let _ = object.to_loose();
    }
});
