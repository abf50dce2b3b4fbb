//! Fuzz target for pkt-line framing.
//!
//! Reads packets and sideband streams from arbitrary bytes without panicking.

#![no_main]

use libfuzzer_sys::fuzz_target;
use std::io::Cursor;

fuzz_target!(|data: &[u8]| {
    let mut reader = kiln_git::PktLineReader::new(Cursor::new(data));

    // bounded so crafted input cannot spin
    for _ in 0..100 {
        match reader.read() {
            Ok(Some(pkt)) => {
                let _ = pkt.as_str();
                if let Ok(encoded) = pkt.encode() {
                    assert!(encoded.len() <= kiln_git::MAX_PKT_LEN);
                }
            }
            Ok(None) | Err(_) => break,
        }
    }

    let mut reader = kiln_git::PktLineReader::new(Cursor::new(data));
    let _ = kiln_git::read_sideband(&mut reader);
});
