//! Fuzz target for the receive-pack command list and upload-pack negotiation.

#![no_main]

use libfuzzer_sys::fuzz_target;
use std::io::Cursor;

fuzz_target!(|data: &[u8]| {
    if let Ok(request) = kiln_git::ReceiveRequest::parse(data) {
        for command in &request.commands {
            let _ = command.is_create();
            let _ = command.is_delete();
        }
        if let Some(pack) = request.pack {
            assert!(pack.starts_with(kiln_git::PACK_SIGNATURE));
        }
    }

    let _ = kiln_git::WantHave::parse(&mut Cursor::new(data));

    if let Ok(line) = std::str::from_utf8(data) {
        let _ = kiln_git::Command::parse(line);
    }
});
