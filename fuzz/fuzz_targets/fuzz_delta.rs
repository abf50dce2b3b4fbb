//! Fuzz target for delta application.
//!
//! The first byte picks where the input splits into base and delta.

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Some((&split, rest)) = data.split_first() else {
        return;
    };
    let split = (split as usize).min(rest.len());
    let (base, delta) = rest.split_at(split);

    if let Ok(out) = kiln_git::apply_delta(base, delta) {
        let (_, declared) = kiln_git::delta_sizes(delta).unwrap_or_default();
        assert_eq!(out.len(), declared);
    }
});
