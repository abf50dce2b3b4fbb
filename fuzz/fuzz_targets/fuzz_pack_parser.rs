//! Fuzz target for pack parsing in both decode modes.

#![no_main]

use kiln_git::{DecodeMode, PackParser};
use kiln_storage::{MemoryAdapter, ObjectStore};
use libfuzzer_sys::fuzz_target;
use std::sync::Arc;

fuzz_target!(|data: &[u8]| {
    for mode in [DecodeMode::FailFast, DecodeMode::BestEffort] {
        let store = ObjectStore::new(Arc::new(MemoryAdapter::new()));
        if let Ok(report) = PackParser::new(data).with_mode(mode).parse(&store) {
            // every reported object must be readable back
            for id in report.stored() {
                assert!(store.contains(&id).unwrap_or(false));
            }
        }
    }
});
