#![no_main]

use conference_engine::protocol::SyncState;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Anything that decodes must survive re-encoding unchanged.
    if let Ok(sync) = serde_json::from_slice::<SyncState>(data) {
        if let Ok(json) = serde_json::to_string(&sync) {
            if let Ok(back) = serde_json::from_str::<SyncState>(&json) {
                assert_eq!(sync, back);
            }
        }
    }
});
