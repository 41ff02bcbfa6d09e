//! Feed arbitrary bytes to the Framer in arbitrary chunks.
//!
//! The first input byte picks the chunk size, so libFuzzer explores
//! length prefixes split across reads. Whatever arrives, the Framer must
//! either yield frames that fit the limit or fail cleanly, and every frame
//! it yields must survive the message registry without panicking.

#![no_main]

use karman_proto::{Framer, Message};
use libfuzzer_sys::fuzz_target;

const MAX_FRAME_SIZE: usize = 64 * 1024;

fuzz_target!(|data: &[u8]| {
    let Some((&chunk_selector, stream)) = data.split_first() else {
        return;
    };
    let chunk_size = usize::from(chunk_selector).max(1);

    let Ok(registry) = Message::registry() else {
        return;
    };
    let mut framer = Framer::with_max_frame_size(MAX_FRAME_SIZE);

    for chunk in stream.chunks(chunk_size) {
        let Ok(frames) = framer.append(chunk) else {
            return;
        };
        for frame in frames {
            assert!(frame.len() <= MAX_FRAME_SIZE);
            let _ = registry.decode(&frame);
        }
    }
});
