//! Decode arbitrary payloads as protocol messages.
//!
//! Anything that decodes must encode again, and the re-encoding must decode
//! to the same kind of message.

#![no_main]

use karman_proto::Message;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(registry) = Message::registry() else {
        return;
    };
    let Ok(message) = registry.decode(data) else {
        return;
    };

    let encoded = registry.encode(&message).expect("decoded message must re-encode");
    let again = registry.decode(&encoded).expect("re-encoded message must decode");
    assert_eq!(message.kind(), again.kind());
});
