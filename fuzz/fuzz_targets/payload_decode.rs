//! Fuzz target for payload decoding.
//!
//! Tries arbitrary bytes as the JSON payload of every catalog type. All
//! invalid inputs must return an error; none may panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use winrun_proto::{Message, MessageType};

fuzz_target!(|data: &[u8]| {
    for byte in 0u8..=255 {
        let Some(ty) = MessageType::from_u8(byte) else { continue };
        let _ = Message::decode_payload(ty, data);
    }
});
