//! Property-based tests for envelope framing.
//!
//! These verify the parser contract for ALL inputs, not just examples:
//! round-trip identity, zero consumption on partial buffers, and in-order
//! reconstruction of concatenated envelope sequences.

use proptest::prelude::*;
use winrun_proto::messages::input::{
    KeyEventType, KeyModifiers, KeyboardInput, MouseButton, MouseEventType, MouseInput,
};
use winrun_proto::messages::session::{Ack, GuestSession, Heartbeat, SessionList};
use winrun_proto::messages::window::{FrameReady, WindowBufferAllocated, WindowMetadata};
use winrun_proto::{Direction, Message, serialize, try_read};

/// Strategy for arbitrary guest→host messages.
fn arbitrary_guest_message() -> impl Strategy<Value = Message> {
    prop_oneof![
        any::<u64>().prop_map(|uptime_seconds| Message::Heartbeat(Heartbeat { uptime_seconds })),
        (any::<u64>(), any::<u32>(), any::<u32>()).prop_map(|(window_id, slot_index, frame_number)| {
            Message::FrameReady(FrameReady { window_id, slot_index, frame_number })
        }),
        (any::<u32>(), any::<bool>()).prop_map(|(message_id, success)| {
            Message::Ack(if success {
                Ack::ok(message_id)
            } else {
                Ack::failed(message_id, 1, "failed")
            })
        }),
        (any::<u64>(), "[a-zA-Z ]{0,24}", any::<i32>(), any::<i32>(), 1u32..8192, 1u32..8192)
            .prop_map(|(window_id, title, x, y, width, height)| {
                Message::WindowMetadata(WindowMetadata {
                    window_id,
                    title,
                    x,
                    y,
                    width,
                    height,
                    is_minimized: false,
                    is_maximized: false,
                    is_focused: true,
                    process_id: None,
                    executable_path: None,
                })
            }),
        (any::<u64>(), any::<u64>(), any::<u64>(), 1u32..64, 64u32..1_048_576).prop_map(
            |(window_id, buffer_offset, buffer_size, slot_count, slot_size)| {
                Message::WindowBufferAllocated(WindowBufferAllocated {
                    window_id,
                    buffer_offset,
                    buffer_size,
                    slot_size,
                    slot_count,
                    is_compressed: false,
                    is_reallocation: false,
                    uses_shared_memory: true,
                })
            }
        ),
        prop::collection::vec(
            ("[a-z]{1,8}", "[A-Z]:[a-z]{1,12}", any::<u32>(), any::<u64>()).prop_map(
                |(session_id, executable_path, process_id, uptime_seconds)| GuestSession {
                    session_id,
                    executable_path,
                    process_id,
                    window_ids: vec![],
                    uptime_seconds,
                }
            ),
            0..4
        )
        .prop_map(|sessions| Message::SessionList(SessionList { message_id: None, sessions })),
    ]
}

/// Strategy for arbitrary host→guest messages.
fn arbitrary_host_message() -> impl Strategy<Value = Message> {
    prop_oneof![
        (any::<u64>(), 0.0f64..4096.0, 0.0f64..4096.0).prop_map(|(window_id, x, y)| {
            Message::MouseInput(MouseInput {
                window_id,
                event_type: MouseEventType::Press,
                x,
                y,
                button: Some(MouseButton::Left),
                scroll_delta_x: None,
                scroll_delta_y: None,
                modifiers: KeyModifiers::default(),
            })
        }),
        (any::<u64>(), any::<u16>()).prop_map(|(window_id, key_code)| {
            Message::KeyboardInput(KeyboardInput {
                window_id,
                event_type: KeyEventType::Down,
                key_code,
                modifiers: KeyModifiers(KeyModifiers::CONTROL),
                character: None,
            })
        }),
    ]
}

#[test]
fn prop_envelope_round_trip() {
    proptest!(|(message in arbitrary_guest_message())| {
        let wire = serialize(&message).expect("serialize should succeed");
        let outcome = try_read(&wire, Direction::GuestToHost).expect("parse should succeed");

        // PROPERTY: a serialized envelope is consumed whole and reconstructs
        // the original message.
        prop_assert_eq!(outcome.consumed, wire.len());
        prop_assert_eq!(outcome.message, Some(message));
    });
}

#[test]
fn prop_host_messages_round_trip_toward_guest() {
    proptest!(|(message in arbitrary_host_message())| {
        let wire = serialize(&message).expect("serialize should succeed");
        let outcome = try_read(&wire, Direction::HostToGuest).expect("parse should succeed");
        prop_assert_eq!(outcome.consumed, wire.len());
        prop_assert_eq!(outcome.message, Some(message));
    });
}

#[test]
fn prop_partial_buffers_consume_nothing() {
    proptest!(|(message in arbitrary_guest_message(), cut_fraction in 0.0f64..1.0)| {
        let wire = serialize(&message).expect("serialize should succeed");
        let cut = ((wire.len() as f64) * cut_fraction) as usize;

        // Strictly shorter than one envelope.
        prop_assume!(cut < wire.len());

        let outcome = try_read(&wire[..cut], Direction::GuestToHost)
            .expect("partial parse should not error");

        // PROPERTY: partial buffers consume zero bytes and yield no message.
        prop_assert_eq!(outcome.consumed, 0);
        prop_assert_eq!(outcome.message, None);
    });
}

#[test]
fn prop_concatenated_sequences_reconstruct_in_order() {
    proptest!(|(messages in prop::collection::vec(arbitrary_guest_message(), 1..8))| {
        let mut wire = Vec::new();
        for message in &messages {
            wire.extend_from_slice(&serialize(message).expect("serialize should succeed"));
        }

        let mut parsed = Vec::new();
        let mut rest: &[u8] = &wire;
        while !rest.is_empty() {
            let outcome = try_read(rest, Direction::GuestToHost).expect("parse should succeed");
            prop_assert!(outcome.consumed > 0, "no progress on non-empty buffer");
            parsed.push(outcome.message.expect("complete envelope yields a message"));
            rest = &rest[outcome.consumed..];
        }

        // PROPERTY: successive try_read calls consume envelopes in order and
        // reconstruct the original sequence exactly.
        prop_assert_eq!(parsed, messages);
    });
}

#[test]
fn prop_byte_dribble_eventually_parses() {
    proptest!(|(message in arbitrary_guest_message())| {
        let wire = serialize(&message).expect("serialize should succeed");

        // Feed one byte at a time; the parser must consume nothing until the
        // whole envelope is present, then consume it all at once.
        let mut parsed = None;
        for end in 1..=wire.len() {
            let outcome = try_read(&wire[..end], Direction::GuestToHost)
                .expect("parse should not error");
            if end < wire.len() {
                prop_assert_eq!(outcome.consumed, 0);
            } else {
                prop_assert_eq!(outcome.consumed, wire.len());
                parsed = outcome.message;
            }
        }
        prop_assert_eq!(parsed, Some(message));
    });
}
