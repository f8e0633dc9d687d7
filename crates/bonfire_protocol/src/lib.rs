#![forbid(unsafe_code)]

//! Wire types for the bonfire room protocol (v1).
//!
//! One WebSocket text frame carries one JSON-encoded [`ClientIntent`] or
//! [`ServerEvent`]. Decoding fails closed: a frame that does not match the
//! tagged shape exactly is dropped by the caller, never coerced.

pub mod wire;

pub use wire::{
	ClientIntent, EditPayload, HelloPayload, MAX_FRAME_BYTES, ReactPayload, SendPayload, ServerEvent, WireError,
	decode_event, decode_intent, encode_event, encode_intent,
};

/// Protocol version spoken by this crate.
pub const PROTOCOL_VERSION: u32 = 1;
