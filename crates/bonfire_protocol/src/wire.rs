#![forbid(unsafe_code)]

use bonfire_domain::{DisplayName, MediaAttachment, Message, MessageId, ReplyRef, RosterEntry};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum accepted frame size. Large enough for a max-length message with
/// full attachments, small enough to bound a hostile peer.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum WireError {
	#[error("frame exceeds maximum size: len={len} max={max}")]
	FrameTooLarge {
		len: usize,
		max: usize,
	},

	#[error("json error: {0}")]
	Json(#[from] serde_json::Error),
}

/// Connection-time parameters, sent once as the first frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HelloPayload {
	pub username: String,

	pub turnstile_token: String,
}

/// A send-message intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SendPayload {
	pub text: String,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub images: Option<Vec<MediaAttachment>>,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub reply_to: Option<ReplyRef>,
}

/// An edit-message intent. Only the author's session may apply it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EditPayload {
	pub message_id: MessageId,
	pub text: String,
}

/// A reaction toggle intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ReactPayload {
	pub message_id: MessageId,
	pub emoji: String,
}

/// Mutation intents, client to router.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientIntent {
	#[serde(rename = "hello")]
	Hello(HelloPayload),

	#[serde(rename = "send-message")]
	Send(SendPayload),

	#[serde(rename = "delete-message", rename_all = "camelCase")]
	Delete { message_id: MessageId },

	#[serde(rename = "edit-message")]
	Edit(EditPayload),

	#[serde(rename = "add-reaction")]
	React(ReactPayload),
}

/// Broadcast events, router to every connected client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerEvent {
	#[serde(rename = "new-message")]
	MessageCreated(Message),

	#[serde(rename = "delete-message-public", rename_all = "camelCase")]
	MessageDeleted { message_id: MessageId },

	#[serde(rename = "edit-message", rename_all = "camelCase")]
	MessageEdited { message_id: MessageId, text: String },

	#[serde(rename = "add-reaction", rename_all = "camelCase")]
	ReactionToggled {
		message_id: MessageId,
		emoji: String,
		user: DisplayName,
	},

	#[serde(rename = "active-connections")]
	PresenceCount(u32),

	#[serde(rename = "users-update")]
	RosterSnapshot(Vec<RosterEntry>),

	/// Sent only to the offending connection, followed by forced disconnect.
	#[serde(rename = "kicked")]
	Kicked(String),

	/// Sent once on admission.
	#[serde(rename = "username")]
	AssignedName(DisplayName),
}

/// Decode one client frame, rejecting oversized input before parsing.
pub fn decode_intent(frame: &str) -> Result<ClientIntent, WireError> {
	check_frame_len(frame)?;
	Ok(serde_json::from_str(frame)?)
}

/// Encode one client frame.
pub fn encode_intent(intent: &ClientIntent) -> Result<String, WireError> {
	Ok(serde_json::to_string(intent)?)
}

/// Decode one server frame.
pub fn decode_event(frame: &str) -> Result<ServerEvent, WireError> {
	check_frame_len(frame)?;
	Ok(serde_json::from_str(frame)?)
}

/// Encode one server frame.
pub fn encode_event(event: &ServerEvent) -> Result<String, WireError> {
	Ok(serde_json::to_string(event)?)
}

#[inline]
fn check_frame_len(frame: &str) -> Result<(), WireError> {
	if frame.len() > MAX_FRAME_BYTES {
		return Err(WireError::FrameTooLarge {
			len: frame.len(),
			max: MAX_FRAME_BYTES,
		});
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn decodes_legacy_send_shape() {
		let frame = r#"{"type":"send-message","data":{"text":"hi","replyTo":null}}"#;
		match decode_intent(frame).expect("decode") {
			ClientIntent::Send(send) => {
				assert_eq!(send.text, "hi");
				assert!(send.images.is_none());
				assert!(send.reply_to.is_none());
			}
			other => panic!("expected send intent, got: {other:?}"),
		}
	}

	#[test]
	fn rejects_unknown_intent_type() {
		let frame = r#"{"type":"shutdown-room","data":{}}"#;
		assert!(decode_intent(frame).is_err());
	}

	#[test]
	fn rejects_extra_fields_in_payload() {
		let frame = r#"{"type":"send-message","data":{"text":"hi","admin":true}}"#;
		assert!(decode_intent(frame).is_err());
	}

	#[test]
	fn rejects_wrongly_typed_fields() {
		let frame = r#"{"type":"edit-message","data":{"messageId":7,"text":"x"}}"#;
		assert!(decode_intent(frame).is_err());
	}

	#[test]
	fn rejects_oversized_frame_before_parsing() {
		let frame = format!(
			r#"{{"type":"send-message","data":{{"text":"{}"}}}}"#,
			"a".repeat(MAX_FRAME_BYTES + 1)
		);
		match decode_intent(&frame) {
			Err(WireError::FrameTooLarge { len, max }) => {
				assert!(len > max);
			}
			other => panic!("expected FrameTooLarge, got: {other:?}"),
		}
	}

	#[test]
	fn presence_count_wire_shape() {
		let json = encode_event(&ServerEvent::PresenceCount(5)).expect("encode");
		assert_eq!(json, r#"{"type":"active-connections","data":5}"#);
	}
}
