#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Room-wide limits shared by server and client.
pub mod limits {
	/// Maximum simultaneous admitted connections per source address.
	pub const MAX_CONNECTIONS_PER_ADDR: u32 = 3;

	/// Maximum message text length in characters.
	pub const MAX_MESSAGE_LENGTH: usize = 5000;

	/// Maximum attachments per message.
	pub const MAX_ATTACHMENTS: usize = 4;

	/// Maximum distinct reaction emoji per message.
	pub const MAX_MESSAGE_REACTIONS: usize = 8;

	/// Sends allowed inside one spam window before the session is kicked.
	pub const SPAM_THRESHOLD: usize = 8;

	/// Trailing spam-detection window in milliseconds.
	pub const SPAM_WINDOW_MS: i64 = 10_000;
}

/// Errors for parsing domain values from strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseValueError {
	#[error("empty value")]
	Empty,
	#[error("unknown device class: {0}")]
	UnknownDeviceClass(String),
}

/// Server-assigned message identifier. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub uuid::Uuid);

impl MessageId {
	/// Create a new random message id.
	pub fn new_v4() -> Self {
		Self(uuid::Uuid::new_v4())
	}
}

impl fmt::Display for MessageId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Per-connection display name. Fixed for the lifetime of a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DisplayName(String);

impl DisplayName {
	/// Create a non-empty display name.
	pub fn new(name: impl Into<String>) -> Result<Self, ParseValueError> {
		let name = name.into();
		if name.trim().is_empty() {
			return Err(ParseValueError::Empty);
		}
		Ok(Self(name))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	pub fn into_string(self) -> String {
		self.0
	}
}

impl fmt::Display for DisplayName {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for DisplayName {
	type Err = ParseValueError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		DisplayName::new(s.to_string())
	}
}

/// Coarse device classification derived once from connection metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
	Desktop,
	Mobile,
}

impl DeviceClass {
	/// Stable string identifier.
	pub const fn as_str(self) -> &'static str {
		match self {
			DeviceClass::Desktop => "desktop",
			DeviceClass::Mobile => "mobile",
		}
	}

	/// Classify a User-Agent string. Anything that does not look like a
	/// handheld device counts as desktop.
	pub fn from_user_agent(ua: &str) -> Self {
		let ua = ua.to_ascii_lowercase();
		const MARKERS: [&str; 5] = ["mobi", "android", "iphone", "ipad", "ipod"];
		if MARKERS.iter().any(|m| ua.contains(m)) {
			DeviceClass::Mobile
		} else {
			DeviceClass::Desktop
		}
	}
}

impl fmt::Display for DeviceClass {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for DeviceClass {
	type Err = ParseValueError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let s = s.trim();
		if s.is_empty() {
			return Err(ParseValueError::Empty);
		}

		match s.to_ascii_lowercase().as_str() {
			"desktop" => Ok(DeviceClass::Desktop),
			"mobile" => Ok(DeviceClass::Mobile),
			other => Err(ParseValueError::UnknownDeviceClass(other.to_string())),
		}
	}
}

/// Uploaded-media descriptor. Opaque to the room; only its shape is checked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaAttachment {
	pub id: String,

	/// Object key in the media bucket.
	#[serde(rename = "key")]
	pub storage_key: String,

	pub url: String,

	#[serde(rename = "mime")]
	pub mime_type: String,

	#[serde(rename = "size")]
	pub byte_size: u64,
}

/// Point-in-time snapshot of a reply target. Not a live link: the target
/// may be deleted later, and the renderer resolves that at display time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyRef {
	pub id: MessageId,

	#[serde(rename = "user")]
	pub author: DisplayName,
}

/// One emoji and the users currently reacting with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
	pub emoji: String,
	pub users: Vec<DisplayName>,
}

/// Outcome of applying a reaction toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
	Added,
	Removed,
	/// A new emoji past the per-message cap. Dropped without effect.
	RejectedAtCap,
}

/// Reaction state of one message, in emoji insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Reactions(Vec<Reaction>);

impl Reactions {
	pub fn new() -> Self {
		Self(Vec::new())
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn iter(&self) -> impl Iterator<Item = &Reaction> {
		self.0.iter()
	}

	/// Find the reactor set for an emoji.
	pub fn get(&self, emoji: &str) -> Option<&Reaction> {
		self.0.iter().find(|r| r.emoji == emoji)
	}

	/// Toggle `user`'s reaction with `emoji`.
	///
	/// Both server receivers and every client re-derive toggles with this
	/// same rule, which is why broadcasts carry the acting user rather than
	/// the resulting set. Toggling an existing emoji always succeeds; adding
	/// a new emoji past `limits::MAX_MESSAGE_REACTIONS` is rejected. An
	/// emoji whose reactor set becomes empty is removed entirely.
	pub fn toggle(&mut self, emoji: &str, user: &DisplayName) -> ToggleOutcome {
		if let Some(idx) = self.0.iter().position(|r| r.emoji == emoji) {
			let reaction = &mut self.0[idx];
			if let Some(pos) = reaction.users.iter().position(|u| u == user) {
				reaction.users.remove(pos);
				if reaction.users.is_empty() {
					self.0.remove(idx);
				}
				return ToggleOutcome::Removed;
			}
			reaction.users.push(user.clone());
			return ToggleOutcome::Added;
		}

		if self.0.len() >= limits::MAX_MESSAGE_REACTIONS {
			return ToggleOutcome::RejectedAtCap;
		}

		self.0.push(Reaction {
			emoji: emoji.to_string(),
			users: vec![user.clone()],
		});
		ToggleOutcome::Added
	}
}

/// A chat message as every client projects it.
///
/// Creation order of ids is the single source of truth for display order;
/// edits and reactions mutate in place, deletes remove the id for good.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
	pub id: MessageId,

	#[serde(rename = "user")]
	pub author: DisplayName,

	pub text: String,

	/// Server-assigned Unix milliseconds. Immutable.
	#[serde(rename = "timestamp")]
	pub created_at: i64,

	/// Set on the first successful edit, never cleared.
	#[serde(default, skip_serializing_if = "core::ops::Not::not")]
	pub edited: bool,

	#[serde(rename = "replyTo", default, skip_serializing_if = "Option::is_none")]
	pub reply_to: Option<ReplyRef>,

	#[serde(rename = "images", default, skip_serializing_if = "Vec::is_empty")]
	pub attachments: Vec<MediaAttachment>,

	#[serde(default, skip_serializing_if = "Reactions::is_empty")]
	pub reactions: Reactions,
}

/// Public metadata of one connected user, as carried in roster snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
	#[serde(rename = "username")]
	pub display_name: DisplayName,

	#[serde(rename = "joinedAt")]
	pub joined_at: i64,

	pub device: DeviceClass,
}
