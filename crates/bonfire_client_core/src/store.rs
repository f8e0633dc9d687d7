#![forbid(unsafe_code)]

use std::collections::HashMap;

use bonfire_domain::{DisplayName, Message, MessageId, ReplyRef, RosterEntry, ToggleOutcome};
use bonfire_protocol::ServerEvent;
use tracing::debug;

/// Running per-author stats, shown next to the roster.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuthorStats {
	pub message_count: u64,
	pub last_active: i64,
}

/// What a reply preview should show, resolved at render time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyDisplay<'a> {
	/// The referenced message still exists.
	Resolved(&'a Message),
	/// The referenced message is gone; only the captured author survives.
	Deleted { author: &'a DisplayName },
}

/// Incremental local mirror of the room: every message this session has
/// witnessed, in arrival order, plus presence and our own identity.
///
/// There is no replay on the wire, so this store is the only message
/// history that exists for a session. It starts empty and dies with the
/// process.
#[derive(Debug, Default)]
pub struct ChatStore {
	messages: HashMap<MessageId, Message>,
	order: Vec<MessageId>,
	index: HashMap<MessageId, usize>,

	author_stats: HashMap<DisplayName, AuthorStats>,
	roster: Vec<RosterEntry>,
	user_count: u32,

	local_name: Option<DisplayName>,
	connected: bool,
	kicked: Option<String>,

	/// Bumped on every visible change; equal revisions mean nothing to
	/// re-render.
	revision: u64,
}

impl ChatStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn len(&self) -> usize {
		self.order.len()
	}

	pub fn is_empty(&self) -> bool {
		self.order.is_empty()
	}

	pub fn revision(&self) -> u64 {
		self.revision
	}

	pub fn order(&self) -> &[MessageId] {
		&self.order
	}

	pub fn message(&self, id: MessageId) -> Option<&Message> {
		self.messages.get(&id)
	}

	pub fn message_at(&self, index: usize) -> Option<&Message> {
		self.order.get(index).and_then(|id| self.messages.get(id))
	}

	pub fn index_of(&self, id: MessageId) -> Option<usize> {
		self.index.get(&id).copied()
	}

	pub fn roster(&self) -> &[RosterEntry] {
		&self.roster
	}

	pub fn user_count(&self) -> u32 {
		self.user_count
	}

	pub fn author_stats(&self, author: &DisplayName) -> Option<AuthorStats> {
		self.author_stats.get(author).copied()
	}

	pub fn local_name(&self) -> Option<&DisplayName> {
		self.local_name.as_ref()
	}

	pub fn is_connected(&self) -> bool {
		self.connected
	}

	pub fn kicked_reason(&self) -> Option<&str> {
		self.kicked.as_deref()
	}

	/// True when `message` was authored by this session.
	pub fn is_local_author(&self, message: &Message) -> bool {
		self.local_name.as_ref() == Some(&message.author)
	}

	/// Route one broadcast event into the store.
	pub fn apply_event(&mut self, event: ServerEvent) {
		match event {
			ServerEvent::MessageCreated(message) => self.apply_create(message),
			ServerEvent::MessageDeleted { message_id } => self.apply_delete(message_id),
			ServerEvent::MessageEdited { message_id, text } => self.apply_edit(message_id, text),
			ServerEvent::ReactionToggled { message_id, emoji, user } => self.apply_reaction(message_id, &emoji, &user),
			ServerEvent::PresenceCount(count) => {
				if self.user_count != count {
					self.user_count = count;
					self.revision += 1;
				}
			}
			ServerEvent::RosterSnapshot(roster) => {
				self.roster = roster;
				self.revision += 1;
			}
			ServerEvent::Kicked(reason) => {
				self.kicked = Some(reason);
				self.connected = false;
				self.revision += 1;
			}
			ServerEvent::AssignedName(name) => {
				self.local_name = Some(name);
				self.revision += 1;
			}
		}
	}

	/// Append a new message. A duplicate id is dropped, not re-appended.
	pub fn apply_create(&mut self, message: Message) {
		if self.messages.contains_key(&message.id) {
			debug!(id = %message.id, "duplicate message id ignored");
			return;
		}

		let stats = self.author_stats.entry(message.author.clone()).or_default();
		stats.message_count += 1;
		stats.last_active = message.created_at;

		self.index.insert(message.id, self.order.len());
		self.order.push(message.id);
		self.messages.insert(message.id, message);
		self.revision += 1;
	}

	/// Remove a message by id. Unknown ids are no-ops. Reply references held
	/// by other messages are left dangling; `resolve_reply` handles them.
	pub fn apply_delete(&mut self, id: MessageId) {
		let Some(idx) = self.index.remove(&id) else {
			return;
		};

		self.messages.remove(&id);
		self.order.remove(idx);
		for later in &self.order[idx..] {
			if let Some(slot) = self.index.get_mut(later) {
				*slot -= 1;
			}
		}
		self.revision += 1;
	}

	/// Replace a message's text and mark it edited. Position, reactions and
	/// the reply reference are untouched.
	pub fn apply_edit(&mut self, id: MessageId, text: String) {
		let Some(message) = self.messages.get_mut(&id) else {
			return;
		};

		message.text = text;
		message.edited = true;
		self.revision += 1;
	}

	/// Re-derive a relayed reaction toggle with the shared domain rule.
	pub fn apply_reaction(&mut self, id: MessageId, emoji: &str, user: &DisplayName) {
		let Some(message) = self.messages.get_mut(&id) else {
			return;
		};

		match message.reactions.toggle(emoji, user) {
			ToggleOutcome::Added | ToggleOutcome::Removed => self.revision += 1,
			ToggleOutcome::RejectedAtCap => {}
		}
	}

	/// Resolve a reply reference against the live log.
	pub fn resolve_reply<'a>(&'a self, reply: &'a ReplyRef) -> ReplyDisplay<'a> {
		match self.messages.get(&reply.id) {
			Some(message) => ReplyDisplay::Resolved(message),
			None => ReplyDisplay::Deleted { author: &reply.author },
		}
	}

	pub fn set_connected(&mut self, connected: bool) {
		if self.connected != connected {
			self.connected = connected;
			self.revision += 1;
		}
	}
}

#[cfg(test)]
mod tests {
	use bonfire_domain::{Reactions, limits};

	use super::*;

	fn name(s: &str) -> DisplayName {
		DisplayName::new(s).expect("valid name")
	}

	fn message(author: &str, text: &str, at: i64) -> Message {
		Message {
			id: MessageId::new_v4(),
			author: name(author),
			text: text.to_string(),
			created_at: at,
			edited: false,
			reply_to: None,
			attachments: Vec::new(),
			reactions: Reactions::new(),
		}
	}

	#[test]
	fn create_appends_in_arrival_order_and_tracks_stats() {
		let mut store = ChatStore::new();
		let m1 = message("alice", "one", 100);
		let m2 = message("bob", "two", 200);
		let m3 = message("alice", "three", 300);
		let ids = [m1.id, m2.id, m3.id];

		store.apply_create(m1);
		store.apply_create(m2);
		store.apply_create(m3);

		assert_eq!(store.order(), &ids);
		assert_eq!(store.index_of(ids[1]), Some(1));

		let alice = store.author_stats(&name("alice")).expect("stats");
		assert_eq!(alice.message_count, 2);
		assert_eq!(alice.last_active, 300);
	}

	#[test]
	fn duplicate_create_does_not_bump_revision() {
		let mut store = ChatStore::new();
		let m = message("alice", "once", 100);
		store.apply_create(m.clone());
		let rev = store.revision();

		store.apply_create(m);
		assert_eq!(store.revision(), rev);
		assert_eq!(store.len(), 1);
	}

	#[test]
	fn delete_reindexes_later_messages() {
		let mut store = ChatStore::new();
		let messages: Vec<Message> = (0..4).map(|i| message("alice", &format!("m{i}"), i)).collect();
		let ids: Vec<MessageId> = messages.iter().map(|m| m.id).collect();
		for m in messages {
			store.apply_create(m);
		}

		store.apply_delete(ids[1]);

		assert_eq!(store.order(), &[ids[0], ids[2], ids[3]]);
		assert_eq!(store.index_of(ids[2]), Some(1));
		assert_eq!(store.index_of(ids[3]), Some(2));
		assert_eq!(store.index_of(ids[1]), None);
	}

	#[test]
	fn unknown_id_mutations_are_no_ops_without_revision_bump() {
		let mut store = ChatStore::new();
		store.apply_create(message("alice", "hi", 100));
		let rev = store.revision();

		let ghost = MessageId::new_v4();
		store.apply_delete(ghost);
		store.apply_edit(ghost, "nope".to_string());
		store.apply_reaction(ghost, "🔥", &name("bob"));

		assert_eq!(store.revision(), rev);
	}

	#[test]
	fn edit_preserves_position_reactions_and_reply() {
		let mut store = ChatStore::new();
		let first = message("alice", "first", 100);
		let mut second = message("bob", "second", 200);
		second.reply_to = Some(ReplyRef {
			id: first.id,
			author: first.author.clone(),
		});
		let (first_id, second_id) = (first.id, second.id);
		store.apply_create(first);
		store.apply_create(second);
		store.apply_reaction(second_id, "👍", &name("alice"));

		store.apply_edit(second_id, "second, revised".to_string());

		assert_eq!(store.index_of(second_id), Some(1));
		let edited = store.message(second_id).expect("still present");
		assert_eq!(edited.text, "second, revised");
		assert!(edited.edited);
		assert!(!edited.reactions.is_empty());
		assert_eq!(edited.reply_to.as_ref().map(|r| r.id), Some(first_id));
	}

	#[test]
	fn reaction_toggle_is_inverse_and_cap_changes_nothing() {
		let mut store = ChatStore::new();
		let m = message("alice", "hi", 100);
		let id = m.id;
		store.apply_create(m);

		store.apply_reaction(id, "🔥", &name("bob"));
		assert!(!store.message(id).expect("present").reactions.is_empty());
		store.apply_reaction(id, "🔥", &name("bob"));
		assert!(store.message(id).expect("present").reactions.is_empty());

		for i in 0..limits::MAX_MESSAGE_REACTIONS {
			store.apply_reaction(id, &format!("e{i}"), &name("bob"));
		}
		let rev = store.revision();
		store.apply_reaction(id, "one-too-many", &name("bob"));
		assert_eq!(store.revision(), rev);
	}

	#[test]
	fn dangling_reply_resolves_to_deleted_with_captured_author() {
		let mut store = ChatStore::new();
		let original = message("alice", "delete me", 100);
		let reply_ref = ReplyRef {
			id: original.id,
			author: original.author.clone(),
		};
		let original_id = original.id;
		store.apply_create(original);

		assert!(matches!(store.resolve_reply(&reply_ref), ReplyDisplay::Resolved(_)));

		store.apply_delete(original_id);
		match store.resolve_reply(&reply_ref) {
			ReplyDisplay::Deleted { author } => assert_eq!(author.as_str(), "alice"),
			other => panic!("expected deleted fallback, got {other:?}"),
		}
	}

	#[test]
	fn events_route_presence_identity_and_kick() {
		let mut store = ChatStore::new();
		store.set_connected(true);

		store.apply_event(ServerEvent::AssignedName(name("SwiftOtter")));
		assert_eq!(store.local_name().map(DisplayName::as_str), Some("SwiftOtter"));

		store.apply_event(ServerEvent::PresenceCount(3));
		assert_eq!(store.user_count(), 3);
		let rev = store.revision();
		store.apply_event(ServerEvent::PresenceCount(3));
		assert_eq!(store.revision(), rev, "unchanged count is not a new revision");

		store.apply_event(ServerEvent::Kicked("You have been kicked for spamming.".to_string()));
		assert!(!store.is_connected());
		assert_eq!(store.kicked_reason(), Some("You have been kicked for spamming."));
	}
}
