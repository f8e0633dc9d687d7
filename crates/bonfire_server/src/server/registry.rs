#![forbid(unsafe_code)]

use std::collections::{HashMap, HashSet, VecDeque};

use bonfire_domain::{DeviceClass, DisplayName, MessageId, RosterEntry};

/// Verdict of a single send attempt against the spam window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendVerdict {
	Allowed,
	/// Terminal: the session is disconnected, the triggering send is never
	/// broadcast.
	Kicked,
}

/// Server-side state for one live connection.
#[derive(Debug)]
pub struct Session {
	display_name: DisplayName,
	device: DeviceClass,
	joined_at: i64,

	/// Ids this session created; the sole basis for edit/delete authority.
	authored: HashSet<MessageId>,

	/// Send timestamps inside the trailing spam window, oldest first.
	recent_sends: VecDeque<i64>,
}

impl Session {
	pub fn display_name(&self) -> &DisplayName {
		&self.display_name
	}
}

/// The authoritative map from live connection to session.
///
/// Sessions are created on admission and destroyed on disconnect; messages
/// a session authored outlive it.
#[derive(Debug)]
pub struct Registry {
	sessions: HashMap<u64, Session>,
	spam_threshold: usize,
	spam_window_ms: i64,
}

impl Registry {
	pub fn new(spam_threshold: usize, spam_window_ms: i64) -> Self {
		Self {
			sessions: HashMap::new(),
			spam_threshold,
			spam_window_ms,
		}
	}

	pub fn len(&self) -> usize {
		self.sessions.len()
	}

	pub fn is_empty(&self) -> bool {
		self.sessions.is_empty()
	}

	pub fn get(&self, conn_id: u64) -> Option<&Session> {
		self.sessions.get(&conn_id)
	}

	/// Register an admitted connection. The display name is fixed for the
	/// session's lifetime.
	pub fn create_session(&mut self, conn_id: u64, display_name: DisplayName, device: DeviceClass, now: i64) {
		self.sessions.insert(conn_id, Session {
			display_name,
			device,
			joined_at: now,
			authored: HashSet::new(),
			recent_sends: VecDeque::new(),
		});
	}

	/// Drop a session. Does not touch messages it authored.
	pub fn destroy_session(&mut self, conn_id: u64) {
		self.sessions.remove(&conn_id);
	}

	/// True iff the session exists and authored `message_id`.
	pub fn authorize_mutation(&self, conn_id: u64, message_id: MessageId) -> bool {
		self.sessions
			.get(&conn_id)
			.map(|s| s.authored.contains(&message_id))
			.unwrap_or(false)
	}

	pub fn note_authored(&mut self, conn_id: u64, message_id: MessageId) {
		if let Some(session) = self.sessions.get_mut(&conn_id) {
			session.authored.insert(message_id);
		}
	}

	pub fn forget_authored(&mut self, conn_id: u64, message_id: MessageId) {
		if let Some(session) = self.sessions.get_mut(&conn_id) {
			session.authored.remove(&message_id);
		}
	}

	/// Record one send attempt. Prunes the trailing window, appends `now`,
	/// and kicks when the window exceeds the threshold. Must be called
	/// exactly once per attempt, before the message reaches the broadcast
	/// stream.
	pub fn record_send(&mut self, conn_id: u64, now: i64) -> Option<SendVerdict> {
		let session = self.sessions.get_mut(&conn_id)?;

		while let Some(&oldest) = session.recent_sends.front() {
			if now - oldest >= self.spam_window_ms {
				session.recent_sends.pop_front();
			} else {
				break;
			}
		}

		session.recent_sends.push_back(now);

		if session.recent_sends.len() > self.spam_threshold {
			Some(SendVerdict::Kicked)
		} else {
			Some(SendVerdict::Allowed)
		}
	}

	/// Full snapshot of connected users' public metadata.
	pub fn roster(&self) -> Vec<RosterEntry> {
		self.sessions
			.values()
			.map(|s| RosterEntry {
				display_name: s.display_name.clone(),
				joined_at: s.joined_at,
				device: s.device,
			})
			.collect()
	}
}
