#![forbid(unsafe_code)]

use std::collections::HashMap;

use bonfire_domain::{DeviceClass, DisplayName, Message, MessageId, Reactions, limits};
use bonfire_protocol::{EditPayload, ReactPayload, SendPayload, ServerEvent};
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, info};

use crate::server::admission::{AdmissionError, Verifier};
use crate::server::registry::{Registry, SendVerdict};

/// Room tunables, loaded from server config.
#[derive(Debug, Clone)]
pub struct RoomConfig {
	/// Maximum simultaneous admitted connections per source address.
	pub max_connections_per_addr: u32,

	/// Maximum message text length in characters.
	pub max_message_length: usize,

	/// Sends allowed inside one spam window before the session is kicked.
	pub spam_threshold: usize,

	/// Trailing spam-detection window in milliseconds.
	pub spam_window_ms: i64,

	/// Maximum number of queued outbound events per subscriber.
	pub subscriber_queue_capacity: usize,
}

impl Default for RoomConfig {
	fn default() -> Self {
		Self {
			max_connections_per_addr: limits::MAX_CONNECTIONS_PER_ADDR,
			max_message_length: limits::MAX_MESSAGE_LENGTH,
			spam_threshold: limits::SPAM_THRESHOLD,
			spam_window_ms: limits::SPAM_WINDOW_MS,
			subscriber_queue_capacity: 256,
		}
	}
}

/// Connection-time parameters collected during the WebSocket handshake.
#[derive(Debug, Clone)]
pub struct ConnectParams {
	/// Client source address after header resolution.
	pub source_addr: String,

	/// Declared display name; empty or missing is an admission error.
	pub display_name: Option<String>,

	/// Challenge verification token.
	pub verify_token: Option<String>,

	/// Raw User-Agent, used only for device classification.
	pub user_agent: String,
}

/// Result of a successful admission.
#[derive(Debug)]
pub struct Admitted {
	pub display_name: DisplayName,

	/// This session's outbound event stream. Dropped events are gone; there
	/// is no replay.
	pub events: mpsc::Receiver<ServerEvent>,

	/// Fires at most once, with the kick reason. Out of band so a full
	/// event queue can never swallow the kick.
	pub kicked: oneshot::Receiver<String>,
}

/// The single room authority: session registry, per-address counters, and
/// subscriber fan-out behind one coarse lock.
///
/// Every mutation for every connection passes through this lock, so id
/// assignment, authorization, and fan-out order are race-free. Outbound
/// delivery stays concurrent: each subscriber drains its own bounded queue,
/// and a slow receiver only loses its own events.
pub struct Room {
	inner: Mutex<RoomState>,
	cfg: RoomConfig,
}

struct Subscriber {
	events: mpsc::Sender<ServerEvent>,

	/// Taken when the session is kicked; `None` afterwards.
	kick: Option<oneshot::Sender<String>>,
}

struct RoomState {
	registry: Registry,
	addr_counts: HashMap<String, u32>,
	subscribers: HashMap<u64, Subscriber>,
}

impl Room {
	pub fn new(cfg: RoomConfig) -> Self {
		let registry = Registry::new(cfg.spam_threshold, cfg.spam_window_ms);
		Self {
			inner: Mutex::new(RoomState {
				registry,
				addr_counts: HashMap::new(),
				subscribers: HashMap::new(),
			}),
			cfg,
		}
	}

	/// Admit a connection: validate the declared name and token, verify the
	/// token, then (and only then) count the address and create the session.
	///
	/// Verification runs outside the room lock; the counter check and the
	/// session creation are one atomic step under it.
	pub async fn connect(
		&self,
		conn_id: u64,
		params: ConnectParams,
		verifier: &dyn Verifier,
		now: i64,
	) -> Result<Admitted, AdmissionError> {
		let display_name = params
			.display_name
			.as_deref()
			.and_then(|n| DisplayName::new(n).ok())
			.ok_or(AdmissionError::MissingName)?;

		let token = params
			.verify_token
			.as_deref()
			.map(str::trim)
			.filter(|t| !t.is_empty())
			.ok_or(AdmissionError::MissingToken)?;

		if !verifier.verify(token).await {
			metrics::counter!("bonfire_server_admission_rejected_total").increment(1);
			return Err(AdmissionError::VerificationFailed);
		}

		let device = DeviceClass::from_user_agent(&params.user_agent);
		let (tx, rx) = mpsc::channel(self.cfg.subscriber_queue_capacity);
		let (kick_tx, kick_rx) = oneshot::channel();

		let mut state = self.inner.lock().await;

		let count = state.addr_counts.entry(params.source_addr.clone()).or_insert(0);
		if *count >= self.cfg.max_connections_per_addr {
			metrics::counter!("bonfire_server_admission_rejected_total").increment(1);
			return Err(AdmissionError::TooManyConnections);
		}
		*count += 1;

		state.registry.create_session(conn_id, display_name.clone(), device, now);
		state.subscribers.insert(conn_id, Subscriber {
			events: tx,
			kick: Some(kick_tx),
		});

		// The sender learns its own name the same way it will learn of its
		// own messages: through its event queue.
		send_to(&mut state, conn_id, ServerEvent::AssignedName(display_name.clone()));
		broadcast_presence(&mut state);

		info!(conn_id, name = %display_name, device = %device, "user connected");
		metrics::gauge!("bonfire_server_active_connections").set(state.registry.len() as f64);

		Ok(Admitted {
			display_name,
			events: rx,
			kicked: kick_rx,
		})
	}

	/// Tear down a connection: session, subscriber queue, address count.
	/// Messages the session authored stay in the room.
	pub async fn disconnect(&self, conn_id: u64, source_addr: &str) {
		let mut state = self.inner.lock().await;

		if state.subscribers.remove(&conn_id).is_none() {
			return;
		}
		state.registry.destroy_session(conn_id);

		if let Some(count) = state.addr_counts.get_mut(source_addr) {
			*count = count.saturating_sub(1);
			if *count == 0 {
				state.addr_counts.remove(source_addr);
			}
		}

		broadcast_presence(&mut state);

		info!(conn_id, "user disconnected");
		metrics::gauge!("bonfire_server_active_connections").set(state.registry.len() as f64);
	}

	/// Validate and broadcast a send. A spam verdict is terminal: the
	/// offender alone receives a kick notice and the message is never
	/// broadcast.
	pub async fn send(&self, conn_id: u64, payload: SendPayload, now: i64) {
		let SendPayload { text, images, reply_to } = payload;

		if text.chars().count() > self.cfg.max_message_length {
			return;
		}

		let mut attachments = images.unwrap_or_default();
		// Descriptors are opaque to the room, but a gutted one renders as a
		// broken tile everywhere; filter those instead of failing the send.
		attachments.retain(|a| !a.url.trim().is_empty() && !a.mime_type.trim().is_empty());
		if attachments.len() > limits::MAX_ATTACHMENTS {
			return;
		}
		if text.trim().is_empty() && attachments.is_empty() {
			return;
		}

		let mut state = self.inner.lock().await;

		let Some(verdict) = state.registry.record_send(conn_id, now) else {
			return;
		};

		if verdict == SendVerdict::Kicked {
			info!(conn_id, "user kicked for spamming");
			metrics::counter!("bonfire_server_kicks_total").increment(1);
			if let Some(sub) = state.subscribers.get_mut(&conn_id)
				&& let Some(kick) = sub.kick.take()
			{
				let _ = kick.send("You have been kicked for spamming.".to_string());
			}
			return;
		}

		let Some(author) = state.registry.get(conn_id).map(|s| s.display_name().clone()) else {
			return;
		};

		let message = Message {
			id: MessageId::new_v4(),
			author,
			text,
			created_at: now,
			edited: false,
			reply_to,
			attachments,
			reactions: Reactions::new(),
		};

		state.registry.note_authored(conn_id, message.id);
		metrics::counter!("bonfire_server_messages_total").increment(1);

		fan_out(&mut state, ServerEvent::MessageCreated(message));
	}

	/// Delete a message. Silently ignored unless `conn_id` authored it; the
	/// router does not reveal whether the id exists at all.
	pub async fn delete(&self, conn_id: u64, message_id: MessageId) {
		let mut state = self.inner.lock().await;

		if !state.registry.authorize_mutation(conn_id, message_id) {
			debug!(conn_id, %message_id, "unauthorized delete ignored");
			return;
		}

		state.registry.forget_authored(conn_id, message_id);
		fan_out(&mut state, ServerEvent::MessageDeleted { message_id });
	}

	/// Edit a message's text. Silently ignored unless authorized.
	pub async fn edit(&self, conn_id: u64, payload: EditPayload) {
		let EditPayload { message_id, text } = payload;

		if text.trim().is_empty() || text.chars().count() > self.cfg.max_message_length {
			return;
		}

		let mut state = self.inner.lock().await;

		if !state.registry.authorize_mutation(conn_id, message_id) {
			debug!(conn_id, %message_id, "unauthorized edit ignored");
			return;
		}

		fan_out(&mut state, ServerEvent::MessageEdited { message_id, text });
	}

	/// Relay a reaction toggle. The broadcast carries the acting user, not
	/// the resulting set; every receiver re-derives the toggle with the
	/// shared domain rule, which keeps repeated clicks idempotent-safe.
	pub async fn react(&self, conn_id: u64, payload: ReactPayload) {
		let ReactPayload { message_id, emoji } = payload;

		if emoji.trim().is_empty() {
			return;
		}

		let mut state = self.inner.lock().await;

		let Some(user) = state.registry.get(conn_id).map(|s| s.display_name().clone()) else {
			return;
		};

		fan_out(&mut state, ServerEvent::ReactionToggled { message_id, emoji, user });
	}

	/// Current connection count, for readiness reporting.
	pub async fn active_connections(&self) -> usize {
		self.inner.lock().await.registry.len()
	}
}

/// Queue an event for one subscriber. A full queue drops the event for that
/// subscriber only: there is no replay path for a peer that falls behind.
fn send_to(state: &mut RoomState, conn_id: u64, event: ServerEvent) {
	let Some(sub) = state.subscribers.get(&conn_id) else {
		return;
	};

	if let Err(mpsc::error::TrySendError::Full(_)) = sub.events.try_send(event) {
		metrics::counter!("bonfire_server_fanout_dropped_total").increment(1);
		debug!(conn_id, "subscriber queue full, event dropped");
	}
}

/// Fan an event out to every connected session, the sender included.
fn fan_out(state: &mut RoomState, event: ServerEvent) {
	let mut dropped: u64 = 0;

	for (&conn_id, sub) in &state.subscribers {
		match sub.events.try_send(event.clone()) {
			Ok(()) => {}
			Err(mpsc::error::TrySendError::Full(_)) => {
				dropped += 1;
				debug!(conn_id, "subscriber queue full, event dropped");
			}
			// Pruned on disconnect; nothing to do here.
			Err(mpsc::error::TrySendError::Closed(_)) => {}
		}
	}

	if dropped > 0 {
		metrics::counter!("bonfire_server_fanout_dropped_total").increment(dropped);
	}
}

/// Broadcast the active-connection count and a full roster snapshot.
/// Always a snapshot, never a diff.
fn broadcast_presence(state: &mut RoomState) {
	let count = state.registry.len() as u32;
	let roster = state.registry.roster();

	fan_out(state, ServerEvent::PresenceCount(count));
	fan_out(state, ServerEvent::RosterSnapshot(roster));
}
