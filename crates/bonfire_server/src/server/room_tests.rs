#![forbid(unsafe_code)]

use bonfire_domain::MessageId;
use bonfire_protocol::{EditPayload, ReactPayload, SendPayload, ServerEvent};
use tokio::sync::mpsc::error::TryRecvError;

use crate::server::admission::{AdmissionError, AllowAll, Verifier};
use crate::server::room::{Admitted, ConnectParams, Room, RoomConfig};

struct DenyAll;

#[async_trait::async_trait]
impl Verifier for DenyAll {
	async fn verify(&self, _token: &str) -> bool {
		false
	}
}

fn params(name: &str, addr: &str) -> ConnectParams {
	ConnectParams {
		source_addr: addr.to_string(),
		display_name: Some(name.to_string()),
		verify_token: Some("tok".to_string()),
		user_agent: "test-agent".to_string(),
	}
}

async fn admit(room: &Room, conn_id: u64, name: &str, addr: &str) -> Admitted {
	room.connect(conn_id, params(name, addr), &AllowAll, 1_000)
		.await
		.expect("admission should succeed")
}

fn drain(admitted: &mut Admitted) -> Vec<ServerEvent> {
	let mut out = Vec::new();
	loop {
		match admitted.events.try_recv() {
			Ok(ev) => out.push(ev),
			Err(TryRecvError::Empty | TryRecvError::Disconnected) => return out,
		}
	}
}

fn send_payload(text: &str) -> SendPayload {
	SendPayload {
		text: text.to_string(),
		images: None,
		reply_to: None,
	}
}

#[tokio::test]
async fn every_subscriber_sees_the_same_order() {
	let room = Room::new(RoomConfig::default());
	let mut a = admit(&room, 1, "alice", "10.0.0.1").await;
	let mut b = admit(&room, 2, "bob", "10.0.0.2").await;

	room.send(1, send_payload("first"), 2_000).await;
	room.send(2, send_payload("second"), 2_001).await;
	room.send(1, send_payload("third"), 2_002).await;

	let texts = |events: Vec<ServerEvent>| -> Vec<String> {
		events
			.into_iter()
			.filter_map(|ev| match ev {
				ServerEvent::MessageCreated(m) => Some(m.text),
				_ => None,
			})
			.collect()
	};

	assert_eq!(texts(drain(&mut a)), ["first", "second", "third"]);
	assert_eq!(texts(drain(&mut b)), ["first", "second", "third"]);
}

#[tokio::test]
async fn sender_receives_its_own_message_through_the_stream() {
	let room = Room::new(RoomConfig::default());
	let mut a = admit(&room, 1, "alice", "10.0.0.1").await;

	room.send(1, send_payload("hello room"), 2_000).await;

	let events = drain(&mut a);
	let created = events
		.iter()
		.find_map(|ev| match ev {
			ServerEvent::MessageCreated(m) => Some(m),
			_ => None,
		})
		.expect("sender should see its own message");
	assert_eq!(created.text, "hello room");
	assert_eq!(created.author.as_str(), "alice");
	assert!(!created.edited);
}

#[tokio::test]
async fn admission_requires_name_and_token() {
	let room = Room::new(RoomConfig::default());

	let mut no_name = params("alice", "10.0.0.1");
	no_name.display_name = None;
	let err = room.connect(1, no_name, &AllowAll, 1_000).await.unwrap_err();
	assert!(matches!(err, AdmissionError::MissingName));

	let mut blank_token = params("alice", "10.0.0.1");
	blank_token.verify_token = Some("   ".to_string());
	let err = room.connect(1, blank_token, &AllowAll, 1_000).await.unwrap_err();
	assert!(matches!(err, AdmissionError::MissingToken));
}

#[tokio::test]
async fn failed_verification_does_not_consume_an_address_slot() {
	let cfg = RoomConfig {
		max_connections_per_addr: 1,
		..RoomConfig::default()
	};
	let room = Room::new(cfg);

	for attempt in 0..5 {
		let err = room
			.connect(attempt, params("alice", "10.0.0.1"), &DenyAll, 1_000)
			.await
			.unwrap_err();
		assert!(matches!(err, AdmissionError::VerificationFailed));
	}

	// The slot is still free after any number of failed attempts.
	admit(&room, 99, "alice", "10.0.0.1").await;
}

#[tokio::test]
async fn per_address_cap_is_enforced_and_released() {
	let cfg = RoomConfig {
		max_connections_per_addr: 3,
		..RoomConfig::default()
	};
	let room = Room::new(cfg);

	let _a = admit(&room, 1, "a", "10.0.0.1").await;
	let _b = admit(&room, 2, "b", "10.0.0.1").await;
	let _c = admit(&room, 3, "c", "10.0.0.1").await;

	let err = room.connect(4, params("d", "10.0.0.1"), &AllowAll, 1_000).await.unwrap_err();
	assert!(matches!(err, AdmissionError::TooManyConnections));

	// A different address is unaffected.
	let _e = admit(&room, 5, "e", "10.0.0.2").await;

	// Disconnecting frees the slot.
	room.disconnect(3, "10.0.0.1").await;
	let _f = admit(&room, 6, "f", "10.0.0.1").await;
}

#[tokio::test]
async fn spam_kick_is_targeted_and_the_trigger_is_never_broadcast() {
	let cfg = RoomConfig {
		spam_threshold: 2,
		spam_window_ms: 10_000,
		..RoomConfig::default()
	};
	let room = Room::new(cfg);
	let mut offender = admit(&room, 1, "spammer", "10.0.0.1").await;
	let mut witness = admit(&room, 2, "witness", "10.0.0.2").await;

	room.send(1, send_payload("one"), 1_000).await;
	room.send(1, send_payload("two"), 1_001).await;
	room.send(1, send_payload("three"), 1_002).await;

	let reason = offender.kicked.try_recv().expect("offender receives the kick notice");
	assert!(reason.contains("spamming"));

	let witness_events = drain(&mut witness);
	let seen: Vec<&str> = witness_events
		.iter()
		.filter_map(|ev| match ev {
			ServerEvent::MessageCreated(m) => Some(m.text.as_str()),
			_ => None,
		})
		.collect();
	assert_eq!(seen, ["one", "two"], "the kick trigger must not be broadcast");
	assert!(witness.kicked.try_recv().is_err(), "the kick goes only to the offender");
}

#[tokio::test]
async fn kick_is_delivered_even_when_the_event_queue_is_full() {
	let cfg = RoomConfig {
		spam_threshold: 1,
		subscriber_queue_capacity: 1,
		..RoomConfig::default()
	};
	let room = Room::new(cfg);
	// The admission events already fill the one-slot queue.
	let mut offender = admit(&room, 1, "spammer", "10.0.0.1").await;

	room.send(1, send_payload("one"), 1_000).await;
	room.send(1, send_payload("two"), 1_001).await;

	let reason = offender
		.kicked
		.try_recv()
		.expect("the kick must not depend on queue space");
	assert!(reason.contains("spamming"));
}

#[tokio::test]
async fn unauthorized_edit_and_delete_are_silently_ignored() {
	let room = Room::new(RoomConfig::default());
	let mut a = admit(&room, 1, "alice", "10.0.0.1").await;
	let mut b = admit(&room, 2, "bob", "10.0.0.2").await;

	room.send(1, send_payload("mine"), 2_000).await;
	let id = drain(&mut a)
		.into_iter()
		.find_map(|ev| match ev {
			ServerEvent::MessageCreated(m) => Some(m.id),
			_ => None,
		})
		.expect("message created");
	drain(&mut b);

	// Bob did not author the message; nothing is broadcast.
	room.delete(2, id).await;
	room.edit(
		2,
		EditPayload {
			message_id: id,
			text: "hijacked".to_string(),
		},
	)
	.await;
	assert!(drain(&mut a).is_empty());
	assert!(drain(&mut b).is_empty());

	// Alice can edit, then delete. A deleted id is no longer editable.
	room.edit(
		1,
		EditPayload {
			message_id: id,
			text: "mine, revised".to_string(),
		},
	)
	.await;
	room.delete(1, id).await;
	room.edit(
		1,
		EditPayload {
			message_id: id,
			text: "too late".to_string(),
		},
	)
	.await;

	let events = drain(&mut b);
	assert_eq!(events.len(), 2);
	assert!(matches!(&events[0], ServerEvent::MessageEdited { text, .. } if text == "mine, revised"));
	assert!(matches!(&events[1], ServerEvent::MessageDeleted { message_id } if *message_id == id));
}

#[tokio::test]
async fn oversized_and_empty_sends_are_dropped() {
	let cfg = RoomConfig {
		max_message_length: 10,
		..RoomConfig::default()
	};
	let room = Room::new(cfg);
	let mut a = admit(&room, 1, "alice", "10.0.0.1").await;

	room.send(1, send_payload("this is far too long"), 2_000).await;
	room.send(1, send_payload("   "), 2_001).await;
	room.send(1, send_payload("ok"), 2_002).await;

	let created: Vec<String> = drain(&mut a)
		.into_iter()
		.filter_map(|ev| match ev {
			ServerEvent::MessageCreated(m) => Some(m.text),
			_ => None,
		})
		.collect();
	assert_eq!(created, ["ok"]);
}

#[tokio::test]
async fn reaction_relay_carries_the_acting_user() {
	let room = Room::new(RoomConfig::default());
	let mut a = admit(&room, 1, "alice", "10.0.0.1").await;
	let mut b = admit(&room, 2, "bob", "10.0.0.2").await;
	drain(&mut a);
	drain(&mut b);

	let id = MessageId::new_v4();
	room.react(
		2,
		ReactPayload {
			message_id: id,
			emoji: "🔥".to_string(),
		},
	)
	.await;

	for events in [drain(&mut a), drain(&mut b)] {
		let (got_id, emoji, user) = events
			.into_iter()
			.find_map(|ev| match ev {
				ServerEvent::ReactionToggled { message_id, emoji, user } => Some((message_id, emoji, user)),
				_ => None,
			})
			.expect("reaction relayed to everyone");
		assert_eq!(got_id, id);
		assert_eq!(emoji, "🔥");
		assert_eq!(user.as_str(), "bob");
	}
}

#[tokio::test]
async fn slow_subscriber_loses_events_without_blocking_the_room() {
	let cfg = RoomConfig {
		subscriber_queue_capacity: 2,
		// Ten rapid sends must stay below the kick threshold here.
		spam_threshold: 100,
		..RoomConfig::default()
	};
	let room = Room::new(cfg);
	let mut slow = admit(&room, 1, "slow", "10.0.0.1").await;
	let mut fast = admit(&room, 2, "fast", "10.0.0.2").await;
	// Leave slow's queue full of admission-time presence events.
	drain(&mut fast);

	let mut fast_count = 0usize;
	for i in 0..10 {
		room.send(2, send_payload(&format!("msg {i}")), 2_000 + i).await;
		// A fast subscriber keeps draining and never falls behind.
		fast_count += drain(&mut fast)
			.into_iter()
			.filter(|ev| matches!(ev, ServerEvent::MessageCreated(_)))
			.count();
	}
	assert_eq!(fast_count, 10, "a fast subscriber sees everything");

	let slow_events = drain(&mut slow);
	assert!(slow_events.len() <= 2, "the slow queue never grows past its bound");
}

#[tokio::test]
async fn presence_snapshots_track_connect_and_disconnect() {
	let room = Room::new(RoomConfig::default());
	let mut a = admit(&room, 1, "alice", "10.0.0.1").await;
	drain(&mut a);

	let _b = admit(&room, 2, "bob", "10.0.0.2").await;
	let after_join = drain(&mut a);
	assert!(after_join.iter().any(|ev| matches!(ev, ServerEvent::PresenceCount(2))));
	let roster = after_join
		.iter()
		.find_map(|ev| match ev {
			ServerEvent::RosterSnapshot(r) => Some(r),
			_ => None,
		})
		.expect("roster snapshot after join");
	let mut names: Vec<&str> = roster.iter().map(|e| e.display_name.as_str()).collect();
	names.sort_unstable();
	assert_eq!(names, ["alice", "bob"]);

	room.disconnect(2, "10.0.0.2").await;
	let after_leave = drain(&mut a);
	assert!(after_leave.iter().any(|ev| matches!(ev, ServerEvent::PresenceCount(1))));
	assert_eq!(room.active_connections().await, 1);
}
