#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use anyhow::Context as _;
use bonfire_protocol::{ClientIntent, ServerEvent, decode_intent, encode_event};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt as _, StreamExt as _};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{WebSocketStream, accept_hdr_async};
use tracing::{debug, warn};

use crate::server::admission::{Verifier, source_addr};
use crate::server::room::{ConnectParams, Room};
use crate::util::time::unix_ms_now;

/// Per-connection tunables.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
	/// How long a fresh socket may wait before sending its hello frame.
	pub hello_timeout: Duration,

	/// Grace period between the kick notice and the forced disconnect, so
	/// the notice has a chance to flush.
	pub kick_disconnect_delay: Duration,
}

impl Default for ConnectionSettings {
	fn default() -> Self {
		Self {
			hello_timeout: Duration::from_secs(10),
			kick_disconnect_delay: Duration::from_millis(150),
		}
	}
}

/// Headers captured during the WebSocket upgrade.
#[derive(Debug, Default)]
struct HandshakeInfo {
	user_agent: String,
	cf_connecting_ip: Option<String>,
	x_forwarded_for: Option<String>,
}

/// Drive one client connection: upgrade, hello, admission, then the
/// intent/event pump until either side goes away.
pub async fn handle_connection<S>(
	conn_id: u64,
	stream: S,
	peer_ip: String,
	room: Arc<Room>,
	verifier: Arc<dyn Verifier>,
	settings: ConnectionSettings,
) -> anyhow::Result<()>
where
	S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
	let captured = Arc::new(StdMutex::new(HandshakeInfo::default()));

	let cb_info = Arc::clone(&captured);
	let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
		if let Ok(mut info) = cb_info.lock() {
			let header = |name: &str| {
				req.headers()
					.get(name)
					.and_then(|v| v.to_str().ok())
					.map(|v| v.to_string())
			};
			info.user_agent = header("user-agent").unwrap_or_default();
			info.cf_connecting_ip = header("cf-connecting-ip");
			info.x_forwarded_for = header("x-forwarded-for");
		}
		Ok(resp)
	};

	let mut ws = accept_hdr_async(stream, callback).await.context("websocket handshake")?;

	let info = {
		let guard = captured.lock().map_err(|_| anyhow::anyhow!("handshake header capture poisoned"))?;
		HandshakeInfo {
			user_agent: guard.user_agent.clone(),
			cf_connecting_ip: guard.cf_connecting_ip.clone(),
			x_forwarded_for: guard.x_forwarded_for.clone(),
		}
	};

	let addr = source_addr(info.cf_connecting_ip.as_deref(), info.x_forwarded_for.as_deref(), &peer_ip);

	// The first frame must be a hello; anything else never reaches the room.
	let hello = match timeout(settings.hello_timeout, ws.next()).await {
		Ok(Some(Ok(WsMessage::Text(frame)))) => match decode_intent(frame.as_str()) {
			Ok(ClientIntent::Hello(hello)) => hello,
			_ => {
				debug!(conn_id, "first frame was not a hello");
				close_with_reason(&mut ws, "hello required").await;
				return Ok(());
			}
		},
		Ok(_) => {
			close_with_reason(&mut ws, "hello required").await;
			return Ok(());
		}
		Err(_) => {
			debug!(conn_id, "hello timed out");
			return Ok(());
		}
	};

	let params = ConnectParams {
		source_addr: addr.clone(),
		display_name: Some(hello.username),
		verify_token: Some(hello.turnstile_token),
		user_agent: info.user_agent,
	};

	let admitted = match room.connect(conn_id, params, verifier.as_ref(), unix_ms_now()).await {
		Ok(admitted) => admitted,
		Err(e) => {
			debug!(conn_id, addr = %addr, reason = %e, "admission rejected");
			close_with_reason(&mut ws, &e.to_string()).await;
			return Ok(());
		}
	};
	debug!(conn_id, name = %admitted.display_name, "session admitted");

	let (sink, stream) = ws.split();
	let mut writer = tokio::spawn(pump_events(
		sink,
		admitted.events,
		admitted.kicked,
		settings.kick_disconnect_delay,
	));

	let writer_done = tokio::select! {
		_ = &mut writer => true,
		_ = pump_intents(conn_id, stream, &room) => false,
	};

	room.disconnect(conn_id, &addr).await;

	// Disconnect dropped this session's sender, so the writer drains and
	// exits on its own; don't wait forever on a wedged socket.
	if !writer_done && timeout(Duration::from_secs(1), &mut writer).await.is_err() {
		writer.abort();
	}

	Ok(())
}

async fn close_with_reason<S>(ws: &mut WebSocketStream<S>, reason: &str)
where
	S: AsyncRead + AsyncWrite + Unpin,
{
	let frame = CloseFrame {
		code: CloseCode::Policy,
		reason: reason.to_string().into(),
	};
	if let Err(e) = ws.close(Some(frame)).await {
		debug!(error = %e, "close handshake failed");
	}
}

/// Forward queued events to the socket. The kick signal arrives out of
/// band, so it cannot be lost behind a full event queue: the notice is the
/// last frame a kicked session ever sees, flushed, then the grace period,
/// then close.
async fn pump_events<S>(
	mut sink: SplitSink<WebSocketStream<S>, WsMessage>,
	mut events: mpsc::Receiver<ServerEvent>,
	mut kicked: oneshot::Receiver<String>,
	kick_delay: Duration,
) where
	S: AsyncRead + AsyncWrite + Unpin,
{
	loop {
		tokio::select! {
			reason = &mut kicked => {
				if let Ok(reason) = reason {
					match encode_event(&ServerEvent::Kicked(reason)) {
						Ok(frame) => {
							let _ = sink.send(WsMessage::Text(frame.into())).await;
							tokio::time::sleep(kick_delay).await;
						}
						Err(e) => warn!(error = %e, "failed to encode kick notice"),
					}
					let _ = sink.close().await;
				}
				// A dropped sender means the session is being torn down.
				break;
			}
			maybe_event = events.recv() => {
				let Some(event) = maybe_event else {
					break;
				};

				let frame = match encode_event(&event) {
					Ok(frame) => frame,
					Err(e) => {
						warn!(error = %e, "failed to encode outbound event");
						continue;
					}
				};

				if sink.send(WsMessage::Text(frame.into())).await.is_err() {
					break;
				}
			}
		}
	}
}

/// Decode inbound frames and dispatch intents. Malformed frames are dropped
/// here and never reach the room.
async fn pump_intents<S>(conn_id: u64, mut stream: SplitStream<WebSocketStream<S>>, room: &Room)
where
	S: AsyncRead + AsyncWrite + Unpin,
{
	while let Some(msg) = stream.next().await {
		let msg = match msg {
			Ok(msg) => msg,
			Err(e) => {
				debug!(conn_id, error = %e, "socket read error");
				break;
			}
		};

		match msg {
			WsMessage::Text(frame) => {
				let intent = match decode_intent(frame.as_str()) {
					Ok(intent) => intent,
					Err(e) => {
						debug!(conn_id, error = %e, "malformed intent dropped");
						continue;
					}
				};

				match intent {
					ClientIntent::Hello(_) => {
						debug!(conn_id, "duplicate hello dropped");
					}
					ClientIntent::Send(payload) => room.send(conn_id, payload, unix_ms_now()).await,
					ClientIntent::Delete { message_id } => room.delete(conn_id, message_id).await,
					ClientIntent::Edit(payload) => room.edit(conn_id, payload).await,
					ClientIntent::React(payload) => room.react(conn_id, payload).await,
				}
			}
			WsMessage::Close(_) => break,
			WsMessage::Binary(_) => {
				debug!(conn_id, "binary frame dropped");
			}
			// Ping/pong bookkeeping happens inside tungstenite.
			_ => {}
		}
	}
}
