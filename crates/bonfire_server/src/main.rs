#![forbid(unsafe_code)]

mod config;
mod server;
mod util;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::server::admission::{AllowAll, ChallengeVerifier, Verifier};
use crate::server::connection::{ConnectionSettings, handle_connection};
use crate::server::health::{HealthState, spawn_health_server};
use crate::server::room::{Room, RoomConfig};

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: bonfire_server [--bind host:port]\n\
\n\
Options:\n\
\t--bind    Bind address (default: 127.0.0.1:3000)\n\
\t--help   Show this help\n\
"
	);
	std::process::exit(2)
}

fn parse_args() -> SocketAddr {
	let mut bind = "127.0.0.1:3000".to_string();

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--bind" | "--listen" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--bind must be non-empty (expected host:port)");
					usage_and_exit();
				}
				bind = v;
			}
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	bind.parse::<SocketAddr>().unwrap_or_else(|e| {
		eprintln!("invalid --bind address {bind:?}: {e}");
		usage_and_exit();
	})
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,bonfire_server=debug".to_string());

	tracing_subscriber::registry()
		.with(tracing_subscriber::EnvFilter::new(filter))
		.with(tracing_subscriber::fmt::layer().with_target(false))
		.init();
}

fn init_metrics(bind: Option<&str>) {
	let Some(bind) = bind else {
		return;
	};

	match bind.parse::<std::net::SocketAddr>() {
		Ok(addr) => {
			if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
				.with_http_listener(addr)
				.install()
			{
				warn!(error = %e, "failed to start metrics exporter");
			} else {
				info!(%addr, "metrics exporter listening");
			}
		}
		Err(e) => {
			warn!(error = %e, %bind, "invalid metrics bind address (expected host:port)");
		}
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_tracing();

	let bind_addr = parse_args();

	let config_path = crate::config::default_config_path()?;
	let server_cfg = crate::config::load_server_config_from_path(&config_path)?;
	info!(path = %config_path.display(), "loaded server config (toml + env overrides)");

	init_metrics(server_cfg.server.metrics_bind.as_deref());

	let health_state = HealthState::new();
	if let Some(bind) = server_cfg.server.health_bind.as_deref() {
		match bind.parse::<std::net::SocketAddr>() {
			Ok(addr) => {
				spawn_health_server(addr, health_state.clone());
				info!(%addr, "health server listening");
			}
			Err(e) => warn!(error = %e, %bind, "invalid health bind address (expected host:port)"),
		}
	}

	let verifier: Arc<dyn Verifier> = if server_cfg.verify.bypass {
		warn!("challenge verification bypassed (verify.bypass = true)");
		Arc::new(AllowAll)
	} else if let Some(secret) = server_cfg.verify.secret.clone() {
		Arc::new(ChallengeVerifier::new(secret, server_cfg.verify.siteverify_url.clone()))
	} else {
		warn!("no verify.secret configured; admitting all verification tokens");
		Arc::new(AllowAll)
	};

	let room_cfg = RoomConfig {
		max_connections_per_addr: server_cfg.server.max_connections_per_addr,
		max_message_length: server_cfg.server.max_message_length,
		spam_threshold: server_cfg.server.spam_threshold,
		spam_window_ms: server_cfg.server.spam_window_ms,
		subscriber_queue_capacity: server_cfg.server.subscriber_queue_capacity,
	};
	let room = Arc::new(Room::new(room_cfg));
	let conn_settings = ConnectionSettings {
		hello_timeout: std::time::Duration::from_millis(server_cfg.server.hello_timeout_ms),
		kick_disconnect_delay: std::time::Duration::from_millis(server_cfg.server.kick_disconnect_delay_ms),
	};

	let listener = TcpListener::bind(bind_addr).await?;
	info!(bind = %bind_addr, "bonfire_server: listening");

	health_state.mark_ready();

	let mut next_conn_id: u64 = 1;

	loop {
		let (stream, peer) = match listener.accept().await {
			Ok(accepted) => accepted,
			Err(e) => {
				warn!(error = %e, "failed to accept connection");
				continue;
			}
		};

		let conn_id = next_conn_id;
		next_conn_id += 1;
		metrics::counter!("bonfire_server_connections_total").increment(1);

		info!(conn_id, remote = %peer, "accepted connection");

		let room = Arc::clone(&room);
		let verifier = Arc::clone(&verifier);
		let conn_settings = conn_settings.clone();
		tokio::spawn(async move {
			if let Err(e) = handle_connection(conn_id, stream, peer.ip().to_string(), room, verifier, conn_settings).await {
				warn!(conn_id, error = %e, "connection handler exited with error");
			}
		});
	}
}
