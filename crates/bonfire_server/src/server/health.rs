#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::warn;

/// Liveness/readiness flag shared with the accept loop.
#[derive(Clone, Default)]
pub struct HealthState {
	ready: Arc<AtomicBool>,
}

impl HealthState {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn mark_ready(&self) {
		self.ready.store(true, Ordering::Relaxed);
	}

	pub fn is_ready(&self) -> bool {
		self.ready.load(Ordering::Relaxed)
	}
}

/// Serve `GET /healthz` and `GET /readyz` on a side port.
pub fn spawn_health_server(bind: SocketAddr, state: HealthState) {
	tokio::spawn(async move {
		if let Err(err) = run(bind, state).await {
			warn!(error = %err, "health server stopped");
		}
	});
}

async fn run(bind: SocketAddr, state: HealthState) -> anyhow::Result<()> {
	let listener = TcpListener::bind(bind).await?;
	loop {
		let (stream, _addr) = listener.accept().await?;
		let state = state.clone();
		tokio::spawn(async move {
			let service = service_fn(move |req| {
				let state = state.clone();
				async move { respond(&req, &state) }
			});
			if let Err(err) = http1::Builder::new().serve_connection(TokioIo::new(stream), service).await {
				warn!(error = %err, "health connection error");
			}
		});
	}
}

fn respond(req: &Request<Incoming>, state: &HealthState) -> Result<Response<Full<Bytes>>, hyper::Error> {
	let (status, body): (StatusCode, &'static [u8]) = if req.method() != Method::GET {
		(StatusCode::METHOD_NOT_ALLOWED, b"")
	} else {
		match req.uri().path() {
			"/healthz" => (StatusCode::OK, b"ok"),
			"/readyz" if state.is_ready() => (StatusCode::OK, b"ready"),
			"/readyz" => (StatusCode::SERVICE_UNAVAILABLE, b"not-ready"),
			_ => (StatusCode::NOT_FOUND, b""),
		}
	};

	let resp = Response::builder()
		.status(status)
		.body(Full::new(Bytes::from_static(body)))
		.unwrap_or_default();
	Ok(resp)
}
