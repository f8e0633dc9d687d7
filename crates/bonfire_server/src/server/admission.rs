#![forbid(unsafe_code)]

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

/// Default challenge verification endpoint (Cloudflare Turnstile).
pub const DEFAULT_SITEVERIFY_URL: &str = "https://challenges.cloudflare.com/turnstile/v0/siteverify";

/// Terminal admission rejections, surfaced to the peer before any session
/// state exists.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdmissionError {
	#[error("display name required")]
	MissingName,

	#[error("no verification token provided")]
	MissingToken,

	#[error("verification failed")]
	VerificationFailed,

	#[error("too many connections from this address")]
	TooManyConnections,
}

/// Challenge-token verification collaborator.
///
/// Called once per connection attempt. Any non-success, including transport
/// failure against the verification service, is fatal to admission.
#[async_trait]
pub trait Verifier: Send + Sync {
	async fn verify(&self, token: &str) -> bool;
}

/// Verifies tokens against a Turnstile-style siteverify endpoint.
pub struct ChallengeVerifier {
	client: reqwest::Client,
	url: String,
	secret: String,
}

#[derive(Debug, Deserialize)]
struct SiteverifyResponse {
	#[serde(default)]
	success: bool,
}

impl ChallengeVerifier {
	pub fn new(secret: String, url: Option<String>) -> Self {
		Self {
			client: reqwest::Client::new(),
			url: url.unwrap_or_else(|| DEFAULT_SITEVERIFY_URL.to_string()),
			secret,
		}
	}
}

#[async_trait]
impl Verifier for ChallengeVerifier {
	async fn verify(&self, token: &str) -> bool {
		let params = [("secret", self.secret.as_str()), ("response", token)];

		let resp = match self.client.post(&self.url).form(&params).send().await {
			Ok(resp) => resp,
			Err(e) => {
				warn!(error = %e, "challenge verification request failed");
				return false;
			}
		};

		match resp.json::<SiteverifyResponse>().await {
			Ok(body) => {
				if !body.success {
					debug!("challenge verification rejected token");
				}
				body.success
			}
			Err(e) => {
				warn!(error = %e, "challenge verification response was not parseable");
				false
			}
		}
	}
}

/// Accepts every token. Dev/test only; enabled by the `verify_bypass`
/// config flag.
pub struct AllowAll;

#[async_trait]
impl Verifier for AllowAll {
	async fn verify(&self, _token: &str) -> bool {
		true
	}
}

/// Pick the client's source address: trust the CDN header first, then the
/// first forwarded hop, then the socket peer.
pub fn source_addr(cf_connecting_ip: Option<&str>, x_forwarded_for: Option<&str>, peer_ip: &str) -> String {
	if let Some(ip) = cf_connecting_ip {
		let ip = ip.trim();
		if !ip.is_empty() {
			return ip.to_string();
		}
	}

	if let Some(chain) = x_forwarded_for
		&& let Some(first) = chain.split(',').next()
	{
		let first = first.trim();
		if !first.is_empty() {
			return first.to_string();
		}
	}

	peer_ip.to_string()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn source_addr_prefers_cdn_header() {
		assert_eq!(source_addr(Some("203.0.113.9"), Some("198.51.100.1, 10.0.0.1"), "127.0.0.1"), "203.0.113.9");
	}

	#[test]
	fn source_addr_takes_first_forwarded_hop() {
		assert_eq!(source_addr(None, Some("198.51.100.1, 10.0.0.1"), "127.0.0.1"), "198.51.100.1");
	}

	#[test]
	fn source_addr_falls_back_to_peer() {
		assert_eq!(source_addr(None, None, "127.0.0.1"), "127.0.0.1");
		assert_eq!(source_addr(Some("  "), Some(""), "::1"), "::1");
	}
}
