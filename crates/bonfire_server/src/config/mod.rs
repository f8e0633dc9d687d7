#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, anyhow};
use bonfire_domain::limits;
use serde::Deserialize;
use tracing::info;

/// Default config path: `~/.bonfire/config.toml`.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".bonfire").join("config.toml"))
}

/// Load the server config from TOML and env overrides.
pub fn load_server_config_from_path(path: &Path) -> anyhow::Result<ServerConfig> {
	let file_cfg = read_toml_if_exists(path)
		.with_context(|| format!("read config from {}", path.display()))?
		.unwrap_or_default();

	let mut cfg = ServerConfig::from_file(file_cfg);

	apply_env_overrides(&mut cfg);

	Ok(cfg)
}

/// Server config (v1).
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
	pub server: ServerSettings,
	pub verify: VerifySettings,
}

/// Room and listener settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
	/// Optional metrics exporter bind address (host:port).
	pub metrics_bind: Option<String>,
	/// Optional health/readiness HTTP bind address (host:port).
	pub health_bind: Option<String>,
	/// Maximum simultaneous admitted connections per source address.
	pub max_connections_per_addr: u32,
	/// Maximum message text length in characters.
	pub max_message_length: usize,
	/// Sends allowed inside one spam window before the session is kicked.
	pub spam_threshold: usize,
	/// Trailing spam-detection window in milliseconds.
	pub spam_window_ms: i64,
	/// Maximum queued outbound events per connection.
	pub subscriber_queue_capacity: usize,
	/// How long a fresh socket may wait before its hello frame, in ms.
	pub hello_timeout_ms: u64,
	/// Grace period between the kick notice and the forced disconnect, in ms.
	pub kick_disconnect_delay_ms: u64,
}

impl Default for ServerSettings {
	fn default() -> Self {
		Self {
			metrics_bind: None,
			health_bind: None,
			max_connections_per_addr: limits::MAX_CONNECTIONS_PER_ADDR,
			max_message_length: limits::MAX_MESSAGE_LENGTH,
			spam_threshold: limits::SPAM_THRESHOLD,
			spam_window_ms: limits::SPAM_WINDOW_MS,
			subscriber_queue_capacity: 256,
			hello_timeout_ms: 10_000,
			kick_disconnect_delay_ms: 150,
		}
	}
}

/// Challenge-verification settings.
#[derive(Debug, Clone, Default)]
pub struct VerifySettings {
	/// Shared secret for the siteverify endpoint.
	pub secret: Option<String>,
	/// Siteverify endpoint override.
	pub siteverify_url: Option<String>,
	/// Skip verification entirely (dev only).
	pub bypass: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
	#[serde(default)]
	server: FileServerSettings,

	#[serde(default)]
	verify: FileVerifySettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileServerSettings {
	metrics_bind: Option<String>,
	health_bind: Option<String>,
	max_connections_per_addr: Option<u32>,
	max_message_length: Option<usize>,
	spam_threshold: Option<usize>,
	spam_window_ms: Option<i64>,
	subscriber_queue_capacity: Option<usize>,
	hello_timeout_ms: Option<u64>,
	kick_disconnect_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileVerifySettings {
	secret: Option<String>,
	siteverify_url: Option<String>,
	bypass: Option<bool>,
}

impl ServerConfig {
	fn from_file(file: FileConfig) -> Self {
		let defaults = ServerSettings::default();

		Self {
			server: ServerSettings {
				metrics_bind: file.server.metrics_bind.filter(|s| !s.trim().is_empty()),
				health_bind: file.server.health_bind.filter(|s| !s.trim().is_empty()),
				max_connections_per_addr: file
					.server
					.max_connections_per_addr
					.unwrap_or(defaults.max_connections_per_addr),
				max_message_length: file.server.max_message_length.unwrap_or(defaults.max_message_length),
				spam_threshold: file.server.spam_threshold.unwrap_or(defaults.spam_threshold),
				spam_window_ms: file.server.spam_window_ms.unwrap_or(defaults.spam_window_ms),
				subscriber_queue_capacity: file
					.server
					.subscriber_queue_capacity
					.unwrap_or(defaults.subscriber_queue_capacity),
				hello_timeout_ms: file.server.hello_timeout_ms.unwrap_or(defaults.hello_timeout_ms),
				kick_disconnect_delay_ms: file
					.server
					.kick_disconnect_delay_ms
					.unwrap_or(defaults.kick_disconnect_delay_ms),
			},
			verify: VerifySettings {
				secret: file.verify.secret.filter(|s| !s.trim().is_empty()),
				siteverify_url: file.verify.siteverify_url.filter(|s| !s.trim().is_empty()),
				bypass: file.verify.bypass.unwrap_or(false),
			},
		}
	}
}

fn parse_env_bool(v: &str) -> Option<bool> {
	match v.trim().to_ascii_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Some(true),
		"0" | "false" | "no" | "off" => Some(false),
		_ => None,
	}
}

fn read_toml_if_exists(path: &Path) -> anyhow::Result<Option<FileConfig>> {
	match fs::read_to_string(path) {
		Ok(s) => {
			let cfg: FileConfig = toml::from_str(&s).context("parse TOML")?;
			Ok(Some(cfg))
		}
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(anyhow!(e).context("read config file")),
	}
}

fn apply_env_overrides(cfg: &mut ServerConfig) {
	if let Ok(v) = std::env::var("BONFIRE_METRICS_BIND") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.server.metrics_bind = Some(v);
			info!("server config: metrics_bind overridden by env");
		}
	}

	if let Ok(v) = std::env::var("BONFIRE_HEALTH_BIND") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.server.health_bind = Some(v);
			info!("server config: health_bind overridden by env");
		}
	}

	if let Ok(v) = std::env::var("BONFIRE_MAX_CONNECTIONS_PER_ADDR")
		&& let Ok(cap) = v.trim().parse::<u32>()
	{
		cfg.server.max_connections_per_addr = cap;
		info!(cap, "server config: max_connections_per_addr overridden by env");
	}

	if let Ok(v) = std::env::var("BONFIRE_MAX_MESSAGE_LENGTH")
		&& let Ok(len) = v.trim().parse::<usize>()
	{
		cfg.server.max_message_length = len;
		info!(len, "server config: max_message_length overridden by env");
	}

	if let Ok(v) = std::env::var("BONFIRE_SPAM_THRESHOLD")
		&& let Ok(threshold) = v.trim().parse::<usize>()
	{
		cfg.server.spam_threshold = threshold;
		info!(threshold, "server config: spam_threshold overridden by env");
	}

	if let Ok(v) = std::env::var("BONFIRE_SPAM_WINDOW_MS")
		&& let Ok(window_ms) = v.trim().parse::<i64>()
	{
		cfg.server.spam_window_ms = window_ms;
		info!(window_ms, "server config: spam_window_ms overridden by env");
	}

	if let Ok(v) = std::env::var("BONFIRE_SUBSCRIBER_QUEUE_CAPACITY")
		&& let Ok(capacity) = v.trim().parse::<usize>()
	{
		cfg.server.subscriber_queue_capacity = capacity;
		info!(capacity, "server config: subscriber_queue_capacity overridden by env");
	}

	if let Ok(v) = std::env::var("BONFIRE_HELLO_TIMEOUT_MS")
		&& let Ok(timeout_ms) = v.trim().parse::<u64>()
	{
		cfg.server.hello_timeout_ms = timeout_ms;
		info!(timeout_ms, "server config: hello_timeout_ms overridden by env");
	}

	if let Ok(v) = std::env::var("BONFIRE_KICK_DISCONNECT_DELAY_MS")
		&& let Ok(delay_ms) = v.trim().parse::<u64>()
	{
		cfg.server.kick_disconnect_delay_ms = delay_ms;
		info!(delay_ms, "server config: kick_disconnect_delay_ms overridden by env");
	}

	if let Ok(v) = std::env::var("BONFIRE_VERIFY_SECRET") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.verify.secret = Some(v);
			info!("verify config: secret overridden by env");
		}
	}

	if let Ok(v) = std::env::var("BONFIRE_VERIFY_SITEVERIFY_URL") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.verify.siteverify_url = Some(v);
			info!("verify config: siteverify_url overridden by env");
		}
	}

	if let Ok(v) = std::env::var("BONFIRE_VERIFY_BYPASS")
		&& let Some(bypass) = parse_env_bool(&v)
	{
		cfg.verify.bypass = bypass;
		info!(bypass, "verify config: bypass overridden by env");
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn file_defaults_fall_back_to_domain_limits() {
		let cfg = ServerConfig::from_file(FileConfig::default());
		assert_eq!(cfg.server.max_connections_per_addr, limits::MAX_CONNECTIONS_PER_ADDR);
		assert_eq!(cfg.server.max_message_length, limits::MAX_MESSAGE_LENGTH);
		assert_eq!(cfg.server.spam_threshold, limits::SPAM_THRESHOLD);
		assert_eq!(cfg.server.hello_timeout_ms, 10_000);
		assert_eq!(cfg.server.kick_disconnect_delay_ms, 150);
		assert!(!cfg.verify.bypass);
	}

	#[test]
	fn connection_timings_are_file_overridable() {
		let file: FileConfig = toml::from_str(
			r#"
[server]
hello_timeout_ms = 2000
kick_disconnect_delay_ms = 50
"#,
		)
		.expect("parse");

		let cfg = ServerConfig::from_file(file);
		assert_eq!(cfg.server.hello_timeout_ms, 2_000);
		assert_eq!(cfg.server.kick_disconnect_delay_ms, 50);
	}

	#[test]
	fn blank_strings_are_treated_as_unset() {
		let file: FileConfig = toml::from_str(
			r#"
[server]
metrics_bind = "  "

[verify]
secret = ""
bypass = true
"#,
		)
		.expect("parse");

		let cfg = ServerConfig::from_file(file);
		assert!(cfg.server.metrics_bind.is_none());
		assert!(cfg.verify.secret.is_none());
		assert!(cfg.verify.bypass);
	}
}
