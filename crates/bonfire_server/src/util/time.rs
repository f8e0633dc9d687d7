#![forbid(unsafe_code)]

use std::time::{SystemTime, UNIX_EPOCH};

/// Current Unix time in milliseconds.
///
/// Timestamps assigned by the router are compared only against each other,
/// so a clock stuck at the epoch degrades ordering hints, not correctness.
#[inline]
pub fn unix_ms_now() -> i64 {
	match SystemTime::now().duration_since(UNIX_EPOCH) {
		Ok(elapsed) => elapsed.as_millis() as i64,
		Err(_) => 0,
	}
}
