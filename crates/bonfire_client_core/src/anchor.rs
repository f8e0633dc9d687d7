#![forbid(unsafe_code)]

/// Slack, in pixels, within which the view still counts as "at the bottom".
pub const AT_BOTTOM_TOLERANCE: f64 = 10.0;

/// What the view should do with its scroll position after new data arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollPlan {
	/// Follow the log: snap to the new bottom.
	StickToBottom,
	/// The local user just sent this; reveal it even if they had scrolled up.
	RevealLatest,
	/// Reading scrollback; do not move.
	Preserve,
}

/// True when the viewport rests at (or within tolerance of) the bottom.
pub fn is_at_bottom(scroll_top: f64, viewport: f64, total_height: f64) -> bool {
	total_height - (scroll_top + viewport) <= AT_BOTTOM_TOLERANCE
}

/// Decide the scroll plan for a newly appended message.
///
/// `was_at_bottom` must be sampled before the append changed the total
/// height, otherwise the view is never "at the bottom" of its own update.
pub fn plan_for_new_message(was_at_bottom: bool, latest_is_local: bool) -> ScrollPlan {
	if was_at_bottom {
		ScrollPlan::StickToBottom
	} else if latest_is_local {
		ScrollPlan::RevealLatest
	} else {
		ScrollPlan::Preserve
	}
}
