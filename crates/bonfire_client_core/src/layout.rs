#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::ops::Range;

use bonfire_domain::MessageId;

/// Default row height used until a row has been measured.
pub const DEFAULT_ESTIMATED_HEIGHT: f64 = 72.0;

/// Variable-height layout for a windowed message list.
///
/// Row heights are cached by message id, so a message keeps its measurement
/// across inserts and deletes; positions come from a lazily extended prefix
/// sum over the caller's current ordering. `clean_until` is the watermark:
/// offsets below it are valid, everything above is recomputed on demand.
#[derive(Debug)]
pub struct LayoutEngine {
	estimated_height: f64,
	heights: HashMap<MessageId, f64>,

	/// `offsets[i]` is the top of row `i`; valid for `i < clean_until`.
	offsets: Vec<f64>,
	clean_until: usize,

	/// Measurements reported during the current frame, applied by `flush`.
	pending: Vec<(MessageId, f64)>,
}

impl Default for LayoutEngine {
	fn default() -> Self {
		Self::new(DEFAULT_ESTIMATED_HEIGHT)
	}
}

impl LayoutEngine {
	pub fn new(estimated_height: f64) -> Self {
		Self {
			estimated_height,
			heights: HashMap::new(),
			offsets: Vec::new(),
			clean_until: 0,
			pending: Vec::new(),
		}
	}

	fn height_of(&self, id: MessageId) -> f64 {
		self.heights.get(&id).copied().unwrap_or(self.estimated_height)
	}

	/// Invalidate cached offsets from `index` on.
	fn invalidate_from(&mut self, index: usize) {
		if index < self.clean_until {
			self.clean_until = index;
			self.offsets.truncate(index);
		}
	}

	/// Extend the offset prefix so that rows `0..=index` have valid tops.
	fn ensure_offsets(&mut self, order: &[MessageId], index: usize) {
		let needed = (index + 1).min(order.len());
		while self.clean_until < needed {
			let i = self.clean_until;
			let top = if i == 0 {
				0.0
			} else {
				self.offsets[i - 1] + self.height_of(order[i - 1])
			};
			debug_assert_eq!(self.offsets.len(), i);
			self.offsets.push(top);
			self.clean_until += 1;
		}
	}

	/// Queue one measured row height. Applied on the next `flush`.
	pub fn record_height(&mut self, id: MessageId, height: f64) {
		self.pending.push((id, height));
	}

	/// Apply every queued measurement, invalidating offsets once from the
	/// earliest changed index. Returns true when any layout changed.
	pub fn flush(&mut self, index_of: impl Fn(MessageId) -> Option<usize>) -> bool {
		let mut earliest: Option<usize> = None;

		for (id, height) in std::mem::take(&mut self.pending) {
			if self.heights.get(&id).copied() == Some(height) {
				continue;
			}
			self.heights.insert(id, height);

			// A measurement reported for an already-deleted row has no
			// position left to invalidate.
			if let Some(idx) = index_of(id) {
				earliest = Some(earliest.map_or(idx, |e| e.min(idx)));
			}
		}

		match earliest {
			Some(idx) => {
				self.invalidate_from(idx);
				true
			}
			None => false,
		}
	}

	/// Forget a deleted row. `former_index` is the position it held in the
	/// ordering before removal.
	pub fn remove(&mut self, id: MessageId, former_index: usize) {
		self.heights.remove(&id);
		self.invalidate_from(former_index);
	}

	/// Top of row `index` in the current ordering.
	pub fn offset_of(&mut self, order: &[MessageId], index: usize) -> f64 {
		if order.is_empty() {
			return 0.0;
		}
		let index = index.min(order.len() - 1);
		self.ensure_offsets(order, index);
		self.offsets[index]
	}

	/// Total content height of the current ordering.
	pub fn total_height(&mut self, order: &[MessageId]) -> f64 {
		let Some(&last) = order.last() else {
			return 0.0;
		};
		self.offset_of(order, order.len() - 1) + self.height_of(last)
	}

	/// The index window that intersects `[scroll_top, scroll_top + viewport)`.
	pub fn visible_range(&mut self, order: &[MessageId], scroll_top: f64, viewport: f64) -> Range<usize> {
		if order.is_empty() || viewport <= 0.0 {
			return 0..0;
		}

		let bottom = scroll_top + viewport;

		// Walk the prefix sum forward; extension stops as soon as a row
		// starts past the viewport, so an unmeasured tail is never touched.
		let mut start = None;
		let mut end = order.len();
		for i in 0..order.len() {
			let top = self.offset_of(order, i);
			if top >= bottom {
				end = i;
				break;
			}
			if start.is_none() && top + self.height_of(order[i]) > scroll_top {
				start = Some(i);
			}
		}

		match start {
			Some(s) => s..end,
			// Elastic overscroll above the content lands before row 0;
			// otherwise everything lies above the viewport.
			None => {
				if end == 0 {
					0..1
				} else {
					order.len() - 1..order.len()
				}
			}
		}
	}

	/// Scroll position that centers the given message, clamped to the
	/// scrollable range. Works for rows that were never measured.
	pub fn center_on(&mut self, order: &[MessageId], index: usize, viewport: f64) -> f64 {
		if order.is_empty() {
			return 0.0;
		}
		let index = index.min(order.len() - 1);
		let top = self.offset_of(order, index);
		let height = self.height_of(order[index]);
		let total = self.total_height(order);

		let target = top + height / 2.0 - viewport / 2.0;
		target.clamp(0.0, (total - viewport).max(0.0))
	}
}
