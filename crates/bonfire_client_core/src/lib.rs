#![forbid(unsafe_code)]

//! Client-side engine for a bonfire session: the incremental message
//! store, the windowed-list layout, scroll anchoring, and display-name
//! generation. Transport is deliberately out of scope; a frontend feeds
//! decoded server events in and reads view state out.

pub mod anchor;
pub mod layout;
pub mod names;
pub mod store;

pub use anchor::{AT_BOTTOM_TOLERANCE, ScrollPlan, is_at_bottom, plan_for_new_message};
pub use layout::{DEFAULT_ESTIMATED_HEIGHT, LayoutEngine};
pub use names::generate_display_name;
pub use store::{AuthorStats, ChatStore, ReplyDisplay};
