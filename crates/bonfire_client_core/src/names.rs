#![forbid(unsafe_code)]

use rand::seq::IndexedRandom as _;

const ADJECTIVES: &[&str] = &["Curious", "Silent", "Swift", "Lazy", "Brave", "Cosmic", "Witty"];

const NOUNS: &[&str] = &["Otter", "Raccoon", "Falcon", "Pineapple", "Wizard", "Turtle"];

/// Generate a throwaway display name for the hello frame. Collisions are
/// allowed; the room never deduplicates names.
pub fn generate_display_name() -> String {
	let mut rng = rand::rng();
	let adjective = ADJECTIVES.choose(&mut rng).copied().unwrap_or("Curious");
	let noun = NOUNS.choose(&mut rng).copied().unwrap_or("Otter");
	format!("{adjective}{noun}")
}

#[cfg(test)]
mod tests {
	use bonfire_domain::DisplayName;

	use super::*;

	#[test]
	fn generated_names_are_valid_display_names() {
		for _ in 0..64 {
			let name = generate_display_name();
			assert!(DisplayName::new(&name).is_ok());
			assert!(name.chars().all(|c| c.is_ascii_alphabetic()));
		}
	}
}
