// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

pub mod config;
pub mod metrics;
pub mod tls;

use rand::Rng;

/// A short random hex id attached to our-fault error responses (spec.md
/// §6) so an operator can correlate a client-visible error with the log
/// line that explains it. Not a UUID library: this doesn't need to be
/// globally unique, just distinct enough to grep for in a log window.
pub fn new_correlation_id() -> String {
	let bytes: [u8; 8] = rand::thread_rng().gen();
	hex::encode(bytes)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn correlation_id_is_16_hex_chars() {
		let id = new_correlation_id();
		assert_eq!(id.len(), 16);
		assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
	}

	#[test]
	fn correlation_ids_are_not_constant() {
		assert_ne!(new_correlation_id(), new_correlation_id());
	}
}
