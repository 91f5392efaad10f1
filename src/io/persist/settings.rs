// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Key-value `settings` table. Backs the operator-editable knobs
//! SPEC_FULL.md's configuration section calls out (per-upstream
//! enable/disable and fee, the model block-list) so that a running node
//! can pick up DB-side edits on the catalog's refresh cadence without a
//! restart, modeling the admin surface's effect without implementing it.

use rusqlite::OptionalExtension;

use super::Db;

impl Db {
	pub async fn get_setting(&self, key: &str) -> rusqlite::Result<Option<String>> {
		let conn = self.conn.lock().await;
		conn.query_row("SELECT value FROM settings WHERE key = ?1", [key], |row| row.get(0))
			.optional()
	}

	pub async fn set_setting(&self, key: &str, value: &str) -> rusqlite::Result<()> {
		let conn = self.conn.lock().await;
		conn.execute(
			"INSERT INTO settings (key, value) VALUES (?1, ?2)
			 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
			rusqlite::params![key, value],
		)?;
		Ok(())
	}

	/// Reads the hand-curated model block-list, stored as a JSON array
	/// under the `model_blocklist` setting key.
	pub async fn model_blocklist(&self) -> rusqlite::Result<Vec<String>> {
		match self.get_setting("model_blocklist").await? {
			Some(raw) => Ok(serde_json::from_str(&raw).unwrap_or_default()),
			None => Ok(Vec::new()),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn round_trips_a_setting() {
		let db = Db::open_in_memory().unwrap();
		assert_eq!(db.get_setting("exchange_fee").await.unwrap(), None);
		db.set_setting("exchange_fee", "1.005").await.unwrap();
		assert_eq!(db.get_setting("exchange_fee").await.unwrap(), Some("1.005".to_string()));
		db.set_setting("exchange_fee", "1.01").await.unwrap();
		assert_eq!(db.get_setting("exchange_fee").await.unwrap(), Some("1.01".to_string()));
	}

	#[tokio::test]
	async fn blocklist_defaults_to_empty() {
		let db = Db::open_in_memory().unwrap();
		assert!(db.model_blocklist().await.unwrap().is_empty());
		db.set_setting("model_blocklist", r#"["gpt-3.5-turbo-0301"]"#).await.unwrap();
		assert_eq!(db.model_blocklist().await.unwrap(), vec!["gpt-3.5-turbo-0301".to_string()]);
	}
}
