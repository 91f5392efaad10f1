// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! CRUD for the `upstream_providers` table (spec.md §6): the operator's
//! configured set of upstreams, loaded once at startup and occasionally
//! updated through the admin surface.

use super::Db;
use crate::upstream::{ProviderType, UpstreamConfig};

impl Db {
	pub async fn upsert_upstream(&self, config: &UpstreamConfig) -> rusqlite::Result<()> {
		let conn = self.conn.lock().await;
		conn.execute(
			"INSERT INTO upstream_providers (id, provider_type, base_url, api_key, api_version, enabled, fee)
			 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
			 ON CONFLICT(id) DO UPDATE SET
				provider_type = excluded.provider_type,
				base_url      = excluded.base_url,
				api_key       = excluded.api_key,
				api_version   = excluded.api_version,
				enabled       = excluded.enabled,
				fee           = excluded.fee",
			rusqlite::params![
				config.id,
				config.provider_type.as_str(),
				config.base_url,
				config.api_key,
				config.api_version,
				config.enabled,
				config.fee,
			],
		)?;
		Ok(())
	}

	pub async fn delete_upstream(&self, id: &str) -> rusqlite::Result<()> {
		let conn = self.conn.lock().await;
		conn.execute("DELETE FROM upstream_providers WHERE id = ?1", rusqlite::params![id])?;
		Ok(())
	}

	/// Loads every configured upstream, skipping rows whose `provider_type`
	/// this build doesn't recognize (forward-compatible with manual schema
	/// edits) rather than failing the whole load.
	pub async fn list_upstreams(&self) -> rusqlite::Result<Vec<UpstreamConfig>> {
		let conn = self.conn.lock().await;
		let mut stmt = conn.prepare(
			"SELECT id, provider_type, base_url, api_key, api_version, enabled, fee FROM upstream_providers",
		)?;
		let rows = stmt.query_map([], |row| {
			let provider_type_str: String = row.get(1)?;
			Ok((
				row.get::<_, String>(0)?,
				provider_type_str,
				row.get::<_, String>(2)?,
				row.get::<_, Option<String>>(3)?,
				row.get::<_, Option<String>>(4)?,
				row.get::<_, bool>(5)?,
				row.get::<_, f64>(6)?,
			))
		})?;

		let mut out = Vec::new();
		for row in rows {
			let (id, provider_type_str, base_url, api_key, api_version, enabled, fee) = row?;
			let Some(provider_type) = ProviderType::from_str_loose(&provider_type_str) else {
				log::warn!("skipping upstream {id}: unrecognized provider_type {provider_type_str}");
				continue;
			};
			out.push(UpstreamConfig { id, provider_type, base_url, api_key, api_version, enabled, fee });
		}
		Ok(out)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::io::persist::Db;

	fn sample() -> UpstreamConfig {
		UpstreamConfig {
			id: "openai-main".into(),
			provider_type: ProviderType::OpenAi,
			base_url: "https://api.openai.com".into(),
			api_key: Some("sk-test".into()),
			api_version: None,
			enabled: true,
			fee: 1.01,
		}
	}

	#[tokio::test]
	async fn upsert_then_list_round_trips() {
		let db = Db::open_in_memory().unwrap();
		db.upsert_upstream(&sample()).await.unwrap();
		let loaded = db.list_upstreams().await.unwrap();
		assert_eq!(loaded.len(), 1);
		assert_eq!(loaded[0].id, "openai-main");
		assert_eq!(loaded[0].provider_type, ProviderType::OpenAi);
	}

	#[tokio::test]
	async fn upsert_is_idempotent_and_updates_fields() {
		let db = Db::open_in_memory().unwrap();
		db.upsert_upstream(&sample()).await.unwrap();
		let mut updated = sample();
		updated.fee = 2.0;
		db.upsert_upstream(&updated).await.unwrap();
		let loaded = db.list_upstreams().await.unwrap();
		assert_eq!(loaded.len(), 1);
		assert_eq!(loaded[0].fee, 2.0);
	}

	#[tokio::test]
	async fn delete_removes_the_row() {
		let db = Db::open_in_memory().unwrap();
		db.upsert_upstream(&sample()).await.unwrap();
		db.delete_upstream("openai-main").await.unwrap();
		assert!(db.list_upstreams().await.unwrap().is_empty());
	}
}
