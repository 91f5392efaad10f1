// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Database override rows (spec.md §4.2, §4.3): a `model_overrides` row,
//! keyed by `(model_id, upstream_id)`, completely replaces that upstream's
//! cached view of the model before selection; a disabled override
//! suppresses the model entirely for that upstream.

use serde::{Deserialize, Serialize};

use super::{CatalogError, Model, Pricing};
use crate::io::persist::Db;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OverridePayload {
	display_name: String,
	context_length: Option<u64>,
	top_provider_context_length: Option<u64>,
	top_provider_max_completion_tokens: Option<u64>,
	usd_pricing: (f64, f64, f64, f64, f64, f64),
	canonical_slug: Option<String>,
	alias_ids: Vec<String>,
}

impl From<&Model> for OverridePayload {
	fn from(m: &Model) -> Self {
		let p = &m.usd_pricing;
		Self {
			display_name: m.display_name.clone(),
			context_length: m.context_length,
			top_provider_context_length: m.top_provider_context_length,
			top_provider_max_completion_tokens: m.top_provider_max_completion_tokens,
			usd_pricing: (p.prompt, p.completion, p.request, p.image, p.web_search, p.internal_reasoning),
			canonical_slug: m.canonical_slug.clone(),
			alias_ids: m.alias_ids.clone(),
		}
	}
}

impl Db {
	/// Replaces (or clears) the override row for `(model_id, upstream_id)`.
	pub async fn set_model_override(
		&self, model_id: &str, upstream_id: &str, model: &Model, enabled: bool,
	) -> Result<(), CatalogError> {
		let payload = serde_json::to_string(&OverridePayload::from(model)).expect("serialize override");
		let conn = self.conn.lock().await;
		conn.execute(
			"INSERT INTO model_overrides (model_id, upstream_id, payload, enabled)
			 VALUES (?1, ?2, ?3, ?4)
			 ON CONFLICT(model_id, upstream_id) DO UPDATE SET payload = excluded.payload, enabled = excluded.enabled",
			rusqlite::params![model_id, upstream_id, payload, enabled as i64],
		)?;
		Ok(())
	}

	/// Loads every override row for `upstream_id`, applying the fee and
	/// exchange rate used to produce fee-adjusted USD and sats pricing on
	/// top of the raw `usd_pricing` stored in the payload (overrides are
	/// stored pre-fee, same as a raw fetch, so they flow through the same
	/// derivation as a live fetch).
	pub async fn model_overrides(
		&self, upstream_id: &str, fee: f64, sats_per_usd: f64,
	) -> Result<Vec<(Model, bool)>, CatalogError> {
		let conn = self.conn.lock().await;
		let mut stmt = conn.prepare(
			"SELECT model_id, payload, enabled FROM model_overrides WHERE upstream_id = ?1",
		)?;
		let rows = stmt.query_map([upstream_id], |row| {
			let model_id: String = row.get(0)?;
			let payload: String = row.get(1)?;
			let enabled: i64 = row.get(2)?;
			Ok((model_id, payload, enabled != 0))
		})?;

		let mut out = Vec::new();
		for row in rows {
			let (model_id, payload, enabled) = row?;
			let Ok(payload): Result<OverridePayload, _> = serde_json::from_str(&payload) else {
				log::warn!("model override payload for {model_id} failed to decode, skipping");
				continue;
			};
			let (p, c, r, i, w, ir) = payload.usd_pricing;
			let usd_pricing = Pricing {
				prompt: p * fee,
				completion: c * fee,
				request: r * fee,
				image: i * fee,
				web_search: w * fee,
				internal_reasoning: ir * fee,
			};
			let (max_prompt_cost_usd, max_completion_cost_usd, max_cost_usd) =
				crate::cost::derive_max_costs(
					&usd_pricing,
					payload.context_length,
					payload.top_provider_context_length,
					payload.top_provider_max_completion_tokens,
				);
			let sats_pricing = usd_pricing.scaled(sats_per_usd);
			out.push((
				Model {
					id: model_id,
					display_name: payload.display_name,
					context_length: payload.context_length,
					top_provider_context_length: payload.top_provider_context_length,
					top_provider_max_completion_tokens: payload.top_provider_max_completion_tokens,
					usd_pricing,
					sats_pricing,
					max_prompt_cost_usd,
					max_completion_cost_usd,
					max_cost_usd,
					enabled,
					upstream_id: upstream_id.to_string(),
					canonical_slug: payload.canonical_slug,
					alias_ids: payload.alias_ids,
				},
				enabled,
			));
		}
		Ok(out)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn override_round_trips_and_disabled_flag_is_honored() {
		let db = Db::open_in_memory().unwrap();
		let model = Model {
			id: "gpt-4o-mini".into(),
			display_name: "GPT-4o mini".into(),
			usd_pricing: Pricing { prompt: 0.00000015, completion: 0.0000006, ..Default::default() },
			upstream_id: "openai-main".into(),
			..Default::default()
		};
		db.set_model_override("gpt-4o-mini", "openai-main", &model, false).await.unwrap();
		let overrides = db.model_overrides("openai-main", 1.0, 1.0).await.unwrap();
		assert_eq!(overrides.len(), 1);
		assert!(!overrides[0].1);
		assert_eq!(overrides[0].0.id, "gpt-4o-mini");
	}
}
