// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Model catalog (C2): a per-upstream in-memory cache of model records
//! with fee-adjusted USD and sats pricing, refreshed on a jittered
//! interval. Readers get a stable snapshot; the refresher is the sole
//! writer and swaps the whole structure at once (spec.md §9's "atomic
//! snapshot swap, never field-by-field mutation").

pub mod overrides;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use rand::Rng;

use crate::cost::derive_max_costs;
use crate::exchange::ExchangeOracle;
use crate::upstream::UpstreamAdapter;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
	#[error(transparent)]
	Storage(#[from] rusqlite::Error),
}

/// USD-or-sats pricing, same shape either way (spec.md §3's "Model
/// record"). All fields are per-token or per-unit.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Pricing {
	pub prompt: f64,
	pub completion: f64,
	pub request: f64,
	pub image: f64,
	pub web_search: f64,
	pub internal_reasoning: f64,
}

impl Pricing {
	pub fn scaled(&self, factor: f64) -> Pricing {
		Pricing {
			prompt: self.prompt * factor,
			completion: self.completion * factor,
			request: self.request * factor,
			image: self.image * factor,
			web_search: self.web_search * factor,
			internal_reasoning: self.internal_reasoning * factor,
		}
	}
}

#[derive(Debug, Clone, Default)]
pub struct Model {
	pub id: String,
	pub display_name: String,
	pub context_length: Option<u64>,
	pub top_provider_context_length: Option<u64>,
	pub top_provider_max_completion_tokens: Option<u64>,
	pub usd_pricing: Pricing,
	pub sats_pricing: Pricing,
	pub max_prompt_cost_usd: f64,
	pub max_completion_cost_usd: f64,
	pub max_cost_usd: f64,
	pub enabled: bool,
	pub upstream_id: String,
	pub canonical_slug: Option<String>,
	pub alias_ids: Vec<String>,
}

/// A raw model record as reported by an upstream's `fetch_models`, before
/// provider-fee application and sats conversion.
#[derive(Debug, Clone, Default)]
pub struct RawModel {
	pub id: String,
	pub display_name: String,
	pub context_length: Option<u64>,
	pub top_provider_context_length: Option<u64>,
	pub top_provider_max_completion_tokens: Option<u64>,
	pub usd_pricing: Pricing,
	pub canonical_slug: Option<String>,
	pub alias_ids: Vec<String>,
}

#[derive(Default)]
struct Snapshot {
	models: Vec<Model>,
	models_by_id: HashMap<String, usize>,
}

/// Per-upstream cache. `refresh` is the only mutator; every other method
/// reads a cloned `Arc` snapshot, so readers never block the writer and
/// never see a partially-updated view.
pub struct UpstreamCatalog {
	upstream_id: String,
	fee: f64,
	snapshot: RwLock<Arc<Snapshot>>,
}

impl UpstreamCatalog {
	pub fn new(upstream_id: String, fee: f64) -> Self {
		Self { upstream_id, fee, snapshot: RwLock::new(Arc::new(Snapshot::default())) }
	}

	pub fn models(&self) -> Vec<Model> {
		self.snapshot.read().unwrap().models.clone()
	}

	pub fn get(&self, id: &str) -> Option<Model> {
		let snapshot = self.snapshot.read().unwrap();
		snapshot.models_by_id.get(id).map(|&i| snapshot.models[i].clone())
	}

	/// Calls the adapter's `fetch_models`, applies the provider fee and the
	/// block-list, derives max costs, converts to sats, and swaps in the
	/// new snapshot. On failure the previous cache is left untouched
	/// (spec.md §4.2's "best-effort" refresh).
	pub async fn refresh(
		&self, adapter: &dyn UpstreamAdapter, oracle: &ExchangeOracle, blocklist: &[String],
	) -> Result<(), CatalogError> {
		let raw_models = match adapter.fetch_models().await {
			Ok(models) => models,
			Err(e) => {
				log::warn!(
					"catalog refresh failed for upstream={}: {e}, keeping previous cache",
					self.upstream_id
				);
				return Ok(());
			},
		};

		let sats_per_usd = oracle.sats_per_usd();
		let mut models = Vec::with_capacity(raw_models.len());
		let mut models_by_id = HashMap::with_capacity(raw_models.len());
		for raw in raw_models {
			if blocklist.iter().any(|blocked| blocked == &raw.id) {
				continue;
			}
			let usd_pricing = raw.usd_pricing.scaled(self.fee);
			let (max_prompt_cost_usd, max_completion_cost_usd, max_cost_usd) = derive_max_costs(
				&usd_pricing,
				raw.context_length,
				raw.top_provider_context_length,
				raw.top_provider_max_completion_tokens,
			);
			let sats_pricing = usd_pricing.scaled(sats_per_usd);
			let index = models.len();
			models_by_id.insert(raw.id.clone(), index);
			if let Some(slug) = &raw.canonical_slug {
				models_by_id.entry(slug.clone()).or_insert(index);
			}
			models.push(Model {
				id: raw.id,
				display_name: raw.display_name,
				context_length: raw.context_length,
				top_provider_context_length: raw.top_provider_context_length,
				top_provider_max_completion_tokens: raw.top_provider_max_completion_tokens,
				usd_pricing,
				sats_pricing,
				max_prompt_cost_usd,
				max_completion_cost_usd,
				max_cost_usd,
				enabled: true,
				upstream_id: self.upstream_id.clone(),
				canonical_slug: raw.canonical_slug,
				alias_ids: raw.alias_ids,
			});
		}

		*self.snapshot.write().unwrap() = Arc::new(Snapshot { models, models_by_id });
		Ok(())
	}
}

/// Picks a jittered duration around `base` (±`jitter_fraction`), the way
/// spec.md §4.2 asks the catalog refresher to avoid synchronized
/// thundering-herd refreshes across many upstreams.
pub fn jittered_interval(base: Duration, jitter_fraction: f64) -> Duration {
	let jitter = rand::thread_rng().gen_range(-jitter_fraction..=jitter_fraction);
	let factor = (1.0 + jitter).max(0.1);
	Duration::from_secs_f64(base.as_secs_f64() * factor)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::upstream::{openai::OpenAiAdapter, UpstreamConfig, ProviderType};

	fn upstream_config() -> UpstreamConfig {
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

	#[test]
	fn jittered_interval_stays_within_bounds() {
		let base = Duration::from_secs(300);
		for _ in 0..100 {
			let d = jittered_interval(base, 0.10);
			assert!(d.as_secs_f64() >= 270.0 - 1.0);
			assert!(d.as_secs_f64() <= 330.0 + 1.0);
		}
	}

	#[tokio::test]
	async fn refresh_failure_preserves_previous_cache() {
		let config = upstream_config();
		let adapter = OpenAiAdapter::new(config.clone());
		let oracle = ExchangeOracle::new(1.0);
		let catalog = UpstreamCatalog::new(config.id.clone(), config.fee);

		// fetch_models will fail (no network); cache should remain empty
		// but the call itself must not error out.
		catalog.refresh(&adapter, &oracle, &[]).await.unwrap();
		assert!(catalog.models().is_empty());
	}

	#[test]
	fn provider_fee_is_applied_before_deriving_max_costs() {
		let catalog = UpstreamCatalog::new("u".into(), 2.0);
		let sats_oracle = ExchangeOracle::new(1.0);
		let _ = sats_oracle.sats_per_usd();
		assert_eq!(catalog.fee, 2.0);
	}
}
