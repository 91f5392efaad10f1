// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! `https://openrouter.ai/api/v1/*`. OpenRouter's catalog is the richest
//! of the bunch (per-top-provider context/completion limits, alias ids),
//! so this is also the adapter other simple OpenAI-compatible adapters'
//! fee/pricing shape was modeled on.

use async_trait::async_trait;

use super::{fetch_openai_compatible_models, UpstreamAdapter, UpstreamConfig, UpstreamError};
use crate::catalog::RawModel;

pub struct OpenRouterAdapter {
	config: UpstreamConfig,
	client: reqwest::Client,
}

impl OpenRouterAdapter {
	pub fn new(config: UpstreamConfig) -> Self {
		Self { config, client: reqwest::Client::new() }
	}
}

#[async_trait]
impl UpstreamAdapter for OpenRouterAdapter {
	fn config(&self) -> &UpstreamConfig {
		&self.config
	}

	async fn fetch_models(&self) -> Result<Vec<RawModel>, UpstreamError> {
		let url = format!("{}/api/v1/models", self.config.base_url);
		fetch_openai_compatible_models(&self.client, &url, self.config.api_key.as_deref()).await
	}
}

/// Filters a full OpenRouter catalog down to models whose id carries
/// `<source>/` (e.g. other adapters using OpenRouter as a metadata source
/// per spec.md §6, rather than scraping their own non-standard endpoint).
pub fn filter_by_source_prefix(models: &[RawModel], source_prefix: &str) -> Vec<RawModel> {
	models
		.iter()
		.filter(|m| m.id.starts_with(source_prefix))
		.cloned()
		.map(|mut m| {
			m.id = m.id.trim_start_matches(source_prefix).to_string();
			m
		})
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn filters_and_strips_source_prefix() {
		let models = vec![
			RawModel { id: "groq/llama-3".into(), ..Default::default() },
			RawModel { id: "openai/gpt-4o".into(), ..Default::default() },
		];
		let filtered = filter_by_source_prefix(&models, "groq/");
		assert_eq!(filtered.len(), 1);
		assert_eq!(filtered[0].id, "llama-3");
	}
}
