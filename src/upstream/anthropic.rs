// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! `https://api.anthropic.com/v1/*`, `x-api-key` auth, friendly-name
//! aliasing (`claude-sonnet-4.5` -> `claude-sonnet-4-5-20250929`).

use async_trait::async_trait;
use hyper::HeaderMap;

use super::{default_prepare_headers, UpstreamAdapter, UpstreamConfig, UpstreamError};
use crate::catalog::RawModel;

pub struct AnthropicAdapter {
	config: UpstreamConfig,
	client: reqwest::Client,
}

impl AnthropicAdapter {
	pub fn new(config: UpstreamConfig) -> Self {
		Self { config, client: reqwest::Client::new() }
	}
}

/// Friendly-name -> dated-model-id aliases Anthropic's API expects.
const FRIENDLY_ALIASES: &[(&str, &str)] = &[
	("claude-sonnet-4.5", "claude-sonnet-4-5-20250929"),
	("claude-opus-4.1", "claude-opus-4-1-20250805"),
	("claude-haiku-4.5", "claude-haiku-4-5-20251001"),
];

#[async_trait]
impl UpstreamAdapter for AnthropicAdapter {
	fn config(&self) -> &UpstreamConfig {
		&self.config
	}

	fn prepare_headers(&self, inbound: &HeaderMap) -> HeaderMap {
		let mut headers = default_prepare_headers(inbound, None, "Bearer");
		if let Some(key) = &self.config.api_key {
			if let Ok(value) = key.parse() {
				headers.insert("x-api-key", value);
			}
		}
		headers
	}

	fn transform_model_name(&self, id: &str) -> String {
		let stripped = id.strip_prefix(self.config.provider_type.prefix()).unwrap_or(id);
		FRIENDLY_ALIASES
			.iter()
			.find(|(friendly, _)| *friendly == stripped)
			.map(|(_, dated)| dated.to_string())
			.unwrap_or_else(|| stripped.to_string())
	}

	async fn fetch_models(&self) -> Result<Vec<RawModel>, UpstreamError> {
		// Anthropic's model list is a short, slowly-changing, hand-curated
		// set; the SPEC_FULL.md-scoped Anthropic adapter ships it statically
		// rather than scraping a non-OpenAI-shaped `/v1/models` response.
		Ok(vec![
			RawModel { id: "claude-sonnet-4-5-20250929".into(), display_name: "Claude Sonnet 4.5".into(), ..Default::default() },
			RawModel { id: "claude-opus-4-1-20250805".into(), display_name: "Claude Opus 4.1".into(), ..Default::default() },
			RawModel { id: "claude-haiku-4-5-20251001".into(), display_name: "Claude Haiku 4.5".into(), ..Default::default() },
		])
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::upstream::ProviderType;

	#[test]
	fn friendly_alias_expands_to_dated_model_id() {
		let adapter = AnthropicAdapter::new(UpstreamConfig {
			id: "anthropic-main".into(),
			provider_type: ProviderType::Anthropic,
			base_url: "https://api.anthropic.com".into(),
			api_key: Some("key".into()),
			api_version: None,
			enabled: true,
			fee: 1.01,
		});
		assert_eq!(adapter.transform_model_name("anthropic/claude-sonnet-4.5"), "claude-sonnet-4-5-20250929");
		assert_eq!(adapter.transform_model_name("claude-opus-4.1"), "claude-opus-4-1-20250805");
	}
}
