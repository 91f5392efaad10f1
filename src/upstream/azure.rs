// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Caller-supplied base URL; requires an `api-version` query param on
//! chat paths.

use async_trait::async_trait;

use super::{UpstreamAdapter, UpstreamConfig, UpstreamError};
use crate::catalog::RawModel;

pub struct AzureAdapter {
	config: UpstreamConfig,
}

impl AzureAdapter {
	pub fn new(config: UpstreamConfig) -> Self {
		Self { config }
	}

	fn is_chat_path(path: &str) -> bool {
		path.contains("/chat/completions") || path.contains("/completions") || path.contains("/embeddings")
	}
}

#[async_trait]
impl UpstreamAdapter for AzureAdapter {
	fn config(&self) -> &UpstreamConfig {
		&self.config
	}

	fn prepare_params(&self, path: &str, query: &str) -> (String, String) {
		if !Self::is_chat_path(path) {
			return (path.to_string(), query.to_string());
		}
		let api_version = self.config.api_version.as_deref().unwrap_or("2024-10-21");
		let mut query = query.to_string();
		if !query.split('&').any(|kv| kv.starts_with("api-version=")) {
			if !query.is_empty() {
				query.push('&');
			}
			query.push_str("api-version=");
			query.push_str(api_version);
		}
		(path.to_string(), query)
	}

	async fn fetch_models(&self) -> Result<Vec<RawModel>, UpstreamError> {
		// Azure OpenAI deployments are named by the operator and carry no
		// self-describing catalog endpoint; the deployed model list comes
		// from configuration, not discovery.
		Ok(Vec::new())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::upstream::ProviderType;

	fn adapter() -> AzureAdapter {
		AzureAdapter::new(UpstreamConfig {
			id: "azure-main".into(),
			provider_type: ProviderType::Azure,
			base_url: "https://my-resource.openai.azure.com".into(),
			api_key: Some("key".into()),
			api_version: Some("2024-10-21".into()),
			enabled: true,
			fee: 1.01,
		})
	}

	#[test]
	fn chat_paths_gain_api_version() {
		let (_, query) = adapter().prepare_params("/openai/deployments/gpt-4o/chat/completions", "");
		assert_eq!(query, "api-version=2024-10-21");
	}

	#[test]
	fn non_chat_paths_are_untouched() {
		let (_, query) = adapter().prepare_params("/openai/deployments", "foo=bar");
		assert_eq!(query, "foo=bar");
	}

	#[test]
	fn existing_api_version_is_not_duplicated() {
		let (_, query) = adapter().prepare_params("/chat/completions", "api-version=2023-01-01");
		assert_eq!(query, "api-version=2023-01-01");
	}
}
