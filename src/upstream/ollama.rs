// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! `{base}/v1/*` for proxying, `{base}/api/tags` for catalog.

use async_trait::async_trait;
use serde::Deserialize;

use super::{UpstreamAdapter, UpstreamConfig, UpstreamError};
use crate::catalog::RawModel;

pub struct OllamaAdapter {
	config: UpstreamConfig,
	client: reqwest::Client,
}

impl OllamaAdapter {
	pub fn new(config: UpstreamConfig) -> Self {
		Self { config, client: reqwest::Client::new() }
	}
}

#[derive(Deserialize)]
struct TagsResponse {
	models: Vec<TagEntry>,
}
#[derive(Deserialize)]
struct TagEntry {
	name: String,
}

#[async_trait]
impl UpstreamAdapter for OllamaAdapter {
	fn config(&self) -> &UpstreamConfig {
		&self.config
	}

	async fn fetch_models(&self) -> Result<Vec<RawModel>, UpstreamError> {
		let url = format!("{}/api/tags", self.config.base_url);
		let response =
			self.client.get(&url).send().await.map_err(|e| UpstreamError::Network(e.to_string()))?;
		if !response.status().is_success() {
			return Err(UpstreamError::Upstream(format!("ollama /api/tags returned {}", response.status())));
		}
		let tags: TagsResponse =
			response.json().await.map_err(|e| UpstreamError::Network(e.to_string()))?;
		// Local Ollama models carry no pricing information; a locally
		// hosted model is free to the operator, so pricing stays at zero.
		Ok(tags
			.models
			.into_iter()
			.map(|entry| RawModel { id: entry.name.clone(), display_name: entry.name, ..Default::default() })
			.collect())
	}
}
