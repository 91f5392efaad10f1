// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! OpenAI-compatible; prefix stripping only.

use async_trait::async_trait;

use super::{fetch_openai_compatible_models, UpstreamAdapter, UpstreamConfig, UpstreamError};
use crate::catalog::RawModel;

pub struct GroqAdapter {
	config: UpstreamConfig,
	client: reqwest::Client,
}

impl GroqAdapter {
	pub fn new(config: UpstreamConfig) -> Self {
		Self { config, client: reqwest::Client::new() }
	}
}

#[async_trait]
impl UpstreamAdapter for GroqAdapter {
	fn config(&self) -> &UpstreamConfig {
		&self.config
	}

	async fn fetch_models(&self) -> Result<Vec<RawModel>, UpstreamError> {
		let url = format!("{}/openai/v1/models", self.config.base_url);
		fetch_openai_compatible_models(&self.client, &url, self.config.api_key.as_deref()).await
	}
}
