// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! `GET/POST https://api.openai.com/v1/*`, `Authorization: Bearer`.

use async_trait::async_trait;

use super::{fetch_openai_compatible_models, UpstreamAdapter, UpstreamConfig, UpstreamError};
use crate::catalog::RawModel;

pub struct OpenAiAdapter {
	config: UpstreamConfig,
	client: reqwest::Client,
}

impl OpenAiAdapter {
	pub fn new(config: UpstreamConfig) -> Self {
		Self { config, client: reqwest::Client::new() }
	}
}

#[async_trait]
impl UpstreamAdapter for OpenAiAdapter {
	fn config(&self) -> &UpstreamConfig {
		&self.config
	}

	async fn fetch_models(&self) -> Result<Vec<RawModel>, UpstreamError> {
		let url = format!("{}/v1/models", self.config.base_url);
		fetch_openai_compatible_models(&self.client, &url, self.config.api_key.as_deref()).await
	}
}
