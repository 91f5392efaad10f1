// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! OpenAI-compatible; prefix stripping only. Perplexity does not publish
//! a machine-readable catalog, so the model list is seeded statically
//! rather than scraped.

use async_trait::async_trait;

use super::{UpstreamAdapter, UpstreamConfig, UpstreamError};
use crate::catalog::RawModel;

pub struct PerplexityAdapter {
	config: UpstreamConfig,
}

impl PerplexityAdapter {
	pub fn new(config: UpstreamConfig) -> Self {
		Self { config }
	}
}

#[async_trait]
impl UpstreamAdapter for PerplexityAdapter {
	fn config(&self) -> &UpstreamConfig {
		&self.config
	}

	async fn fetch_models(&self) -> Result<Vec<RawModel>, UpstreamError> {
		Ok(vec![
			RawModel { id: "sonar".into(), display_name: "Sonar".into(), ..Default::default() },
			RawModel { id: "sonar-pro".into(), display_name: "Sonar Pro".into(), ..Default::default() },
			RawModel {
				id: "sonar-reasoning".into(),
				display_name: "Sonar Reasoning".into(),
				..Default::default()
			},
		])
	}
}
