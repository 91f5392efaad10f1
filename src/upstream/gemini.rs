// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Native format; full body rewrite via a dedicated client (the only
//! adapter that does not speak an OpenAI-shaped wire format upstream).

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{UpstreamAdapter, UpstreamConfig, UpstreamError};
use crate::catalog::RawModel;

pub struct GeminiAdapter {
	config: UpstreamConfig,
	client: reqwest::Client,
}

impl GeminiAdapter {
	pub fn new(config: UpstreamConfig) -> Self {
		Self { config, client: reqwest::Client::new() }
	}
}

#[async_trait]
impl UpstreamAdapter for GeminiAdapter {
	fn config(&self) -> &UpstreamConfig {
		&self.config
	}

	fn prepare_request_body(&self, body: &[u8]) -> Result<Vec<u8>, UpstreamError> {
		if body.is_empty() {
			return Ok(Vec::new());
		}
		let openai_request: Value = serde_json::from_slice(body)
			.map_err(|e| UpstreamError::InvalidRequest(format!("malformed JSON body: {e}")))?;
		let contents: Vec<Value> = openai_request
			.get("messages")
			.and_then(Value::as_array)
			.map(|messages| {
				messages
					.iter()
					.map(|m| {
						let role = match m.get("role").and_then(Value::as_str) {
							Some("assistant") => "model",
							_ => "user",
						};
						let text = m.get("content").and_then(Value::as_str).unwrap_or("");
						json!({ "role": role, "parts": [{ "text": text }] })
					})
					.collect()
			})
			.unwrap_or_default();

		let mut gemini_request = json!({ "contents": contents });
		if let Some(max_tokens) = openai_request.get("max_tokens") {
			gemini_request["generationConfig"] = json!({ "maxOutputTokens": max_tokens });
		}
		serde_json::to_vec(&gemini_request).map_err(|e| UpstreamError::InvalidRequest(e.to_string()))
	}

	async fn fetch_models(&self) -> Result<Vec<RawModel>, UpstreamError> {
		let url = format!(
			"{}/v1beta/models?key={}",
			self.config.base_url,
			self.config.api_key.as_deref().unwrap_or("")
		);
		let response =
			self.client.get(&url).send().await.map_err(|e| UpstreamError::Network(e.to_string()))?;
		if !response.status().is_success() {
			return Err(UpstreamError::Upstream(format!("gemini models endpoint returned {}", response.status())));
		}
		let body: Value = response.json().await.map_err(|e| UpstreamError::Network(e.to_string()))?;
		let models = body.get("models").and_then(Value::as_array).cloned().unwrap_or_default();
		Ok(models
			.iter()
			.filter_map(|m| {
				let name = m.get("name")?.as_str()?.trim_start_matches("models/").to_string();
				Some(RawModel {
					id: name.clone(),
					display_name: m.get("displayName").and_then(Value::as_str).unwrap_or(&name).to_string(),
					context_length: m.get("inputTokenLimit").and_then(Value::as_u64),
					top_provider_max_completion_tokens: m.get("outputTokenLimit").and_then(Value::as_u64),
					..Default::default()
				})
			})
			.collect())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::upstream::ProviderType;

	fn adapter() -> GeminiAdapter {
		GeminiAdapter::new(UpstreamConfig {
			id: "gemini-main".into(),
			provider_type: ProviderType::Gemini,
			base_url: "https://generativelanguage.googleapis.com".into(),
			api_key: Some("key".into()),
			api_version: None,
			enabled: true,
			fee: 1.01,
		})
	}

	#[test]
	fn rewrites_openai_messages_into_gemini_contents() {
		let body = br#"{"model":"gemini/gemini-1.5-pro","messages":[{"role":"user","content":"hi"}],"max_tokens":50}"#;
		let rewritten = adapter().prepare_request_body(body).unwrap();
		let v: Value = serde_json::from_slice(&rewritten).unwrap();
		assert_eq!(v["contents"][0]["role"], "user");
		assert_eq!(v["contents"][0]["parts"][0]["text"], "hi");
		assert_eq!(v["generationConfig"]["maxOutputTokens"], 50);
	}
}
