// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Upstream adapters (C7): a common base of overrideable hooks (spec.md
//! §4.7's table) plus concrete adapters per provider. Each adapter module
//! only overrides the hooks that differ from the default; everything else
//! comes from the free functions in this module.

pub mod anthropic;
pub mod azure;
pub mod custom;
pub mod fireworks;
pub mod gemini;
pub mod generic;
pub mod groq;
pub mod ollama;
pub mod openai;
pub mod openrouter;
pub mod perplexity;
pub mod xai;

use async_trait::async_trait;
use hyper::{HeaderMap, StatusCode};
use serde_json::Value;

use crate::catalog::RawModel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderType {
	OpenAi,
	Anthropic,
	OpenRouter,
	Azure,
	Ollama,
	Groq,
	Fireworks,
	Perplexity,
	Xai,
	Gemini,
	PpqAi,
	Generic,
	Custom,
}

impl ProviderType {
	pub fn prefix(self) -> &'static str {
		match self {
			ProviderType::OpenAi => "openai/",
			ProviderType::Anthropic => "anthropic/",
			ProviderType::OpenRouter => "openrouter/",
			ProviderType::Azure => "azure/",
			ProviderType::Ollama => "ollama/",
			ProviderType::Groq => "groq/",
			ProviderType::Fireworks => "fireworks/",
			ProviderType::Perplexity => "perplexity/",
			ProviderType::Xai => "xai/",
			ProviderType::Gemini => "gemini/",
			ProviderType::PpqAi => "ppqai/",
			ProviderType::Generic => "generic/",
			ProviderType::Custom => "custom/",
		}
	}

	pub fn default_fee(self) -> f64 {
		match self {
			ProviderType::OpenRouter => 1.06,
			_ => 1.01,
		}
	}

	pub fn as_str(self) -> &'static str {
		match self {
			ProviderType::OpenAi => "openai",
			ProviderType::Anthropic => "anthropic",
			ProviderType::OpenRouter => "openrouter",
			ProviderType::Azure => "azure",
			ProviderType::Ollama => "ollama",
			ProviderType::Groq => "groq",
			ProviderType::Fireworks => "fireworks",
			ProviderType::Perplexity => "perplexity",
			ProviderType::Xai => "xai",
			ProviderType::Gemini => "gemini",
			ProviderType::PpqAi => "ppqai",
			ProviderType::Generic => "generic",
			ProviderType::Custom => "custom",
		}
	}

	pub fn from_str_loose(s: &str) -> Option<ProviderType> {
		Some(match s {
			"openai" => ProviderType::OpenAi,
			"anthropic" => ProviderType::Anthropic,
			"openrouter" => ProviderType::OpenRouter,
			"azure" => ProviderType::Azure,
			"ollama" => ProviderType::Ollama,
			"groq" => ProviderType::Groq,
			"fireworks" => ProviderType::Fireworks,
			"perplexity" => ProviderType::Perplexity,
			"xai" => ProviderType::Xai,
			"gemini" => ProviderType::Gemini,
			"ppqai" => ProviderType::PpqAi,
			"generic" => ProviderType::Generic,
			"custom" => ProviderType::Custom,
			_ => return None,
		})
	}

	/// Builds the concrete adapter for this provider type.
	pub fn build_adapter(self, config: UpstreamConfig) -> Box<dyn UpstreamAdapter> {
		match self {
			ProviderType::OpenAi => Box::new(openai::OpenAiAdapter::new(config)),
			ProviderType::Anthropic => Box::new(anthropic::AnthropicAdapter::new(config)),
			ProviderType::OpenRouter => Box::new(openrouter::OpenRouterAdapter::new(config)),
			ProviderType::Azure => Box::new(azure::AzureAdapter::new(config)),
			ProviderType::Ollama => Box::new(ollama::OllamaAdapter::new(config)),
			ProviderType::Groq => Box::new(groq::GroqAdapter::new(config)),
			ProviderType::Fireworks => Box::new(fireworks::FireworksAdapter::new(config)),
			ProviderType::Perplexity => Box::new(perplexity::PerplexityAdapter::new(config)),
			ProviderType::Xai => Box::new(xai::XaiAdapter::new(config)),
			ProviderType::Gemini => Box::new(gemini::GeminiAdapter::new(config)),
			// ppq.ai is OpenAI-compatible with no special casing of its own.
			ProviderType::PpqAi => Box::new(custom::CustomAdapter::new(config)),
			ProviderType::Generic => Box::new(generic::GenericAdapter::new(config)),
			ProviderType::Custom => Box::new(custom::CustomAdapter::new(config)),
		}
	}
}

#[derive(Debug, Clone)]
pub struct UpstreamConfig {
	pub id: String,
	pub provider_type: ProviderType,
	pub base_url: String,
	pub api_key: Option<String>,
	pub api_version: Option<String>,
	pub enabled: bool,
	pub fee: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
	#[error("invalid request to upstream: {0}")]
	InvalidRequest(String),
	#[error("upstream authentication failed")]
	Auth,
	#[error("model not found: {0}")]
	InvalidModel(String),
	#[error("upstream error: {0}")]
	Upstream(String),
	#[error("rate limited by upstream")]
	RateLimited,
	#[error("network error: {0}")]
	Network(String),
}

/// The per-provider overrideable hook set (spec.md §4.7's table). Default
/// methods implement the "sensible default" column; a concrete adapter
/// overrides only what its provider does differently.
#[async_trait]
pub trait UpstreamAdapter: Send + Sync {
	fn config(&self) -> &UpstreamConfig;

	/// Strips host-level and credential-bearing headers, injects upstream
	/// auth. Default: remove `host`, `content-length`, `x-cashu`,
	/// `refund-lnurl`, `key-expiry-time`, `authorization`; set
	/// `Authorization: Bearer <api_key>` when present.
	fn prepare_headers(&self, inbound: &HeaderMap) -> HeaderMap {
		default_prepare_headers(inbound, self.config().api_key.as_deref(), "Bearer")
	}

	/// Query-string rewriting. Default: pass through unchanged.
	fn prepare_params(&self, path: &str, query: &str) -> (String, String) {
		(path.to_string(), query.to_string())
	}

	/// Rewrites the `model` value in the body for the upstream's
	/// namespace. Default: strip the provider's canonical prefix.
	fn transform_model_name(&self, id: &str) -> String {
		id.strip_prefix(self.config().provider_type.prefix()).unwrap_or(id).to_string()
	}

	/// Full body rewrite. Default: JSON-decode, apply
	/// `transform_model_name` to the `model` field, re-encode.
	fn prepare_request_body(&self, body: &[u8]) -> Result<Vec<u8>, UpstreamError> {
		default_prepare_request_body(body, |id| self.transform_model_name(id))
	}

	/// Populates the catalog. Provider-specific; no useful default exists.
	async fn fetch_models(&self) -> Result<Vec<RawModel>, UpstreamError>;

	/// Translates an upstream error response into a proxy error, per
	/// spec.md §4.7's ordered rule table. `path` is the upstream-relative
	/// request path (e.g. `/chat/completions`); a 404 on a chat-completions
	/// path is an unknown model even when the body doesn't say so.
	fn map_upstream_error_response(&self, status: StatusCode, body: &[u8], path: &str) -> UpstreamError {
		default_map_upstream_error_response(status, body, path)
	}

	fn base_url(&self) -> &str {
		&self.config().base_url
	}
}

pub fn default_prepare_headers(
	inbound: &HeaderMap, api_key: Option<&str>, auth_scheme: &str,
) -> HeaderMap {
	let mut out = inbound.clone();
	for name in ["host", "content-length", "x-cashu", "refund-lnurl", "key-expiry-time", "authorization"]
	{
		out.remove(name);
	}
	if let Some(key) = api_key {
		if let Ok(value) = format!("{auth_scheme} {key}").parse() {
			out.insert(hyper::header::AUTHORIZATION, value);
		}
	}
	out
}

pub fn default_prepare_request_body(
	body: &[u8], transform_model_name: impl Fn(&str) -> String,
) -> Result<Vec<u8>, UpstreamError> {
	if body.is_empty() {
		return Ok(Vec::new());
	}
	let mut value: Value = serde_json::from_slice(body)
		.map_err(|e| UpstreamError::InvalidRequest(format!("malformed JSON body: {e}")))?;
	if let Some(model) = value.get("model").and_then(Value::as_str) {
		let rewritten = transform_model_name(model);
		value["model"] = Value::String(rewritten);
	}
	serde_json::to_vec(&value).map_err(|e| UpstreamError::InvalidRequest(e.to_string()))
}

/// The ordered error-mapping rules of spec.md §4.7: first match wins. A 404
/// is an unknown model either when the body says so or when the request hit
/// a chat-completions endpoint (an upstream 404 there is never a routing
/// miss on our side, since the path itself is well-formed).
pub fn default_map_upstream_error_response(status: StatusCode, body: &[u8], path: &str) -> UpstreamError {
	let message = extract_error_message(body);
	match status.as_u16() {
		400 | 422 => UpstreamError::InvalidRequest(message),
		401 | 403 => UpstreamError::Auth,
		404 => {
			if message.to_lowercase().contains("model") || is_chat_completions_path(path) {
				UpstreamError::InvalidModel(message)
			} else {
				UpstreamError::Upstream(message)
			}
		},
		429 => UpstreamError::RateLimited,
		500..=599 => UpstreamError::Upstream(message),
		_ => UpstreamError::Upstream(message),
	}
}

fn is_chat_completions_path(path: &str) -> bool {
	path.contains("chat/completions")
}

/// Shared OpenAI-compatible `GET {url}` catalog fetch: expects a
/// `{"data": [...]}` envelope with `id`, optional `pricing`, optional
/// `context_length` and `top_provider` fields (the shape OpenAI,
/// OpenRouter, Groq, Fireworks, Perplexity, xAI and most
/// `generic`/`custom` deployments all return).
pub async fn fetch_openai_compatible_models(
	client: &reqwest::Client, url: &str, api_key: Option<&str>,
) -> Result<Vec<RawModel>, UpstreamError> {
	let mut request = client.get(url);
	if let Some(key) = api_key {
		request = request.bearer_auth(key);
	}
	let response = request.send().await.map_err(|e| UpstreamError::Network(e.to_string()))?;
	if !response.status().is_success() {
		let status = response.status();
		let body = response.bytes().await.unwrap_or_default();
		// Catalog refresh never hits a chat-completions path, so a 404 here
		// is always a plain upstream error, never an unknown-model one.
		return Err(default_map_upstream_error_response(status, &body, ""));
	}
	let body: Value = response.json().await.map_err(|e| UpstreamError::Network(e.to_string()))?;
	let entries = body.get("data").and_then(Value::as_array).cloned().unwrap_or_default();
	Ok(entries.iter().filter_map(parse_openai_compatible_entry).collect())
}

fn parse_openai_compatible_entry(entry: &Value) -> Option<RawModel> {
	let id = entry.get("id")?.as_str()?.to_string();
	let pricing = entry.get("pricing");
	let price_field = |name: &str| -> f64 {
		pricing
			.and_then(|p| p.get(name))
			.and_then(|v| v.as_str().and_then(|s| s.parse().ok()).or_else(|| v.as_f64()))
			.unwrap_or(0.0)
	};
	let top_provider = entry.get("top_provider");
	Some(RawModel {
		id,
		display_name: entry.get("name").and_then(Value::as_str).unwrap_or("").to_string(),
		context_length: entry.get("context_length").and_then(Value::as_u64),
		top_provider_context_length: top_provider
			.and_then(|t| t.get("context_length"))
			.and_then(Value::as_u64),
		top_provider_max_completion_tokens: top_provider
			.and_then(|t| t.get("max_completion_tokens"))
			.and_then(Value::as_u64),
		usd_pricing: crate::catalog::Pricing {
			prompt: price_field("prompt"),
			completion: price_field("completion"),
			request: price_field("request"),
			image: price_field("image"),
			web_search: price_field("web_search"),
			internal_reasoning: price_field("internal_reasoning"),
		},
		canonical_slug: entry.get("canonical_slug").and_then(Value::as_str).map(String::from),
		alias_ids: Vec::new(),
	})
}

fn extract_error_message(body: &[u8]) -> String {
	serde_json::from_slice::<Value>(body)
		.ok()
		.and_then(|v| v.get("error").and_then(|e| e.get("message")).and_then(Value::as_str).map(String::from))
		.unwrap_or_else(|| String::from_utf8_lossy(body).to_string())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn error_mapping_rules_apply_in_order() {
		assert!(matches!(
			default_map_upstream_error_response(StatusCode::BAD_REQUEST, b"{}", "/chat/completions"),
			UpstreamError::InvalidRequest(_)
		));
		assert!(matches!(
			default_map_upstream_error_response(StatusCode::UNAUTHORIZED, b"{}", "/chat/completions"),
			UpstreamError::Auth
		));
		assert!(matches!(
			default_map_upstream_error_response(
				StatusCode::NOT_FOUND,
				br#"{"error":{"message":"no such model"}}"#,
				"/embeddings"
			),
			UpstreamError::InvalidModel(_)
		));
		assert!(matches!(
			default_map_upstream_error_response(StatusCode::NOT_FOUND, b"{}", "/embeddings"),
			UpstreamError::Upstream(_)
		));
		assert!(matches!(
			default_map_upstream_error_response(StatusCode::TOO_MANY_REQUESTS, b"{}", "/chat/completions"),
			UpstreamError::RateLimited
		));
		assert!(matches!(
			default_map_upstream_error_response(StatusCode::BAD_GATEWAY, b"{}", "/chat/completions"),
			UpstreamError::Upstream(_)
		));
	}

	#[test]
	fn a_404_on_a_chat_completions_path_is_an_unknown_model_even_without_the_word_model() {
		assert!(matches!(
			default_map_upstream_error_response(StatusCode::NOT_FOUND, b"{}", "/v1/chat/completions"),
			UpstreamError::InvalidModel(_)
		));
	}

	#[test]
	fn prepare_request_body_strips_provider_prefix_from_model() {
		let rewritten =
			default_prepare_request_body(br#"{"model":"openai/gpt-4o-mini"}"#, |id| {
				id.strip_prefix("openai/").unwrap_or(id).to_string()
			})
			.unwrap();
		let v: Value = serde_json::from_slice(&rewritten).unwrap();
		assert_eq!(v["model"], "gpt-4o-mini");
	}

	#[test]
	fn prepare_headers_strips_credential_bearing_headers_and_injects_auth() {
		let mut inbound = HeaderMap::new();
		inbound.insert("x-cashu", "token".parse().unwrap());
		inbound.insert("authorization", "Bearer old".parse().unwrap());
		let out = default_prepare_headers(&inbound, Some("sk-upstream"), "Bearer");
		assert!(!out.contains_key("x-cashu"));
		assert_eq!(out.get("authorization").unwrap(), "Bearer sk-upstream");
	}

	#[test]
	fn provider_type_string_round_trips() {
		for pt in [
			ProviderType::OpenAi,
			ProviderType::Anthropic,
			ProviderType::OpenRouter,
			ProviderType::Azure,
			ProviderType::Ollama,
			ProviderType::Groq,
			ProviderType::Fireworks,
			ProviderType::Perplexity,
			ProviderType::Xai,
			ProviderType::Gemini,
			ProviderType::PpqAi,
			ProviderType::Generic,
			ProviderType::Custom,
		] {
			assert_eq!(ProviderType::from_str_loose(pt.as_str()), Some(pt));
		}
	}
}
