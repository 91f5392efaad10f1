// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Narrow request-body parsing (spec.md §9's design note): this module
//! reads only the handful of fields the cost engine and multiplexer need
//! — `model`, `stream`, a declared max-token count, and a character/image
//! tally of the prompt — and never round-trips the body through a strict
//! schema. The raw bytes are kept untouched for forwarding.

use serde_json::Value;

use crate::api::error::{ApiError, ApiErrorKind};
use crate::cost::image::{Detail, ImageRef, MessageImage};

pub struct ParsedRequest {
	pub model: String,
	pub is_streaming: bool,
	pub declared_max_tokens: Option<u64>,
	pub messages_text_chars: u64,
	pub images: Vec<MessageImage>,
}

/// Parses the narrow slice of an inbound chat-completions/responses/
/// embeddings body this crate needs. `body` is never mutated or
/// discarded by this call — callers keep forwarding the original bytes.
pub fn parse(body: &[u8]) -> Result<ParsedRequest, ApiError> {
	let value: Value = serde_json::from_slice(body)
		.map_err(|e| ApiError::new(ApiErrorKind::InvalidRequestError, format!("malformed JSON body: {e}")))?;

	let model = value
		.get("model")
		.and_then(Value::as_str)
		.ok_or_else(|| ApiError::new(ApiErrorKind::InvalidRequestError, "missing `model` field"))?
		.to_string();

	let is_streaming = value.get("stream").and_then(Value::as_bool).unwrap_or(false);

	let declared_max_tokens = value
		.get("max_completion_tokens")
		.or_else(|| value.get("max_tokens"))
		.and_then(Value::as_u64);

	let mut messages_text_chars = 0u64;
	let mut images = Vec::new();

	if let Some(messages) = value.get("messages").and_then(Value::as_array) {
		for message in messages {
			tally_content(message.get("content"), &mut messages_text_chars, &mut images);
		}
	} else if let Some(input) = value.get("input") {
		tally_input(input, &mut messages_text_chars);
	}

	Ok(ParsedRequest { model, is_streaming, declared_max_tokens, messages_text_chars, images })
}

fn tally_content(content: Option<&Value>, chars: &mut u64, images: &mut Vec<MessageImage>) {
	match content {
		Some(Value::String(s)) => *chars += s.len() as u64,
		Some(Value::Array(parts)) => {
			for part in parts {
				match part.get("type").and_then(Value::as_str) {
					Some("text") => {
						if let Some(text) = part.get("text").and_then(Value::as_str) {
							*chars += text.len() as u64;
						}
					},
					Some("image_url") => {
						let image_url = part.get("image_url");
						if let Some(url) = image_url.and_then(|v| v.get("url")).and_then(Value::as_str) {
							let detail = image_url
								.and_then(|v| v.get("detail"))
								.and_then(Value::as_str)
								.map(Detail::parse)
								.unwrap_or_default();
							images.push(MessageImage { image: to_image_ref(url), detail });
						}
					},
					_ => {},
				}
			}
		},
		_ => {},
	}
}

fn tally_input(input: &Value, chars: &mut u64) {
	match input {
		Value::String(s) => *chars += s.len() as u64,
		Value::Array(items) => {
			for item in items {
				match item {
					Value::String(s) => *chars += s.len() as u64,
					Value::Object(_) => {
						if let Some(text) = item.get("text").and_then(Value::as_str) {
							*chars += text.len() as u64;
						} else if let Some(content) = item.get("content") {
							tally_input(content, chars);
						}
					},
					_ => {},
				}
			}
		},
		_ => {},
	}
}

fn to_image_ref(url: &str) -> ImageRef {
	if let Some(encoded) = url.strip_prefix("data:").and_then(|rest| rest.split(",").nth(1)) {
		if let Ok(bytes) = crate::gateway::base64_decode(encoded) {
			return ImageRef::DataUrl { bytes };
		}
	}
	ImageRef::Remote { url: url.to_string() }
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_model_and_stream_flag() {
		let body = br#"{"model":"gpt-4o-mini","stream":true,"messages":[{"role":"user","content":"hi"}]}"#;
		let parsed = parse(body).unwrap();
		assert_eq!(parsed.model, "gpt-4o-mini");
		assert!(parsed.is_streaming);
		assert_eq!(parsed.messages_text_chars, 2);
	}

	#[test]
	fn sums_text_parts_across_a_multi_part_message() {
		let body = br#"{"model":"m","messages":[{"role":"user","content":[
			{"type":"text","text":"abc"},
			{"type":"text","text":"de"}
		]}]}"#;
		let parsed = parse(body).unwrap();
		assert_eq!(parsed.messages_text_chars, 5);
	}

	#[test]
	fn missing_model_is_rejected() {
		assert!(parse(br#"{"messages":[]}"#).is_err());
	}

	#[test]
	fn embeddings_input_string_is_tallied() {
		let parsed = parse(br#"{"model":"m","input":"hello world"}"#).unwrap();
		assert_eq!(parsed.messages_text_chars, 11);
	}
}
