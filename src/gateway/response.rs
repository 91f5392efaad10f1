// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Response-path cost settlement (C8): the non-streaming branch parses the
//! full JSON body once and injects a `cost` key; the streaming branch
//! rescans a bounded rolling tail of the SSE transcript for the
//! authoritative `usage` block and appends a terminal `data: {"cost":
//! ...}\n\n` event, in both cases finalizing the ledger reservation
//! exactly once no matter how the client or upstream end the exchange.

use std::convert::Infallible;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::StreamExt;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::Frame;
use hyper::{Response, StatusCode};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::api::error::ApiError;
use crate::catalog::Model;
use crate::cost::{self, TokenCost};
use crate::gateway::credential;
use crate::ledger::Ledger;
use crate::payment::wallet::Wallet;

pub type GatewayBody = BoxBody<Bytes, Infallible>;

const STREAM_TAIL_CAPACITY: usize = 64 * 1024;

pub fn full_body(bytes: Vec<u8>) -> GatewayBody {
	Full::new(Bytes::from(bytes)).boxed()
}

pub fn json_response(status: StatusCode, bytes: Vec<u8>) -> Response<GatewayBody> {
	Response::builder()
		.status(status)
		.header(hyper::header::CONTENT_TYPE, "application/json")
		.body(full_body(bytes))
		// unwrap safety: status and the one header above never fail to build.
		.unwrap()
}

/// Reads the upstream's full body, finalizes the ledger reservation
/// against its reported `usage`, and returns the same JSON with a `cost`
/// key appended.
pub async fn finish_non_streaming(
	upstream: reqwest::Response, status: StatusCode, model: &Model, sats_per_usd: f64,
	reserved_msats: u64, ledger: &dyn Ledger, credential_hash: &str,
) -> Result<Response<GatewayBody>, ApiError> {
	let body = upstream.bytes().await.map_err(|e| ApiError::internal("reading upstream body", e))?;
	let mut value: Value = serde_json::from_slice(&body)
		.map_err(|e| ApiError::internal("upstream returned non-JSON body", e))?;

	let cost = extract_usage(&value)
		.map(|(prompt, completion)| cost::final_cost_from_usage(model, sats_per_usd, prompt, completion))
		.unwrap_or(TokenCost { base_msats: 0, input_msats: 0, output_msats: 0, total_msats: reserved_msats });

	ledger.finalize(credential_hash, reserved_msats, cost.total_msats).await?;

	if let Value::Object(map) = &mut value {
		map.insert("cost".to_string(), serde_json::to_value(cost).unwrap_or(Value::Null));
	}
	let bytes = serde_json::to_vec(&value).map_err(|e| ApiError::internal("re-encoding response", e))?;
	Ok(json_response(status, bytes))
}

/// Streams the upstream's SSE body through unchanged, settling the ledger
/// once the stream ends (or the client disconnects) and appending a
/// terminal cost event.
///
/// `one_shot_wallet` is `Some` only for an `X-Cashu` credential: the
/// one-shot close (mint-change-then-delete-row, C6) can't run until the
/// reservation is actually finalized against real usage, which for a
/// streaming response only happens after the body has finished draining —
/// long after the HTTP response (and its headers) were handed back to the
/// caller. So the change token can't travel as a response header the way
/// the non-streaming path does it; instead it rides the terminal SSE event
/// as a sibling `x_cashu` field once the close completes.
pub fn start_streaming(
	upstream: reqwest::Response, model: Model, sats_per_usd: f64, reserved_msats: u64,
	ledger: Arc<dyn Ledger>, credential_hash: String, one_shot_wallet: Option<Arc<dyn Wallet>>,
) -> Response<GatewayBody> {
	let (tx, rx) = mpsc::channel::<Result<Frame<Bytes>, Infallible>>(16);

	tokio::spawn(async move {
		let mut tail = RollingTail::new(STREAM_TAIL_CAPACITY);
		let mut stream = upstream.bytes_stream();
		while let Some(chunk) = stream.next().await {
			let Ok(bytes) = chunk else { break };
			tail.push(&bytes);
			if tx.send(Ok(Frame::data(bytes))).await.is_err() {
				// Client went away; keep draining so the tail buffer still
				// sees the terminal usage chunk, but stop trying to write.
				while let Some(Ok(bytes)) = stream.next().await {
					tail.push(&bytes);
				}
				break;
			}
		}

		let cost = tail
			.find_usage()
			.map(|(prompt, completion)| cost::final_cost_from_usage(&model, sats_per_usd, prompt, completion))
			.unwrap_or(TokenCost {
				base_msats: 0,
				input_msats: 0,
				output_msats: 0,
				total_msats: reserved_msats,
			});

		if let Err(e) = ledger.finalize(&credential_hash, reserved_msats, cost.total_msats).await {
			log::warn!("failed to finalize streamed reservation for {credential_hash}: {e}");
		}

		let mut event = serde_json::json!({ "cost": cost });
		if let Some(wallet) = one_shot_wallet {
			match ledger.get(&credential_hash).await {
				Ok(Some(credential)) => {
					match credential::close_one_shot(ledger.as_ref(), wallet.as_ref(), &credential).await {
						Ok(Some(token)) => {
							if let Some(obj) = event.as_object_mut() {
								obj.insert("x_cashu".to_string(), Value::String(token));
							}
						},
						Ok(None) => {},
						Err(e) => log::warn!("failed to close one-shot token for {credential_hash}: {e}"),
					}
				},
				Ok(None) => {},
				Err(e) => log::warn!("failed to load credential {credential_hash} for one-shot close: {e}"),
			}
		}

		let event = format!("data: {event}\n\n");
		let _ = tx.send(Ok(Frame::data(Bytes::from(event)))).await;
	});

	let body = StreamBody::new(ReceiverStream::new(rx)).boxed();
	Response::builder()
		.status(StatusCode::OK)
		.header(hyper::header::CONTENT_TYPE, "text/event-stream")
		.body(body)
		// unwrap safety: status and the one header above never fail to build.
		.unwrap()
}

/// Reads `usage.prompt_tokens`/`usage.completion_tokens`, folding in the
/// `reasoning_tokens`/`image_tokens` sub-counts some upstreams report
/// (spec.md §4.8). Those sub-counts are only added when they appear as
/// top-level usage fields: when an upstream nests them under
/// `completion_tokens_details`/`prompt_tokens_details` instead, they are
/// already a subset of the aggregate and folding them in again would
/// double-count (see DESIGN.md's Open Question decision).
fn extract_usage(value: &Value) -> Option<(u64, u64)> {
	let usage = value.get("usage")?;
	let mut prompt = usage.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0);
	let mut completion = usage.get("completion_tokens").and_then(Value::as_u64).unwrap_or(0);
	if usage.get("completion_tokens_details").is_none() {
		if let Some(reasoning) = usage.get("reasoning_tokens").and_then(Value::as_u64) {
			completion += reasoning;
		}
	}
	if usage.get("prompt_tokens_details").is_none() {
		if let Some(image) = usage.get("image_tokens").and_then(Value::as_u64) {
			prompt += image;
		}
	}
	Some((prompt, completion))
}

/// A bounded tail of the raw SSE transcript, re-scanned from the end for
/// the authoritative `usage` block once the stream closes (spec.md §9:
/// some providers only report `usage` on the final chunk, others repeat
/// it with different numbers on every chunk — the last one wins).
struct RollingTail {
	buf: Vec<u8>,
	cap: usize,
}

impl RollingTail {
	fn new(cap: usize) -> Self {
		Self { buf: Vec::with_capacity(cap.min(4096)), cap }
	}

	fn push(&mut self, chunk: &[u8]) {
		self.buf.extend_from_slice(chunk);
		if self.buf.len() > self.cap {
			let excess = self.buf.len() - self.cap;
			self.buf.drain(0..excess);
		}
	}

	fn find_usage(&self) -> Option<(u64, u64)> {
		let text = String::from_utf8_lossy(&self.buf);
		for line in text.lines().rev() {
			let Some(payload) = line.strip_prefix("data: ") else { continue };
			if payload.trim() == "[DONE]" {
				continue;
			}
			if let Ok(value) = serde_json::from_str::<Value>(payload) {
				if let Some(usage) = extract_usage(&value) {
					return Some(usage);
				}
			}
		}
		None
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rolling_tail_finds_the_last_usage_block() {
		let mut tail = RollingTail::new(1024);
		tail.push(b"data: {\"usage\":{\"prompt_tokens\":1,\"completion_tokens\":2}}\n\n");
		tail.push(b"data: {\"usage\":{\"prompt_tokens\":10,\"completion_tokens\":20}}\n\n");
		tail.push(b"data: [DONE]\n\n");
		assert_eq!(tail.find_usage(), Some((10, 20)));
	}

	#[test]
	fn extract_usage_folds_top_level_reasoning_and_image_tokens() {
		let value: Value = serde_json::json!({
			"usage": {"prompt_tokens": 10, "completion_tokens": 30, "reasoning_tokens": 5, "image_tokens": 2}
		});
		assert_eq!(extract_usage(&value), Some((12, 35)));
	}

	#[test]
	fn extract_usage_does_not_double_count_nested_details() {
		let value: Value = serde_json::json!({
			"usage": {
				"prompt_tokens": 10, "completion_tokens": 30,
				"completion_tokens_details": {"reasoning_tokens": 5},
				"prompt_tokens_details": {"image_tokens": 2},
			}
		});
		assert_eq!(extract_usage(&value), Some((10, 30)));
	}

	#[test]
	fn rolling_tail_discards_data_past_its_capacity() {
		let mut tail = RollingTail::new(16);
		tail.push(b"0123456789");
		tail.push(b"abcdefghij");
		assert_eq!(tail.buf.len(), 16);
		assert_eq!(tail.buf.as_slice(), b"456789abcdefghij");
	}
}
