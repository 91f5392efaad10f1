// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Streaming proxy (C8): the end-to-end request path. Ties together
//! credential resolution (C6), model resolution (C3), reservation (C4/C5),
//! outbound dispatch (C7), and response settlement into one call per
//! inbound request.

pub mod credential;
pub mod forward;
pub mod request;
pub mod response;

use std::sync::Arc;

use base64::Engine;
use hyper::{HeaderMap, StatusCode};

use crate::api::error::{ApiError, ApiErrorKind};
use crate::cost::image::{ImageRef, MessageImage};
use crate::cost::{self, CostConfig};
use crate::payment::resolve_credential;
use crate::state::AppState;

pub use response::GatewayBody;

pub(crate) fn base64_decode(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
	base64::engine::general_purpose::STANDARD.decode(s)
}

/// Handles one proxied request against `path` (the upstream-relative path,
/// e.g. `/chat/completions`), given the already-buffered request body.
pub async fn handle(
	state: &AppState, path: &str, query: &str, headers: &HeaderMap, body: bytes::Bytes,
) -> Result<hyper::Response<GatewayBody>, ApiError> {
	let inbound = credential::extract(headers)?;
	let resolved =
		resolve_credential(state.ledger.as_ref(), state.wallet.as_ref(), &inbound.bearer, &state.config.trusted_mints, &state.config.primary_mint)
			.await
			.map_err(credential_resolve_error)?;

	if inbound.refund_lnurl.is_some() || inbound.key_expiry_time.is_some() {
		state
			.ledger
			.set_refund_info(
				&resolved.credential.hash,
				inbound.refund_lnurl.as_deref(),
				None,
				None,
				inbound.key_expiry_time,
			)
			.await?;
	}

	let parsed = request::parse(&body)?;
	let (upstream, model) = state.resolve_model(&parsed.model)?;

	let sats_per_usd = state.oracle.sats_per_usd();
	let images: Vec<MessageImage> = fetch_remote_images(state, parsed.images).await;
	let cost_config = CostConfig {
		mode: state.config.cost_mode,
		min_request_msats: state.config.min_request_msats,
		tolerance_percentage: state.config.tolerance_percentage,
	};
	let reservation = cost::discounted_reservation(
		&model,
		sats_per_usd,
		&cost_config,
		parsed.messages_text_chars,
		&images,
		parsed.declared_max_tokens,
	)?;

	if let Err(e) = state.ledger.reserve(&resolved.credential.hash, reservation).await {
		return Err(reserve_error(e, inbound.source, &resolved.credential, reservation));
	}

	let rewritten_body = rewrite_model_in_body(&body, &parsed.model, &model.id);
	let dispatch_result =
		forward::dispatch(&state.http_client, upstream.adapter.as_ref(), headers, path, query, &rewritten_body)
			.await;

	let upstream_response = match dispatch_result {
		Ok(response) => response,
		Err(e) => {
			state.ledger.revert(&resolved.credential.hash, reservation).await?;
			return Err(e.into());
		},
	};

	let status = StatusCode::from_u16(upstream_response.status().as_u16())
		.unwrap_or(StatusCode::BAD_GATEWAY);

	// A `stream:true` request only actually gets a streamed response when
	// the upstream honors it; an upstream that instead returns a plain
	// JSON body (a JSON error, or a provider that ignored the flag) must
	// take the non-streaming path, or the JSON gets mislabeled
	// `text/event-stream` and the reservation finalizes on the
	// full-reservation fallback instead of the real usage.
	let upstream_is_sse = upstream_response
		.headers()
		.get(reqwest::header::CONTENT_TYPE)
		.and_then(|v| v.to_str().ok())
		.map(|v| v.starts_with("text/event-stream"))
		.unwrap_or(false);
	let is_cashu = inbound.source == credential::CredentialSource::Cashu;

	let response = if parsed.is_streaming && upstream_is_sse {
		response::start_streaming(
			upstream_response,
			model,
			sats_per_usd,
			reservation,
			Arc::clone(&state.ledger),
			resolved.credential.hash.clone(),
			is_cashu.then(|| Arc::clone(&state.wallet)),
		)
	} else {
		let response = response::finish_non_streaming(
			upstream_response,
			status,
			&model,
			sats_per_usd,
			reservation,
			state.ledger.as_ref(),
			&resolved.credential.hash,
		)
		.await?;

		if is_cashu {
			if let Some(credential) = state.ledger.get(&resolved.credential.hash).await? {
				let token =
					credential::close_one_shot(state.ledger.as_ref(), state.wallet.as_ref(), &credential).await?;
				if let Some(token) = token {
					let mut response = response;
					if let Ok(value) = token.parse() {
						response.headers_mut().insert(credential::CASHU_HEADER, value);
					}
					return Ok(response);
				}
			}
		}

		response
	};

	Ok(response)
}

/// Maps a failed `reserve` onto the HTTP surface. A bearer-key credential
/// sees the generic 402 `insufficient_quota`; a one-shot `X-Cashu` token
/// instead sees 413 `minimum_balance_required` carrying `amount_required_msat`
/// so the client knows exactly how much more to pay (spec.md §4.8, §7).
fn reserve_error(
	e: crate::ledger::LedgerError, source: credential::CredentialSource,
	credential: &crate::ledger::Credential, reservation: u64,
) -> ApiError {
	use crate::ledger::LedgerError;
	match (e, source) {
		(LedgerError::InsufficientBalance, credential::CredentialSource::Cashu) => {
			let shortfall = reservation.saturating_sub(credential.available_msats());
			ApiError::new(ApiErrorKind::InsufficientQuota, "insufficient balance for one-shot token")
				.with_status(StatusCode::PAYLOAD_TOO_LARGE)
				.with_code("minimum_balance_required")
				.with_amount_required(shortfall.max(1))
		},
		(e, _) => e.into(),
	}
}

fn credential_resolve_error(e: crate::payment::ResolveError) -> ApiError {
	match e {
		crate::payment::ResolveError::Ledger(e) => e.into(),
		crate::payment::ResolveError::Wallet(e) => e.into(),
		crate::payment::ResolveError::NotImplemented(what) => {
			ApiError::new(ApiErrorKind::CashuError, format!("{what} is not implemented"))
				.with_status(StatusCode::NOT_IMPLEMENTED)
		},
	}
}

impl From<crate::upstream::UpstreamError> for ApiError {
	fn from(e: crate::upstream::UpstreamError) -> Self {
		use crate::upstream::UpstreamError;
		match e {
			UpstreamError::InvalidRequest(msg) => ApiError::new(ApiErrorKind::InvalidRequestError, msg),
			UpstreamError::Auth => {
				ApiError::new(ApiErrorKind::UpstreamAuthError, "upstream rejected our credentials")
			},
			UpstreamError::InvalidModel(id) => {
				ApiError::new(ApiErrorKind::InvalidModel, format!("unknown model '{id}'"))
					.with_code("unknown_model")
			},
			UpstreamError::Upstream(msg) => ApiError::new(ApiErrorKind::UpstreamError, msg),
			UpstreamError::RateLimited => {
				ApiError::new(ApiErrorKind::RateLimitExceeded, "rate limited by upstream")
			},
			UpstreamError::Network(msg) => ApiError::internal("upstream network error", msg),
		}
	}
}

/// Rewrites the requested model id in the forwarded body to the catalog's
/// canonical id, so the upstream always sees the id it actually knows
/// rather than whichever alias the client used (the adapter's own
/// `transform_model_name` then strips any remaining provider prefix).
fn rewrite_model_in_body(body: &[u8], requested: &str, canonical: &str) -> Vec<u8> {
	if requested == canonical {
		return body.to_vec();
	}
	let Ok(mut value) = serde_json::from_slice::<serde_json::Value>(body) else {
		return body.to_vec();
	};
	value["model"] = serde_json::Value::String(canonical.to_string());
	serde_json::to_vec(&value).unwrap_or_else(|_| body.to_vec())
}

/// Resolves `Remote` image refs into `DataUrl`s by fetching their bytes
/// (bounded by a short timeout), so the cost engine's tile-counting
/// estimator can sniff real dimensions instead of falling back to its
/// conservative default. A fetch failure keeps the `Remote` variant, which
/// the estimator still handles. Each image's requested `detail` passes
/// through unchanged.
async fn fetch_remote_images(state: &AppState, images: Vec<MessageImage>) -> Vec<MessageImage> {
	let mut out = Vec::with_capacity(images.len());
	for MessageImage { image, detail } in images {
		let image = match image {
			ImageRef::Remote { url } => match state.http_client.get(&url).send().await {
				Ok(response) => match response.bytes().await {
					Ok(bytes) => ImageRef::DataUrl { bytes: bytes.to_vec() },
					Err(_) => ImageRef::Remote { url },
				},
				Err(_) => ImageRef::Remote { url },
			},
			other => other,
		};
		out.push(MessageImage { image, detail });
	}
	out
}
