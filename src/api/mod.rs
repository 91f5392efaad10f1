// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! HTTP routing: maps inbound paths onto the gateway's proxied-request
//! handler, the models listing, and a couple of ambient operational
//! endpoints (`/healthz`, `/metrics`).

pub mod error;

use bytes::Bytes;
use hyper::{HeaderMap, Method, Request, Response, StatusCode};
use serde::Serialize;

use self::error::ApiErrorKind;
use crate::api::error::ApiError;
use crate::gateway::{self, GatewayBody};
use crate::state::AppState;
use crate::util::metrics::Metrics;

pub const MODELS_PATH: &str = "/v1/models";
pub const HEALTHZ_PATH: &str = "/healthz";
pub const METRICS_PATH: &str = "/metrics";

/// Dispatches one inbound request to its handler by method and path. Every
/// path under `/v1/` other than `/v1/models` is forwarded to whichever
/// upstream's catalog claims the requested model (spec.md §4.3's "any
/// OpenAI-compatible route is proxied, not just chat completions").
pub async fn route(
	state: &AppState, method: &Method, path: &str, query: &str, headers: &HeaderMap, body: Bytes,
) -> Response<GatewayBody> {
	match (method, path) {
		(&Method::GET, HEALTHZ_PATH) => healthz_response(),
		(&Method::GET, METRICS_PATH) => metrics_response(state),
		(&Method::GET, MODELS_PATH) => models_response(state),
		(&Method::POST, path) if path.starts_with("/v1/") => {
			let upstream_path = &path[3..];
			match gateway::handle(state, upstream_path, query, headers, body).await {
				Ok(response) => response,
				Err(e) => error_response(&e),
			}
		},
		_ => error_response(&ApiError::new(
			ApiErrorKind::InvalidRequestError,
			format!("no such route: {method} {path}"),
		)),
	}
}

fn error_response(err: &ApiError) -> Response<GatewayBody> {
	let (status, body) = error::to_json_response(err);
	gateway::response::json_response(status, body)
}

fn healthz_response() -> Response<GatewayBody> {
	gateway::response::json_response(StatusCode::OK, b"{\"status\":\"ok\"}".to_vec())
}

fn metrics_response(state: &AppState) -> Response<GatewayBody> {
	let metrics = Metrics::new();
	metrics.update(state);
	let body = metrics.gather_metrics().into_bytes();
	Response::builder()
		.status(StatusCode::OK)
		.header(hyper::header::CONTENT_TYPE, "text/plain; version=0.0.4")
		.body(gateway::response::full_body(body))
		// unwrap safety: status and the one header above never fail to build.
		.unwrap()
}

#[derive(Serialize)]
struct ModelsListResponse {
	object: &'static str,
	data: Vec<ModelEntry>,
}

#[derive(Serialize)]
struct ModelEntry {
	id: String,
	object: &'static str,
	owned_by: String,
}

fn models_response(state: &AppState) -> Response<GatewayBody> {
	let data = state
		.all_models()
		.into_iter()
		.map(|m| ModelEntry { id: m.id, object: "model", owned_by: m.upstream_id })
		.collect();
	let body = ModelsListResponse { object: "list", data };
	let bytes = serde_json::to_vec(&body).expect("ModelsListResponse is always serializable");
	gateway::response::json_response(StatusCode::OK, bytes)
}

/// Reads an inbound request's body into one contiguous [`Bytes`] buffer,
/// so the gateway can parse a narrow slice of it while still forwarding
/// the original bytes.
pub async fn buffer_request_body(
	request: Request<hyper::body::Incoming>,
) -> Result<(Method, String, String, HeaderMap, Bytes), hyper::Error> {
	use http_body_util::BodyExt;

	let (parts, body) = request.into_parts();
	let bytes = body.collect().await?.to_bytes();
	let path = parts.uri.path().to_string();
	let query = parts.uri.query().unwrap_or("").to_string();
	Ok((parts.method, path, query, parts.headers, bytes))
}
