// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Outbound dispatch (C7/C8 boundary): builds the upstream request through
//! an adapter's hooks and sends it with `reqwest`. Kept free of any
//! ledger/cost concerns — this module only knows how to talk to one
//! upstream, not how much the call should cost.

use hyper::HeaderMap;

use crate::upstream::{UpstreamAdapter, UpstreamError};

/// Sends `body` to `adapter`'s upstream at `path`/`query`, applying its
/// header/param/body rewrite hooks first. Returns the raw `reqwest`
/// response on any 2xx status; maps everything else through the adapter's
/// error-response hook.
pub async fn dispatch(
	client: &reqwest::Client, adapter: &dyn UpstreamAdapter, inbound_headers: &HeaderMap, path: &str,
	query: &str, body: &[u8],
) -> Result<reqwest::Response, UpstreamError> {
	let headers = adapter.prepare_headers(inbound_headers);
	let (rewritten_path, rewritten_query) = adapter.prepare_params(path, query);
	let body = adapter.prepare_request_body(body)?;

	let mut url = format!("{}{}", adapter.base_url(), rewritten_path);
	if !rewritten_query.is_empty() {
		url.push('?');
		url.push_str(&rewritten_query);
	}

	let mut request = client.post(&url);
	for (name, value) in headers.iter() {
		request = request.header(name.as_str(), value.as_bytes());
	}
	let response = request
		.body(body)
		.send()
		.await
		.map_err(|e| UpstreamError::Network(e.to_string()))?;

	if !response.status().is_success() {
		let status = response.status();
		let body = response.bytes().await.unwrap_or_default();
		// Use the original inbound path, not any provider rewrite, so the
		// chat-completions check stays accurate regardless of what a given
		// adapter's `prepare_params` does to it.
		return Err(adapter.map_upstream_error_response(status, &body, path));
	}
	Ok(response)
}
