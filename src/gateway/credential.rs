// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Inbound credential extraction and the `X-Cashu` one-shot-spend circle
//! (spec.md §4.6, §4.8): a token presented via `Authorization: Bearer`
//! backs a persistent, reusable balance; a token presented via `X-Cashu`
//! is spent down to zero in one request and whatever is left over comes
//! back as a freshly minted change token in the response, after which the
//! credential row is deleted outright.

use hyper::HeaderMap;

use crate::api::error::{ApiError, ApiErrorKind};
use crate::ledger::{Credential, Ledger};
use crate::payment::wallet::Wallet;

pub const CASHU_HEADER: &str = "x-cashu";
pub const REFUND_LNURL_HEADER: &str = "refund-lnurl";
pub const KEY_EXPIRY_HEADER: &str = "key-expiry-time";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
	/// A standard `Authorization: Bearer <token>` credential. Its balance
	/// persists across requests.
	Authorization,
	/// A one-shot `X-Cashu: <token>` credential. Unspent change is minted
	/// back to the caller and the row is deleted once the request completes.
	Cashu,
}

pub struct InboundCredential {
	pub bearer: String,
	pub source: CredentialSource,
	pub refund_lnurl: Option<String>,
	pub key_expiry_time: Option<i64>,
}

/// Pulls the bearer credential and the optional refund headers off an
/// inbound request. `X-Cashu` takes priority over `Authorization` when
/// both are present, since it names the more specific one-shot flow.
pub fn extract(headers: &HeaderMap) -> Result<InboundCredential, ApiError> {
	let (bearer, source) = if let Some(value) = headers.get(CASHU_HEADER) {
		let token = value.to_str().map_err(|_| invalid_header(CASHU_HEADER))?;
		(token.to_string(), CredentialSource::Cashu)
	} else if let Some(value) = headers.get(hyper::header::AUTHORIZATION) {
		let raw = value.to_str().map_err(|_| invalid_header("authorization"))?;
		let token = raw.strip_prefix("Bearer ").unwrap_or(raw);
		(token.to_string(), CredentialSource::Authorization)
	} else {
		return Err(ApiError::new(ApiErrorKind::InvalidToken, "missing credential")
			.with_status(hyper::StatusCode::UNAUTHORIZED));
	};

	let refund_lnurl = headers
		.get(REFUND_LNURL_HEADER)
		.and_then(|v| v.to_str().ok())
		.map(|s| s.to_string());
	let key_expiry_time = headers
		.get(KEY_EXPIRY_HEADER)
		.and_then(|v| v.to_str().ok())
		.and_then(|s| s.parse::<i64>().ok());

	Ok(InboundCredential { bearer, source, refund_lnurl, key_expiry_time })
}

fn invalid_header(name: &str) -> ApiError {
	ApiError::new(ApiErrorKind::InvalidRequestError, format!("malformed {name} header"))
}

/// Closes the `X-Cashu` one-shot circle once a request against it has been
/// finalized: mints whatever remains of the credential's balance as a
/// change token, then deletes the row. Returns the minted token, if any
/// remained to mint.
pub async fn close_one_shot(
	ledger: &dyn Ledger, wallet: &dyn Wallet, credential: &Credential,
) -> Result<Option<String>, ApiError> {
	let remaining = credential.available_msats();
	let token = if remaining > 0 {
		let mint = credential.refund_mint.as_deref();
		let unit = credential.refund_currency.as_deref().unwrap_or("sat");
		let amount = remaining / 1000;
		if amount == 0 {
			None
		} else {
			Some(wallet.send_token(amount, unit, mint).await?)
		}
	} else {
		None
	};
	ledger.delete(&credential.hash).await?;
	Ok(token)
}
