// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! The closed error envelope returned to clients, and the mapping from every
//! domain-internal error enum onto it. Mirrors the split the teacher made
//! between an internal error type and its wire encoding, but the wire format
//! here is the JSON envelope the gateway's callers speak rather than protobuf.

use hyper::StatusCode;
use serde::Serialize;

use crate::catalog::CatalogError;
use crate::cost::CostError;
use crate::ledger::LedgerError;
use crate::multiplexer::MultiplexError;
use crate::payment::wallet::WalletError;
use crate::util::new_correlation_id;

/// The closed set of error `type` values from the error envelope contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
	InvalidRequestError,
	InvalidModel,
	UpstreamAuthError,
	UpstreamError,
	RateLimitExceeded,
	InsufficientQuota,
	TokenAlreadySpent,
	InvalidToken,
	MintError,
	CashuError,
	InternalError,
}

impl ApiErrorKind {
	pub fn type_str(self) -> &'static str {
		match self {
			ApiErrorKind::InvalidRequestError => "invalid_request_error",
			ApiErrorKind::InvalidModel => "invalid_model",
			ApiErrorKind::UpstreamAuthError => "upstream_auth_error",
			ApiErrorKind::UpstreamError => "upstream_error",
			ApiErrorKind::RateLimitExceeded => "rate_limit_exceeded",
			ApiErrorKind::InsufficientQuota => "insufficient_quota",
			ApiErrorKind::TokenAlreadySpent => "token_already_spent",
			ApiErrorKind::InvalidToken => "invalid_token",
			ApiErrorKind::MintError => "mint_error",
			ApiErrorKind::CashuError => "cashu_error",
			ApiErrorKind::InternalError => "internal_error",
		}
	}

	fn default_status(self) -> StatusCode {
		match self {
			ApiErrorKind::InvalidRequestError => StatusCode::BAD_REQUEST,
			ApiErrorKind::InvalidModel => StatusCode::BAD_REQUEST,
			ApiErrorKind::UpstreamAuthError => StatusCode::BAD_GATEWAY,
			ApiErrorKind::UpstreamError => StatusCode::BAD_GATEWAY,
			ApiErrorKind::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
			ApiErrorKind::InsufficientQuota => StatusCode::PAYMENT_REQUIRED,
			ApiErrorKind::TokenAlreadySpent => StatusCode::UNAUTHORIZED,
			ApiErrorKind::InvalidToken => StatusCode::UNAUTHORIZED,
			ApiErrorKind::MintError => StatusCode::BAD_GATEWAY,
			ApiErrorKind::CashuError => StatusCode::BAD_REQUEST,
			ApiErrorKind::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}

	/// The `code` value used when a caller doesn't supply a more specific
	/// one. `type` names the closed-set category; `code` names the precise
	/// condition within it, so the two are allowed (and, per spec.md §8
	/// scenario 4, sometimes required) to diverge.
	fn default_code(self) -> &'static str {
		match self {
			ApiErrorKind::InvalidRequestError => "invalid_request",
			ApiErrorKind::InvalidModel => "unknown_model",
			ApiErrorKind::UpstreamAuthError => "upstream_auth_error",
			ApiErrorKind::UpstreamError => "upstream_error",
			ApiErrorKind::RateLimitExceeded => "rate_limit_exceeded",
			ApiErrorKind::InsufficientQuota => "insufficient_balance",
			ApiErrorKind::TokenAlreadySpent => "token_already_spent",
			ApiErrorKind::InvalidToken => "invalid_token",
			ApiErrorKind::MintError => "mint_error",
			ApiErrorKind::CashuError => "cashu_error",
			ApiErrorKind::InternalError => "internal_error",
		}
	}
}

/// A single gateway-wide error type. Every fallible handler returns
/// `Result<_, ApiError>`; the HTTP layer maps this to a status code and JSON
/// body exactly once, at the edge.
#[derive(Debug)]
pub struct ApiError {
	pub kind: ApiErrorKind,
	pub status: StatusCode,
	pub message: String,
	pub code: &'static str,
	/// Set only for the 413 "top up your one-shot token" case.
	pub amount_required_msat: Option<u64>,
}

impl ApiError {
	pub fn new(kind: ApiErrorKind, message: impl Into<String>) -> Self {
		Self {
			status: kind.default_status(),
			code: kind.default_code(),
			kind,
			message: message.into(),
			amount_required_msat: None,
		}
	}

	pub fn with_status(mut self, status: StatusCode) -> Self {
		self.status = status;
		self
	}

	/// Overrides the `code` value with one more specific than the kind's
	/// default (e.g. distinguishing a one-shot-token shortfall from a
	/// bearer-key one even though both carry `type: insufficient_quota`).
	pub fn with_code(mut self, code: &'static str) -> Self {
		self.code = code;
		self
	}

	pub fn with_amount_required(mut self, msat: u64) -> Self {
		self.amount_required_msat = Some(msat);
		self
	}

	/// An our-fault error: logs at ERROR with a correlation id and hands the
	/// caller only that id, never the internal detail.
	pub fn internal(context: &str, detail: impl std::fmt::Display) -> Self {
		let correlation_id = new_correlation_id();
		log::error!("internal_error correlation_id={correlation_id} context={context}: {detail}");
		Self::new(
			ApiErrorKind::InternalError,
			format!("An internal error occurred. correlation_id={correlation_id}"),
		)
	}
}

impl std::fmt::Display for ApiError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}: {}", self.kind.type_str(), self.message)
	}
}

impl std::error::Error for ApiError {}

impl From<LedgerError> for ApiError {
	fn from(e: LedgerError) -> Self {
		match e {
			LedgerError::InsufficientBalance => {
				ApiError::new(ApiErrorKind::InsufficientQuota, "insufficient balance")
			},
			LedgerError::NotFound => ApiError::new(ApiErrorKind::InvalidToken, "unknown credential")
				.with_code("unknown_credential"),
			LedgerError::MissingRefundAddress => {
				ApiError::new(ApiErrorKind::InvalidRequestError, "no refund address on file")
					.with_code("missing_refund_address")
			},
			LedgerError::Storage(e) => ApiError::internal("ledger storage", e),
		}
	}
}

impl From<WalletError> for ApiError {
	fn from(e: WalletError) -> Self {
		match e {
			WalletError::AlreadySpent => {
				ApiError::new(ApiErrorKind::TokenAlreadySpent, "token already spent")
			},
			WalletError::InvalidToken(msg) => {
				ApiError::new(ApiErrorKind::InvalidToken, msg).with_code("invalid_token")
			},
			WalletError::ZeroAmount => ApiError::new(ApiErrorKind::InvalidToken, "invalid_api_key")
				.with_status(StatusCode::UNAUTHORIZED)
				.with_code("invalid_api_key"),
			WalletError::Mint(msg) => {
				ApiError::new(ApiErrorKind::MintError, msg).with_code("mint_redemption_failed")
			},
			WalletError::NotImplemented(method) => ApiError::new(
				ApiErrorKind::CashuError,
				format!("{method} is not implemented"),
			)
			.with_status(StatusCode::NOT_IMPLEMENTED)
			.with_code("not_implemented"),
		}
	}
}

impl From<MultiplexError> for ApiError {
	fn from(e: MultiplexError) -> Self {
		match e {
			MultiplexError::InvalidModel(id) => {
				ApiError::new(ApiErrorKind::InvalidModel, format!("unknown model '{id}'"))
					.with_code("unknown_model")
			},
		}
	}
}

impl From<CostError> for ApiError {
	fn from(e: CostError) -> Self {
		ApiError::internal("cost engine", e)
	}
}

impl From<CatalogError> for ApiError {
	fn from(e: CatalogError) -> Self {
		ApiError::internal("catalog", e)
	}
}

#[derive(Serialize)]
struct ErrorEnvelope<'a> {
	error: ErrorBody<'a>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
	message: &'a str,
	#[serde(rename = "type")]
	kind: &'a str,
	code: &'a str,
	#[serde(skip_serializing_if = "Option::is_none")]
	amount_required_msat: Option<u64>,
}

/// Serializes an [`ApiError`] into the `{"error": {...}}` envelope required by
/// the HTTP surface, returning the status code alongside the JSON bytes.
pub fn to_json_response(err: &ApiError) -> (StatusCode, Vec<u8>) {
	let body = ErrorEnvelope {
		error: ErrorBody {
			message: &err.message,
			kind: err.kind.type_str(),
			code: err.code,
			amount_required_msat: err.amount_required_msat,
		},
	};
	// unwrap safety: ErrorEnvelope has no non-serializable fields.
	(err.status, serde_json::to_vec(&body).unwrap())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn insufficient_balance_maps_to_402() {
		let err: ApiError = LedgerError::InsufficientBalance.into();
		assert_eq!(err.status, StatusCode::PAYMENT_REQUIRED);
		assert_eq!(err.kind.type_str(), "insufficient_quota");
	}

	#[test]
	fn amount_required_is_included_only_when_set() {
		let err = ApiError::new(ApiErrorKind::InsufficientQuota, "top up")
			.with_status(StatusCode::PAYLOAD_TOO_LARGE)
			.with_amount_required(500);
		let (status, body) = to_json_response(&err);
		assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
		let v: serde_json::Value = serde_json::from_slice(&body).unwrap();
		assert_eq!(v["error"]["amount_required_msat"], 500);
	}
}
