// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! The ecash wallet collaborator contract (spec.md §6). The wallet library
//! itself — mint communication, proof selection, Lightning settlement — is
//! explicitly out of scope (spec.md §1); this module only specifies the
//! trait the rest of the crate programs against, plus a `NullWallet` used
//! in tests and as a safe default when no real wallet is wired in.

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum WalletError {
	#[error("token already spent")]
	AlreadySpent,
	#[error("invalid token: {0}")]
	InvalidToken(String),
	#[error("redemption yielded zero units")]
	ZeroAmount,
	#[error("mint error: {0}")]
	Mint(String),
	#[error("{0} is not implemented")]
	NotImplemented(&'static str),
}

/// The amount, unit and originating mint of a redeemed ecash token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redemption {
	pub amount: u64,
	pub unit: String,
	pub source_mint: String,
}

/// A decoded-but-not-redeemed token, as returned by `deserialize`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedToken {
	pub amount: u64,
	pub unit: String,
	pub mint: String,
	pub proof_count: usize,
}

#[async_trait]
pub trait Wallet: Send + Sync {
	/// Redeems an opaque ecash token for its msat-equivalent value.
	async fn redeem(&self, token: &str) -> Result<Redemption, WalletError>;

	/// Mints a fresh token of `amount` `unit` from `mint` (or the wallet's
	/// default mint if `None`), for use as a response-path change token.
	async fn send_token(
		&self, amount: u64, unit: &str, mint: Option<&str>,
	) -> Result<String, WalletError>;

	/// Pays `amount_sats` out to a Lightning address / LNURL.
	async fn send_to_lnurl(&self, addr: &str, amount_sats: u64) -> Result<String, WalletError>;

	/// Decodes a token without redeeming it.
	async fn deserialize(&self, token: &str) -> Result<DecodedToken, WalletError>;

	/// The wallet's spendable balance at `mint` in `unit`.
    async fn balance(&self, mint: &str, unit: &str) -> Result<u64, WalletError>;
}

/// A wallet that never succeeds. Useful as a placeholder when no concrete
/// wallet implementation has been wired into the server, and in unit tests
/// that only exercise the paths where the wallet is not expected to be
/// called.
pub struct NullWallet;

#[async_trait]
impl Wallet for NullWallet {
	async fn redeem(&self, _token: &str) -> Result<Redemption, WalletError> {
		Err(WalletError::NotImplemented("redeem"))
	}

	async fn send_token(
		&self, _amount: u64, _unit: &str, _mint: Option<&str>,
	) -> Result<String, WalletError> {
		Err(WalletError::NotImplemented("send_token"))
	}

	async fn send_to_lnurl(&self, _addr: &str, _amount_sats: u64) -> Result<String, WalletError> {
		Err(WalletError::NotImplemented("send_to_lnurl"))
	}

	async fn deserialize(&self, _token: &str) -> Result<DecodedToken, WalletError> {
		Err(WalletError::NotImplemented("deserialize"))
	}

	async fn balance(&self, _mint: &str, _unit: &str) -> Result<u64, WalletError> {
		Err(WalletError::NotImplemented("balance"))
	}
}

/// A scripted wallet for tests: redeems return a fixed [`Redemption`],
/// `send_token` returns a deterministic placeholder string.
#[cfg(test)]
pub struct FakeWallet {
	pub redemption: Redemption,
}

#[cfg(test)]
#[async_trait]
impl Wallet for FakeWallet {
	async fn redeem(&self, _token: &str) -> Result<Redemption, WalletError> {
		Ok(self.redemption.clone())
	}

	async fn send_token(
		&self, amount: u64, unit: &str, mint: Option<&str>,
	) -> Result<String, WalletError> {
		Ok(format!("fake-token:{}:{}:{}", amount, unit, mint.unwrap_or("default")))
	}

	async fn send_to_lnurl(&self, addr: &str, amount_sats: u64) -> Result<String, WalletError> {
		Ok(format!("fake-receipt:{}:{}", addr, amount_sats))
	}

	async fn deserialize(&self, _token: &str) -> Result<DecodedToken, WalletError> {
		Ok(DecodedToken {
			amount: self.redemption.amount,
			unit: self.redemption.unit.clone(),
			mint: self.redemption.source_mint.clone(),
			proof_count: 1,
		})
	}

	async fn balance(&self, _mint: &str, _unit: &str) -> Result<u64, WalletError> {
		Ok(self.redemption.amount)
	}
}
