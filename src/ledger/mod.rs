// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! The balance-reservation state machine (C5). A credential's row is
//! mutated only through the five operations below, each a single
//! conditional `UPDATE ... WHERE` statement so that two concurrent callers
//! racing on the same row can never both observe the pre-state and both
//! win.

pub mod sqlite;

use async_trait::async_trait;

pub use sqlite::SqliteLedger;

/// A credential's ledger row. See `spec`'s data model for the invariants
/// this type is expected to uphold between operations:
/// `reserved_msats <= balance_msats`, both non-negative.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Credential {
	pub hash: String,
	pub balance_msats: u64,
	pub reserved_msats: u64,
	pub total_spent_msats: u64,
	pub total_requests: u64,
	pub refund_address: Option<String>,
	pub refund_mint: Option<String>,
	pub refund_currency: Option<String>,
	pub expiry_time: Option<i64>,
	pub parent_credential_hash: Option<String>,
}

impl Credential {
	pub fn available_msats(&self) -> u64 {
		self.balance_msats.saturating_sub(self.reserved_msats)
	}

	pub fn is_sub_credential(&self) -> bool {
		self.parent_credential_hash.is_some()
	}
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
	#[error("insufficient balance")]
	InsufficientBalance,
	#[error("unknown credential")]
	NotFound,
	#[error("no refund address on file")]
	MissingRefundAddress,
	#[error(transparent)]
	Storage(#[from] rusqlite::Error),
}

/// The five operations spec.md §4.5 closes the ledger's API over. Every
/// request that takes a reservation must drive it through exactly one of
/// `finalize` or `revert` before it terminates — never leave a reservation
/// dangling.
#[async_trait]
pub trait Ledger: Send + Sync {
	async fn get(&self, hash: &str) -> Result<Option<Credential>, LedgerError>;

	/// Reserves `amount_msats` against `hash` (or, if `hash` names a
	/// sub-credential, against its parent). Fails with
	/// [`LedgerError::InsufficientBalance`] if `available_msats < amount`
	/// at the moment of the atomic attempt.
	async fn reserve(&self, hash: &str, amount_msats: u64) -> Result<(), LedgerError>;

	/// Releases `reserved_amount` and debits `actual_amount`. `actual` may
	/// exceed `reserved` (usage-based pricing can overshoot a discounted
	/// reservation); the debit still applies as long as it does not drive
	/// `balance` negative.
	async fn finalize(
		&self, hash: &str, reserved_amount_msats: u64, actual_amount_msats: u64,
	) -> Result<(), LedgerError>;

	/// Releases a reservation without any debit — the upstream call never
	/// produced a usable response.
	async fn revert(&self, hash: &str, reserved_amount_msats: u64) -> Result<(), LedgerError>;

	/// Credits `amount_msats` to `hash`'s balance. Called only after a
	/// successful ecash redemption.
	async fn credit(&self, hash: &str, amount_msats: u64) -> Result<(), LedgerError>;

	/// Debits `amount_msats` and hands it to `wallet.send_token`/
	/// `send_to_lnurl` against the credential's recorded refund address.
	/// Returns the wallet's receipt or token string.
	async fn refund(
		&self, hash: &str, amount_msats: u64, wallet: &dyn crate::payment::wallet::Wallet,
	) -> Result<String, LedgerError>;

	/// Inserts a new zero-balance row if `hash` is not already known,
	/// returning the (possibly pre-existing) row. Used by C6 to make the
	/// "insert-then-redeem" sequence idempotent under concurrent
	/// redemption of the same token.
	async fn get_or_create(&self, hash: &str) -> Result<Credential, LedgerError>;

	/// Records `refund_mint`/`refund_currency`/`refund_address`/
	/// `expiry_time` on a credential row. Fields left `None` are not
	/// touched.
	async fn set_refund_info(
		&self, hash: &str, refund_address: Option<&str>, refund_mint: Option<&str>,
		refund_currency: Option<&str>, expiry_time: Option<i64>,
	) -> Result<(), LedgerError>;

	/// Atomically reserves and finalizes `cost_msats` from `parent_hash` as
	/// one composite, then inserts a new zero-balance row carrying
	/// `parent_credential_hash = parent_hash`. See SPEC_FULL.md's
	/// sub-credential supplement.
	async fn create_sub_credential(
		&self, parent_hash: &str, sub_hash: &str, cost_msats: u64,
	) -> Result<Credential, LedgerError>;

	/// Deletes a credential row outright. Used for one-shot `X-Cashu`
	/// credentials once their change token has been minted.
	async fn delete(&self, hash: &str) -> Result<(), LedgerError>;

	/// Lists every credential whose `expiry_time` is at or before `now`
	/// and which still carries a refund address — candidates for the
	/// refund sweep.
	async fn list_expired(&self, now: i64) -> Result<Vec<Credential>, LedgerError>;
}
