// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Row<->struct mapping for the `credentials` table, shared by the ledger
//! implementation and the refund sweeper.

use rusqlite::Row;

use crate::ledger::Credential;

pub const SELECT_COLUMNS: &str = "hash, balance_msats, reserved_msats, total_spent_msats, \
	total_requests, refund_address, refund_mint, refund_currency, expiry_time, \
	parent_credential_hash";

pub fn row_to_credential(row: &Row<'_>) -> rusqlite::Result<Credential> {
	Ok(Credential {
		hash: row.get(0)?,
		balance_msats: row.get::<_, i64>(1)? as u64,
		reserved_msats: row.get::<_, i64>(2)? as u64,
		total_spent_msats: row.get::<_, i64>(3)? as u64,
		total_requests: row.get::<_, i64>(4)? as u64,
		refund_address: row.get(5)?,
		refund_mint: row.get(6)?,
		refund_currency: row.get(7)?,
		expiry_time: row.get(8)?,
		parent_credential_hash: row.get(9)?,
	})
}
