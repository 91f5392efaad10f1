// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Persisted state (spec.md §6): a single relational schema holding
//! `credentials`, `upstream_providers`, `model_overrides` and `settings`.
//! No particular engine is mandated upstream; this crate uses `rusqlite`'s
//! bundled SQLite, which supports the row-level atomic conditional updates
//! the ledger (C5) depends on.

pub mod credentials;
pub mod settings;
pub mod upstreams;

use std::path::Path;

use rusqlite::Connection;
use tokio::sync::Mutex;

/// Owns the single SQLite connection backing every table this crate
/// defines, and runs schema creation once at startup. Guarded by an async
/// mutex rather than a connection pool: SQLite serializes writers anyway,
/// and every operation here is a handful of short, indexed statements.
pub struct Db {
	pub(crate) conn: Mutex<Connection>,
}

impl Db {
	pub fn open(path: impl AsRef<Path>) -> rusqlite::Result<Self> {
		let conn = Connection::open(path)?;
		Self::init(&conn)?;
		Ok(Self { conn: Mutex::new(conn) })
	}

	pub fn open_in_memory() -> rusqlite::Result<Self> {
		let conn = Connection::open_in_memory()?;
		Self::init(&conn)?;
		Ok(Self { conn: Mutex::new(conn) })
	}

	fn init(conn: &Connection) -> rusqlite::Result<()> {
		conn.execute_batch(
			"
			PRAGMA journal_mode=WAL;
			PRAGMA foreign_keys=ON;

			CREATE TABLE IF NOT EXISTS credentials (
				hash                  TEXT PRIMARY KEY,
				balance_msats         INTEGER NOT NULL DEFAULT 0,
				reserved_msats        INTEGER NOT NULL DEFAULT 0,
				total_spent_msats     INTEGER NOT NULL DEFAULT 0,
				total_requests        INTEGER NOT NULL DEFAULT 0,
				refund_address        TEXT,
				refund_mint           TEXT,
				refund_currency       TEXT,
				expiry_time           INTEGER,
				parent_credential_hash TEXT REFERENCES credentials(hash),
				CHECK (balance_msats >= 0 AND reserved_msats >= 0 AND reserved_msats <= balance_msats)
			);

			CREATE TABLE IF NOT EXISTS upstream_providers (
				id            TEXT PRIMARY KEY,
				provider_type TEXT NOT NULL,
				base_url      TEXT NOT NULL,
				api_key       TEXT,
				api_version   TEXT,
				enabled       INTEGER NOT NULL DEFAULT 1,
				fee           REAL NOT NULL DEFAULT 1.01
			);

			CREATE TABLE IF NOT EXISTS model_overrides (
				model_id    TEXT NOT NULL,
				upstream_id TEXT NOT NULL REFERENCES upstream_providers(id),
				payload     TEXT NOT NULL,
				enabled     INTEGER NOT NULL DEFAULT 1,
				PRIMARY KEY (model_id, upstream_id)
			);

			CREATE TABLE IF NOT EXISTS settings (
				key   TEXT PRIMARY KEY,
				value TEXT NOT NULL
			);
			",
		)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn schema_created_idempotently() {
		let conn = Connection::open_in_memory().unwrap();
		Db::init(&conn).unwrap();
		// Re-running init against the same connection must not error.
		Db::init(&conn).unwrap();
	}
}
