// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Exchange-rate oracle (C1). Fans out to three public venues, caches the
//! maximum of the successful reads (the conservative, ask-side-worst-case
//! choice for the user), and exposes a multiplicative `exchange_fee` on
//! top. Grounded on `original_source/router/payment/price.py`'s
//! Kraken/Coinbase/Binance fan-out and max-of-successful logic.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;

const KRAKEN_URL: &str = "https://api.kraken.com/0/public/Ticker?pair=XBTUSD";
const COINBASE_URL: &str = "https://api.coinbase.com/v2/prices/BTC-USD/spot";
const BINANCE_URL: &str = "https://api.binance.com/api/v3/ticker/price?symbol=BTCUSDT";

const SATS_PER_BTC: f64 = 100_000_000.0;

/// Bits-as-f64 storage so the cache can be read without a lock from any
/// number of concurrent requests; the refresher is the single writer.
pub struct ExchangeOracle {
	client: Client,
	last_usd_per_btc: AtomicU64,
	exchange_fee: f64,
}

impl ExchangeOracle {
	pub fn new(exchange_fee: f64) -> Arc<Self> {
		Arc::new(Self {
			client: Client::builder()
				.timeout(Duration::from_secs(10))
				.build()
				.expect("reqwest client builder"),
			// A sane bootstrap value so early requests before the first
			// refresh still get a usable (if stale) price.
			last_usd_per_btc: AtomicU64::new(60_000.0_f64.to_bits()),
			exchange_fee,
		})
	}

	/// The effective USD-per-BTC price, after `exchange_fee`.
	pub fn usd_per_btc(&self) -> f64 {
		f64::from_bits(self.last_usd_per_btc.load(Ordering::Relaxed)) * self.exchange_fee
	}

	/// The effective sats-per-USD conversion rate downstream modules
	/// (C2, C4) consult.
	pub fn sats_per_usd(&self) -> f64 {
		SATS_PER_BTC / self.usd_per_btc()
	}

	/// Fans out to every venue, keeps the max of whatever succeeded, and
	/// updates the cache. On total failure the last-known value is
	/// retained and a warning logged, per spec.md §4.1.
	pub async fn refresh_once(&self) {
		let (kraken, coinbase, binance) = tokio::join!(
			fetch_kraken(&self.client),
			fetch_coinbase(&self.client),
			fetch_binance(&self.client),
		);
		let readings: Vec<f64> = [kraken, coinbase, binance].into_iter().flatten().collect();
		match readings.into_iter().fold(None, |acc: Option<f64>, x| {
			Some(acc.map_or(x, |a| a.max(x)))
		}) {
			Some(max_price) => {
				self.last_usd_per_btc.store(max_price.to_bits(), Ordering::Relaxed);
				log::debug!("exchange oracle refreshed: usd_per_btc={max_price}");
			},
			None => {
				log::warn!("exchange oracle: all venues failed, retaining last-known price");
			},
		}
	}

	/// Runs `refresh_once` on `interval`, exiting promptly when `cancel`
	/// resolves (within one in-flight HTTP timeout window, per spec.md
	/// §4.1's cancellation requirement).
	pub async fn run(self: Arc<Self>, interval: Duration, cancel: tokio::sync::watch::Receiver<bool>) {
		let mut ticker = tokio::time::interval(interval);
		let mut cancel = cancel;
		loop {
			tokio::select! {
				_ = ticker.tick() => self.refresh_once().await,
				_ = cancel.changed() => {
					log::info!("exchange oracle refresher shutting down");
					break;
				}
			}
		}
	}
}

#[derive(Deserialize)]
struct KrakenResponse {
	result: std::collections::HashMap<String, KrakenTicker>,
}
#[derive(Deserialize)]
struct KrakenTicker {
	c: Vec<String>,
}

async fn fetch_kraken(client: &Client) -> Option<f64> {
	let resp: KrakenResponse = client.get(KRAKEN_URL).send().await.ok()?.json().await.ok()?;
	let ticker = resp.result.values().next()?;
	ticker.c.first()?.parse().ok()
}

#[derive(Deserialize)]
struct CoinbaseResponse {
	data: CoinbaseData,
}
#[derive(Deserialize)]
struct CoinbaseData {
	amount: String,
}

async fn fetch_coinbase(client: &Client) -> Option<f64> {
	let resp: CoinbaseResponse = client.get(COINBASE_URL).send().await.ok()?.json().await.ok()?;
	resp.data.amount.parse().ok()
}

#[derive(Deserialize)]
struct BinanceResponse {
	price: String,
}

async fn fetch_binance(client: &Client) -> Option<f64> {
	let resp: BinanceResponse = client.get(BINANCE_URL).send().await.ok()?.json().await.ok()?;
	resp.price.parse().ok()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn retains_last_known_value_when_cache_never_refreshed() {
		let oracle = ExchangeOracle::new(1.005);
		assert!(oracle.usd_per_btc() > 0.0);
		assert!(oracle.sats_per_usd() > 0.0);
	}

	#[test]
	fn exchange_fee_is_multiplicative_on_top_of_the_cached_price() {
		let oracle = ExchangeOracle::new(1.0);
		let base = oracle.usd_per_btc();
		let fee_oracle = ExchangeOracle::new(1.1);
		let with_fee = fee_oracle.usd_per_btc();
		assert!((with_fee / base - 1.1).abs() < 1e-9);
	}

	#[test]
	fn max_of_successful_picks_the_highest_reading() {
		let readings = [Some(61_000.0), None, Some(62_500.0)];
		let max = readings.into_iter().flatten().fold(None, |acc: Option<f64>, x| {
			Some(acc.map_or(x, |a: f64| a.max(x)))
		});
		assert_eq!(max, Some(62_500.0));
	}
}
