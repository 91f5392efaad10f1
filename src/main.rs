// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::server::graceful::GracefulShutdown;
use tokio::net::TcpListener;
use tokio::signal::unix::SignalKind;
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;

use inference_gateway::catalog::jittered_interval;
use inference_gateway::exchange::ExchangeOracle;
use inference_gateway::io::persist::Db;
use inference_gateway::ledger::sqlite::SqliteLedger;
use inference_gateway::ledger::Ledger;
use inference_gateway::payment::wallet::{NullWallet, Wallet};
use inference_gateway::service::GatewayService;
use inference_gateway::state::{AppState, UpstreamHandle};
use inference_gateway::util::config::{load_config, ArgsConfig};
use inference_gateway::util::tls::get_or_generate_tls_config;

fn main() {
	let args = ArgsConfig::parse();
	let config = match load_config(&args) {
		Ok(config) => config,
		Err(e) => {
			eprintln!("Invalid configuration: {e}");
			std::process::exit(1);
		},
	};

	env_logger::Builder::new().filter_level(config.log_level).init();

	let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
		Ok(runtime) => runtime,
		Err(e) => {
			eprintln!("Failed to set up tokio runtime: {e}");
			std::process::exit(1);
		},
	};

	let db = match Db::open(&config.storage_path) {
		Ok(db) => Arc::new(db),
		Err(e) => {
			eprintln!("Failed to open database at {:?}: {e}", config.storage_path);
			std::process::exit(1);
		},
	};

	runtime.block_on(run(config, db));
}

async fn run(config: inference_gateway::util::config::Config, db: Arc<Db>) {
	for upstream in &config.upstreams {
		if let Err(e) = db.upsert_upstream(upstream).await {
			log::error!("failed to persist upstream config for {}: {e}", upstream.id);
		}
	}

	let oracle = ExchangeOracle::new(config.exchange_fee);
	oracle.refresh_once().await;

	let ledger: Arc<dyn Ledger> = Arc::new(SqliteLedger::new(Arc::clone(&db)));
	let wallet: Arc<dyn Wallet> = Arc::new(NullWallet);
	let http_client = reqwest::Client::builder()
		.timeout(Duration::from_secs(120))
		.build()
		.expect("reqwest client builder");

	let mut upstreams = Vec::with_capacity(config.upstreams.len());
	for upstream_config in &config.upstreams {
		let adapter = upstream_config.provider_type.build_adapter(upstream_config.clone());
		upstreams.push(UpstreamHandle::new(upstream_config.clone(), adapter));
	}

	let state = Arc::new(AppState {
		config: config.clone(),
		db: Arc::clone(&db),
		ledger,
		oracle: Arc::clone(&oracle),
		wallet,
		upstreams,
		http_client,
	});

	let blocklist = state.db.model_blocklist().await.unwrap_or_default();
	for upstream in &state.upstreams {
		if let Err(e) = upstream.refresh(&state.oracle, &state.db, &blocklist).await {
			log::warn!("initial catalog refresh failed for upstream {}: {e}", upstream.config.id);
		}
	}

	let (cancel_tx, cancel_rx) = watch::channel(false);

	tokio::spawn(Arc::clone(&oracle).run(
		Duration::from_secs(config.oracle_poll_interval_secs),
		cancel_rx.clone(),
	));
	for index in 0..state.upstreams.len() {
		tokio::spawn(run_catalog_refresh_loop(Arc::clone(&state), index, cancel_rx.clone()));
	}
	tokio::spawn(run_refund_sweeper(Arc::clone(&state), cancel_rx.clone()));

	let mut sigterm_stream = match tokio::signal::unix::signal(SignalKind::terminate()) {
		Ok(stream) => stream,
		Err(e) => {
			log::error!("failed to register SIGTERM handler: {e}");
			std::process::exit(1);
		},
	};

	let tls_server_config = match get_or_generate_tls_config(
		config.tls_config.as_ref(),
		config.storage_path.parent().and_then(|p| p.to_str()).unwrap_or("."),
	) {
		Ok(config) => Arc::new(config),
		Err(e) => {
			log::error!("failed to set up TLS: {e}");
			std::process::exit(1);
		},
	};
	let acceptor = TlsAcceptor::from(tls_server_config);

	let listener = match TcpListener::bind(config.listen_addr).await {
		Ok(listener) => listener,
		Err(e) => {
			log::error!("failed to bind {}: {e}", config.listen_addr);
			std::process::exit(1);
		},
	};
	log::info!("listening on {}", config.listen_addr);

	let graceful = GracefulShutdown::new();

	loop {
		tokio::select! {
			res = listener.accept() => {
				let (stream, _) = match res {
					Ok(accepted) => accepted,
					Err(e) => {
						log::warn!("failed to accept connection: {e}");
						continue;
					},
				};
				let acceptor = acceptor.clone();
				let service = GatewayService::new(Arc::clone(&state));
				let conn_future = {
					let graceful = &graceful;
					async move {
						let tls_stream = match acceptor.accept(stream).await {
							Ok(stream) => stream,
							Err(e) => {
								log::warn!("TLS handshake failed: {e}");
								return;
							},
						};
						let io = TokioIo::new(tls_stream);
						let conn = http1::Builder::new().serve_connection(io, service);
						let conn = graceful.watch(conn);
						if let Err(e) = conn.await {
							log::warn!("connection error: {e}");
						}
					}
				};
				tokio::spawn(conn_future);
			},
			_ = tokio::signal::ctrl_c() => {
				log::info!("received CTRL-C, shutting down..");
				break;
			},
			_ = sigterm_stream.recv() => {
				log::info!("received SIGTERM, shutting down..");
				break;
			},
		}
	}

	let _ = cancel_tx.send(true);
	tokio::select! {
		_ = graceful.shutdown() => log::info!("all connections drained"),
		_ = tokio::time::sleep(Duration::from_secs(10)) => log::warn!("graceful shutdown timed out, dropping remaining connections"),
	}
}

/// Refreshes one upstream's catalog on its own jittered cadence, so many
/// configured upstreams don't all refetch in lockstep.
async fn run_catalog_refresh_loop(state: Arc<AppState>, index: usize, mut cancel: watch::Receiver<bool>) {
	loop {
		let interval = jittered_interval(
			Duration::from_secs(state.config.catalog_refresh_interval_secs),
			state.config.catalog_refresh_jitter,
		);
		tokio::select! {
			_ = tokio::time::sleep(interval) => {},
			_ = cancel.changed() => {
				log::info!("catalog refresher for {} shutting down", state.upstreams[index].config.id);
				return;
			},
		}
		let blocklist = state.db.model_blocklist().await.unwrap_or_default();
		if let Err(e) = state.upstreams[index].refresh(&state.oracle, &state.db, &blocklist).await {
			log::warn!("catalog refresh failed for {}: {e}", state.upstreams[index].config.id);
		}
	}
}

/// Sweeps expired, refund-eligible credentials on a fixed interval,
/// returning whatever balance remains to the caller's recorded refund
/// address (spec.md §4.5's "expired balances are refunded, not held").
async fn run_refund_sweeper(state: Arc<AppState>, mut cancel: watch::Receiver<bool>) {
	let interval = Duration::from_secs(state.config.refund_sweep_interval_secs);
	loop {
		tokio::select! {
			_ = tokio::time::sleep(interval) => {},
			_ = cancel.changed() => {
				log::info!("refund sweeper shutting down");
				return;
			},
		}
		let now = match std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH) {
			Ok(d) => d.as_secs() as i64,
			Err(_) => continue,
		};
		let expired = match state.ledger.list_expired(now).await {
			Ok(expired) => expired,
			Err(e) => {
				log::warn!("failed to list expired credentials: {e}");
				continue;
			},
		};
		for credential in expired {
			let amount = credential.available_msats();
			if amount == 0 {
				continue;
			}
			if let Err(e) = state.ledger.refund(&credential.hash, amount, state.wallet.as_ref()).await {
				log::warn!("refund sweep failed for {}: {e}", credential.hash);
			}
		}
	}
}
