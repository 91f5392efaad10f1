// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Shared server state: one [`UpstreamHandle`] per configured upstream
//! (adapter + catalog + DB-backed overrides, all refreshed together on the
//! catalog's jittered cadence), and the [`AppState`] every request handler
//! is given a reference to.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use crate::api::error::ApiError;
use crate::catalog::{CatalogError, Model, UpstreamCatalog};
use crate::exchange::ExchangeOracle;
use crate::io::persist::Db;
use crate::ledger::Ledger;
use crate::multiplexer::{self, Candidate};
use crate::payment::wallet::Wallet;
use crate::upstream::{UpstreamAdapter, UpstreamConfig};
use crate::util::config::Config;

/// Everything needed to serve one configured upstream: the adapter that
/// knows how to talk to it, the live model catalog, and the DB-sourced
/// overrides/enabled-flag overlay applied on top of it.
pub struct UpstreamHandle {
	pub config: UpstreamConfig,
	pub adapter: Box<dyn UpstreamAdapter>,
	pub catalog: UpstreamCatalog,
	pub is_openrouter: bool,
	/// Hot-reloadable via the `upstream:<id>:enabled` settings key,
	/// refreshed alongside the catalog. The provider fee is not
	/// hot-reloadable this way — see DESIGN.md.
	pub enabled: AtomicBool,
	overrides: RwLock<Vec<(Model, bool)>>,
}

impl UpstreamHandle {
	pub fn new(config: UpstreamConfig, adapter: Box<dyn UpstreamAdapter>) -> Self {
		let is_openrouter = config.provider_type == crate::upstream::ProviderType::OpenRouter;
		let enabled = AtomicBool::new(config.enabled);
		let catalog = UpstreamCatalog::new(config.id.clone(), config.fee);
		Self { config, adapter, catalog, is_openrouter, enabled, overrides: RwLock::new(Vec::new()) }
	}

	/// Refreshes the live catalog, reloads this upstream's DB-stored model
	/// overrides, and picks up any DB-side enable/disable toggle.
	pub async fn refresh(
		&self, oracle: &ExchangeOracle, db: &Db, blocklist: &[String],
	) -> Result<(), CatalogError> {
		self.catalog.refresh(self.adapter.as_ref(), oracle, blocklist).await?;
		let overrides = db.model_overrides(&self.config.id, self.config.fee, oracle.sats_per_usd()).await?;
		*self.overrides.write().unwrap() = overrides;

		let key = format!("upstream:{}:enabled", self.config.id);
		if let Ok(Some(value)) = db.get_setting(&key).await {
			self.enabled.store(value == "true", Ordering::Relaxed);
		}
		Ok(())
	}

	/// The catalog's live models with DB overrides layered on top: an
	/// override row replaces its model outright; a disabled override
	/// suppresses it.
	pub fn models(&self) -> Vec<Model> {
		let mut by_id: HashMap<String, Model> =
			self.catalog.models().into_iter().map(|m| (m.id.clone(), m)).collect();
		for (model, enabled) in self.overrides.read().unwrap().iter() {
			if *enabled {
				by_id.insert(model.id.clone(), model.clone());
			} else {
				by_id.remove(&model.id);
			}
		}
		by_id.into_values().collect()
	}
}

pub struct AppState {
	pub config: Config,
	pub db: Arc<Db>,
	pub ledger: Arc<dyn Ledger>,
	pub oracle: Arc<ExchangeOracle>,
	pub wallet: Arc<dyn Wallet>,
	pub upstreams: Vec<UpstreamHandle>,
	pub http_client: reqwest::Client,
}

impl AppState {
	/// Resolves an inbound model identifier against every enabled
	/// upstream's current catalog (C3), returning the winning upstream and
	/// its model record.
	pub fn resolve_model(&self, requested: &str) -> Result<(&UpstreamHandle, Model), ApiError> {
		let known_upstreams: Vec<String> =
			self.upstreams.iter().map(|u| u.config.id.clone()).collect();

		let mut pool: Vec<(usize, Model)> = Vec::new();
		for (index, handle) in self.upstreams.iter().enumerate() {
			if !handle.config.enabled || !handle.enabled.load(Ordering::Relaxed) {
				continue;
			}
			for model in handle.models() {
				if model.enabled {
					pool.push((index, model));
				}
			}
		}

		let candidates: Vec<Candidate> = pool
			.iter()
			.map(|(index, model)| Candidate {
				upstream_id: &self.upstreams[*index].config.id,
				is_openrouter: self.upstreams[*index].is_openrouter,
				model,
			})
			.collect();

		let (winner, ..) = multiplexer::resolve(requested, &candidates, &known_upstreams)?;
		let (upstream_index, model) = &pool[winner];
		Ok((&self.upstreams[*upstream_index], model.clone()))
	}

	/// Every enabled model across every enabled upstream, for `GET
	/// /v1/models`.
	pub fn all_models(&self) -> Vec<Model> {
		self.upstreams
			.iter()
			.filter(|u| u.config.enabled && u.enabled.load(Ordering::Relaxed))
			.flat_map(|u| u.models())
			.filter(|m| m.enabled)
			.collect()
	}
}
