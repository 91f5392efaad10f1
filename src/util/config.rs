// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Configuration: a `clap`-derived `ArgsConfig` for CLI flags/env vars and
//! a `#[derive(Deserialize)] TomlConfig` for the config file, merged into
//! one immutable [`Config`] via a builder that prefers CLI over TOML over
//! built-in defaults.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::{fs, io};

use clap::Parser;
use log::LevelFilter;
use serde::{Deserialize, Serialize};

use crate::cost::CostMode;
use crate::upstream::{ProviderType, UpstreamConfig};

const DEFAULT_CONFIG_FILE: &str = "gateway.toml";

fn get_default_config_path() -> Option<PathBuf> {
	dirs_next_config_dir().map(|dir| dir.join(DEFAULT_CONFIG_FILE))
}

/// A minimal stand-in for a platform config dir lookup: `$XDG_CONFIG_HOME`
/// or `$HOME/.config`, falling back to the current directory. No new
/// dependency is introduced for something this small.
fn dirs_next_config_dir() -> Option<PathBuf> {
	if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
		return Some(PathBuf::from(xdg).join("inference-gateway"));
	}
	if let Ok(home) = std::env::var("HOME") {
		return Some(PathBuf::from(home).join(".config").join("inference-gateway"));
	}
	None
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
	pub cert_path: String,
	pub key_path: String,
}

/// Fully resolved configuration; every field is a definite value with no
/// further merging to do. Construct via [`load_config`].
#[derive(Debug, Clone)]
pub struct Config {
	pub listen_addr: SocketAddr,
	pub tls_config: Option<TlsConfig>,
	pub storage_path: PathBuf,
	pub log_level: LevelFilter,

	pub exchange_fee: f64,
	pub oracle_poll_interval_secs: u64,

	pub catalog_refresh_interval_secs: u64,
	pub catalog_refresh_jitter: f64,

	pub min_request_msats: u64,
	pub tolerance_percentage: f64,
	pub cost_mode: CostMode,

	pub sub_credential_creation_cost_msats: u64,
	pub refund_sweep_interval_secs: u64,

	pub trusted_mints: Vec<String>,
	pub primary_mint: String,

	pub upstreams: Vec<UpstreamConfig>,
}

#[derive(Default)]
struct ConfigBuilder {
	listen_addr: Option<String>,
	tls_cert_path: Option<String>,
	tls_key_path: Option<String>,
	storage_path: Option<String>,
	log_level: Option<String>,

	exchange_fee: Option<f64>,
	oracle_poll_interval_secs: Option<u64>,

	catalog_refresh_interval_secs: Option<u64>,
	catalog_refresh_jitter: Option<f64>,

	min_request_msats: Option<u64>,
	tolerance_percentage: Option<f64>,
	cost_mode: Option<String>,
	fixed_sats_per_request: Option<u64>,
	fixed_per_1k_input_sats: Option<f64>,
	fixed_per_1k_output_sats: Option<f64>,

	sub_credential_creation_cost_msats: Option<u64>,
	refund_sweep_interval_secs: Option<u64>,

	trusted_mints: Option<Vec<String>>,
	primary_mint: Option<String>,

	upstreams: Vec<TomlUpstreamConfig>,
}

impl ConfigBuilder {
	fn merge_toml(&mut self, toml: TomlConfig) {
		if let Some(server) = toml.server {
			self.listen_addr = server.listen_addr.or(self.listen_addr.clone());
			self.storage_path = server.storage_path.or(self.storage_path.clone());
		}

		if let Some(tls) = toml.tls {
			self.tls_cert_path = Some(tls.cert_path);
			self.tls_key_path = Some(tls.key_path);
		}

		if let Some(log) = toml.log {
			self.log_level = log.level.or(self.log_level.clone());
		}

		if let Some(exchange) = toml.exchange {
			self.exchange_fee = exchange.fee.or(self.exchange_fee);
			self.oracle_poll_interval_secs =
				exchange.poll_interval_secs.or(self.oracle_poll_interval_secs);
		}

		if let Some(catalog) = toml.catalog {
			self.catalog_refresh_interval_secs =
				catalog.refresh_interval_secs.or(self.catalog_refresh_interval_secs);
			self.catalog_refresh_jitter = catalog.refresh_jitter.or(self.catalog_refresh_jitter);
		}

		if let Some(cost) = toml.cost {
			self.min_request_msats = cost.min_request_msats.or(self.min_request_msats);
			self.tolerance_percentage = cost.tolerance_percentage.or(self.tolerance_percentage);
			self.cost_mode = cost.mode.or(self.cost_mode.clone());
			self.fixed_sats_per_request =
				cost.fixed_sats_per_request.or(self.fixed_sats_per_request);
			self.fixed_per_1k_input_sats =
				cost.fixed_per_1k_input_sats.or(self.fixed_per_1k_input_sats);
			self.fixed_per_1k_output_sats =
				cost.fixed_per_1k_output_sats.or(self.fixed_per_1k_output_sats);
		}

		if let Some(credentials) = toml.credentials {
			self.sub_credential_creation_cost_msats = credentials
				.sub_credential_creation_cost_msats
				.or(self.sub_credential_creation_cost_msats);
			self.refund_sweep_interval_secs =
				credentials.refund_sweep_interval_secs.or(self.refund_sweep_interval_secs);
		}

		if let Some(mints) = toml.mints {
			self.trusted_mints = Some(mints.trusted);
			self.primary_mint = Some(mints.primary);
		}

		if let Some(upstreams) = toml.upstream {
			self.upstreams = upstreams;
		}
	}

	fn merge_args(&mut self, args: &ArgsConfig) {
		if let Some(v) = &args.listen_addr {
			self.listen_addr = Some(v.clone());
		}
		if let Some(v) = &args.storage_path {
			self.storage_path = Some(v.clone());
		}
		if let Some(v) = &args.log_level {
			self.log_level = Some(v.clone());
		}
		if let Some(v) = args.exchange_fee {
			self.exchange_fee = Some(v);
		}
		if let Some(v) = &args.primary_mint {
			self.primary_mint = Some(v.clone());
		}
	}

	fn build(self) -> io::Result<Config> {
		let listen_addr = self
			.listen_addr
			.unwrap_or_else(|| "127.0.0.1:8787".to_string())
			.parse::<SocketAddr>()
			.map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, format!("invalid listen_addr: {e}")))?;

		let tls_config = match (self.tls_cert_path, self.tls_key_path) {
			(Some(cert_path), Some(key_path)) => Some(TlsConfig { cert_path, key_path }),
			(None, None) => None,
			_ => {
				return Err(io::Error::new(
					io::ErrorKind::InvalidInput,
					"`tls.cert_path` and `tls.key_path` must both be set or both be absent",
				))
			},
		};

		let storage_path =
			PathBuf::from(self.storage_path.unwrap_or_else(|| "gateway.sqlite3".to_string()));

		let log_level = self
			.log_level
			.as_deref()
			.map(LevelFilter::from_str)
			.transpose()
			.map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, format!("invalid log level: {e}")))?
			.unwrap_or(LevelFilter::Info);

		let exchange_fee = self.exchange_fee.unwrap_or(1.005);
		let oracle_poll_interval_secs = self.oracle_poll_interval_secs.unwrap_or(60);

		let catalog_refresh_interval_secs = self.catalog_refresh_interval_secs.unwrap_or(300);
		let catalog_refresh_jitter = self.catalog_refresh_jitter.unwrap_or(0.10);

		let min_request_msats = self.min_request_msats.unwrap_or(1);
		let tolerance_percentage = self.tolerance_percentage.unwrap_or(5.0);

		let cost_mode = match self.cost_mode.as_deref() {
			Some("fixed") => CostMode::Fixed {
				sats_per_request: self.fixed_sats_per_request.unwrap_or(0),
				per_1k_input_sats: self.fixed_per_1k_input_sats.unwrap_or(0.0),
				per_1k_output_sats: self.fixed_per_1k_output_sats.unwrap_or(0.0),
			},
			Some("model_based") | None => CostMode::ModelBased,
			Some(other) => {
				return Err(io::Error::new(
					io::ErrorKind::InvalidInput,
					format!("unknown cost.mode `{other}`, expected `fixed` or `model_based`"),
				))
			},
		};

		let sub_credential_creation_cost_msats =
			self.sub_credential_creation_cost_msats.unwrap_or(1000);
		let refund_sweep_interval_secs = self.refund_sweep_interval_secs.unwrap_or(600);

		let trusted_mints = self.trusted_mints.unwrap_or_default();
		let primary_mint =
			self.primary_mint.unwrap_or_else(|| "https://mint.minibits.cash/Bitcoin".to_string());

		let upstreams = self
			.upstreams
			.into_iter()
			.map(TomlUpstreamConfig::into_upstream_config)
			.collect::<Result<Vec<_>, _>>()?;

		Ok(Config {
			listen_addr,
			tls_config,
			storage_path,
			log_level,
			exchange_fee,
			oracle_poll_interval_secs,
			catalog_refresh_interval_secs,
			catalog_refresh_jitter,
			min_request_msats,
			tolerance_percentage,
			cost_mode,
			sub_credential_creation_cost_msats,
			refund_sweep_interval_secs,
			trusted_mints,
			primary_mint,
			upstreams,
		})
	}
}

#[derive(Deserialize, Serialize, Default)]
pub struct TomlConfig {
	server: Option<TomlServerConfig>,
	tls: Option<TomlTlsConfig>,
	log: Option<TomlLogConfig>,
	exchange: Option<TomlExchangeConfig>,
	catalog: Option<TomlCatalogConfig>,
	cost: Option<TomlCostConfig>,
	credentials: Option<TomlCredentialsConfig>,
	mints: Option<TomlMintsConfig>,
	#[serde(rename = "upstream")]
	upstream: Option<Vec<TomlUpstreamConfig>>,
}

#[derive(Deserialize, Serialize)]
struct TomlServerConfig {
	listen_addr: Option<String>,
	storage_path: Option<String>,
}

#[derive(Deserialize, Serialize)]
struct TomlTlsConfig {
	cert_path: String,
	key_path: String,
}

#[derive(Deserialize, Serialize)]
struct TomlLogConfig {
	level: Option<String>,
}

#[derive(Deserialize, Serialize)]
struct TomlExchangeConfig {
	fee: Option<f64>,
	poll_interval_secs: Option<u64>,
}

#[derive(Deserialize, Serialize)]
struct TomlCatalogConfig {
	refresh_interval_secs: Option<u64>,
	refresh_jitter: Option<f64>,
}

#[derive(Deserialize, Serialize)]
struct TomlCostConfig {
	min_request_msats: Option<u64>,
	tolerance_percentage: Option<f64>,
	mode: Option<String>,
	fixed_sats_per_request: Option<u64>,
	fixed_per_1k_input_sats: Option<f64>,
	fixed_per_1k_output_sats: Option<f64>,
}

#[derive(Deserialize, Serialize)]
struct TomlCredentialsConfig {
	sub_credential_creation_cost_msats: Option<u64>,
	refund_sweep_interval_secs: Option<u64>,
}

#[derive(Deserialize, Serialize)]
struct TomlMintsConfig {
	trusted: Vec<String>,
	primary: String,
}

#[derive(Deserialize, Serialize, Clone)]
struct TomlUpstreamConfig {
	id: String,
	provider_type: String,
	base_url: String,
	api_key: Option<String>,
	api_version: Option<String>,
	enabled: Option<bool>,
	fee: Option<f64>,
}

impl TomlUpstreamConfig {
	fn into_upstream_config(self) -> io::Result<UpstreamConfig> {
		let provider_type = ProviderType::from_str_loose(&self.provider_type).ok_or_else(|| {
			io::Error::new(
				io::ErrorKind::InvalidInput,
				format!("unknown upstream provider_type `{}` for upstream `{}`", self.provider_type, self.id),
			)
		})?;
		let fee = self.fee.unwrap_or_else(|| provider_type.default_fee());
		Ok(UpstreamConfig {
			id: self.id,
			provider_type,
			base_url: self.base_url,
			api_key: self.api_key,
			api_version: self.api_version,
			enabled: self.enabled.unwrap_or(true),
			fee,
		})
	}
}

#[derive(Parser, Debug)]
#[command(version, about = "Paid AI-inference reverse proxy", long_about = None)]
pub struct ArgsConfig {
	#[arg(required = false, help = "The configuration file for running the gateway.")]
	pub config_file: Option<String>,

	#[arg(long, env = "GATEWAY_LISTEN_ADDR", help = "The address the HTTP server listens on.")]
	listen_addr: Option<String>,

	#[arg(long, env = "GATEWAY_STORAGE_PATH", help = "Path to the SQLite database file.")]
	storage_path: Option<String>,

	#[arg(long, env = "GATEWAY_LOG_LEVEL", help = "Log level (error, warn, info, debug, trace).")]
	log_level: Option<String>,

	#[arg(long, env = "GATEWAY_EXCHANGE_FEE", help = "Multiplicative markup applied over the raw BTC/USD rate.")]
	exchange_fee: Option<f64>,

	#[arg(long, env = "GATEWAY_PRIMARY_MINT", help = "Mint used for refunds when the source mint is untrusted.")]
	primary_mint: Option<String>,
}

pub fn load_config(args: &ArgsConfig) -> io::Result<Config> {
	let mut builder = ConfigBuilder::default();

	let config_file = if let Some(path) = &args.config_file {
		Some(PathBuf::from(path))
	} else {
		get_default_config_path().filter(|path| path.exists())
	};

	if let Some(path) = config_file {
		let content = fs::read_to_string(&path).map_err(|e| {
			io::Error::new(e.kind(), format!("failed to read config file '{:?}': {}", path, e))
		})?;
		let toml_config: TomlConfig = toml::from_str(&content).map_err(|e| {
			io::Error::new(io::ErrorKind::InvalidData, format!("config file has invalid TOML: {}", e))
		})?;
		builder.merge_toml(toml_config);
	}

	builder.merge_args(args);
	builder.build()
}

#[cfg(test)]
mod tests {
	use super::*;

	fn empty_args() -> ArgsConfig {
		ArgsConfig {
			config_file: None,
			listen_addr: None,
			storage_path: None,
			log_level: None,
			exchange_fee: None,
			primary_mint: None,
		}
	}

	#[test]
	fn defaults_apply_when_nothing_is_configured() {
		let config = ConfigBuilder::default().build().unwrap();
		assert_eq!(config.listen_addr, "127.0.0.1:8787".parse().unwrap());
		assert_eq!(config.exchange_fee, 1.005);
		assert!(matches!(config.cost_mode, CostMode::ModelBased));
		assert!(config.upstreams.is_empty());
	}

	#[test]
	fn cli_overrides_toml_which_overrides_defaults() {
		const TOML: &str = r#"
			[server]
			listen_addr = "0.0.0.0:9000"

			[exchange]
			fee = 1.02

			[mints]
			trusted = ["https://trusted.example"]
			primary = "https://primary.example"

			[[upstream]]
			id = "openai-main"
			provider_type = "openai"
			base_url = "https://api.openai.com"
		"#;
		let toml_config: TomlConfig = toml::from_str(TOML).unwrap();
		let mut builder = ConfigBuilder::default();
		builder.merge_toml(toml_config);

		let mut args = empty_args();
		args.exchange_fee = Some(1.10);
		builder.merge_args(&args);

		let config = builder.build().unwrap();
		// TOML value kept where CLI didn't override.
		assert_eq!(config.listen_addr, "0.0.0.0:9000".parse().unwrap());
		// CLI overrides TOML.
		assert_eq!(config.exchange_fee, 1.10);
		assert_eq!(config.trusted_mints, vec!["https://trusted.example".to_string()]);
		assert_eq!(config.upstreams.len(), 1);
		assert_eq!(config.upstreams[0].fee, ProviderType::OpenAi.default_fee());
	}

	#[test]
	fn tls_requires_both_cert_and_key() {
		let mut builder = ConfigBuilder::default();
		builder.tls_cert_path = Some("/path/cert.pem".to_string());
		let err = builder.build().unwrap_err();
		assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
	}

	#[test]
	fn unknown_cost_mode_is_rejected() {
		let mut builder = ConfigBuilder::default();
		builder.cost_mode = Some("bogus".to_string());
		assert!(builder.build().is_err());
	}

	#[test]
	fn unknown_upstream_provider_type_is_rejected() {
		let mut builder = ConfigBuilder::default();
		builder.upstreams.push(TomlUpstreamConfig {
			id: "x".into(),
			provider_type: "not-a-real-provider".into(),
			base_url: "https://example.com".into(),
			api_key: None,
			api_version: None,
			enabled: None,
			fee: None,
		});
		assert!(builder.build().is_err());
	}
}
