// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Prometheus-text health metrics (ambient: spec.md has no metrics
//! component of its own, but a reverse proxy fielding paid traffic still
//! needs a `/metrics` an operator can scrape).

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use crate::state::AppState;

pub const BUILD_METRICS_INTERVAL: Duration = Duration::from_secs(60);

/// This represents a [`Metrics`] type that can go up and down in value.
pub struct IntGauge {
	inner: AtomicI64,
}

impl IntGauge {
	pub fn new() -> Self {
		Self { inner: AtomicI64::new(0) }
	}

	pub fn set(&self, value: i64) {
		self.inner.store(value, Ordering::Relaxed);
	}

	pub fn get(&self) -> i64 {
		self.inner.load(Ordering::Relaxed)
	}
}

impl Default for IntGauge {
	fn default() -> Self {
		Self::new()
	}
}

/// Represents the [`Metrics`] output values and type.
pub struct MetricsOutput {
	name: String,
	help_text: String,
	metric_type: String,
	value: String,
}

impl MetricsOutput {
	pub fn new(name: &str, help_text: &str, metric_type: &str, value: &str) -> Self {
		Self {
			name: name.to_string(),
			help_text: help_text.to_string(),
			metric_type: metric_type.to_string(),
			value: value.to_string(),
		}
	}
}

pub struct Metrics {
	pub service_health_score: IntGauge,
	pub enabled_upstreams: IntGauge,
	pub available_models: IntGauge,
	pub sats_per_usd: IntGauge,
}

impl Metrics {
	pub fn new() -> Self {
		Self {
			service_health_score: IntGauge::new(),
			enabled_upstreams: IntGauge::new(),
			available_models: IntGauge::new(),
			sats_per_usd: IntGauge::new(),
		}
	}

	/// Refreshes every gauge from the live gateway state.
	pub fn update(&self, state: &AppState) {
		let enabled_upstreams = state
			.upstreams
			.iter()
			.filter(|u| u.config.enabled && u.enabled.load(Ordering::Relaxed))
			.count();
		let available_models = state.all_models().len();
		let sats_per_usd = state.oracle.sats_per_usd();

		self.enabled_upstreams.set(enabled_upstreams as i64);
		self.available_models.set(available_models as i64);
		self.sats_per_usd.set(sats_per_usd.round() as i64);

		let score = Self::compute_health_score(
			sats_per_usd > 0.0,
			enabled_upstreams > 0,
			available_models > 0,
		);
		self.service_health_score.set(score);
	}

	pub fn format_metrics_output(&self, buffer: &mut String, options: &MetricsOutput) {
		buffer.push_str(&format!("# HELP {} {}\n", options.name, options.help_text));
		buffer.push_str(&format!("# TYPE {} {}\n", options.name, options.metric_type));
		buffer.push_str(&format!("{} {}\n", options.name, options.value));
	}

	pub fn gather_metrics(&self) -> String {
		let mut buffer = String::new();

		self.format_metrics_output(
			&mut buffer,
			&MetricsOutput::new(
				"gateway_health_score",
				"Current health score (0-100)",
				"gauge",
				&self.service_health_score.get().to_string(),
			),
		);
		self.format_metrics_output(
			&mut buffer,
			&MetricsOutput::new(
				"gateway_enabled_upstreams",
				"Number of enabled upstream providers",
				"gauge",
				&self.enabled_upstreams.get().to_string(),
			),
		);
		self.format_metrics_output(
			&mut buffer,
			&MetricsOutput::new(
				"gateway_available_models",
				"Number of models available for routing across enabled upstreams",
				"gauge",
				&self.available_models.get().to_string(),
			),
		);
		self.format_metrics_output(
			&mut buffer,
			&MetricsOutput::new(
				"gateway_sats_per_usd",
				"Current exchange oracle sats-per-USD rate, rounded",
				"gauge",
				&self.sats_per_usd.get().to_string(),
			),
		);

		buffer
	}

	/// Health score (spec.md has no health-scoring component of its own,
	/// but the teacher's health gauge shape is worth keeping): total
	/// failure if the oracle's cached rate has gone to zero, major if no
	/// upstream is currently enabled, minor if none of them have any
	/// models cached yet.
	///
	/// - Critical: 0 (Total failure)
	/// - Major: 35%
	/// - Minor: 25%
	///
	/// Health score = Maximum health score - Sum(Event severity score)
	///
	/// Where:
	///
	/// - Maximum health score = 100
	fn compute_health_score(oracle_healthy: bool, has_enabled_upstream: bool, has_models: bool) -> i64 {
		if !oracle_healthy {
			return 0;
		}

		let mut health_score = 100;

		if !has_enabled_upstream {
			health_score -= 35;
		}

		if !has_models {
			health_score -= 25;
		}

		health_score
	}
}

impl Default for Metrics {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_compute_health_score() {
		assert_eq!(Metrics::compute_health_score(false, true, true), 0);
		assert_eq!(Metrics::compute_health_score(false, false, false), 0);

		assert_eq!(Metrics::compute_health_score(true, true, true), 100);
		assert_eq!(Metrics::compute_health_score(true, false, true), 65);
		assert_eq!(Metrics::compute_health_score(true, true, false), 75);
		assert_eq!(Metrics::compute_health_score(true, false, false), 40);
	}

	#[test]
	fn test_gather_metrics_format() {
		let metrics = Metrics::new();
		metrics.service_health_score.set(100);

		let result = metrics.gather_metrics();
		assert!(result.contains("gateway_health_score"));
		assert!(result.contains("gateway_enabled_upstreams"));
	}
}
