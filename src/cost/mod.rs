// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Cost engine (C4): model metadata + usage -> msat charges. Grounded on
//! `original_source/routstr/payment/cost.py` (`calculate_cost`,
//! `get_max_cost_for_model`, `calculate_discounted_max_cost`,
//! `_estimate_tokens`) with the literal branching rules of spec.md §4.4
//! taking precedence wherever that module and spec.md disagree (see
//! DESIGN.md's Open Question decisions).

pub mod image;

use crate::catalog::{Model, Pricing};
use image::{estimate_image_tokens_in_messages, MessageImage};

#[derive(Debug, thiserror::Error)]
pub enum CostError {
	#[error("image fetch failed: {0}")]
	ImageFetch(String),
}

/// `{ base_msats, input_msats, output_msats, total_msats }` (spec.md §3's
/// "Token-cost record").
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct TokenCost {
	pub base_msats: u64,
	pub input_msats: u64,
	pub output_msats: u64,
	pub total_msats: u64,
}

#[derive(Debug, Clone, Copy)]
pub enum CostMode {
	Fixed { sats_per_request: u64, per_1k_input_sats: f64, per_1k_output_sats: f64 },
	ModelBased,
}

#[derive(Debug, Clone, Copy)]
pub struct CostConfig {
	pub mode: CostMode,
	pub min_request_msats: u64,
	pub tolerance_percentage: f64,
}

/// Derives `(max_prompt_cost_usd, max_completion_cost_usd, max_cost_usd)`
/// from a model's fee-adjusted USD pricing, following the CL/MCT
/// branching of spec.md §4.4 exactly (CL = top-provider context length,
/// MCT = top-provider max completion tokens, falling back to
/// `context_length`, and finally to a fixed heuristic envelope).
pub fn derive_max_costs(
	pricing: &Pricing, context_length: Option<u64>, top_provider_context_length: Option<u64>,
	top_provider_max_completion_tokens: Option<u64>,
) -> (f64, f64, f64) {
	let p = pricing.prompt;
	let c = pricing.completion;
	let r = pricing.request;
	let i = pricing.image;
	let w = pricing.web_search;
	let ir = pricing.internal_reasoning;

	let from_cl_mct = |cl: u64, mct: Option<u64>| -> (f64, f64, f64) {
		let cl = cl as f64;
		match mct {
			Some(mct) if (cl as u64) <= mct => (cl * p, cl * c, cl * p.max(c)),
			Some(mct) => {
				let mct = mct as f64;
				let max_prompt = cl * p;
				let max_completion = mct * c;
				(max_prompt, max_completion, (cl - mct) * p + mct * c)
			},
			None => (cl * p, cl * c, cl * p.max(c)),
		}
	};

	if let Some(cl) = top_provider_context_length {
		return from_cl_mct(cl, top_provider_max_completion_tokens);
	}
	if let Some(mct) = top_provider_max_completion_tokens {
		let mct_f = mct as f64;
		return (mct_f * p, mct_f * c, mct_f * c);
	}
	if let Some(cl) = context_length {
		return from_cl_mct(cl, None);
	}

	// Last resort: the fixed heuristic envelope.
	let max = p * 1_000_000.0 + c * 32_000.0 + r * 100_000.0 + i * 100.0 + w * 1_000.0 + ir * 100.0;
	(p * 1_000_000.0, c * 32_000.0, max)
}

/// Reservation from a request body: raw `max_cost_msats` for the model,
/// reduced by up to two headrooms (prompt, completion) per spec.md
/// §4.4's discount heuristic, floored at `min_request_msats`.
pub fn discounted_reservation(
	model: &Model, sats_per_usd: f64, config: &CostConfig, messages_text_chars: u64,
	images: &[MessageImage], declared_max_tokens: Option<u64>,
) -> Result<u64, CostError> {
	let estimated_prompt_tokens = {
		let text_tokens = messages_text_chars / 3;
		let image_tokens = estimate_image_tokens_in_messages(images)?;
		text_tokens + image_tokens
	};

	if let CostMode::Fixed { sats_per_request, per_1k_input_sats, per_1k_output_sats } = config.mode {
		return Ok(fixed_reservation_msats(
			sats_per_request,
			per_1k_input_sats,
			per_1k_output_sats,
			estimated_prompt_tokens,
			declared_max_tokens,
			config.min_request_msats,
		));
	}

	let max_cost_sats = model.max_cost_usd * sats_per_usd;
	let mut reservation_msats = (max_cost_sats * 1000.0).round() as i64;

	let tolerance = config.tolerance_percentage / 100.0;

	// Prompt headroom.
	let max_prompt_cost_sats = model.max_prompt_cost_usd * sats_per_usd;
	let prompt_upper_bound_sats = max_prompt_cost_sats * (1.0 - tolerance);
	let estimated_prompt_cost_sats = estimated_prompt_tokens as f64 * model.sats_pricing.prompt;
	if prompt_upper_bound_sats > estimated_prompt_cost_sats {
		let delta_msats = ((prompt_upper_bound_sats - estimated_prompt_cost_sats) * 1000.0).round() as i64;
		reservation_msats -= delta_msats;
	}

	// Completion headroom: only when the caller declared `max_tokens`.
	if let Some(n) = declared_max_tokens {
		let max_completion_cost_sats = model.max_completion_cost_usd * sats_per_usd;
		let completion_upper_bound_sats = max_completion_cost_sats * (1.0 - tolerance);
		let declared_completion_cost_sats = n as f64 * model.sats_pricing.completion;
		if completion_upper_bound_sats > declared_completion_cost_sats {
			let delta_msats =
				((completion_upper_bound_sats - declared_completion_cost_sats) * 1000.0).round() as i64;
			reservation_msats -= delta_msats;
		}
	}

	Ok(reservation_msats.max(config.min_request_msats as i64).max(0) as u64)
}

/// Raw (un-discounted) `max_cost_msats` for a model, floored at
/// `min_request_msats` (spec.md §8's "reservation floor" boundary case).
pub fn raw_max_cost_msats(model: &Model, sats_per_usd: f64, min_request_msats: u64) -> u64 {
	let msats = (model.max_cost_usd * sats_per_usd * 1000.0).round() as i64;
	msats.max(min_request_msats as i64).max(0) as u64
}

/// Fixed-pricing-mode reservation: a constant per-request cost plus
/// optional flat per-1k-input/output surcharges, floored at the minimum.
pub fn fixed_reservation_msats(
	sats_per_request: u64, per_1k_input_sats: f64, per_1k_output_sats: f64,
	estimated_prompt_tokens: u64, declared_max_tokens: Option<u64>, min_request_msats: u64,
) -> u64 {
	let base_msats = sats_per_request * 1000;
	let input_msats = (estimated_prompt_tokens as f64 / 1000.0 * per_1k_input_sats * 1000.0).round() as i64;
	let output_msats = declared_max_tokens
		.map(|n| (n as f64 / 1000.0 * per_1k_output_sats * 1000.0).round() as i64)
		.unwrap_or(0);
	let total = base_msats as i64 + input_msats + output_msats;
	total.max(min_request_msats as i64) as u64
}

/// Final cost from the response's `usage` block (spec.md §4.4's "Final
/// cost from usage"). If the upstream reported no usage at all, callers
/// should instead finalize with the full reservation (the conservative
/// fallback) rather than calling this function.
pub fn final_cost_from_usage(
	model: &Model, sats_per_usd: f64, prompt_tokens: u64, completion_tokens: u64,
) -> TokenCost {
	let _ = sats_per_usd; // sats_pricing is already sats-denominated; USD rate not needed here.

	// prompt/completion prices are sats-per-token; `/1000 * price * 1_000_000`
	// is algebraically `price * 1000` (sats -> msats), matching spec.md
	// §4.4's literal formula.
	let input_msats_f = round_3(prompt_tokens as f64 / 1000.0 * model.sats_pricing.prompt * 1_000_000.0);
	let output_msats_f =
		round_3(completion_tokens as f64 / 1000.0 * model.sats_pricing.completion * 1_000_000.0);
	let total_msats = (input_msats_f + output_msats_f).ceil() as u64;
	TokenCost {
		base_msats: 0,
		input_msats: input_msats_f.round() as u64,
		output_msats: output_msats_f.round() as u64,
		total_msats,
	}
}

fn round_3(x: f64) -> f64 {
	(x * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
	use super::*;

	fn model_with(p: f64, c: f64, cl: Option<u64>, mct: Option<u64>) -> Model {
		Model {
			usd_pricing: Pricing { prompt: p, completion: c, ..Default::default() },
			top_provider_context_length: cl,
			top_provider_max_completion_tokens: mct,
			..Default::default()
		}
	}

	#[test]
	fn derive_max_costs_cl_less_equal_mct() {
		let (mp, mc, max) = derive_max_costs(
			&Pricing { prompt: 0.001, completion: 0.002, ..Default::default() },
			None,
			Some(1000),
			Some(2000),
		);
		assert_eq!(mp, 1000.0 * 0.001);
		assert_eq!(mc, 1000.0 * 0.002);
		assert_eq!(max, 1000.0 * 0.002);
	}

	#[test]
	fn derive_max_costs_cl_greater_than_mct() {
		let (mp, mc, max) = derive_max_costs(
			&Pricing { prompt: 0.001, completion: 0.002, ..Default::default() },
			None,
			Some(5000),
			Some(2000),
		);
		assert_eq!(mp, 5000.0 * 0.001);
		assert_eq!(mc, 2000.0 * 0.002);
		assert_eq!(max, (5000.0 - 2000.0) * 0.001 + 2000.0 * 0.002);
	}

	#[test]
	fn derive_max_costs_only_context_length_falls_back() {
		let (mp, mc, max) = derive_max_costs(
			&Pricing { prompt: 0.001, completion: 0.002, ..Default::default() },
			Some(4000),
			None,
			None,
		);
		assert_eq!(mp, 4000.0 * 0.001);
		assert_eq!(mc, 4000.0 * 0.002);
		assert_eq!(max, 4000.0 * 0.002);
	}

	#[test]
	fn reservation_floor_applies_when_max_cost_is_zero() {
		let model = model_with(0.0, 0.0, Some(100), Some(100));
		let config =
			CostConfig { mode: CostMode::ModelBased, min_request_msats: 1, tolerance_percentage: 1.0 };
		let reserved = discounted_reservation(&model, 1000.0, &config, 30, &[], None).unwrap();
		assert_eq!(reserved, 1);
	}

	#[test]
	fn final_cost_matches_scenario_one_from_spec() {
		// 10 prompt tokens, 30 completion tokens should reduce to the
		// literal {input:80, output:240, total:320} worked example:
		// input_msats = prompt_tokens/1000 * prompt_sats * 1_000_000.
		let model = Model {
			sats_pricing: Pricing { prompt: 0.008, completion: 0.008, ..Default::default() },
			..Default::default()
		};
		let cost = final_cost_from_usage(&model, 1.0, 10, 30);
		assert_eq!(cost.input_msats, 80);
		assert_eq!(cost.output_msats, 240);
		assert_eq!(cost.total_msats, 320);
	}

	#[test]
	fn completion_headroom_not_deducted_without_max_tokens() {
		let model = model_with(0.001, 0.002, Some(1000), Some(1000));
		let config =
			CostConfig { mode: CostMode::ModelBased, min_request_msats: 1, tolerance_percentage: 0.0 };
		let with_none = discounted_reservation(&model, 1000.0, &config, 10, &[], None).unwrap();
		let with_small = discounted_reservation(&model, 1000.0, &config, 10, &[], Some(1)).unwrap();
		assert!(with_small <= with_none);
	}

	#[test]
	fn fixed_mode_ignores_model_pricing_and_uses_the_configured_rate() {
		// A model whose own pricing would reserve a large amount must be
		// ignored entirely once `CostMode::Fixed` is configured.
		let model = model_with(10.0, 10.0, Some(1_000_000), Some(1_000_000));
		let config = CostConfig {
			mode: CostMode::Fixed { sats_per_request: 1, per_1k_input_sats: 0.0, per_1k_output_sats: 0.0 },
			min_request_msats: 1,
			tolerance_percentage: 0.0,
		};
		let reserved = discounted_reservation(&model, 1000.0, &config, 3000, &[], Some(500)).unwrap();
		assert_eq!(reserved, 1000);
	}

	#[test]
	fn fixed_mode_adds_input_and_output_surcharges() {
		let model = model_with(0.0, 0.0, None, None);
		let config = CostConfig {
			mode: CostMode::Fixed {
				sats_per_request: 1,
				per_1k_input_sats: 2.0,
				per_1k_output_sats: 3.0,
			},
			min_request_msats: 1,
			tolerance_percentage: 0.0,
		};
		// 3000 chars -> 1000 estimated prompt tokens -> 1 * 2.0 sats input surcharge.
		// declared_max_tokens 1000 -> 1 * 3.0 sats output surcharge.
		let reserved = discounted_reservation(&model, 1000.0, &config, 3000, &[], Some(1000)).unwrap();
		assert_eq!(reserved, 1000 + 2000 + 3000);
	}
}
