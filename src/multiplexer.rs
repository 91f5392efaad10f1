// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Model multiplexer (C3): resolves an inbound model identifier to
//! exactly one `(upstream, model)` pair. The alias-priority / cost-score
//! / provider-penalty selection rule follows spec.md §4.3's literal
//! formulas, which diverge from `original_source/routstr/algorithm.py`'s
//! typical-usage-weighted variant (see DESIGN.md).

use crate::catalog::Model;

#[derive(Debug, thiserror::Error)]
pub enum MultiplexError {
	#[error("unknown model '{0}'")]
	InvalidModel(String),
}

pub struct Candidate<'a> {
	pub upstream_id: &'a str,
	pub is_openrouter: bool,
	pub model: &'a Model,
}

/// Strips a requested model id of an `<upstream>/` pin, returning the pin
/// (if any) and the remaining bare id.
pub fn split_upstream_pin(requested: &str, known_upstreams: &[String]) -> (Option<&str>, &str) {
	if let Some((prefix, rest)) = requested.split_once('/') {
		if known_upstreams.iter().any(|u| u == prefix) {
			return (Some(prefix), rest);
		}
	}
	(None, requested)
}

/// Every id spec.md §4.3 says should resolve to this model: the canonical
/// id, the canonical id prefix-stripped, the canonical slug (also
/// prefix-stripped), every `alias_ids` entry, and a dated-suffix-stripped
/// variant of each of the above.
fn recognized_ids(model: &Model) -> Vec<String> {
	let mut ids = vec![model.id.clone()];
	if let Some(stripped) = strip_known_prefix(&model.id) {
		ids.push(stripped.to_string());
	}
	if let Some(slug) = &model.canonical_slug {
		ids.push(slug.clone());
		if let Some(stripped) = strip_known_prefix(slug) {
			ids.push(stripped.to_string());
		}
	}
	ids.extend(model.alias_ids.iter().cloned());

	let mut with_dated = ids.clone();
	for id in &ids {
		if let Some(undated) = strip_dated_suffix(id) {
			with_dated.push(undated);
		}
	}
	with_dated.sort();
	with_dated.dedup();
	with_dated
}

fn strip_known_prefix(id: &str) -> Option<&str> {
	const PREFIXES: &[&str] = &[
		"openai/", "anthropic/", "openrouter/", "azure/", "ollama/", "groq/", "fireworks/",
		"perplexity/", "xai/", "gemini/", "ppqai/", "generic/", "custom/",
	];
	PREFIXES.iter().find_map(|prefix| id.strip_prefix(prefix))
}

/// Strips a trailing `-YYYY-MM-DD` dated suffix, e.g.
/// `gpt-5-2025-01-01` -> `gpt-5`.
fn strip_dated_suffix(id: &str) -> Option<String> {
	let bytes = id.as_bytes();
	if bytes.len() < 11 {
		return None;
	}
	let tail = &id[id.len() - 11..];
	let mut chars = tail.chars();
	let dash = chars.next()?;
	if dash != '-' {
		return None;
	}
	let is_date = tail[1..].chars().enumerate().all(|(i, c)| match i {
		4 | 7 => c == '-',
		_ => c.is_ascii_digit(),
	});
	if is_date {
		Some(id[..id.len() - 11].to_string())
	} else {
		None
	}
}

fn alias_priority(requested: &str, model: &Model) -> u8 {
	if model.id == requested {
		return 3;
	}
	if model.canonical_slug.as_deref() == Some(requested) {
		return 2;
	}
	1
}

fn cost_score(model: &Model) -> f64 {
	let p = &model.usd_pricing;
	p.prompt * 1000.0
		+ p.completion * 500.0
		+ p.request
		+ 0.1 * p.image
		+ 0.1 * p.web_search
		+ 0.2 * p.internal_reasoning
}

const OPENROUTER_PENALTY: f64 = 1.001;

/// Resolves `requested` against every candidate `(upstream, model)` whose
/// recognized-ids set contains it (after stripping a valid `<upstream>/`
/// pin, which restricts the candidate set to that one upstream).
pub fn resolve<'a>(
	requested: &str, candidates: &[Candidate<'a>], known_upstreams: &[String],
) -> Result<(usize, u8, f64), MultiplexError> {
	let (pin, bare) = split_upstream_pin(requested, known_upstreams);

	// Non-OpenRouter providers are iterated first for deterministic
	// tie-breaking (spec.md §4.3).
	let mut ordered: Vec<(usize, &Candidate)> = candidates.iter().enumerate().collect();
	ordered.sort_by_key(|(_, c)| c.is_openrouter);

	let mut best: Option<(usize, u8, f64)> = None;
	for (index, candidate) in ordered {
		if let Some(pin) = pin {
			if candidate.upstream_id != pin {
				continue;
			}
		}
		let ids = recognized_ids(candidate.model);
		if !ids.iter().any(|id| id == bare || id == requested) {
			continue;
		}
		let priority = alias_priority(bare, candidate.model);
		let mut score = cost_score(candidate.model);
		if candidate.is_openrouter {
			score *= OPENROUTER_PENALTY;
		}
		best = Some(match best {
			None => (index, priority, score),
			Some((best_index, best_priority, best_score)) => {
				if priority > best_priority || (priority == best_priority && score < best_score) {
					(index, priority, score)
				} else {
					(best_index, best_priority, best_score)
				}
			},
		});
	}

	best.ok_or_else(|| MultiplexError::InvalidModel(requested.to_string()))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::catalog::Pricing;

	fn model(id: &str, slug: Option<&str>, prompt: f64) -> Model {
		Model {
			id: id.to_string(),
			canonical_slug: slug.map(str::to_string),
			usd_pricing: Pricing { prompt, ..Default::default() },
			..Default::default()
		}
	}

	#[test]
	fn bare_id_match_outranks_alias_match() {
		let exact = model("gpt-4o-mini", None, 0.01);
		let aliased = model("gpt-4o-mini-2024-07-18", Some("gpt-4o-mini"), 0.001);
		let candidates = vec![
			Candidate { upstream_id: "openai", is_openrouter: false, model: &exact },
			Candidate { upstream_id: "azure", is_openrouter: false, model: &aliased },
		];
		let (index, priority, _) = resolve("gpt-4o-mini", &candidates, &[]).unwrap();
		assert_eq!(index, 0);
		assert_eq!(priority, 3);
	}

	#[test]
	fn ties_broken_by_lower_cost_score() {
		let cheap = model("m", None, 0.001);
		let expensive = model("m", None, 0.01);
		let candidates = vec![
			Candidate { upstream_id: "a", is_openrouter: false, model: &expensive },
			Candidate { upstream_id: "b", is_openrouter: false, model: &cheap },
		];
		let (index, ..) = resolve("m", &candidates, &[]).unwrap();
		assert_eq!(index, 1);
	}

	#[test]
	fn openrouter_penalty_prefers_equal_cost_non_openrouter() {
		let a = model("m", None, 0.01);
		let b = model("m", None, 0.01);
		let candidates = vec![
			Candidate { upstream_id: "openrouter", is_openrouter: true, model: &a },
			Candidate { upstream_id: "openai", is_openrouter: false, model: &b },
		];
		let (index, ..) = resolve("m", &candidates, &[]).unwrap();
		assert_eq!(index, 1);
	}

	#[test]
	fn dated_alias_resolves_identically_to_bare_id() {
		let m = model("gpt-x", None, 0.01);
		let candidates = vec![Candidate { upstream_id: "openai", is_openrouter: false, model: &m }];
		let direct = resolve("gpt-x", &candidates, &[]).unwrap();
		let dated = resolve("gpt-x-2030-05-01", &candidates, &[]).unwrap();
		assert_eq!(direct.0, dated.0);
	}

	#[test]
	fn prefixed_pin_restricts_to_that_upstream() {
		let a = model("m", None, 0.001);
		let b = model("m", None, 0.001);
		let candidates = vec![
			Candidate { upstream_id: "openai", is_openrouter: false, model: &a },
			Candidate { upstream_id: "azure", is_openrouter: false, model: &b },
		];
		let known = vec!["azure".to_string(), "openai".to_string()];
		let (index, ..) = resolve("azure/m", &candidates, &known).unwrap();
		assert_eq!(index, 1);
	}

	#[test]
	fn unknown_model_is_rejected() {
		let m = model("known", None, 0.01);
		let candidates = vec![Candidate { upstream_id: "openai", is_openrouter: false, model: &m }];
		assert!(resolve("nonexistent", &candidates, &[]).is_err());
	}
}
