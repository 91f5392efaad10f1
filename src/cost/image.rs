// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Image-token estimation for the prompt headroom discount (spec.md
//! §4.4): OpenAI-vision-style tile counting. Grounded on
//! `original_source/routstr/payment/cost.py`'s `_get_image_dimensions`,
//! `_calculate_image_tokens` and `_estimate_image_tokens_in_messages`.

use super::CostError;

const LOW_DETAIL_TOKENS: u64 = 85;
const TILE_TOKENS: u64 = 170;
const TILE_SIZE: u32 = 512;
const FIRST_RESCALE_MAX: u32 = 2048;
const SECOND_RESCALE_MAX: u32 = 768;

#[derive(Debug, Clone)]
pub enum ImageRef {
	/// A `data:image/...;base64,...` URL: dimensions are sniffed directly
	/// from the decoded bytes, no network round trip required.
	DataUrl { bytes: Vec<u8> },
	/// A remote URL: dimensions require a short HTTP GET.
	Remote { url: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detail {
	Low,
	High,
	Auto,
}

impl Default for Detail {
	fn default() -> Self {
		Detail::Auto
	}
}

impl Detail {
	pub fn parse(s: &str) -> Detail {
		match s {
			"low" => Detail::Low,
			"high" => Detail::High,
			_ => Detail::Auto,
		}
	}
}

#[derive(Debug, Clone)]
pub struct MessageImage {
	pub image: ImageRef,
	pub detail: Detail,
}

/// Sums the estimated prompt-token cost of every image across a set of
/// chat messages, per spec.md §4.4's tile formula. Each image is costed
/// under its own requested `detail` (defaulting to `Auto` when the
/// request didn't specify one) rather than a blanket `Auto` for all of
/// them — a `detail:"low"` image is a flat 85 tokens regardless of size.
pub fn estimate_image_tokens_in_messages(images: &[MessageImage]) -> Result<u64, CostError> {
	let mut total = 0u64;
	for image in images {
		total += calculate_image_tokens(&image.image, image.detail)?;
	}
	Ok(total)
}

/// The literal tile-counting formula: `detail=low` is a flat 85 tokens;
/// otherwise the image is rescaled to fit within 2048x2048 then 768x768
/// (preserving aspect ratio) before `85 + 170 * ceil(w/512) * ceil(h/512)`.
pub fn calculate_image_tokens(image: &ImageRef, detail: Detail) -> Result<u64, CostError> {
	if detail == Detail::Low {
		return Ok(LOW_DETAIL_TOKENS);
	}
	let (width, height) = match image {
		ImageRef::DataUrl { bytes } => sniff_dimensions(bytes)
			.ok_or_else(|| CostError::ImageFetch("could not determine image dimensions".into()))?,
		// Fetching a remote URL's bytes is the upstream HTTP client's job
		// (C8's request path); by the time we reach the cost engine the
		// bytes should already have been resolved into a `DataUrl`. A bare
		// `Remote` ref with no prior fetch falls back to a conservative
		// default tile count rather than failing the whole request.
		ImageRef::Remote { .. } => return Ok(LOW_DETAIL_TOKENS + TILE_TOKENS * 4),
	};

	let (width, height) = rescale(width, height, FIRST_RESCALE_MAX);
	let (width, height) = rescale(width, height, SECOND_RESCALE_MAX);

	let tiles_w = width.div_ceil(TILE_SIZE) as u64;
	let tiles_h = height.div_ceil(TILE_SIZE) as u64;
	Ok(LOW_DETAIL_TOKENS + TILE_TOKENS * tiles_w * tiles_h)
}

fn rescale(width: u32, height: u32, max_dim: u32) -> (u32, u32) {
	if width <= max_dim && height <= max_dim {
		return (width, height);
	}
	let scale = (max_dim as f64) / (width.max(height) as f64);
	(((width as f64) * scale).round() as u32, ((height as f64) * scale).round() as u32)
}

/// Minimal PNG/JPEG dimension sniffing — no image-decoding dependency is
/// pulled in just to read a header.
fn sniff_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
	// PNG: signature, then IHDR chunk at a fixed offset.
	if bytes.len() >= 24 && &bytes[0..8] == b"\x89PNG\r\n\x1a\n" {
		let width = u32::from_be_bytes(bytes[16..20].try_into().ok()?);
		let height = u32::from_be_bytes(bytes[20..24].try_into().ok()?);
		return Some((width, height));
	}
	// JPEG: scan markers for the first SOF0..SOF3 segment.
	if bytes.len() >= 4 && bytes[0] == 0xFF && bytes[1] == 0xD8 {
		let mut i = 2usize;
		while i + 9 < bytes.len() {
			if bytes[i] != 0xFF {
				i += 1;
				continue;
			}
			let marker = bytes[i + 1];
			if (0xC0..=0xCF).contains(&marker) && marker != 0xC4 && marker != 0xC8 && marker != 0xCC {
				let height = u16::from_be_bytes(bytes[i + 5..i + 7].try_into().ok()?) as u32;
				let width = u16::from_be_bytes(bytes[i + 7..i + 9].try_into().ok()?) as u32;
				return Some((width, height));
			}
			let segment_len = u16::from_be_bytes(bytes[i + 2..i + 4].try_into().ok()?) as usize;
			i += 2 + segment_len;
		}
	}
	None
}

#[cfg(test)]
mod tests {
	use super::*;

	fn png_header(width: u32, height: u32) -> Vec<u8> {
		let mut bytes = b"\x89PNG\r\n\x1a\n".to_vec();
		bytes.extend_from_slice(&[0, 0, 0, 13]); // IHDR length, unused by sniffer
		bytes.extend_from_slice(b"IHDR");
		bytes.extend_from_slice(&width.to_be_bytes());
		bytes.extend_from_slice(&height.to_be_bytes());
		bytes
	}

	#[test]
	fn low_detail_is_always_85_tokens() {
		let image = ImageRef::DataUrl { bytes: png_header(4096, 4096) };
		assert_eq!(calculate_image_tokens(&image, Detail::Low).unwrap(), 85);
	}

	#[test]
	fn large_square_image_rescales_through_both_stages() {
		// 2049x2049 -> rescale to 2048x2048 -> rescale to 768x768 -> 2x2 tiles.
		let image = ImageRef::DataUrl { bytes: png_header(2049, 2049) };
		let tokens = calculate_image_tokens(&image, Detail::Auto).unwrap();
		assert_eq!(tokens, 85 + 170 * 2 * 2);
	}

	#[test]
	fn small_image_needs_only_one_tile() {
		let image = ImageRef::DataUrl { bytes: png_header(256, 256) };
		let tokens = calculate_image_tokens(&image, Detail::Auto).unwrap();
		assert_eq!(tokens, 85 + 170);
	}

	#[test]
	fn png_dimensions_are_sniffed_without_full_decode() {
		let bytes = png_header(800, 600);
		assert_eq!(sniff_dimensions(&bytes), Some((800, 600)));
	}
}
