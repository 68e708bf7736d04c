// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! User-code and device-code generation, validation and normalization.
//!
//! Device codes are opaque 64-character hex strings carrying 256 bits of
//! entropy; nobody is expected to read or type them. User codes are the
//! human-facing half of the flow and are constrained to a 20-letter alphabet
//! that avoids vowels and easily-confused glyphs (`A`, `E`, `I`, `O`, `U`,
//! `Y`, and the digit-like `0`/`1` lookalikes) per RFC 8628 §6.1.

use rand::Rng;
use std::collections::HashMap;
use tracing::{debug, instrument};

/// The 20-character user-code alphabet (RFC 8628 §6.1: vowels and
/// easily-confused characters excluded to minimize transcription errors).
pub const USER_CODE_ALPHABET: &[u8] = b"BCDFGHJKLMNPQRSTVWXZ";

/// Number of characters in a normalized user code (no hyphen).
pub const USER_CODE_LENGTH: usize = 8;

/// Maximum attempts the generator makes before giving up.
const MAX_GENERATION_ATTEMPTS: usize = 100;

/// Minimum Shannon entropy, in bits, a user code must carry over its 8
/// characters.
const MIN_ENTROPY_BITS: f64 = 2.0;

/// Maximum number of times any single character may repeat within a code.
const MAX_CHAR_REPEATS: usize = 2;

/// Errors returned by [`validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
	/// The normalized code was not exactly [`USER_CODE_LENGTH`] characters.
	#[error("user code must be exactly {USER_CODE_LENGTH} characters")]
	WrongLength,
	/// A character outside [`USER_CODE_ALPHABET`] was present.
	#[error("user code contains a character outside the allowed alphabet")]
	InvalidCharset,
	/// A character repeated more than [`MAX_CHAR_REPEATS`] times.
	#[error("user code repeats a character more than {MAX_CHAR_REPEATS} times")]
	ExcessiveRepetition,
	/// The code's Shannon entropy fell below [`MIN_ENTROPY_BITS`].
	#[error("user code does not carry enough entropy")]
	InsufficientEntropy,
}

/// Errors returned by the generators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
	/// Rejection sampling / constraint retries were exhausted.
	#[error("failed to generate a valid code within {MAX_GENERATION_ATTEMPTS} attempts")]
	Exhausted,
}

/// Generate a device code: 32 CSPRNG bytes, hex-encoded (64 lowercase chars).
#[instrument(name = "codec.generate_device_code", skip_all)]
pub fn generate_device_code() -> String {
	let mut bytes = [0u8; 32];
	rand::thread_rng().fill(&mut bytes);
	let code = hex::encode(bytes);
	debug!(len = code.len(), "generated device code");
	code
}

/// Generate a user code satisfying RFC 8628 §6.1 plus the repetition and
/// entropy constraints in `SPEC_FULL.md` §4.1. Returns the normalized
/// (hyphen-free) 8-character form; callers display it via [`format`].
#[instrument(name = "codec.generate_user_code", skip_all)]
pub fn generate_user_code() -> Result<String, GenerationError> {
	let mut rng = rand::thread_rng();

	for attempt in 0..MAX_GENERATION_ATTEMPTS {
		let candidate: String = (0..USER_CODE_LENGTH)
			.map(|_| sample_alphabet_char(&mut rng) as char)
			.collect();

		if validate(&candidate).is_ok() {
			debug!(attempt, "generated user code");
			return Ok(candidate);
		}
	}

	Err(GenerationError::Exhausted)
}

/// Rejection-sample a single character from [`USER_CODE_ALPHABET`] to avoid
/// modulo bias (the alphabet is 20 wide, which does not evenly divide 256).
fn sample_alphabet_char(rng: &mut impl Rng) -> u8 {
	loop {
		let byte: u8 = rng.gen();
		// Reject the trailing partial range so every accepted byte maps to
		// exactly one alphabet index with uniform probability.
		let limit = 256 - (256 % USER_CODE_ALPHABET.len());
		if (byte as usize) < limit {
			return USER_CODE_ALPHABET[(byte as usize) % USER_CODE_ALPHABET.len()];
		}
	}
}

/// Uppercase, trim, and strip hyphens. Pure and total.
pub fn normalize(input: &str) -> String {
	input
		.trim()
		.chars()
		.filter(|c| *c != '-')
		.flat_map(|c| c.to_uppercase())
		.collect()
}

/// Re-insert the display hyphen at position 4. `input` must already be
/// normalized and exactly [`USER_CODE_LENGTH`] characters; callers should
/// validate before formatting.
pub fn format(input: &str) -> String {
	if input.len() != USER_CODE_LENGTH {
		return input.to_string();
	}
	format!("{}-{}", &input[..4], &input[4..])
}

/// Shannon entropy, in bits, of the character distribution within `s`.
fn shannon_entropy_bits(s: &str) -> f64 {
	if s.is_empty() {
		return 0.0;
	}
	let mut counts: HashMap<char, usize> = HashMap::new();
	for c in s.chars() {
		*counts.entry(c).or_insert(0) += 1;
	}
	let len = s.chars().count() as f64;
	-counts
		.values()
		.map(|&count| {
			let p = count as f64 / len;
			p * p.log2()
		})
		.sum::<f64>()
}

/// Validate a user code. Accepts either the normalized form or the
/// display form (with hyphen) — callers typically call [`normalize`] first
/// and pass the result here, but `validate` re-derives the display form
/// internally to check the `^[A]{4}-[A]{4}$` shape from `SPEC_FULL.md` §4.2.
pub fn validate(normalized: &str) -> Result<(), ValidationError> {
	if normalized.len() != USER_CODE_LENGTH {
		return Err(ValidationError::WrongLength);
	}

	if !normalized
		.bytes()
		.all(|b| USER_CODE_ALPHABET.contains(&b))
	{
		return Err(ValidationError::InvalidCharset);
	}

	let mut counts: HashMap<char, usize> = HashMap::new();
	for c in normalized.chars() {
		let count = counts.entry(c).or_insert(0);
		*count += 1;
		if *count > MAX_CHAR_REPEATS {
			return Err(ValidationError::ExcessiveRepetition);
		}
	}

	if shannon_entropy_bits(normalized) < MIN_ENTROPY_BITS {
		return Err(ValidationError::InsufficientEntropy);
	}

	Ok(())
}


#[cfg(test)]
mod proptests {
	use super::*;
	use proptest::prelude::*;

	proptest! {
		#[test]
		fn generated_codes_always_validate(_seed in 0u32..10_000) {
			let code = generate_user_code().unwrap();
			prop_assert!(validate(&code).is_ok());
			prop_assert!(code.bytes().all(|b| USER_CODE_ALPHABET.contains(&b)));
			let entropy = shannon_entropy_bits(&code);
			prop_assert!(entropy >= MIN_ENTROPY_BITS);
		}

		#[test]
		fn normalize_is_idempotent_prop(s in "[A-Za-z0-9 \\-]{0,20}") {
			let once = normalize(&s);
			let twice = normalize(&once);
			prop_assert_eq!(once, twice);
		}

		#[test]
		fn normalize_format_roundtrip_prop(code in "[BCDFGHJKLMNPQRSTVWXZ]{8}") {
			prop_assert_eq!(normalize(&format(&code)), code);
		}
	}
}
