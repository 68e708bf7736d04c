// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Strict `application/x-www-form-urlencoded` body parsing. `axum::Form`
//! silently keeps the last value of a repeated key; RFC 6749 §3.2 and
//! `SPEC_FULL.md` §6 require rejecting duplicates outright on both the
//! code and token endpoints.

use std::collections::HashMap;

use crate::error::ApiError;

pub fn parse_strict(body: &[u8]) -> Result<HashMap<String, String>, ApiError> {
	let mut fields = HashMap::new();
	for (key, value) in form_urlencoded::parse(body) {
		if fields.insert(key.clone().into_owned(), value.into_owned()).is_some() {
			return Err(ApiError::InvalidRequest(format!(
				"duplicate form parameter: {key}"
			)));
		}
	}
	Ok(fields)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_simple_form_body() {
		let fields = parse_strict(b"client_id=abc&scope=read").unwrap();
		assert_eq!(fields.get("client_id").map(String::as_str), Some("abc"));
		assert_eq!(fields.get("scope").map(String::as_str), Some("read"));
	}

	#[test]
	fn rejects_duplicate_keys() {
		let err = parse_strict(b"client_id=abc&client_id=def").unwrap_err();
		assert!(matches!(err, ApiError::InvalidRequest(_)));
	}
}
