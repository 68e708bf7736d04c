// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! A secret wrapper type that prevents accidental logging or exposure.
//!
//! [`SecretString`] wraps a `String` so that `Debug`, `Display`, and default
//! serialization never print the contained value. Call [`SecretString::expose`]
//! when the raw value is actually needed (e.g. to sign a request or compare
//! against a configured secret).

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::Zeroize;

/// A string that is never printed in `Debug` output and is zeroized on drop.
#[derive(Clone, Default)]
pub struct SecretString(String);

impl SecretString {
	/// Wrap a plaintext value.
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	/// Access the underlying value.
	///
	/// Callers must not log or otherwise persist the returned `&str`.
	pub fn expose(&self) -> &str {
		&self.0
	}

	/// True if the wrapped value has zero length.
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// Byte length of the wrapped value.
	pub fn len(&self) -> usize {
		self.0.len()
	}
}

impl fmt::Debug for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "SecretString([REDACTED])")
	}
}

impl Drop for SecretString {
	fn drop(&mut self) {
		self.0.zeroize();
	}
}

impl From<String> for SecretString {
	fn from(value: String) -> Self {
		Self(value)
	}
}

impl PartialEq for SecretString {
	/// Constant-time-ish equality is NOT guaranteed here; callers comparing
	/// secrets against untrusted input (e.g. CSRF tokens) must use their own
	/// constant-time comparison instead of `==`.
	fn eq(&self, other: &Self) -> bool {
		self.0 == other.0
	}
}

#[cfg(feature = "serde")]
impl Serialize for SecretString {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		tracing::warn!("serializing a SecretString; ensure the destination is trusted");
		serializer.serialize_str(&self.0)
	}
}

#[cfg(feature = "serde")]
impl<'de> Deserialize<'de> for SecretString {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		String::deserialize(deserializer).map(SecretString)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn debug_never_contains_the_value() {
		let secret = SecretString::new("super-secret-csrf-key");
		let debug_output = format!("{secret:?}");
		assert!(!debug_output.contains("super-secret-csrf-key"));
		assert!(debug_output.contains("REDACTED"));
	}

	#[test]
	fn expose_returns_the_original_value() {
		let secret = SecretString::new("value");
		assert_eq!(secret.expose(), "value");
	}

	#[test]
	fn empty_and_len_reflect_wrapped_string() {
		assert!(SecretString::new("").is_empty());
		assert_eq!(SecretString::new("abcd").len(), 4);
	}

	#[cfg(feature = "serde")]
	#[test]
	fn roundtrips_through_json() {
		let secret = SecretString::new("token-value");
		let json = serde_json::to_string(&secret).unwrap();
		let parsed: SecretString = serde_json::from_str(&json).unwrap();
		assert_eq!(parsed.expose(), "token-value");
	}
}

#[cfg(test)]
mod proptests {
	use super::*;
	use proptest::prelude::*;

	proptest! {
		#[test]
		fn debug_output_never_leaks_secret(value in "[a-zA-Z0-9_\\-]{8,64}") {
			prop_assume!(!value.contains("REDACTED"));
			let secret = SecretString::new(value.clone());
			let debug_output = format!("{secret:?}");
			prop_assert!(!debug_output.contains(&value));
		}
	}
}
