// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core domain entities: [`DeviceCode`], [`TokenResult`], and the request/
//! response DTOs exchanged with callers.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use devicecode_secret::SecretString;
use serde::{Deserialize, Serialize};

use crate::codec;

/// Minimum lifetime of a device code, per `SPEC_FULL.md` §3.
pub const MIN_CODE_EXPIRY: ChronoDuration = ChronoDuration::minutes(10);

/// Floor applied to the configured poll interval.
pub const MIN_POLL_INTERVAL_SECS: u64 = 5;

/// A device authorization record, owned exclusively by its `device_code`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceCode {
	/// Opaque 64-hex-character identifier used by the polling client.
	pub device_code: String,
	/// Normalized (hyphen-free, uppercase) 8-character user code.
	pub user_code: String,
	/// Caller-supplied, opaque to the proxy.
	pub client_id: String,
	/// Caller-supplied, opaque to the proxy. May be empty.
	pub scope: String,
	/// `${BaseURL}/device`, with no trailing-slash collapse.
	pub verification_uri: String,
	pub created_at: DateTime<Utc>,
	pub expires_at: DateTime<Utc>,
	/// Minimum seconds between polls; always >= [`MIN_POLL_INTERVAL_SECS`].
	pub interval: u64,
}

impl DeviceCode {
	/// Build a new pending device code. `code_expiry` is floored at
	/// [`MIN_CODE_EXPIRY`] and `poll_interval_secs` at
	/// [`MIN_POLL_INTERVAL_SECS`].
	pub fn new(
		client_id: String,
		scope: String,
		verification_uri: String,
		code_expiry: ChronoDuration,
		poll_interval_secs: u64,
	) -> Result<Self, codec::GenerationError> {
		let now = Utc::now();
		let expiry = code_expiry.max(MIN_CODE_EXPIRY);

		Ok(Self {
			device_code: codec::generate_device_code(),
			user_code: codec::generate_user_code()?,
			client_id,
			scope,
			verification_uri,
			created_at: now,
			expires_at: now + expiry,
			interval: poll_interval_secs.max(MIN_POLL_INTERVAL_SECS),
		})
	}

	/// `true` once wall-clock time has passed [`Self::expires_at`].
	pub fn is_expired(&self) -> bool {
		Utc::now() > self.expires_at
	}

	/// Seconds remaining until expiry, floored at zero. Never negative.
	pub fn expires_in(&self) -> i64 {
		(self.expires_at - Utc::now()).num_seconds().max(0)
	}

	/// Display form of [`Self::user_code`] (with hyphen).
	pub fn display_user_code(&self) -> String {
		codec::format(&self.user_code)
	}

	/// `${verification_uri}?code=<display-form, percent-encoded>`, present
	/// only because the user code always validates once stored — kept as a
	/// method rather than a stored field so it can't drift from
	/// `verification_uri`.
	pub fn verification_uri_complete(&self) -> String {
		format!(
			"{}?code={}",
			self.verification_uri,
			percent_encode(&self.display_user_code())
		)
	}
}

/// Minimal percent-encoding sufficient for a user code (alphabet + hyphen);
/// avoids pulling in a full URL-encoding dependency for one call site.
fn percent_encode(s: &str) -> String {
	let mut out = String::with_capacity(s.len());
	for b in s.bytes() {
		match b {
			b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
				out.push(b as char)
			}
			_ => out.push_str(&format!("%{b:02X}")),
		}
	}
	out
}

/// The token handed back to the polling client once authorization completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResult {
	pub access_token: SecretString,
	/// Always `"Bearer"` on write; compared case-insensitively on read.
	pub token_type: String,
	pub expires_in: i64,
	pub refresh_token: Option<SecretString>,
	pub scope: String,
}

impl TokenResult {
	/// `true` if `token_type` is `Bearer` under a case-insensitive comparison.
	pub fn is_bearer(&self) -> bool {
		self.token_type.eq_ignore_ascii_case("bearer")
	}
}

/// Response body for `POST /device/code`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceCodeResponse {
	pub device_code: String,
	pub user_code: String,
	pub verification_uri: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub verification_uri_complete: Option<String>,
	pub expires_in: i64,
	pub interval: u64,
}

impl From<&DeviceCode> for DeviceCodeResponse {
	fn from(dc: &DeviceCode) -> Self {
		Self {
			device_code: dc.device_code.clone(),
			user_code: dc.display_user_code(),
			verification_uri: dc.verification_uri.clone(),
			verification_uri_complete: Some(dc.verification_uri_complete()),
			expires_in: dc.expires_in(),
			interval: dc.interval,
		}
	}
}
