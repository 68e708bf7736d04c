// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Issuance and constant-time validation of the verification form's
//! anti-forgery token.

use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use devicecode_secret::SecretString;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::{instrument, warn};

use crate::store::{Store, StoreError};

type HmacSha256 = Hmac<Sha256>;

/// Default lifetime of an issued CSRF token.
pub const DEFAULT_CSRF_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, thiserror::Error)]
pub enum CsrfError {
	#[error("csrf token is malformed or does not verify")]
	InvalidToken,
	#[error("csrf token has expired")]
	TokenExpired,
	#[error("store error: {0}")]
	Store(#[from] StoreError),
}

/// Issues and validates CSRF tokens of the form `b64(rand32).b64(hmac)`,
/// anchored by a server-side existence record in [`Store`].
pub struct CsrfIssuer {
	secret: SecretString,
	ttl: Duration,
}

impl CsrfIssuer {
	pub fn new(secret: SecretString, ttl: Duration) -> Self {
		Self { secret, ttl }
	}

	fn sign(&self, payload: &str) -> String {
		let mut mac = HmacSha256::new_from_slice(self.secret.expose().as_bytes())
			.expect("HMAC accepts a key of any length");
		mac.update(payload.as_bytes());
		URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
	}

	/// Generates a fresh token, records it in `store` with `self.ttl`
	/// expiry, and returns the `t.sig` string to embed in the form.
	#[instrument(name = "csrf.generate", skip_all)]
	pub async fn generate(
		&self,
		store: &dyn Store,
		deadline: Duration,
	) -> Result<String, CsrfError> {
		let mut raw = [0u8; 32];
		rand::thread_rng().fill_bytes(&mut raw);
		let payload = URL_SAFE_NO_PAD.encode(raw);
		let sig = self.sign(&payload);
		let token = format!("{payload}.{sig}");

		store
			.save_csrf_token(&token, self.ttl, deadline)
			.await?;

		Ok(token)
	}

	/// Parses `x` as `<payload>.<sig>`, recomputes the HMAC with a
	/// constant-time comparison, and confirms a live store record exists.
	#[instrument(name = "csrf.validate", skip_all)]
	pub async fn validate(
		&self,
		x: &str,
		store: &dyn Store,
		deadline: Duration,
	) -> Result<(), CsrfError> {
		let (payload, sig) = x.split_once('.').ok_or(CsrfError::InvalidToken)?;
		let expected_sig = self.sign(payload);

		if expected_sig.as_bytes().ct_eq(sig.as_bytes()).unwrap_u8() != 1 {
			warn!("csrf validation failed: signature mismatch");
			return Err(CsrfError::InvalidToken);
		}

		match store.csrf_token_exists(x, deadline).await? {
			true => Ok(()),
			false => {
				warn!("csrf validation failed: no live store record");
				Err(CsrfError::TokenExpired)
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::domain::{DeviceCode, TokenResult};
	use async_trait::async_trait;
	use chrono::{DateTime, Utc};
	use std::sync::Mutex;

	/// Minimal in-process Store fake: only CSRF operations are exercised
	/// by these tests.
	struct FakeStore {
		tokens: Mutex<std::collections::HashSet<String>>,
	}

	impl FakeStore {
		fn new() -> Self {
			Self {
				tokens: Mutex::new(std::collections::HashSet::new()),
			}
		}
	}

	#[async_trait]
	impl Store for FakeStore {
		async fn save_device_code(&self, _: &DeviceCode, _: Duration) -> Result<(), StoreError> {
			unimplemented!()
		}
		async fn get_device_code(
			&self,
			_: &str,
			_: Duration,
		) -> Result<Option<DeviceCode>, StoreError> {
			unimplemented!()
		}
		async fn get_device_code_by_user_code(
			&self,
			_: &str,
			_: Duration,
		) -> Result<Option<DeviceCode>, StoreError> {
			unimplemented!()
		}
		async fn save_token_result(
			&self,
			_: &str,
			_: &TokenResult,
			_: Duration,
		) -> Result<(), StoreError> {
			unimplemented!()
		}
		async fn get_token_result(
			&self,
			_: &str,
			_: Duration,
		) -> Result<Option<TokenResult>, StoreError> {
			unimplemented!()
		}
		async fn delete_device_code(&self, _: &str, _: Duration) -> Result<(), StoreError> {
			unimplemented!()
		}
		async fn record_poll(&self, _: &str, _: Duration, _: Duration) -> Result<(), StoreError> {
			unimplemented!()
		}
		async fn get_poll_count(&self, _: &str, _: Duration, _: Duration) -> Result<u32, StoreError> {
			unimplemented!()
		}
		async fn get_last_poll(&self, _: &str, _: Duration) -> Result<DateTime<Utc>, StoreError> {
			unimplemented!()
		}
		async fn check_health(&self, _: Duration) -> Result<(), StoreError> {
			unimplemented!()
		}
		async fn deny_authorization(&self, _: &str, _: Duration) -> Result<(), StoreError> {
			unimplemented!()
		}
		async fn is_denied(&self, _: &str, _: Duration) -> Result<bool, StoreError> {
			unimplemented!()
		}
		async fn save_csrf_token(
			&self,
			token: &str,
			_ttl: Duration,
			_deadline: Duration,
		) -> Result<(), StoreError> {
			self.tokens.lock().unwrap().insert(token.to_string());
			Ok(())
		}
		async fn csrf_token_exists(&self, token: &str, _deadline: Duration) -> Result<bool, StoreError> {
			Ok(self.tokens.lock().unwrap().contains(token))
		}
	}

	fn issuer() -> CsrfIssuer {
		CsrfIssuer::new(SecretString::new("a-sufficiently-long-csrf-secret"), Duration::from_secs(60))
	}

	#[tokio::test]
	async fn generated_token_validates() {
		let store = FakeStore::new();
		let issuer = issuer();
		let token = issuer.generate(&store, Duration::from_secs(1)).await.unwrap();
		assert!(issuer
			.validate(&token, &store, Duration::from_secs(1))
			.await
			.is_ok());
	}

	#[tokio::test]
	async fn tampered_signature_is_rejected() {
		let store = FakeStore::new();
		let issuer = issuer();
		let token = issuer.generate(&store, Duration::from_secs(1)).await.unwrap();
		let mut bytes = token.into_bytes();
		let last = bytes.len() - 1;
		bytes[last] ^= 0x01;
		let tampered = String::from_utf8(bytes).unwrap();

		let err = issuer
			.validate(&tampered, &store, Duration::from_secs(1))
			.await
			.unwrap_err();
		assert!(matches!(err, CsrfError::InvalidToken));
	}

	#[tokio::test]
	async fn unknown_token_is_rejected() {
		let store = FakeStore::new();
		let issuer = issuer();
		let err = issuer
			.validate("bm90YXJlYWx0b2tlbg.c2lnbmF0dXJl", &store, Duration::from_secs(1))
			.await
			.unwrap_err();
		assert!(matches!(err, CsrfError::InvalidToken | CsrfError::TokenExpired));
	}

	#[tokio::test]
	async fn malformed_token_is_rejected() {
		let store = FakeStore::new();
		let issuer = issuer();
		let err = issuer
			.validate("no-dot-in-here", &store, Duration::from_secs(1))
			.await
			.unwrap_err();
		assert!(matches!(err, CsrfError::InvalidToken));
	}
}
