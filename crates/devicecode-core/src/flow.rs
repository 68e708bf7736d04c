// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! [`FlowEngine`]: the RFC 8628 state machine. Composes [`crate::codec`] and
//! [`crate::store::Store`]; the rate limiter lives inline since it is pure
//! policy over Store primitives rather than a thing with its own state.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use tracing::{info, instrument, warn};

use crate::codec;
use crate::domain::{DeviceCode, TokenResult};
use crate::store::{Store, StoreError};

/// Errors surfaced by [`FlowEngine`], named to map 1:1 onto the RFC 6749
/// §5.2 / RFC 8628 error codes callers must emit.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
	/// Malformed input: empty `client_id`, bad user-code format, etc.
	#[error("{0}")]
	InvalidRequest(String),
	/// Unknown device code or user code.
	#[error("device code not recognized")]
	InvalidGrant,
	/// Past `expires_at`.
	#[error("device code has expired")]
	ExpiredToken,
	/// Valid, unexpired, not yet authorized.
	#[error("authorization pending")]
	AuthorizationPending,
	/// Polled too fast or too often.
	#[error("slow down")]
	SlowDown,
	/// The resource owner denied the authorization request upstream.
	#[error("access denied")]
	AccessDenied,
	/// Code generation exhausted its retry budget.
	#[error("code generation failed: {0}")]
	Generation(#[from] codec::GenerationError),
	/// Store or other dependency failure.
	#[error("server error: {0}")]
	ServerError(String),
}

impl From<StoreError> for FlowError {
	fn from(e: StoreError) -> Self {
		FlowError::ServerError(e.to_string())
	}
}

/// Outcome of `CheckDeviceCode`, distinguishing "pending" from "here is the
/// token" without overloading [`FlowError`] for a non-error result.
#[derive(Debug, Clone)]
pub enum PollOutcome {
	AuthorizationPending,
	Token(TokenResult),
}

/// Tunables governing code lifetime and the polling rate limiter. All
/// fields are already-validated (see `devicecode-config`); [`FlowEngine`]
/// applies the §4.4/§4.5 floors defensively regardless.
#[derive(Debug, Clone)]
pub struct FlowConfig {
	pub verification_uri: String,
	pub code_expiry: ChronoDuration,
	pub poll_interval_secs: u64,
	pub max_polls_per_window: u32,
	pub poll_window: Duration,
	/// Cap on `VerifyUserCode` attempts per device code within
	/// `poll_window`, mitigating brute-force user-code scanning (§4.5).
	pub max_verify_attempts_per_window: u32,
	pub store_deadline: Duration,
}

pub struct FlowEngine {
	store: Arc<dyn Store>,
	config: FlowConfig,
}

impl FlowEngine {
	pub fn new(store: Arc<dyn Store>, config: FlowConfig) -> Self {
		Self { store, config }
	}

	#[instrument(name = "flow.request_device_code", skip(self))]
	pub async fn request_device_code(
		&self,
		client_id: String,
		scope: String,
	) -> Result<DeviceCode, FlowError> {
		if client_id.trim().is_empty() {
			return Err(FlowError::InvalidRequest("client_id must not be empty".into()));
		}

		let dc = DeviceCode::new(
			client_id,
			scope,
			self.config.verification_uri.clone(),
			self.config.code_expiry,
			self.config.poll_interval_secs,
		)?;

		self.store
			.save_device_code(&dc, self.config.store_deadline)
			.await
			.map_err(|e| match e {
				StoreError::AlreadyExpired => {
					FlowError::InvalidRequest("computed expiry is non-positive".into())
				}
				other => FlowError::ServerError(other.to_string()),
			})?;

		info!(device_code = %dc.device_code, "issued device code");
		Ok(dc)
	}

	#[instrument(name = "flow.get_device_code", skip(self))]
	pub async fn get_device_code(&self, device_code: &str) -> Result<DeviceCode, FlowError> {
		let dc = self
			.store
			.get_device_code(device_code, self.config.store_deadline)
			.await?
			.ok_or(FlowError::InvalidGrant)?;

		if dc.is_expired() {
			return Err(FlowError::ExpiredToken);
		}

		Ok(dc)
	}

	/// Resolves a user-entered code, validating format, normalizing, and
	/// enforcing the brute-force attempt cap before returning the bound
	/// DeviceCode.
	#[instrument(name = "flow.verify_user_code", skip(self))]
	pub async fn verify_user_code(&self, input: &str) -> Result<DeviceCode, FlowError> {
		let normalized = codec::normalize(input);
		codec::validate(&normalized)
			.map_err(|e| FlowError::InvalidRequest(e.to_string()))?;

		let dc = self
			.store
			.get_device_code_by_user_code(&normalized, self.config.store_deadline)
			.await?
			.ok_or(FlowError::InvalidGrant)?;

		if dc.is_expired() {
			return Err(FlowError::ExpiredToken);
		}

		let attempts = self
			.store
			.get_poll_count(
				&dc.device_code,
				self.config.poll_window,
				self.config.store_deadline,
			)
			.await?;
		if attempts >= self.config.max_verify_attempts_per_window {
			warn!(device_code = %dc.device_code, "verification attempt cap exceeded");
			return Err(FlowError::SlowDown);
		}

		self.store
			.record_poll(
				&dc.device_code,
				self.config.poll_window,
				self.config.store_deadline,
			)
			.await?;

		Ok(dc)
	}

	/// Implements the §4.5 polling outcome table, in the order specified.
	#[instrument(name = "flow.check_device_code", skip(self))]
	pub async fn check_device_code(&self, device_code: &str) -> Result<PollOutcome, FlowError> {
		let dc = self
			.store
			.get_device_code(device_code, self.config.store_deadline)
			.await?
			.ok_or(FlowError::InvalidGrant)?;

		if Utc::now() > dc.expires_at {
			return Err(FlowError::ExpiredToken);
		}

		if let Some(token) = self
			.store
			.get_token_result(device_code, self.config.store_deadline)
			.await?
		{
			return Ok(PollOutcome::Token(token));
		}

		if self
			.store
			.is_denied(device_code, self.config.store_deadline)
			.await?
		{
			return Err(FlowError::AccessDenied);
		}

		let count = self
			.store
			.get_poll_count(device_code, self.config.poll_window, self.config.store_deadline)
			.await?;

		// The interval gate compares a pair of polls; with no prior poll
		// recorded there is nothing to be too fast relative to.
		if count > 0 {
			let last_poll = self
				.store
				.get_last_poll(device_code, self.config.store_deadline)
				.await?;
			if (Utc::now() - last_poll).num_seconds() < dc.interval as i64 {
				self.record_poll_best_effort(device_code).await;
				return Err(FlowError::SlowDown);
			}
		}

		if count >= self.config.max_polls_per_window {
			self.record_poll_best_effort(device_code).await;
			return Err(FlowError::SlowDown);
		}

		self.store
			.record_poll(device_code, self.config.poll_window, self.config.store_deadline)
			.await?;
		Ok(PollOutcome::AuthorizationPending)
	}

	/// Per §4.4, every poll records regardless of outcome so the sliding
	/// window reflects actual traffic; errors here are logged, not
	/// propagated, since the `slow_down` verdict is already decided.
	async fn record_poll_best_effort(&self, device_code: &str) {
		if let Err(e) = self
			.store
			.record_poll(device_code, self.config.poll_window, self.config.store_deadline)
			.await
		{
			warn!(error = %e, "failed to record poll during slow_down");
		}
	}

	#[instrument(name = "flow.complete_authorization", skip_all)]
	pub async fn complete_authorization(
		&self,
		device_code: &str,
		token: TokenResult,
	) -> Result<(), FlowError> {
		self.store
			.save_token_result(device_code, &token, self.config.store_deadline)
			.await
			.map_err(|e| match e {
				StoreError::NoSuchDeviceCode => FlowError::InvalidGrant,
				other => FlowError::ServerError(other.to_string()),
			})?;

		info!(device_code = %device_code, "authorization completed");
		Ok(())
	}

	/// Records that the resource owner denied authorization for
	/// `device_code`, so the polling client's next `check_device_code`
	/// resolves to [`FlowError::AccessDenied`] instead of waiting out the
	/// full expiry.
	#[instrument(name = "flow.deny_authorization", skip(self))]
	pub async fn deny_authorization(&self, device_code: &str) -> Result<(), FlowError> {
		self.store
			.deny_authorization(device_code, self.config.store_deadline)
			.await?;
		info!(device_code = %device_code, "authorization denied by resource owner");
		Ok(())
	}

	#[instrument(name = "flow.check_health", skip(self))]
	pub async fn check_health(&self) -> Result<(), FlowError> {
		self.store
			.check_health(self.config.store_deadline)
			.await
			.map_err(|e| FlowError::ServerError(e.to_string()))
	}
}
