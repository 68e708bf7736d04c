// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The [`Store`] trait: the single abstraction through which all mutable
//! state flows. Two implementations exist outside this crate —
//! `devicecode-store-memory` for tests and single-process deployments, and
//! `devicecode-store-redis` for production — and neither type leaks here.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::{DeviceCode, TokenResult};

/// Every [`Store`] call is bounded by a deadline; implementations must
/// abort the underlying I/O (not merely stop awaiting it) once exceeded so
/// that cancelled work never partially lands.
pub const DEFAULT_STORE_DEADLINE: Duration = Duration::from_secs(5);

/// Errors a [`Store`] implementation may return. Not-found is modeled as
/// `Ok(None)`, never an error — only the operation-failed cases live here.
#[derive(Debug, Error)]
pub enum StoreError {
	/// The deadline passed to the call elapsed before completion.
	#[error("store operation exceeded its deadline")]
	DeadlineExceeded,
	/// `SaveDeviceCode` was called with a TTL that had already elapsed.
	#[error("device code is already expired")]
	AlreadyExpired,
	/// `SaveTokenResult` was called for a device code that does not exist
	/// or has expired.
	#[error("no live device code to attach a token result to")]
	NoSuchDeviceCode,
	/// The backend itself is unreachable or returned a protocol error.
	#[error("backend unavailable: {0}")]
	Backend(String),
}

/// The abstract persistence surface the core consumes. Every method takes
/// a `deadline` duration; implementations are expected to race their I/O
/// against it and return [`StoreError::DeadlineExceeded`] on timeout rather
/// than letting the caller's task hang.
#[async_trait]
pub trait Store: Send + Sync {
	/// Writes `d` under both its `device_code` and normalized `user_code`
	/// keys with TTL = `expires_at - now`. Atomic across both keys.
	async fn save_device_code(
		&self,
		d: &DeviceCode,
		deadline: Duration,
	) -> Result<(), StoreError>;

	/// Looks up by `device_code`. `Ok(None)` means not found, not an error.
	async fn get_device_code(
		&self,
		device_code: &str,
		deadline: Duration,
	) -> Result<Option<DeviceCode>, StoreError>;

	/// Looks up by normalized `user_code`.
	async fn get_device_code_by_user_code(
		&self,
		user_code: &str,
		deadline: Duration,
	) -> Result<Option<DeviceCode>, StoreError>;

	/// Writes `t` under `device_code`. Fails with
	/// [`StoreError::NoSuchDeviceCode`] if no live DeviceCode exists.
	/// TTL matches the DeviceCode's remaining lifetime. Repeated writes are
	/// allowed; the last one wins.
	async fn save_token_result(
		&self,
		device_code: &str,
		t: &TokenResult,
		deadline: Duration,
	) -> Result<(), StoreError>;

	/// Looks up the TokenResult bound to `device_code`, if any.
	async fn get_token_result(
		&self,
		device_code: &str,
		deadline: Duration,
	) -> Result<Option<TokenResult>, StoreError>;

	/// Atomically removes the device code, its user-code index, its token
	/// result, and its polling state. Idempotent.
	async fn delete_device_code(
		&self,
		device_code: &str,
		deadline: Duration,
	) -> Result<(), StoreError>;

	/// Records a poll: sets `last_poll_at = now`, appends `now` to the
	/// sliding window, and prunes entries older than `window`.
	async fn record_poll(
		&self,
		device_code: &str,
		window: Duration,
		deadline: Duration,
	) -> Result<(), StoreError>;

	/// Counts poll events within the last `window`.
	async fn get_poll_count(
		&self,
		device_code: &str,
		window: Duration,
		deadline: Duration,
	) -> Result<u32, StoreError>;

	/// Returns the last poll timestamp, or the DeviceCode's creation time
	/// if it has never been polled.
	async fn get_last_poll(
		&self,
		device_code: &str,
		deadline: Duration,
	) -> Result<DateTime<Utc>, StoreError>;

	/// Liveness probe used by `/health` and the startup boot check.
	async fn check_health(&self, deadline: Duration) -> Result<(), StoreError>;

	/// Marks `device_code` as denied by the resource owner at the upstream
	/// authorization server. Mutually exclusive with `save_token_result` in
	/// practice, but callers don't need to check first; the last write wins.
	async fn deny_authorization(
		&self,
		device_code: &str,
		deadline: Duration,
	) -> Result<(), StoreError>;

	/// `true` iff `deny_authorization` was previously recorded for
	/// `device_code`.
	async fn is_denied(&self, device_code: &str, deadline: Duration) -> Result<bool, StoreError>;

	/// Records `token` under the `csrf:` prefix with `ttl`.
	async fn save_csrf_token(
		&self,
		token: &str,
		ttl: Duration,
		deadline: Duration,
	) -> Result<(), StoreError>;

	/// Returns `true` iff a non-expired record for `token` exists. Does not
	/// consume it — the form flow only ever validates a token once in
	/// practice, but nothing in the spec requires single-use enforcement.
	async fn csrf_token_exists(&self, token: &str, deadline: Duration) -> Result<bool, StoreError>;
}

/// Race a future against `deadline`, mapping a timeout to
/// [`StoreError::DeadlineExceeded`]. Store implementations use this at
/// every I/O boundary so cancellation is uniform across backends.
pub async fn with_deadline<F, T>(deadline: Duration, fut: F) -> Result<T, StoreError>
where
	F: std::future::Future<Output = Result<T, StoreError>>,
{
	tokio::time::timeout(deadline, fut)
		.await
		.unwrap_or(Err(StoreError::DeadlineExceeded))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn with_deadline_passes_through_inner_result() {
		let result: Result<u32, StoreError> =
			with_deadline(Duration::from_secs(1), async { Ok(42) }).await;
		assert!(matches!(result, Ok(42)));
	}

	#[tokio::test]
	async fn with_deadline_times_out() {
		let result: Result<u32, StoreError> = with_deadline(Duration::from_millis(10), async {
			tokio::time::sleep(Duration::from_secs(10)).await;
			Ok(1)
		})
		.await;
		assert!(matches!(result, Err(StoreError::DeadlineExceeded)));
	}
}
