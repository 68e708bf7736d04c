// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Mutex-guarded, single-process [`Store`] implementation backed by a
//! timer-driven pruner rather than per-key TTLs — suitable for tests and
//! single-replica deployments where a `devicecode-store-redis` is overkill.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use devicecode_core::domain::{DeviceCode, TokenResult};
use devicecode_core::store::{with_deadline, Store, StoreError};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, instrument};

/// How often the background pruner sweeps for expired records.
const PRUNE_INTERVAL: Duration = Duration::from_secs(30);

struct Record {
	dc: DeviceCode,
	token: Option<TokenResult>,
	denied: bool,
	last_poll: DateTime<Utc>,
	poll_events: Vec<DateTime<Utc>>,
}

struct Inner {
	by_device_code: RwLock<HashMap<String, Record>>,
	by_user_code: RwLock<HashMap<String, String>>,
	csrf_tokens: RwLock<HashMap<String, DateTime<Utc>>>,
}

/// An in-memory [`Store`]. Cheap to clone: internal state is `Arc`-shared,
/// and the background pruner is aborted when the last handle drops.
pub struct MemoryStore {
	inner: Arc<Inner>,
	pruner: JoinHandle<()>,
}

impl Drop for MemoryStore {
	fn drop(&mut self) {
		self.pruner.abort();
	}
}

impl MemoryStore {
	pub fn new() -> Self {
		let inner = Arc::new(Inner {
			by_device_code: RwLock::new(HashMap::new()),
			by_user_code: RwLock::new(HashMap::new()),
			csrf_tokens: RwLock::new(HashMap::new()),
		});

		let pruner_inner = inner.clone();
		let pruner = tokio::spawn(async move {
			let mut ticker = tokio::time::interval(PRUNE_INTERVAL);
			loop {
				ticker.tick().await;
				Self::prune(&pruner_inner).await;
			}
		});

		Self { inner, pruner }
	}

	async fn prune(inner: &Inner) {
		let now = Utc::now();
		let mut by_dc = inner.by_device_code.write().await;
		let expired: Vec<String> = by_dc
			.iter()
			.filter(|(_, r)| now > r.dc.expires_at)
			.map(|(k, _)| k.clone())
			.collect();

		if expired.is_empty() {
			return;
		}

		let mut by_uc = inner.by_user_code.write().await;
		for device_code in &expired {
			if let Some(r) = by_dc.remove(device_code) {
				by_uc.remove(&r.dc.user_code);
			}
		}
		debug!(count = expired.len(), "pruned expired device codes");

		let mut csrf = inner.csrf_tokens.write().await;
		csrf.retain(|_, expiry| *expiry > now);
	}
}

impl Default for MemoryStore {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl Store for MemoryStore {
	#[instrument(name = "memory_store.save_device_code", skip_all)]
	async fn save_device_code(&self, d: &DeviceCode, deadline: Duration) -> Result<(), StoreError> {
		with_deadline(deadline, async {
			if d.expires_in() <= 0 {
				return Err(StoreError::AlreadyExpired);
			}
			self.inner
				.by_user_code
				.write()
				.await
				.insert(d.user_code.clone(), d.device_code.clone());
			self.inner.by_device_code.write().await.insert(
				d.device_code.clone(),
				Record {
					dc: d.clone(),
					token: None,
					denied: false,
					last_poll: d.created_at,
					poll_events: Vec::new(),
				},
			);
			Ok(())
		})
		.await
	}

	#[instrument(name = "memory_store.get_device_code", skip_all)]
	async fn get_device_code(
		&self,
		device_code: &str,
		deadline: Duration,
	) -> Result<Option<DeviceCode>, StoreError> {
		with_deadline(deadline, async {
			Ok(self
				.inner
				.by_device_code
				.read()
				.await
				.get(device_code)
				.map(|r| r.dc.clone()))
		})
		.await
	}

	#[instrument(name = "memory_store.get_device_code_by_user_code", skip_all)]
	async fn get_device_code_by_user_code(
		&self,
		user_code: &str,
		deadline: Duration,
	) -> Result<Option<DeviceCode>, StoreError> {
		with_deadline(deadline, async {
			let Some(device_code) = self.inner.by_user_code.read().await.get(user_code).cloned()
			else {
				return Ok(None);
			};
			Ok(self
				.inner
				.by_device_code
				.read()
				.await
				.get(&device_code)
				.map(|r| r.dc.clone()))
		})
		.await
	}

	#[instrument(name = "memory_store.save_token_result", skip_all)]
	async fn save_token_result(
		&self,
		device_code: &str,
		t: &TokenResult,
		deadline: Duration,
	) -> Result<(), StoreError> {
		with_deadline(deadline, async {
			let mut by_dc = self.inner.by_device_code.write().await;
			let record = by_dc
				.get_mut(device_code)
				.ok_or(StoreError::NoSuchDeviceCode)?;
			if record.dc.is_expired() {
				return Err(StoreError::NoSuchDeviceCode);
			}
			record.token = Some(t.clone());
			Ok(())
		})
		.await
	}

	#[instrument(name = "memory_store.get_token_result", skip_all)]
	async fn get_token_result(
		&self,
		device_code: &str,
		deadline: Duration,
	) -> Result<Option<TokenResult>, StoreError> {
		with_deadline(deadline, async {
			Ok(self
				.inner
				.by_device_code
				.read()
				.await
				.get(device_code)
				.and_then(|r| r.token.clone()))
		})
		.await
	}

	#[instrument(name = "memory_store.delete_device_code", skip_all)]
	async fn delete_device_code(&self, device_code: &str, deadline: Duration) -> Result<(), StoreError> {
		with_deadline(deadline, async {
			if let Some(r) = self.inner.by_device_code.write().await.remove(device_code) {
				self.inner.by_user_code.write().await.remove(&r.dc.user_code);
			}
			Ok(())
		})
		.await
	}

	#[instrument(name = "memory_store.record_poll", skip_all)]
	async fn record_poll(
		&self,
		device_code: &str,
		window: Duration,
		deadline: Duration,
	) -> Result<(), StoreError> {
		with_deadline(deadline, async {
			let mut by_dc = self.inner.by_device_code.write().await;
			if let Some(record) = by_dc.get_mut(device_code) {
				let now = Utc::now();
				record.last_poll = now;
				record.poll_events.push(now);
				let cutoff = now - ChronoDuration::from_std(window).unwrap_or(ChronoDuration::zero());
				record.poll_events.retain(|t| *t >= cutoff);
			}
			Ok(())
		})
		.await
	}

	#[instrument(name = "memory_store.get_poll_count", skip_all)]
	async fn get_poll_count(
		&self,
		device_code: &str,
		window: Duration,
		deadline: Duration,
	) -> Result<u32, StoreError> {
		with_deadline(deadline, async {
			let by_dc = self.inner.by_device_code.read().await;
			let Some(record) = by_dc.get(device_code) else {
				return Ok(0);
			};
			let cutoff =
				Utc::now() - ChronoDuration::from_std(window).unwrap_or(ChronoDuration::zero());
			Ok(record.poll_events.iter().filter(|t| **t >= cutoff).count() as u32)
		})
		.await
	}

	#[instrument(name = "memory_store.get_last_poll", skip_all)]
	async fn get_last_poll(&self, device_code: &str, deadline: Duration) -> Result<DateTime<Utc>, StoreError> {
		with_deadline(deadline, async {
			Ok(self
				.inner
				.by_device_code
				.read()
				.await
				.get(device_code)
				.map(|r| r.last_poll)
				.unwrap_or_else(Utc::now))
		})
		.await
	}

	#[instrument(name = "memory_store.check_health", skip_all)]
	async fn check_health(&self, _deadline: Duration) -> Result<(), StoreError> {
		Ok(())
	}

	#[instrument(name = "memory_store.deny_authorization", skip_all)]
	async fn deny_authorization(&self, device_code: &str, deadline: Duration) -> Result<(), StoreError> {
		with_deadline(deadline, async {
			if let Some(record) = self.inner.by_device_code.write().await.get_mut(device_code) {
				record.denied = true;
			}
			Ok(())
		})
		.await
	}

	#[instrument(name = "memory_store.is_denied", skip_all)]
	async fn is_denied(&self, device_code: &str, deadline: Duration) -> Result<bool, StoreError> {
		with_deadline(deadline, async {
			Ok(self
				.inner
				.by_device_code
				.read()
				.await
				.get(device_code)
				.map(|r| r.denied)
				.unwrap_or(false))
		})
		.await
	}

	#[instrument(name = "memory_store.save_csrf_token", skip_all)]
	async fn save_csrf_token(&self, token: &str, ttl: Duration, deadline: Duration) -> Result<(), StoreError> {
		with_deadline(deadline, async {
			let expiry = Utc::now() + ChronoDuration::from_std(ttl).unwrap_or(ChronoDuration::zero());
			self.inner
				.csrf_tokens
				.write()
				.await
				.insert(token.to_string(), expiry);
			Ok(())
		})
		.await
	}

	#[instrument(name = "memory_store.csrf_token_exists", skip_all)]
	async fn csrf_token_exists(&self, token: &str, deadline: Duration) -> Result<bool, StoreError> {
		with_deadline(deadline, async {
			Ok(self
				.inner
				.csrf_tokens
				.read()
				.await
				.get(token)
				.is_some_and(|expiry| *expiry > Utc::now()))
		})
		.await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use devicecode_secret::SecretString;

	fn sample_dc() -> DeviceCode {
		DeviceCode::new(
			"client".into(),
			"read".into(),
			"https://proxy.example/device".into(),
			ChronoDuration::minutes(15),
			5,
		)
		.unwrap()
	}

	#[tokio::test]
	async fn save_and_get_device_code_round_trips() {
		let store = MemoryStore::new();
		let dc = sample_dc();
		store
			.save_device_code(&dc, Duration::from_secs(1))
			.await
			.unwrap();

		let fetched = store
			.get_device_code(&dc.device_code, Duration::from_secs(1))
			.await
			.unwrap()
			.unwrap();
		assert_eq!(fetched.device_code, dc.device_code);

		let by_user = store
			.get_device_code_by_user_code(&dc.user_code, Duration::from_secs(1))
			.await
			.unwrap()
			.unwrap();
		assert_eq!(by_user.device_code, dc.device_code);
	}

	#[tokio::test]
	async fn save_device_code_rejects_already_expired() {
		let store = MemoryStore::new();
		let mut dc = sample_dc();
		dc.expires_at = Utc::now() - ChronoDuration::seconds(1);

		let err = store
			.save_device_code(&dc, Duration::from_secs(1))
			.await
			.unwrap_err();
		assert!(matches!(err, StoreError::AlreadyExpired));
	}

	#[tokio::test]
	async fn save_token_result_fails_for_unknown_device_code() {
		let store = MemoryStore::new();
		let token = TokenResult {
			access_token: SecretString::new("x"),
			token_type: "Bearer".into(),
			expires_in: 3600,
			refresh_token: None,
			scope: String::new(),
		};
		let err = store
			.save_token_result("does-not-exist", &token, Duration::from_secs(1))
			.await
			.unwrap_err();
		assert!(matches!(err, StoreError::NoSuchDeviceCode));
	}

	#[tokio::test]
	async fn delete_device_code_removes_user_code_index() {
		let store = MemoryStore::new();
		let dc = sample_dc();
		store
			.save_device_code(&dc, Duration::from_secs(1))
			.await
			.unwrap();
		store
			.delete_device_code(&dc.device_code, Duration::from_secs(1))
			.await
			.unwrap();

		assert!(store
			.get_device_code(&dc.device_code, Duration::from_secs(1))
			.await
			.unwrap()
			.is_none());
		assert!(store
			.get_device_code_by_user_code(&dc.user_code, Duration::from_secs(1))
			.await
			.unwrap()
			.is_none());
	}

	#[tokio::test]
	async fn record_poll_prunes_events_outside_window() {
		let store = MemoryStore::new();
		let dc = sample_dc();
		store
			.save_device_code(&dc, Duration::from_secs(1))
			.await
			.unwrap();

		store
			.record_poll(&dc.device_code, Duration::from_secs(60), Duration::from_secs(1))
			.await
			.unwrap();
		let count = store
			.get_poll_count(&dc.device_code, Duration::from_secs(60), Duration::from_secs(1))
			.await
			.unwrap();
		assert_eq!(count, 1);

		let count_tiny_window = store
			.get_poll_count(&dc.device_code, Duration::from_millis(0), Duration::from_secs(1))
			.await
			.unwrap();
		assert_eq!(count_tiny_window, 0);
	}

	#[tokio::test]
	async fn csrf_token_exists_respects_ttl() {
		let store = MemoryStore::new();
		store
			.save_csrf_token("tok.sig", Duration::from_secs(60), Duration::from_secs(1))
			.await
			.unwrap();
		assert!(store
			.csrf_token_exists("tok.sig", Duration::from_secs(1))
			.await
			.unwrap());

		store
			.save_csrf_token("expired.sig", Duration::from_nanos(1), Duration::from_secs(1))
			.await
			.unwrap();
		tokio::time::sleep(Duration::from_millis(5)).await;
		assert!(!store
			.csrf_token_exists("expired.sig", Duration::from_secs(1))
			.await
			.unwrap());
	}

	#[tokio::test]
	async fn deny_authorization_is_reflected_by_is_denied() {
		let store = MemoryStore::new();
		let dc = sample_dc();
		store
			.save_device_code(&dc, Duration::from_secs(1))
			.await
			.unwrap();

		assert!(!store.is_denied(&dc.device_code, Duration::from_secs(1)).await.unwrap());

		store
			.deny_authorization(&dc.device_code, Duration::from_secs(1))
			.await
			.unwrap();

		assert!(store.is_denied(&dc.device_code, Duration::from_secs(1)).await.unwrap());
	}

	#[tokio::test]
	async fn check_health_always_ok() {
		let store = MemoryStore::new();
		assert!(store.check_health(Duration::from_secs(1)).await.is_ok());
	}
}
