// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Durable [`Store`] implementation over Redis, matching the key layout
//! from `SPEC_FULL.md` §6: `device:<dc>`, `user:<uc>`, `token:<dc>`,
//! `denied:<dc>`, `rate:<dc>:time` (a sorted set of poll timestamps),
//! `rate:<dc>:backoff`, and `csrf:<token>`. Every entity's TTL is set to
//! its governing DeviceCode's remaining lifetime so expiry needs no
//! separate sweep.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use devicecode_core::domain::{DeviceCode, TokenResult};
use devicecode_core::store::{with_deadline, Store, StoreError};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::instrument;

fn device_key(dc: &str) -> String {
	format!("device:{dc}")
}
fn user_key(uc: &str) -> String {
	format!("user:{uc}")
}
fn token_key(dc: &str) -> String {
	format!("token:{dc}")
}
fn rate_time_key(dc: &str) -> String {
	format!("rate:{dc}:time")
}
fn rate_backoff_key(dc: &str) -> String {
	format!("rate:{dc}:backoff")
}
fn csrf_key(token: &str) -> String {
	format!("csrf:{token}")
}
fn denied_key(dc: &str) -> String {
	format!("denied:{dc}")
}

fn redis_err(e: redis::RedisError) -> StoreError {
	StoreError::Backend(e.to_string())
}
fn json_err(e: serde_json::Error) -> StoreError {
	StoreError::Backend(format!("serialization: {e}"))
}

/// A [`Store`] backed by a Redis `ConnectionManager`, which transparently
/// reconnects on connection loss.
pub struct RedisStore {
	conn: ConnectionManager,
}

impl RedisStore {
	pub async fn connect(url: &str) -> Result<Self, StoreError> {
		let client = redis::Client::open(url).map_err(redis_err)?;
		let conn = client
			.get_connection_manager()
			.await
			.map_err(redis_err)?;
		Ok(Self { conn })
	}
}

#[async_trait]
impl Store for RedisStore {
	#[instrument(name = "redis_store.save_device_code", skip_all)]
	async fn save_device_code(&self, d: &DeviceCode, deadline: Duration) -> Result<(), StoreError> {
		with_deadline(deadline, async {
			let ttl = d.expires_in();
			if ttl <= 0 {
				return Err(StoreError::AlreadyExpired);
			}
			let payload = serde_json::to_string(d).map_err(json_err)?;
			let mut conn = self.conn.clone();
			redis::pipe()
				.atomic()
				.set_ex(device_key(&d.device_code), &payload, ttl as u64)
				.set_ex(user_key(&d.user_code), &d.device_code, ttl as u64)
				.query_async::<()>(&mut conn)
				.await
				.map_err(redis_err)?;
			Ok(())
		})
		.await
	}

	#[instrument(name = "redis_store.get_device_code", skip_all)]
	async fn get_device_code(
		&self,
		device_code: &str,
		deadline: Duration,
	) -> Result<Option<DeviceCode>, StoreError> {
		with_deadline(deadline, async {
			let mut conn = self.conn.clone();
			let raw: Option<String> = conn.get(device_key(device_code)).await.map_err(redis_err)?;
			raw.map(|s| serde_json::from_str(&s).map_err(json_err))
				.transpose()
		})
		.await
	}

	#[instrument(name = "redis_store.get_device_code_by_user_code", skip_all)]
	async fn get_device_code_by_user_code(
		&self,
		user_code: &str,
		deadline: Duration,
	) -> Result<Option<DeviceCode>, StoreError> {
		with_deadline(deadline, async {
			let mut conn = self.conn.clone();
			let device_code: Option<String> = conn.get(user_key(user_code)).await.map_err(redis_err)?;
			match device_code {
				Some(dc) => {
					let raw: Option<String> = conn.get(device_key(&dc)).await.map_err(redis_err)?;
					raw.map(|s| serde_json::from_str(&s).map_err(json_err))
						.transpose()
				}
				None => Ok(None),
			}
		})
		.await
	}

	#[instrument(name = "redis_store.save_token_result", skip_all)]
	async fn save_token_result(
		&self,
		device_code: &str,
		t: &TokenResult,
		deadline: Duration,
	) -> Result<(), StoreError> {
		with_deadline(deadline, async {
			let mut conn = self.conn.clone();
			let remaining: i64 = conn.ttl(device_key(device_code)).await.map_err(redis_err)?;
			if remaining <= 0 {
				return Err(StoreError::NoSuchDeviceCode);
			}
			let payload = serde_json::to_string(t).map_err(json_err)?;
			conn.set_ex::<_, _, ()>(token_key(device_code), payload, remaining as u64)
				.await
				.map_err(redis_err)?;
			Ok(())
		})
		.await
	}

	#[instrument(name = "redis_store.get_token_result", skip_all)]
	async fn get_token_result(
		&self,
		device_code: &str,
		deadline: Duration,
	) -> Result<Option<TokenResult>, StoreError> {
		with_deadline(deadline, async {
			let mut conn = self.conn.clone();
			let raw: Option<String> = conn.get(token_key(device_code)).await.map_err(redis_err)?;
			raw.map(|s| serde_json::from_str(&s).map_err(json_err))
				.transpose()
		})
		.await
	}

	#[instrument(name = "redis_store.delete_device_code", skip_all)]
	async fn delete_device_code(&self, device_code: &str, deadline: Duration) -> Result<(), StoreError> {
		with_deadline(deadline, async {
			let mut conn = self.conn.clone();
			let raw: Option<String> = conn.get(device_key(device_code)).await.map_err(redis_err)?;
			let mut pipe = redis::pipe();
			pipe.atomic()
				.del(device_key(device_code))
				.del(token_key(device_code))
				.del(denied_key(device_code))
				.del(rate_time_key(device_code))
				.del(rate_backoff_key(device_code));
			if let Some(raw) = raw {
				if let Ok(dc) = serde_json::from_str::<DeviceCode>(&raw) {
					pipe.del(user_key(&dc.user_code));
				}
			}
			pipe.query_async::<()>(&mut conn).await.map_err(redis_err)?;
			Ok(())
		})
		.await
	}

	#[instrument(name = "redis_store.record_poll", skip_all)]
	async fn record_poll(
		&self,
		device_code: &str,
		window: Duration,
		deadline: Duration,
	) -> Result<(), StoreError> {
		with_deadline(deadline, async {
			let mut conn = self.conn.clone();
			let now = Utc::now();
			let now_millis = now.timestamp_millis();
			let cutoff_secs = (now - ChronoDuration::from_std(window).unwrap_or_default())
				.timestamp_millis();

			let key = rate_time_key(device_code);
			redis::pipe()
				.atomic()
				.zadd(&key, now_millis, now_millis)
				.zrembyscore(&key, 0, cutoff_secs)
				.query_async::<()>(&mut conn)
				.await
				.map_err(redis_err)?;

			// Keep the rate key's TTL aligned with the device code's so it
			// never outlives (or pointlessly precedes) its owner.
			let device_ttl: i64 = conn.ttl(device_key(device_code)).await.map_err(redis_err)?;
			if device_ttl > 0 {
				conn.expire::<_, ()>(&key, device_ttl).await.map_err(redis_err)?;
			}
			Ok(())
		})
		.await
	}

	#[instrument(name = "redis_store.get_poll_count", skip_all)]
	async fn get_poll_count(
		&self,
		device_code: &str,
		window: Duration,
		deadline: Duration,
	) -> Result<u32, StoreError> {
		with_deadline(deadline, async {
			let mut conn = self.conn.clone();
			let cutoff = (Utc::now() - ChronoDuration::from_std(window).unwrap_or_default())
				.timestamp_millis();
			let count: u32 = conn
				.zcount(rate_time_key(device_code), cutoff, "+inf")
				.await
				.map_err(redis_err)?;
			Ok(count)
		})
		.await
	}

	#[instrument(name = "redis_store.get_last_poll", skip_all)]
	async fn get_last_poll(&self, device_code: &str, deadline: Duration) -> Result<DateTime<Utc>, StoreError> {
		with_deadline(deadline, async {
			let mut conn = self.conn.clone();
			let latest: Vec<i64> = conn
				.zrevrange_withscores(rate_time_key(device_code), 0, 0)
				.await
				.map(|pairs: Vec<(i64, i64)>| pairs.into_iter().map(|(_, score)| score).collect())
				.map_err(redis_err)?;

			if let Some(millis) = latest.first() {
				return Ok(DateTime::from_timestamp_millis(*millis).unwrap_or_else(Utc::now));
			}

			let dc = self.get_device_code(device_code, deadline).await?;
			Ok(dc.map(|d| d.created_at).unwrap_or_else(Utc::now))
		})
		.await
	}

	#[instrument(name = "redis_store.check_health", skip_all)]
	async fn check_health(&self, deadline: Duration) -> Result<(), StoreError> {
		with_deadline(deadline, async {
			let mut conn = self.conn.clone();
			let _: String = redis::cmd("PING").query_async(&mut conn).await.map_err(redis_err)?;
			Ok(())
		})
		.await
	}

	#[instrument(name = "redis_store.deny_authorization", skip_all)]
	async fn deny_authorization(&self, device_code: &str, deadline: Duration) -> Result<(), StoreError> {
		with_deadline(deadline, async {
			let mut conn = self.conn.clone();
			let remaining: i64 = conn.ttl(device_key(device_code)).await.map_err(redis_err)?;
			if remaining <= 0 {
				return Ok(());
			}
			conn.set_ex::<_, _, ()>(denied_key(device_code), "1", remaining as u64)
				.await
				.map_err(redis_err)?;
			Ok(())
		})
		.await
	}

	#[instrument(name = "redis_store.is_denied", skip_all)]
	async fn is_denied(&self, device_code: &str, deadline: Duration) -> Result<bool, StoreError> {
		with_deadline(deadline, async {
			let mut conn = self.conn.clone();
			let exists: bool = conn.exists(denied_key(device_code)).await.map_err(redis_err)?;
			Ok(exists)
		})
		.await
	}

	#[instrument(name = "redis_store.save_csrf_token", skip_all)]
	async fn save_csrf_token(&self, token: &str, ttl: Duration, deadline: Duration) -> Result<(), StoreError> {
		with_deadline(deadline, async {
			let mut conn = self.conn.clone();
			conn.set_ex::<_, _, ()>(csrf_key(token), "1", ttl.as_secs().max(1))
				.await
				.map_err(redis_err)?;
			Ok(())
		})
		.await
	}

	#[instrument(name = "redis_store.csrf_token_exists", skip_all)]
	async fn csrf_token_exists(&self, token: &str, deadline: Duration) -> Result<bool, StoreError> {
		with_deadline(deadline, async {
			let mut conn = self.conn.clone();
			let exists: bool = conn.exists(csrf_key(token)).await.map_err(redis_err)?;
			Ok(exists)
		})
		.await
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	/// `rate:<dc>:time` entries are keyed by millisecond timestamp, so two
	/// polls within the same millisecond would collide under a
	/// second-resolution scheme; this just documents the key-format choice.
	#[test]
	fn key_helpers_match_the_documented_prefixes() {
		assert_eq!(device_key("abc"), "device:abc");
		assert_eq!(user_key("BCDF-GHJK"), "user:BCDF-GHJK");
		assert_eq!(token_key("abc"), "token:abc");
		assert_eq!(rate_time_key("abc"), "rate:abc:time");
		assert_eq!(rate_backoff_key("abc"), "rate:abc:backoff");
		assert_eq!(csrf_key("t.sig"), "csrf:t.sig");
		assert_eq!(denied_key("abc"), "denied:abc");
	}
}
