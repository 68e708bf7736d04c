// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Environment-variable configuration loading for the device authorization
//! proxy. Unlike the layered defaults/TOML/env system this crate's sibling
//! services use, the proxy's configuration surface is small and entirely
//! environment-driven (`SPEC_FULL.md` §6, §10.4) — so this is a flat
//! `from_env` rather than a merged layer stack.

use std::time::Duration;

use chrono::Duration as ChronoDuration;
use devicecode_secret::SecretString;
use tracing::{info, warn};

const MIN_CODE_EXPIRY: Duration = Duration::from_secs(600);
const MIN_POLL_INTERVAL: Duration = Duration::from_secs(5);
const RECOMMENDED_CSRF_SECRET_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("missing required environment variable: {0}")]
	MissingEnvVar(&'static str),
	#[error("invalid value for {field}: {reason}")]
	InvalidValue { field: &'static str, reason: String },
}

/// Fully resolved, validated configuration for the proxy binary.
#[derive(Debug, Clone)]
pub struct AppConfig {
	pub port: u16,
	pub base_url: String,
	pub code_expiry: ChronoDuration,
	pub poll_interval: Duration,
	pub max_polls_per_minute: u32,
	pub max_verify_attempts_per_minute: u32,
	pub csrf_secret: SecretString,
	pub csrf_token_expiry: Duration,
	pub client_id: String,
	pub client_secret: SecretString,
	pub auth_endpoint: String,
	pub token_endpoint: String,
	pub store_url: String,
	pub read_header_timeout: Duration,
	pub read_timeout: Duration,
	pub write_timeout: Duration,
	pub idle_timeout: Duration,
	pub upstream_timeout: Duration,
	pub store_ping_timeout: Duration,
	pub shutdown_timeout: Duration,
}

impl AppConfig {
	pub fn verification_uri(&self) -> String {
		format!("{}/device", self.base_url.trim_end_matches('/'))
	}

	pub fn redirect_uri(&self) -> String {
		format!("{}/device/complete", self.base_url.trim_end_matches('/'))
	}

	/// Loads and validates configuration from the process environment.
	/// Callers typically run `dotenvy::dotenv().ok()` before this to
	/// populate the environment from a `.env` file in development.
	pub fn from_env() -> Result<Self, ConfigError> {
		let port = parse_env_or("PORT", 8080u16)?;
		let base_url = require_env("BASE_URL")?;

		let code_expiry = parse_duration_env_or("CODE_EXPIRY", Duration::from_secs(900))?;
		if code_expiry < MIN_CODE_EXPIRY {
			return Err(ConfigError::InvalidValue {
				field: "CODE_EXPIRY",
				reason: "must be at least 10 minutes".to_string(),
			});
		}

		let poll_interval = parse_duration_env_or("POLL_INTERVAL", Duration::from_secs(5))?;
		if poll_interval < MIN_POLL_INTERVAL {
			return Err(ConfigError::InvalidValue {
				field: "POLL_INTERVAL",
				reason: "must be at least 5 seconds".to_string(),
			});
		}

		let max_polls_per_minute = parse_env_or("MAX_POLLS_PER_MINUTE", 12u32)?;
		let max_verify_attempts_per_minute = parse_env_or("MAX_VERIFY_ATTEMPTS_PER_MINUTE", 50u32)?;

		let csrf_secret = require_env("CSRF_SECRET")?;
		if csrf_secret.len() < RECOMMENDED_CSRF_SECRET_LEN {
			warn!(
				len = csrf_secret.len(),
				recommended = RECOMMENDED_CSRF_SECRET_LEN,
				"CSRF_SECRET is shorter than recommended"
			);
		}
		let csrf_token_expiry = parse_duration_env_or("CSRF_TOKEN_EXPIRY", Duration::from_secs(3600))?;

		let client_id = require_env("CLIENT_ID")?;
		let client_secret = require_env("CLIENT_SECRET")?;
		let auth_endpoint = require_env("AUTH_ENDPOINT")?;
		let token_endpoint = require_env("TOKEN_ENDPOINT")?;
		let store_url = require_env("STORE_URL")?;

		let read_header_timeout = parse_duration_env_or("READ_HEADER_TIMEOUT", Duration::from_secs(10))?;
		let read_timeout = parse_duration_env_or("READ_TIMEOUT", Duration::from_secs(30))?;
		let write_timeout = parse_duration_env_or("WRITE_TIMEOUT", Duration::from_secs(30))?;
		let idle_timeout = parse_duration_env_or("IDLE_TIMEOUT", Duration::from_secs(120))?;
		let upstream_timeout = parse_duration_env_or("UPSTREAM_TIMEOUT", Duration::from_secs(10))?;
		let store_ping_timeout = parse_duration_env_or("STORE_PING_TIMEOUT", Duration::from_secs(5))?;
		let shutdown_timeout = parse_duration_env_or("SHUTDOWN_TIMEOUT", Duration::from_secs(10))?;

		info!(
			port,
			base_url = %base_url,
			code_expiry_secs = code_expiry.as_secs(),
			poll_interval_secs = poll_interval.as_secs(),
			max_polls_per_minute,
			"configuration loaded"
		);

		Ok(Self {
			port,
			base_url,
			code_expiry: ChronoDuration::from_std(code_expiry)
				.map_err(|e| ConfigError::InvalidValue {
					field: "CODE_EXPIRY",
					reason: e.to_string(),
				})?,
			poll_interval,
			max_polls_per_minute,
			max_verify_attempts_per_minute,
			csrf_secret: SecretString::new(csrf_secret),
			csrf_token_expiry,
			client_id,
			client_secret: SecretString::new(client_secret),
			auth_endpoint,
			token_endpoint,
			store_url,
			read_header_timeout,
			read_timeout,
			write_timeout,
			idle_timeout,
			upstream_timeout,
			store_ping_timeout,
			shutdown_timeout,
		})
	}
}

fn require_env(key: &'static str) -> Result<String, ConfigError> {
	std::env::var(key)
		.ok()
		.filter(|v| !v.is_empty())
		.ok_or(ConfigError::MissingEnvVar(key))
}

fn parse_env_or<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
	T: std::str::FromStr,
	T::Err: std::fmt::Display,
{
	match std::env::var(key) {
		Ok(raw) if !raw.is_empty() => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
			field: key,
			reason: e.to_string(),
		}),
		_ => Ok(default),
	}
}

fn parse_duration_env_or(key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
	match std::env::var(key) {
		Ok(raw) if !raw.is_empty() => {
			humantime::parse_duration(&raw).map_err(|e| ConfigError::InvalidValue {
				field: key,
				reason: e.to_string(),
			})
		}
		_ => Ok(default),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Mutex;

	// Environment variables are process-global; serialize tests that touch
	// them to avoid cross-test interference.
	static ENV_LOCK: Mutex<()> = Mutex::new(());

	fn clear_all() {
		for key in [
			"PORT", "BASE_URL", "CODE_EXPIRY", "POLL_INTERVAL", "MAX_POLLS_PER_MINUTE",
			"MAX_VERIFY_ATTEMPTS_PER_MINUTE", "CSRF_SECRET", "CSRF_TOKEN_EXPIRY", "CLIENT_ID",
			"CLIENT_SECRET", "AUTH_ENDPOINT", "TOKEN_ENDPOINT", "STORE_URL", "READ_HEADER_TIMEOUT",
			"READ_TIMEOUT", "WRITE_TIMEOUT", "IDLE_TIMEOUT", "UPSTREAM_TIMEOUT",
			"STORE_PING_TIMEOUT", "SHUTDOWN_TIMEOUT",
		] {
			std::env::remove_var(key);
		}
	}

	fn set_required() {
		std::env::set_var("BASE_URL", "https://proxy.example");
		std::env::set_var("CSRF_SECRET", "a".repeat(32));
		std::env::set_var("CLIENT_ID", "client");
		std::env::set_var("CLIENT_SECRET", "secret");
		std::env::set_var("AUTH_ENDPOINT", "https://upstream.example/authorize");
		std::env::set_var("TOKEN_ENDPOINT", "https://upstream.example/token");
		std::env::set_var("STORE_URL", "redis://localhost:6379");
	}

	#[test]
	fn missing_base_url_is_an_error() {
		let _guard = ENV_LOCK.lock().unwrap();
		clear_all();
		let err = AppConfig::from_env().unwrap_err();
		assert!(matches!(err, ConfigError::MissingEnvVar("BASE_URL")));
	}

	#[test]
	fn defaults_apply_when_optional_vars_absent() {
		let _guard = ENV_LOCK.lock().unwrap();
		clear_all();
		set_required();
		let config = AppConfig::from_env().unwrap();
		assert_eq!(config.port, 8080);
		assert_eq!(config.code_expiry.num_seconds(), 900);
		assert_eq!(config.poll_interval, Duration::from_secs(5));
		assert_eq!(config.max_polls_per_minute, 12);
	}

	#[test]
	fn code_expiry_below_floor_is_rejected() {
		let _guard = ENV_LOCK.lock().unwrap();
		clear_all();
		set_required();
		std::env::set_var("CODE_EXPIRY", "1m");
		let err = AppConfig::from_env().unwrap_err();
		assert!(matches!(
			err,
			ConfigError::InvalidValue { field: "CODE_EXPIRY", .. }
		));
		std::env::remove_var("CODE_EXPIRY");
	}

	#[test]
	fn verification_uri_strips_trailing_slash() {
		let _guard = ENV_LOCK.lock().unwrap();
		clear_all();
		set_required();
		std::env::set_var("BASE_URL", "https://proxy.example/");
		let config = AppConfig::from_env().unwrap();
		assert_eq!(config.verification_uri(), "https://proxy.example/device");
		std::env::set_var("BASE_URL", "https://proxy.example");
	}
}
