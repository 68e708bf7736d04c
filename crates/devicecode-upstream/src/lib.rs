// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Authorization-code-to-token exchange against the upstream OAuth server
//! this proxy fronts. Building the authorize redirect URL is the
//! Orchestrator's job (it owns `state`/`redirect_uri` construction); this
//! crate only performs the callback-side token exchange.

use std::time::Duration;

use devicecode_secret::SecretString;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

/// Default timeout for the upstream token-exchange call, per
/// `SPEC_FULL.md` §5.
pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
	#[error("request to upstream failed: {0}")]
	Http(#[from] reqwest::Error),
	#[error("upstream rejected the exchange: {0}")]
	Rejected(String),
	#[error("could not parse upstream response: {0}")]
	Parse(String),
}

#[derive(Debug, Clone)]
pub struct UpstreamConfig {
	pub client_id: String,
	pub client_secret: SecretString,
	pub auth_endpoint: String,
	pub token_endpoint: String,
	pub redirect_uri: String,
}

/// The token payload as returned by the upstream server, independent of
/// this proxy's own [`devicecode_core::domain::TokenResult`] shape — the
/// caller decides how much of it to carry forward (§4.7: original scope
/// wins unless upstream explicitly overrides with a non-empty one).
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamTokenResponse {
	pub access_token: String,
	#[serde(default = "default_token_type")]
	pub token_type: String,
	#[serde(default)]
	pub expires_in: Option<i64>,
	pub refresh_token: Option<String>,
	pub scope: Option<String>,
}

fn default_token_type() -> String {
	"Bearer".to_string()
}

/// An upstream error response, per RFC 6749 §5.2.
#[derive(Debug, Deserialize)]
struct UpstreamErrorResponse {
	error: String,
	error_description: Option<String>,
}

#[derive(Debug, Serialize)]
struct ExchangeForm<'a> {
	grant_type: &'static str,
	client_id: &'a str,
	client_secret: &'a str,
	code: &'a str,
	redirect_uri: &'a str,
}

/// Performs the authorization-code grant exchange against
/// [`UpstreamConfig::token_endpoint`].
pub struct UpstreamExchanger {
	config: UpstreamConfig,
	http: reqwest::Client,
}

impl UpstreamExchanger {
	pub fn new(config: UpstreamConfig) -> Self {
		Self::with_timeout(config, DEFAULT_UPSTREAM_TIMEOUT)
	}

	pub fn with_timeout(config: UpstreamConfig, timeout: Duration) -> Self {
		let http = reqwest::Client::builder()
			.user_agent(concat!("devicecode-proxy/", env!("CARGO_PKG_VERSION")))
			.timeout(timeout)
			.build()
			.expect("failed to build HTTP client");

		Self { config, http }
	}

	#[instrument(name = "upstream.exchange", skip(self, code))]
	pub async fn exchange(&self, code: &str) -> Result<UpstreamTokenResponse, UpstreamError> {
		debug!("exchanging authorization code with upstream");

		let response = self
			.http
			.post(&self.config.token_endpoint)
			.header("Accept", "application/json")
			.form(&ExchangeForm {
				grant_type: "authorization_code",
				client_id: &self.config.client_id,
				client_secret: self.config.client_secret.expose(),
				code,
				redirect_uri: &self.config.redirect_uri,
			})
			.send()
			.await?;

		let body = response.text().await?;

		if let Ok(err) = serde_json::from_str::<UpstreamErrorResponse>(&body) {
			if !err.error.is_empty() {
				return Err(UpstreamError::Rejected(
					err.error_description.unwrap_or(err.error),
				));
			}
		}

		serde_json::from_str(&body)
			.map_err(|e| UpstreamError::Parse(format!("{e}: {body}")))
	}
}
