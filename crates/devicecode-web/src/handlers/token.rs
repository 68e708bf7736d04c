// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! `POST /device/code` and `POST /device/token`: the JSON half of the
//! flow, consumed directly by polling clients.

use axum::extract::State;
use axum::http::{header, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::Json;
use devicecode_core::domain::DeviceCodeResponse;
use devicecode_core::flow::PollOutcome;
use tracing::instrument;

use crate::error::ApiError;
use crate::forms::parse_strict;
use crate::state::AppState;

const EXPECTED_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";

fn with_no_store(mut response: Response) -> Response {
	response
		.headers_mut()
		.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
	response
}

#[instrument(name = "handlers.request_device_code", skip_all)]
pub async fn request_device_code(
	State(state): State<AppState>,
	body: axum::body::Bytes,
) -> Result<Response, ApiError> {
	let fields = parse_strict(&body)?;

	let client_id = fields
		.get("client_id")
		.cloned()
		.ok_or_else(|| ApiError::InvalidRequest("client_id is required".to_string()))?;
	let scope = fields.get("scope").cloned().unwrap_or_default();

	let dc = state.flow.request_device_code(client_id, scope).await?;
	let resp = DeviceCodeResponse::from(&dc);

	Ok(with_no_store((axum::http::StatusCode::OK, Json(resp)).into_response()))
}

#[instrument(name = "handlers.check_device_token", skip_all)]
pub async fn check_device_token(
	State(state): State<AppState>,
	body: axum::body::Bytes,
) -> Result<Response, ApiError> {
	let fields = parse_strict(&body)?;

	let grant_type = fields
		.get("grant_type")
		.cloned()
		.ok_or_else(|| ApiError::InvalidRequest("grant_type is required".to_string()))?;
	if grant_type != EXPECTED_GRANT_TYPE {
		return Err(ApiError::UnsupportedGrantType);
	}

	let device_code = fields
		.get("device_code")
		.cloned()
		.ok_or_else(|| ApiError::InvalidRequest("device_code is required".to_string()))?;

	let outcome = state.flow.check_device_code(&device_code).await?;
	match outcome {
		PollOutcome::AuthorizationPending => Err(ApiError::AuthorizationPending),
		PollOutcome::Token(token) => Ok(with_no_store(
			(axum::http::StatusCode::OK, Json(token)).into_response(),
		)),
	}
}

#[cfg(test)]
mod tests {
	use super::super::test_support::test_state;
	use super::*;
	use axum::body::Bytes;

	#[tokio::test]
	async fn request_device_code_rejects_missing_client_id() {
		let state = test_state();
		let err = request_device_code(State(state), Bytes::from_static(b"scope=read"))
			.await
			.unwrap_err();
		assert!(matches!(err, ApiError::InvalidRequest(_)));
	}

	#[tokio::test]
	async fn request_device_code_succeeds_with_client_id() {
		let state = test_state();
		let response = request_device_code(
			State(state),
			Bytes::from_static(b"client_id=test-client&scope=read"),
		)
		.await
		.unwrap();
		assert_eq!(response.status(), axum::http::StatusCode::OK);
	}

	#[tokio::test]
	async fn check_device_token_rejects_wrong_grant_type() {
		let state = test_state();
		let err = check_device_token(
			State(state),
			Bytes::from_static(b"grant_type=authorization_code&device_code=x"),
		)
		.await
		.unwrap_err();
		assert!(matches!(err, ApiError::UnsupportedGrantType));
	}

	#[tokio::test]
	async fn check_device_token_rejects_duplicate_params() {
		let state = test_state();
		let err = check_device_token(
			State(state),
			Bytes::from_static(
				b"grant_type=urn:ietf:params:oauth:grant-type:device_code&device_code=x&device_code=y",
			),
		)
		.await
		.unwrap_err();
		assert!(matches!(err, ApiError::InvalidRequest(_)));
	}

	#[tokio::test]
	async fn check_device_token_reports_pending_for_fresh_code() {
		let state = test_state();
		let issue_response = request_device_code(
			State(state.clone()),
			Bytes::from_static(b"client_id=test-client&scope=read"),
		)
		.await
		.unwrap();
		let body = http_body_util::BodyExt::collect(issue_response.into_body())
			.await
			.unwrap()
			.to_bytes();
		let issued: DeviceCodeResponse = serde_json::from_slice(&body).unwrap();

		let form = format!(
			"grant_type=urn:ietf:params:oauth:grant-type:device_code&device_code={}",
			issued.device_code
		);
		let err = check_device_token(State(state), Bytes::from(form))
			.await
			.unwrap_err();
		assert!(matches!(err, ApiError::AuthorizationPending));
	}
}
