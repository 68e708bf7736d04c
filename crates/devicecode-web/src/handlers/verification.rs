// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The browser-facing verification handshake: `GET`/`POST /device` and the
//! upstream callback at `GET /device/complete`.
//!
//! Status-code policy (per `SPEC_FULL.md` §9 Open Question (a), decided
//! here): CSRF failures and missing/empty fields are 400; a bad user code
//! re-renders the form at 200 so the user can retry without losing their
//! place.

use std::collections::HashMap;

use axum::extract::{Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use devicecode_core::domain::TokenResult;
use devicecode_core::flow::FlowError;
use devicecode_secret::SecretString;
use devicecode_upstream::UpstreamError;
use tracing::{instrument, warn};

use crate::forms::parse_strict;
use crate::qr;
use crate::state::AppState;
use crate::templates::{render, DeviceFormTemplate, ErrorTemplate, SuccessTemplate};

const DEFAULT_TOKEN_EXPIRES_IN: i64 = 3600;

fn error_page(status: StatusCode, message: impl Into<String>) -> Response {
	render(status, &ErrorTemplate { message: message.into() })
}

#[instrument(name = "handlers.verification_form", skip_all)]
pub async fn verification_form(
	State(state): State<AppState>,
	Query(params): Query<HashMap<String, String>>,
) -> Response {
	let prefilled_code = params.get("code").cloned().unwrap_or_default();

	let csrf_token = match state.csrf.generate(&*state.store, state.store_deadline).await {
		Ok(token) => token,
		Err(e) => {
			warn!(error = %e, "failed to issue csrf token");
			return error_page(StatusCode::INTERNAL_SERVER_ERROR, "could not prepare verification form");
		}
	};

	let qr_svg = if prefilled_code.is_empty() {
		None
	} else {
		let complete_uri = format!(
			"{}?code={}",
			state.flow_verification_uri(),
			urlencode(&prefilled_code)
		);
		qr::render_svg(&complete_uri)
	};

	render(
		StatusCode::OK,
		&DeviceFormTemplate {
			csrf_token,
			prefilled_code,
			qr_svg,
			error: None,
		},
	)
}

#[instrument(name = "handlers.submit_verification", skip_all)]
pub async fn submit_verification(
	State(state): State<AppState>,
	body: axum::body::Bytes,
) -> Response {
	let fields = match parse_strict(&body) {
		Ok(fields) => fields,
		Err(e) => return error_page(StatusCode::BAD_REQUEST, e.to_string()),
	};

	let Some(csrf_token) = fields.get("csrf_token") else {
		return error_page(StatusCode::BAD_REQUEST, "missing csrf_token");
	};

	if let Err(e) = state
		.csrf
		.validate(csrf_token, &*state.store, state.store_deadline)
		.await
	{
		warn!(error = %e, "csrf validation failed on device verification submit");
		return error_page(StatusCode::BAD_REQUEST, "your session has expired, please try again");
	}

	let Some(code) = fields.get("code").filter(|c| !c.is_empty()) else {
		return error_page(StatusCode::BAD_REQUEST, "code is required");
	};

	match state.flow.verify_user_code(code).await {
		Ok(dc) => {
			let mut url = format!(
				"{}?response_type=code&client_id={}&redirect_uri={}&state={}",
				state.auth_endpoint,
				urlencode(&dc.client_id),
				urlencode(&state.redirect_uri),
				urlencode(&dc.device_code),
			);
			if !dc.scope.is_empty() {
				url.push_str(&format!("&scope={}", urlencode(&dc.scope)));
			}
			Redirect::to(&url).into_response()
		}
		Err(e) => {
			// Re-issue a fresh CSRF token rather than reusing the
			// just-validated one: the old one may now be close to expiry
			// and re-rendering the form should give the user a full window.
			let fresh_csrf = state
				.csrf
				.generate(&*state.store, state.store_deadline)
				.await
				.unwrap_or_else(|_| csrf_token.clone());

			render(
				StatusCode::OK,
				&DeviceFormTemplate {
					csrf_token: fresh_csrf,
					prefilled_code: code.clone(),
					qr_svg: None,
					error: Some(verify_error_message(&e)),
				},
			)
		}
	}
}

fn verify_error_message(e: &FlowError) -> String {
	match e {
		FlowError::InvalidRequest(msg) => format!("invalid code: {msg}"),
		FlowError::InvalidGrant => "that code was not recognized".to_string(),
		FlowError::ExpiredToken => "that code has expired".to_string(),
		FlowError::SlowDown => "too many attempts, please wait and try again".to_string(),
		_ => "something went wrong, please try again".to_string(),
	}
}

#[instrument(name = "handlers.verification_callback", skip_all)]
pub async fn verification_callback(
	State(state): State<AppState>,
	Query(params): Query<HashMap<String, String>>,
) -> Response {
	let Some(device_code) = params.get("state").filter(|s| !s.is_empty()) else {
		return error_page(StatusCode::BAD_REQUEST, "missing state parameter");
	};

	if let Some(error) = params.get("error") {
		warn!(upstream_error = %error, "upstream denied authorization");
		if let Err(e) = state.flow.deny_authorization(device_code).await {
			warn!(error = %e, "failed to record authorization denial");
		}
		return error_page(StatusCode::BAD_REQUEST, "authorization was denied");
	}
	let Some(code) = params.get("code").filter(|c| !c.is_empty()) else {
		return error_page(StatusCode::BAD_REQUEST, "missing code parameter");
	};

	let dc = match state.flow.get_device_code(device_code).await {
		Ok(dc) => dc,
		Err(FlowError::ExpiredToken) => {
			return error_page(StatusCode::BAD_REQUEST, "this authorization request has expired")
		}
		Err(_) => return error_page(StatusCode::BAD_REQUEST, "unrecognized authorization request"),
	};

	let upstream_token = match state.upstream.exchange(code).await {
		Ok(t) => t,
		Err(UpstreamError::Http(e)) => {
			warn!(error = %e, "upstream exchange transport error");
			return error_page(StatusCode::BAD_GATEWAY, "could not reach the upstream server");
		}
		Err(e) => {
			warn!(error = %e, "upstream rejected the exchange");
			return error_page(StatusCode::BAD_REQUEST, "upstream rejected the authorization code");
		}
	};

	let token = TokenResult {
		access_token: SecretString::new(upstream_token.access_token),
		token_type: upstream_token.token_type,
		expires_in: upstream_token.expires_in.unwrap_or(DEFAULT_TOKEN_EXPIRES_IN).max(0),
		refresh_token: upstream_token.refresh_token.map(SecretString::new),
		// The original request's scope wins unless upstream explicitly
		// returned a non-empty override (§4.7).
		scope: match upstream_token.scope {
			Some(s) if !s.is_empty() => s,
			_ => dc.scope.clone(),
		},
	};

	if let Err(e) = state.flow.complete_authorization(device_code, token).await {
		warn!(error = %e, "failed to complete authorization");
		return error_page(StatusCode::INTERNAL_SERVER_ERROR, "could not complete authorization");
	}

	render(StatusCode::OK, &SuccessTemplate)
}

impl AppState {
	fn flow_verification_uri(&self) -> String {
		format!("{}/device", self.redirect_uri.trim_end_matches("/device/complete"))
	}
}

fn urlencode(s: &str) -> String {
	form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
	use super::super::test_support::test_state;
	use super::*;
	use axum::body::Bytes;

	#[tokio::test]
	async fn verification_form_renders_ok_without_code() {
		let state = test_state();
		let response = verification_form(State(state), Query(HashMap::new())).await;
		assert_eq!(response.status(), StatusCode::OK);
	}

	#[tokio::test]
	async fn verification_form_renders_qr_when_code_present() {
		let state = test_state();
		let mut params = HashMap::new();
		params.insert("code".to_string(), "BCDF-GHJK".to_string());
		let response = verification_form(State(state), Query(params)).await;
		assert_eq!(response.status(), StatusCode::OK);
	}

	#[tokio::test]
	async fn submit_verification_rejects_missing_csrf() {
		let state = test_state();
		let response = submit_verification(State(state), Bytes::from_static(b"code=BCDF-GHJK")).await;
		assert_eq!(response.status(), StatusCode::BAD_REQUEST);
	}

	#[tokio::test]
	async fn submit_verification_rejects_invalid_csrf() {
		let state = test_state();
		let response = submit_verification(
			State(state),
			Bytes::from_static(b"csrf_token=garbage&code=BCDF-GHJK"),
		)
		.await;
		assert_eq!(response.status(), StatusCode::BAD_REQUEST);
	}

	#[tokio::test]
	async fn submit_verification_rerenders_form_on_unknown_code() {
		let state = test_state();
		let csrf_token = state
			.csrf
			.generate(&*state.store, state.store_deadline)
			.await
			.unwrap();

		let body = format!("csrf_token={csrf_token}&code=BCDF-GHJK");
		let response = submit_verification(State(state), Bytes::from(body)).await;
		assert_eq!(response.status(), StatusCode::OK);
	}

	#[tokio::test]
	async fn submit_verification_redirects_on_success() {
		let state = test_state();
		let dc = state
			.flow
			.request_device_code("test-client".to_string(), "read".to_string())
			.await
			.unwrap();
		let csrf_token = state
			.csrf
			.generate(&*state.store, state.store_deadline)
			.await
			.unwrap();

		let body = format!("csrf_token={csrf_token}&code={}", dc.display_user_code());
		let response = submit_verification(State(state), Bytes::from(body)).await;
		assert_eq!(response.status(), StatusCode::FOUND);
		let location = response
			.headers()
			.get(header::LOCATION)
			.and_then(|v| v.to_str().ok())
			.unwrap_or_default();
		assert!(location.contains(&dc.device_code));
	}

	#[tokio::test]
	async fn verification_callback_rejects_missing_state() {
		let state = test_state();
		let mut params = HashMap::new();
		params.insert("code".to_string(), "upstream-code".to_string());
		let response = verification_callback(State(state), Query(params)).await;
		assert_eq!(response.status(), StatusCode::BAD_REQUEST);
	}

	#[tokio::test]
	async fn verification_callback_surfaces_access_denied() {
		let state = test_state();
		let mut params = HashMap::new();
		params.insert("error".to_string(), "access_denied".to_string());
		let response = verification_callback(State(state.clone()), Query(params)).await;
		assert_eq!(response.status(), StatusCode::BAD_REQUEST);
	}

	#[tokio::test]
	async fn verification_callback_records_denial_for_subsequent_polls() {
		let state = test_state();
		let dc = state
			.flow
			.request_device_code("test-client".to_string(), "read".to_string())
			.await
			.unwrap();

		let mut params = HashMap::new();
		params.insert("state".to_string(), dc.device_code.clone());
		params.insert("error".to_string(), "access_denied".to_string());
		let response = verification_callback(State(state.clone()), Query(params)).await;
		assert_eq!(response.status(), StatusCode::BAD_REQUEST);

		let outcome = state.flow.check_device_code(&dc.device_code).await.unwrap_err();
		assert!(matches!(outcome, FlowError::AccessDenied));
	}

	#[tokio::test]
	async fn verification_callback_rejects_unknown_device_code() {
		let state = test_state();
		let mut params = HashMap::new();
		params.insert("state".to_string(), "does-not-exist".to_string());
		params.insert("code".to_string(), "upstream-code".to_string());
		let response = verification_callback(State(state), Query(params)).await;
		assert_eq!(response.status(), StatusCode::BAD_REQUEST);
	}
}
