// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The JSON error taxonomy for `/device/code` and `/device/token`
//! (RFC 6749 §5.2, RFC 8628 §3.5).

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use devicecode_core::flow::FlowError;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
	#[error("{0}")]
	InvalidRequest(String),
	#[error("unsupported grant type")]
	UnsupportedGrantType,
	#[error("invalid grant")]
	InvalidGrant,
	#[error("expired token")]
	ExpiredToken,
	#[error("authorization pending")]
	AuthorizationPending,
	#[error("slow down")]
	SlowDown,
	#[error("access denied")]
	AccessDenied,
	#[error("server error: {0}")]
	ServerError(String),
}

impl From<FlowError> for ApiError {
	fn from(e: FlowError) -> Self {
		match e {
			FlowError::InvalidRequest(msg) => ApiError::InvalidRequest(msg),
			FlowError::InvalidGrant => ApiError::InvalidGrant,
			FlowError::ExpiredToken => ApiError::ExpiredToken,
			FlowError::AuthorizationPending => ApiError::AuthorizationPending,
			FlowError::SlowDown => ApiError::SlowDown,
			FlowError::AccessDenied => ApiError::AccessDenied,
			FlowError::Generation(e) => ApiError::ServerError(e.to_string()),
			FlowError::ServerError(msg) => ApiError::ServerError(msg),
		}
	}
}

#[derive(Debug, Serialize)]
struct ErrorBody {
	error: &'static str,
	error_description: String,
}

impl ApiError {
	fn code(&self) -> &'static str {
		match self {
			ApiError::InvalidRequest(_) => "invalid_request",
			ApiError::UnsupportedGrantType => "unsupported_grant_type",
			ApiError::InvalidGrant => "invalid_grant",
			ApiError::ExpiredToken => "expired_token",
			ApiError::AuthorizationPending => "authorization_pending",
			ApiError::SlowDown => "slow_down",
			ApiError::AccessDenied => "access_denied",
			ApiError::ServerError(_) => "server_error",
		}
	}

	fn status(&self) -> StatusCode {
		match self {
			ApiError::ServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
			_ => StatusCode::BAD_REQUEST,
		}
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		if let ApiError::ServerError(ref msg) = self {
			tracing::error!(error = %msg, "server error surfaced to JSON client");
		}

		let body = ErrorBody {
			error: self.code(),
			error_description: self.to_string(),
		};

		let mut response = (self.status(), Json(body)).into_response();
		response
			.headers_mut()
			.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
		response
	}
}
