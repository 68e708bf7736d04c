// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The HTTP surface of the device authorization proxy: the JSON endpoints
//! FlowEngine serves directly and the browser-facing verification handshake
//! the VerificationOrchestrator drives. [`router`] is the composition root
//! consumed by `bin/devicecode-server`.

pub mod error;
pub mod forms;
pub mod handlers;
pub mod qr;
pub mod state;
pub mod templates;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

pub use state::AppState;

/// Builds the full `axum` router: the five RFC 8628/6749 endpoints plus
/// `/health`, wrapped in request tracing. Timeout and body-size layers are
/// applied by the binary, which knows the configured durations.
pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/health", get(handlers::health::check_health))
		.route("/device/code", post(handlers::token::request_device_code))
		.route("/device/token", post(handlers::token::check_device_token))
		.route(
			"/device",
			get(handlers::verification::verification_form)
				.post(handlers::verification::submit_verification),
		)
		.route(
			"/device/complete",
			get(handlers::verification::verification_callback),
		)
		.layer(TraceLayer::new_for_http())
		.with_state(state)
}
