// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! `GET /health`: liveness plus a Store reachability probe.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::{instrument, warn};

use crate::state::AppState;

#[derive(Serialize)]
struct HealthBody {
	status: &'static str,
	version: &'static str,
}

/// Liveness only degrades the Store check — it never fails open. A
/// Store outage makes the proxy unable to do anything useful, so `/health`
/// reporting `degraded` (503) is the correct signal for a load balancer to
/// stop routing traffic here.
#[instrument(name = "handlers.check_health", skip_all)]
pub async fn check_health(State(state): State<AppState>) -> Response {
	match state.flow.check_health().await {
		Ok(()) => (
			StatusCode::OK,
			Json(HealthBody {
				status: "ok",
				version: state.version,
			}),
		)
			.into_response(),
		Err(e) => {
			warn!(error = %e, "health check failed");
			(
				StatusCode::SERVICE_UNAVAILABLE,
				Json(HealthBody {
					status: "degraded",
					version: state.version,
				}),
			)
				.into_response()
		}
	}
}
