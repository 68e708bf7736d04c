// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Askama templates for the three HTML surfaces: the verification form,
//! the success page, and the generic error page.

use askama::Template;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};

#[derive(Template)]
#[template(path = "device_form.html")]
pub struct DeviceFormTemplate {
	pub csrf_token: String,
	pub prefilled_code: String,
	pub qr_svg: Option<String>,
	pub error: Option<String>,
}

#[derive(Template)]
#[template(path = "success.html")]
pub struct SuccessTemplate;

#[derive(Template)]
#[template(path = "error.html")]
pub struct ErrorTemplate {
	pub message: String,
}

/// Renders `template` to an HTML response with the given status. A render
/// failure is itself a bug in the template, not user input — it produces a
/// 500 with no further templating (avoids recursive failure).
pub fn render(status: StatusCode, template: &impl Template) -> Response {
	match template.render() {
		Ok(body) => (status, Html(body)).into_response(),
		Err(e) => {
			tracing::error!(error = %e, "template render failed");
			(StatusCode::INTERNAL_SERVER_ERROR, "template render failed").into_response()
		}
	}
}
