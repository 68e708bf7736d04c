// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Best-effort QR code rendering for `verification_uri_complete`. Per
//! `SPEC_FULL.md` §4.7, failure here must degrade to plain text, never
//! fail the request.

use qrcode::render::svg;
use qrcode::QrCode;
use tracing::warn;

/// Renders `data` as an inline SVG string, or `None` (logging a warning)
/// if encoding fails — e.g. the input is too long for any QR version.
pub fn render_svg(data: &str) -> Option<String> {
	match QrCode::new(data.as_bytes()) {
		Ok(code) => Some(
			code.render()
				.min_dimensions(200, 200)
				.dark_color(svg::Color("#000000"))
				.light_color(svg::Color("#ffffff"))
				.build(),
		),
		Err(e) => {
			warn!(error = %e, "failed to render QR code, degrading to text");
			None
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn renders_svg_for_typical_uri() {
		let svg = render_svg("https://proxy.example/device?code=BCDF-GHJK").unwrap();
		assert!(svg.contains("<svg"));
	}
}
