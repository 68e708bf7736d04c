// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Shared application state injected into every handler.

use std::sync::Arc;
use std::time::Duration;

use devicecode_core::csrf::CsrfIssuer;
use devicecode_core::flow::FlowEngine;
use devicecode_core::store::Store;
use devicecode_upstream::UpstreamExchanger;

#[derive(Clone)]
pub struct AppState {
	pub flow: Arc<FlowEngine>,
	pub csrf: Arc<CsrfIssuer>,
	pub store: Arc<dyn Store>,
	pub upstream: Arc<UpstreamExchanger>,
	pub store_deadline: Duration,
	pub auth_endpoint: String,
	pub redirect_uri: String,
	pub version: &'static str,
}
