// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Shared `AppState` builder for handler unit tests.

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use devicecode_core::csrf::CsrfIssuer;
use devicecode_core::flow::{FlowConfig, FlowEngine};
use devicecode_secret::SecretString;
use devicecode_store_memory::MemoryStore;
use devicecode_upstream::{UpstreamConfig, UpstreamExchanger};

use crate::state::AppState;

pub fn test_state() -> AppState {
	let store = Arc::new(MemoryStore::new());

	let flow = Arc::new(FlowEngine::new(
		store.clone(),
		FlowConfig {
			verification_uri: "https://proxy.example/device".to_string(),
			code_expiry: ChronoDuration::minutes(15),
			poll_interval_secs: 5,
			max_polls_per_window: 12,
			poll_window: Duration::from_secs(60),
			max_verify_attempts_per_window: 50,
			store_deadline: Duration::from_secs(1),
		},
	));

	let csrf = Arc::new(CsrfIssuer::new(
		SecretString::new("a-sufficiently-long-test-csrf-secret"),
		Duration::from_secs(3600),
	));

	let upstream = Arc::new(UpstreamExchanger::new(UpstreamConfig {
		client_id: "test-client".to_string(),
		client_secret: SecretString::new("test-secret"),
		auth_endpoint: "https://upstream.example/authorize".to_string(),
		token_endpoint: "https://upstream.example/token".to_string(),
		redirect_uri: "https://proxy.example/device/complete".to_string(),
	}));

	AppState {
		flow,
		csrf,
		store,
		upstream,
		store_deadline: Duration::from_secs(1),
		auth_endpoint: "https://upstream.example/authorize".to_string(),
		redirect_uri: "https://proxy.example/device/complete".to_string(),
		version: "test",
	}
}
