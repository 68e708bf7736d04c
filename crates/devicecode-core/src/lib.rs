// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Protocol-level core of the device authorization grant proxy: code
//! generation and validation, the [`Store`](store::Store) abstraction, the
//! [`FlowEngine`](flow::FlowEngine) state machine, and CSRF token issuance.
//!
//! This crate has no knowledge of HTTP, templating, or any concrete
//! persistence backend — those live in `devicecode-web`,
//! `devicecode-store-memory`, and `devicecode-store-redis`.

pub mod codec;
pub mod csrf;
pub mod domain;
pub mod flow;
pub mod store;

pub use csrf::{CsrfError, CsrfIssuer};
pub use domain::{DeviceCode, DeviceCodeResponse, TokenResult};
pub use flow::{FlowConfig, FlowEngine, FlowError, PollOutcome};
pub use store::{Store, StoreError};
