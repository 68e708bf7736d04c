// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Binary entrypoint for the device authorization grant proxy: CLI parsing,
//! `.env` loading, tracing init, Store/Orchestrator wiring, and graceful
//! shutdown.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use devicecode_config::AppConfig;
use devicecode_core::csrf::CsrfIssuer;
use devicecode_core::flow::{FlowConfig, FlowEngine};
use devicecode_core::store::Store;
use devicecode_store_memory::MemoryStore;
use devicecode_store_redis::RedisStore;
use devicecode_upstream::{UpstreamConfig, UpstreamExchanger};
use devicecode_web::{router, AppState};
use tower_http::timeout::TimeoutLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// OAuth 2.0 Device Authorization Grant proxy.
#[derive(Parser, Debug)]
#[command(name = "devicecode-server", about = "RFC 8628 device authorization grant proxy", version)]
struct Args {
	#[command(subcommand)]
	command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Print version information and exit.
	Version,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();
	if let Some(Command::Version) = args.command {
		println!("devicecode-server {}", env!("CARGO_PKG_VERSION"));
		return Ok(());
	}

	dotenvy::dotenv().ok();

	tracing_subscriber::registry()
		.with(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| "info".into()),
		)
		.with(tracing_subscriber::fmt::layer())
		.init();

	let config = AppConfig::from_env()?;

	let store: Arc<dyn Store> = if config.store_url.starts_with("redis://")
		|| config.store_url.starts_with("rediss://")
	{
		Arc::new(RedisStore::connect(&config.store_url).await?)
	} else {
		tracing::warn!(
			store_url = %config.store_url,
			"STORE_URL is not a redis:// URL; falling back to the in-memory store, which does not survive a restart"
		);
		Arc::new(MemoryStore::new())
	};

	tracing::info!("probing store reachability");
	store.check_health(config.store_ping_timeout).await?;

	let flow = Arc::new(FlowEngine::new(
		store.clone(),
		FlowConfig {
			verification_uri: config.verification_uri(),
			code_expiry: config.code_expiry,
			poll_interval_secs: config.poll_interval.as_secs(),
			max_polls_per_window: config.max_polls_per_minute,
			poll_window: Duration::from_secs(60),
			max_verify_attempts_per_window: config.max_verify_attempts_per_minute,
			store_deadline: config.read_timeout,
		},
	));

	let csrf = Arc::new(CsrfIssuer::new(
		config.csrf_secret.clone(),
		config.csrf_token_expiry,
	));

	let upstream = Arc::new(UpstreamExchanger::with_timeout(
		UpstreamConfig {
			client_id: config.client_id.clone(),
			client_secret: config.client_secret.clone(),
			auth_endpoint: config.auth_endpoint.clone(),
			token_endpoint: config.token_endpoint.clone(),
			redirect_uri: config.redirect_uri(),
		},
		config.upstream_timeout,
	));

	let state = AppState {
		flow,
		csrf,
		store,
		upstream,
		store_deadline: config.read_timeout,
		auth_endpoint: config.auth_endpoint.clone(),
		redirect_uri: config.redirect_uri(),
		version: env!("CARGO_PKG_VERSION"),
	};

	let app = router(state).layer(TimeoutLayer::new(config.write_timeout));

	let addr = format!("0.0.0.0:{}", config.port);
	let listener = tokio::net::TcpListener::bind(&addr).await?;
	tracing::info!(%addr, base_url = %config.base_url, "listening");

	let shutdown_timeout = config.shutdown_timeout;
	axum::serve(listener, app)
		.with_graceful_shutdown(shutdown_signal(shutdown_timeout))
		.await?;

	tracing::info!("server shutdown complete");
	Ok(())
}

/// Resolves once SIGINT or, on unix, SIGTERM is received. Graceful shutdown
/// itself is bounded by `axum::serve`'s drain behavior plus this timeout as
/// a last-resort log marker; the process exits once the future returned
/// here resolves and in-flight requests drain or `timeout` elapses.
async fn shutdown_signal(timeout: Duration) {
	let ctrl_c = async {
		tokio::signal::ctrl_c()
			.await
			.expect("failed to install SIGINT handler");
	};

	#[cfg(unix)]
	let terminate = async {
		tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
			.expect("failed to install SIGTERM handler")
			.recv()
			.await;
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		_ = ctrl_c => {},
		_ = terminate => {},
	}

	tracing::info!(?timeout, "shutdown signal received, draining in-flight requests");
}
