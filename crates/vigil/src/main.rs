// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

mod cli;
mod config;
mod eventlog;
mod guard;
mod orchestrator;
mod process;
mod store;

use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use vigil_notify::{ConsoleSink, EmailSink, NotificationSink, WebhookSink};

use cli::{Cli, Command};
use config::{EventLogConfig, VigilConfig};
use eventlog::{CrashEventSource, EventLogFile, JournalSource};
use guard::RestartGuard;
use orchestrator::Watchdog;
use process::SystemProcessControl;
use store::{FileStateStore, StateStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
		)
		.init();

	let cli = Cli::parse();

	let config = VigilConfig::load(&cli.config)
		.with_context(|| format!("failed to load config from {}", cli.config.display()))?;

	info!(
		app = %config.app.display_name,
		executable = %config.app.executable_path.display(),
		"vigil starting"
	);

	match cli.command {
		Command::Run => run_polling(config).await,
		Command::Once => run_once(config).await,
		Command::Status => status(config).await,
	}
}

fn build_store(config: &VigilConfig) -> anyhow::Result<Arc<dyn StateStore>> {
	let state_dir = config
		.state_dir
		.clone()
		.or_else(FileStateStore::default_dir)
		.context("no state directory configured and no platform default available")?;

	Ok(Arc::new(FileStateStore::new(state_dir)))
}

fn build_source(config: &VigilConfig) -> Arc<dyn CrashEventSource> {
	match &config.eventlog {
		EventLogConfig::File { path } => Arc::new(EventLogFile::new(path.clone())),
		EventLogConfig::Journal {
			lookback_lines,
			unit,
		} => Arc::new(JournalSource::new(*lookback_lines, unit.clone())),
	}
}

fn build_sinks(config: &VigilConfig) -> anyhow::Result<Vec<Arc<dyn NotificationSink>>> {
	let mut sinks: Vec<Arc<dyn NotificationSink>> = Vec::new();

	if let Some(email) = &config.notify.email {
		let sink = EmailSink::new(email.clone()).context("invalid email notification config")?;
		sinks.push(Arc::new(sink));
	}

	if let Some(webhook) = &config.notify.webhook {
		let sink =
			WebhookSink::new(webhook.clone()).context("invalid webhook notification config")?;
		sinks.push(Arc::new(sink));
	}

	if config.notify.console {
		sinks.push(Arc::new(ConsoleSink::new()));
	}

	if sinks.is_empty() {
		warn!("no notification transport configured, falling back to console");
		sinks.push(Arc::new(ConsoleSink::new()));
	}

	Ok(sinks)
}

fn build_watchdog(config: &VigilConfig, gate_on_detection: bool) -> anyhow::Result<Watchdog> {
	let store = build_store(config)?;
	let guard = RestartGuard::new(store, config.guard.policy(), config.app.state_key());

	Ok(Watchdog::new(
		config.app.clone(),
		build_source(config),
		Arc::new(SystemProcessControl::new()),
		guard,
		build_sinks(config)?,
		gate_on_detection,
	))
}

/// Polling mode: detection gates each cycle; runs until shutdown.
async fn run_polling(config: VigilConfig) -> anyhow::Result<()> {
	let interval = config.poll.interval();
	let mut watchdog = build_watchdog(&config, true)?;

	let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
	tokio::spawn(async move {
		if tokio::signal::ctrl_c().await.is_ok() {
			let _ = shutdown_tx.send(());
		}
	});

	watchdog.run_polling(interval, shutdown_rx).await;

	info!("vigil stopped");
	Ok(())
}

/// Triggered mode: the external trigger already decided a crash happened, so
/// detection never gates. Exits 0 whatever the cycle decides; callers must
/// treat the exit code as "ran to completion", not success/failure.
async fn run_once(config: VigilConfig) -> anyhow::Result<()> {
	let mut watchdog = build_watchdog(&config, false)?;

	let outcome = watchdog.run_cycle().await;
	info!(outcome = ?outcome, "cycle complete");

	Ok(())
}

/// Read-only view of the guard for operators.
async fn status(config: VigilConfig) -> anyhow::Result<()> {
	let store = build_store(&config)?;
	let guard = RestartGuard::new(store, config.guard.policy(), config.app.state_key());

	let now = Utc::now();
	match guard.current_state().await {
		Some(state) => {
			println!("application:        {}", config.app.display_name);
			println!("consecutive count:  {}", state.consecutive_count);
			println!("last attempt:       {}", state.last_attempt_at);
			println!(
				"effective count:    {}",
				vigil_core::effective_count(Some(&state), guard.policy(), now)
			);
		}
		None => {
			println!("application:        {}", config.app.display_name);
			println!("consecutive count:  0 (no attempts recorded)");
		}
	}

	let decision = guard.evaluate(now).await;
	println!(
		"next restart:       {}",
		if decision.is_allowed() { "allowed" } else { "blocked" }
	);

	Ok(())
}
