// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Watchdog configuration: TOML file plus environment overrides.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use vigil_core::RestartPolicy;
use vigil_notify::{SmtpConfig, WebhookConfig};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("parse error: {0}")]
	Parse(#[from] toml::de::Error),

	#[error("invalid configuration: {0}")]
	Invalid(String),
}

/// The supervised application's identity.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
	/// Process name as it appears in the process table and in event log
	/// messages (e.g. "myapp").
	pub display_name: String,

	/// Absolute path to the executable to relaunch.
	pub executable_path: PathBuf,
}

impl AppConfig {
	/// Filesystem-safe key for the durable restart-state record.
	pub fn state_key(&self) -> String {
		self.display_name
			.to_lowercase()
			.chars()
			.map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
			.collect()
	}
}

#[derive(Debug, Clone, Deserialize)]
pub struct GuardConfig {
	/// Maximum consecutive restart attempts before the guard blocks.
	#[serde(default = "default_max_attempts")]
	pub max_attempts: u32,

	/// Minutes after the last attempt before the counter is considered stale.
	#[serde(default = "default_reset_window_minutes")]
	pub reset_window_minutes: u64,
}

impl Default for GuardConfig {
	fn default() -> Self {
		Self {
			max_attempts: default_max_attempts(),
			reset_window_minutes: default_reset_window_minutes(),
		}
	}
}

impl GuardConfig {
	pub fn policy(&self) -> RestartPolicy {
		RestartPolicy {
			max_attempts: self.max_attempts,
			reset_window: chrono::Duration::minutes(self.reset_window_minutes as i64),
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollConfig {
	/// Seconds between polling cycles.
	#[serde(default = "default_poll_interval_secs")]
	pub interval_secs: u64,
}

impl Default for PollConfig {
	fn default() -> Self {
		Self {
			interval_secs: default_poll_interval_secs(),
		}
	}
}

impl PollConfig {
	pub fn interval(&self) -> Duration {
		Duration::from_secs(self.interval_secs)
	}
}

/// Which event log to scan for crash evidence.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventLogConfig {
	/// JSON-lines event log export on disk.
	File { path: PathBuf },
	/// The systemd journal, via `journalctl`.
	Journal {
		#[serde(default = "default_lookback_lines")]
		lookback_lines: u32,
		#[serde(default)]
		unit: Option<String>,
	},
}

impl Default for EventLogConfig {
	fn default() -> Self {
		Self::Journal {
			lookback_lines: default_lookback_lines(),
			unit: None,
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifyConfig {
	#[serde(default)]
	pub email: Option<SmtpConfig>,

	#[serde(default)]
	pub webhook: Option<WebhookConfig>,

	/// Also mirror notifications into the log stream. On by default so a
	/// misconfigured transport never leaves the operator fully blind.
	#[serde(default = "default_console")]
	pub console: bool,
}

impl Default for NotifyConfig {
	fn default() -> Self {
		Self {
			email: None,
			webhook: None,
			console: default_console(),
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
pub struct VigilConfig {
	pub app: AppConfig,

	#[serde(default)]
	pub guard: GuardConfig,

	#[serde(default)]
	pub poll: PollConfig,

	#[serde(default)]
	pub eventlog: EventLogConfig,

	#[serde(default)]
	pub notify: NotifyConfig,

	/// Directory for the durable restart-state record. Defaults to the
	/// platform state directory.
	#[serde(default)]
	pub state_dir: Option<PathBuf>,
}

fn default_max_attempts() -> u32 {
	3
}

fn default_reset_window_minutes() -> u64 {
	60
}

fn default_poll_interval_secs() -> u64 {
	10
}

fn default_lookback_lines() -> u32 {
	1000
}

fn default_console() -> bool {
	true
}

impl VigilConfig {
	/// Load and validate a configuration file, then apply environment
	/// overrides for transport secrets (`VIGIL_SMTP_PASSWORD`,
	/// `VIGIL_WEBHOOK_SECRET`).
	pub fn load(path: &Path) -> Result<Self, ConfigError> {
		let contents = std::fs::read_to_string(path)?;
		let mut config: VigilConfig = toml::from_str(&contents)?;

		if let Some(email) = &mut config.notify.email {
			if email.password.is_none() {
				email.password = env::var("VIGIL_SMTP_PASSWORD").ok();
			}
		}
		if let Some(webhook) = &mut config.notify.webhook {
			if webhook.secret.is_none() {
				webhook.secret = env::var("VIGIL_WEBHOOK_SECRET").ok();
			}
		}

		config.validate()?;
		Ok(config)
	}

	fn validate(&self) -> Result<(), ConfigError> {
		if self.app.display_name.trim().is_empty() {
			return Err(ConfigError::Invalid("app.display_name must not be empty".into()));
		}
		if !self.app.executable_path.is_absolute() {
			return Err(ConfigError::Invalid(format!(
				"app.executable_path must be absolute, got: {}",
				self.app.executable_path.display()
			)));
		}
		Ok(())
	}
}
