// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! SMTP notification transport.

use lettre::{
	message::{header::ContentType, Mailbox},
	transport::smtp::authentication::Credentials,
	AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use serde::Deserialize;
use std::env;
use std::fmt;

use crate::{Notification, NotificationSink, NotifyError};

/// Configuration for the SMTP transport.
///
/// Can be deserialized from the watchdog's TOML config or loaded from
/// `VIGIL_SMTP_*` environment variables via [`SmtpConfig::from_env`]. The
/// password is redacted from `Debug` output so it never reaches the logs.
#[derive(Clone, Deserialize)]
pub struct SmtpConfig {
	/// SMTP server hostname (e.g., "smtp.example.com").
	pub host: String,

	/// SMTP server port. Common values: 25 (unencrypted), 465 (TLS), 587 (STARTTLS).
	#[serde(default = "default_port")]
	pub port: u16,

	/// Optional username for SMTP authentication.
	#[serde(default)]
	pub username: Option<String>,

	/// Optional password for SMTP authentication. Usually supplied via the
	/// `VIGIL_SMTP_PASSWORD` environment variable rather than the config file.
	#[serde(default)]
	pub password: Option<String>,

	/// Email address to send from (e.g., "alert@example.com").
	pub from_address: String,

	/// Display name for the sender.
	#[serde(default = "default_from_name")]
	pub from_name: String,

	/// Operator address to deliver notifications to.
	pub to_address: String,

	/// Whether to use STARTTLS for the connection. Defaults to `true`.
	#[serde(default = "default_use_tls")]
	pub use_tls: bool,
}

fn default_port() -> u16 {
	587
}

fn default_from_name() -> String {
	"Vigil".to_string()
}

fn default_use_tls() -> bool {
	true
}

impl fmt::Debug for SmtpConfig {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SmtpConfig")
			.field("host", &self.host)
			.field("port", &self.port)
			.field("username", &self.username)
			.field("password", &self.password.as_ref().map(|_| "<redacted>"))
			.field("from_address", &self.from_address)
			.field("from_name", &self.from_name)
			.field("to_address", &self.to_address)
			.field("use_tls", &self.use_tls)
			.finish()
	}
}

impl SmtpConfig {
	/// Load SMTP configuration from environment variables.
	///
	/// # Environment Variables
	///
	/// - `VIGIL_SMTP_HOST` (required): SMTP server hostname
	/// - `VIGIL_SMTP_PORT` (optional, default: 587)
	/// - `VIGIL_SMTP_USERNAME` (optional)
	/// - `VIGIL_SMTP_PASSWORD` (optional)
	/// - `VIGIL_SMTP_FROM_ADDRESS` (required)
	/// - `VIGIL_SMTP_FROM_NAME` (optional, default: "Vigil")
	/// - `VIGIL_SMTP_TO_ADDRESS` (required)
	/// - `VIGIL_SMTP_USE_TLS` (optional, default: true)
	pub fn from_env() -> Result<Self, NotifyError> {
		let host = env::var("VIGIL_SMTP_HOST")
			.map_err(|_| NotifyError::Config("VIGIL_SMTP_HOST is required".into()))?;

		let port = env::var("VIGIL_SMTP_PORT")
			.unwrap_or_else(|_| "587".into())
			.parse()
			.map_err(|_| NotifyError::Config("VIGIL_SMTP_PORT must be a valid port number".into()))?;

		let username = env::var("VIGIL_SMTP_USERNAME").ok();
		let password = env::var("VIGIL_SMTP_PASSWORD").ok();

		let from_address = env::var("VIGIL_SMTP_FROM_ADDRESS")
			.map_err(|_| NotifyError::Config("VIGIL_SMTP_FROM_ADDRESS is required".into()))?;

		let from_name = env::var("VIGIL_SMTP_FROM_NAME").unwrap_or_else(|_| default_from_name());

		let to_address = env::var("VIGIL_SMTP_TO_ADDRESS")
			.map_err(|_| NotifyError::Config("VIGIL_SMTP_TO_ADDRESS is required".into()))?;

		let use_tls = env::var("VIGIL_SMTP_USE_TLS")
			.map(|v| v.to_lowercase() != "false" && v != "0")
			.unwrap_or(true);

		Ok(Self {
			host,
			port,
			username,
			password,
			from_address,
			from_name,
			to_address,
			use_tls,
		})
	}
}

/// SMTP notification sink.
///
/// The transport is built eagerly; the connection is made lazily per send.
pub struct EmailSink {
	transport: AsyncSmtpTransport<Tokio1Executor>,
	from_mailbox: Mailbox,
	to_mailbox: Mailbox,
}

impl std::fmt::Debug for EmailSink {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("EmailSink")
			.field("from_mailbox", &self.from_mailbox)
			.field("to_mailbox", &self.to_mailbox)
			.finish_non_exhaustive()
	}
}

impl EmailSink {
	#[tracing::instrument(
		name = "email_sink_new",
		skip(config),
		fields(host = %config.host, port = %config.port, use_tls = %config.use_tls)
	)]
	pub fn new(config: SmtpConfig) -> Result<Self, NotifyError> {
		let from_mailbox: Mailbox = format!("{} <{}>", config.from_name, config.from_address)
			.parse()
			.map_err(|e| NotifyError::Address(format!("{e}")))?;

		let to_mailbox: Mailbox = config
			.to_address
			.parse()
			.map_err(|e| NotifyError::Address(format!("{e}")))?;

		let builder = if config.use_tls {
			AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
				.map_err(|e| NotifyError::Connection(format!("{e}")))?
		} else {
			AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
		};

		let mut builder = builder.port(config.port);

		if let (Some(username), Some(password)) = (config.username, config.password) {
			builder = builder.credentials(Credentials::new(username, password));
		}

		let transport = builder.build();

		tracing::debug!("SMTP sink initialized");

		Ok(Self {
			transport,
			from_mailbox,
			to_mailbox,
		})
	}
}

#[async_trait::async_trait]
impl NotificationSink for EmailSink {
	fn name(&self) -> &str {
		"email"
	}

	#[tracing::instrument(name = "email_send", skip(self, notification), fields(subject = %notification.subject))]
	async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
		let message = Message::builder()
			.from(self.from_mailbox.clone())
			.to(self.to_mailbox.clone())
			.subject(notification.subject.clone())
			.header(ContentType::TEXT_PLAIN)
			.body(notification.body.clone())
			.map_err(|e| NotifyError::Send(format!("{e}")))?;

		self.transport
			.send(message)
			.await
			.map_err(|e| NotifyError::Send(format!("{e}")))?;

		tracing::info!("notification email sent");
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn config() -> SmtpConfig {
		SmtpConfig {
			host: "smtp.example.com".to_string(),
			port: 587,
			username: Some("alert".to_string()),
			password: Some("hunter2".to_string()),
			from_address: "alert@example.com".to_string(),
			from_name: "Vigil".to_string(),
			to_address: "ops@example.com".to_string(),
			use_tls: true,
		}
	}

	#[test]
	fn debug_redacts_password() {
		let rendered = format!("{:?}", config());
		assert!(rendered.contains("<redacted>"));
		assert!(!rendered.contains("hunter2"));
	}

	#[test]
	fn new_accepts_valid_addresses() {
		assert!(EmailSink::new(config()).is_ok());
	}

	#[test]
	fn new_rejects_invalid_from_address() {
		let mut cfg = config();
		cfg.from_address = "not an address".to_string();
		let err = EmailSink::new(cfg).unwrap_err();
		assert!(matches!(err, NotifyError::Address(_)));
	}

	#[test]
	fn toml_config_defaults_apply() {
		let cfg: SmtpConfig = toml::from_str(
			r#"
			host = "smtp.example.com"
			from_address = "alert@example.com"
			to_address = "ops@example.com"
			"#,
		)
		.unwrap();
		assert_eq!(cfg.port, 587);
		assert!(cfg.use_tls);
		assert_eq!(cfg.from_name, "Vigil");
		assert!(cfg.password.is_none());
	}
}
