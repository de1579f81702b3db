// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Operator notification transports for the vigil watchdog.
//!
//! The watchdog core only ever needs one capability: deliver a subject and a
//! body to a human. This crate defines that capability as
//! [`NotificationSink`] and provides three transports:
//!
//! - [`EmailSink`]: SMTP via [`lettre`] (STARTTLS, optional authentication)
//! - [`WebhookSink`]: JSON POST via [`reqwest`], optionally signed with
//!   HMAC-SHA256
//! - [`ConsoleSink`]: structured log output, the dev/ops fallback
//!
//! Delivery failure is terminal for a message. Sinks never retry and never
//! panic; the caller logs the error and moves on.

pub mod console;
pub mod email;
pub mod webhook;

pub use console::ConsoleSink;
pub use email::{EmailSink, SmtpConfig};
pub use webhook::{compute_hmac_sha256, verify_hmac_sha256, WebhookConfig, WebhookSink};

use async_trait::async_trait;

/// Errors that can occur while delivering a notification.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
	/// Invalid email address format.
	#[error("invalid address: {0}")]
	Address(String),

	/// Failed to reach the transport endpoint.
	#[error("connection failed: {0}")]
	Connection(String),

	/// The transport accepted the connection but refused the message.
	#[error("send failed: {0}")]
	Send(String),

	/// Invalid transport configuration (missing required fields).
	#[error("invalid configuration: {0}")]
	Config(String),

	/// The webhook endpoint answered with a non-success status.
	#[error("unexpected http status: {0}")]
	Status(u16),
}

/// A human-readable message for the operator. Transient; no retry state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
	pub subject: String,
	pub body: String,
}

impl Notification {
	pub fn new(subject: impl Into<String>, body: impl Into<String>) -> Self {
		Self {
			subject: subject.into(),
			body: body.into(),
		}
	}
}

/// Capability to deliver a [`Notification`] to an operator.
///
/// Every transport is treated identically by the watchdog; only this
/// two-string contract matters.
#[async_trait]
pub trait NotificationSink: Send + Sync {
	/// Transport name for log lines.
	fn name(&self) -> &str;

	async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}
