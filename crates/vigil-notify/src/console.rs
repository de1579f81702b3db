// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Console notification transport.

use crate::{Notification, NotificationSink, NotifyError};

/// Writes notifications to the log stream.
///
/// Useful during development and as a last-resort transport on hosts with no
/// SMTP or webhook endpoint configured; the daemon's log sink is then the
/// notification channel.
#[derive(Debug, Default)]
pub struct ConsoleSink;

impl ConsoleSink {
	pub fn new() -> Self {
		Self
	}
}

#[async_trait::async_trait]
impl NotificationSink for ConsoleSink {
	fn name(&self) -> &str {
		"console"
	}

	async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
		tracing::info!(
			subject = %notification.subject,
			body = %notification.body,
			"operator notification"
		);
		Ok(())
	}
}
