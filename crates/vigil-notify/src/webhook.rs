// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Webhook notification transport with HMAC-SHA256 payload signing.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;

use crate::{Notification, NotificationSink, NotifyError};

type HmacSha256 = Hmac<Sha256>;

/// Signature header attached to signed deliveries.
pub const SIGNATURE_HEADER: &str = "x-vigil-signature";

/// Compute an HMAC-SHA256 signature for a payload.
///
/// Returns the hex-encoded signature without any prefix.
pub fn compute_hmac_sha256(secret: &[u8], payload: &[u8]) -> String {
	let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size");
	mac.update(payload);
	let result = mac.finalize();
	hex::encode(result.into_bytes())
}

/// Verify an HMAC-SHA256 signature for a payload.
///
/// Receivers of vigil webhooks can use this to validate the
/// [`SIGNATURE_HEADER`] value (with the `sha256=` prefix stripped).
pub fn verify_hmac_sha256(secret: &[u8], payload: &[u8], signature: &str) -> bool {
	let expected_bytes = match hex::decode(signature) {
		Ok(bytes) => bytes,
		Err(_) => return false,
	};

	let mut mac = match HmacSha256::new_from_slice(secret) {
		Ok(m) => m,
		Err(_) => return false,
	};

	mac.update(payload);
	mac.verify_slice(&expected_bytes).is_ok()
}

/// Configuration for the webhook transport.
#[derive(Clone, Deserialize)]
pub struct WebhookConfig {
	/// Endpoint to POST notifications to.
	pub url: String,

	/// Optional shared secret. When set, deliveries carry an
	/// `x-vigil-signature: sha256=<hex>` header over the request body.
	#[serde(default)]
	pub secret: Option<String>,
}

impl fmt::Debug for WebhookConfig {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("WebhookConfig")
			.field("url", &self.url)
			.field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
			.finish()
	}
}

/// Wire format of a webhook delivery.
#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
	subject: &'a str,
	body: &'a str,
	sent_at: DateTime<Utc>,
}

/// Webhook notification sink.
#[derive(Debug)]
pub struct WebhookSink {
	client: reqwest::Client,
	config: WebhookConfig,
}

impl WebhookSink {
	pub fn new(config: WebhookConfig) -> Result<Self, NotifyError> {
		if config.url.is_empty() {
			return Err(NotifyError::Config("webhook url must not be empty".into()));
		}

		let client = reqwest::Client::builder()
			.build()
			.map_err(|e| NotifyError::Connection(format!("{e}")))?;

		Ok(Self { client, config })
	}
}

#[async_trait::async_trait]
impl NotificationSink for WebhookSink {
	fn name(&self) -> &str {
		"webhook"
	}

	#[tracing::instrument(name = "webhook_send", skip(self, notification), fields(url = %self.config.url))]
	async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
		let payload = WebhookPayload {
			subject: &notification.subject,
			body: &notification.body,
			sent_at: Utc::now(),
		};

		let body = serde_json::to_vec(&payload).map_err(|e| NotifyError::Send(format!("{e}")))?;

		let mut request = self
			.client
			.post(&self.config.url)
			.header(reqwest::header::CONTENT_TYPE, "application/json");

		if let Some(secret) = &self.config.secret {
			let signature = compute_hmac_sha256(secret.as_bytes(), &body);
			request = request.header(SIGNATURE_HEADER, format!("sha256={signature}"));
		}

		let response = request
			.body(body)
			.send()
			.await
			.map_err(|e| NotifyError::Connection(format!("{e}")))?;

		let status = response.status();
		if !status.is_success() {
			return Err(NotifyError::Status(status.as_u16()));
		}

		tracing::info!("notification webhook delivered");
		Ok(())
	}
}
