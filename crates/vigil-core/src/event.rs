// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Crash event types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Fault category recorded by the OS application event log.
///
/// Only these categories qualify as crash evidence; anything else in the log
/// is ignored. The numeric codes are the event ids the OS assigns to each
/// category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultSignature {
	/// The application terminated unexpectedly (event id 1000).
	ProcessTerminated,
	/// A fault bucket was recorded for the application (event id 1001).
	FaultBucket,
	/// The application stopped responding (event id 1002).
	HangDetected,
	/// The service crashed and the service manager scheduled a restart
	/// (event id 7031).
	ServiceCrashRestart,
}

impl FaultSignature {
	/// Every qualifying fault category.
	pub const ALL: [FaultSignature; 4] = [
		FaultSignature::ProcessTerminated,
		FaultSignature::FaultBucket,
		FaultSignature::HangDetected,
		FaultSignature::ServiceCrashRestart,
	];

	/// The numeric event id for this category.
	pub fn code(&self) -> u32 {
		match self {
			Self::ProcessTerminated => 1000,
			Self::FaultBucket => 1001,
			Self::HangDetected => 1002,
			Self::ServiceCrashRestart => 7031,
		}
	}

	/// Map a numeric event id back to a fault category, if it qualifies.
	pub fn from_code(code: u32) -> Option<Self> {
		match code {
			1000 => Some(Self::ProcessTerminated),
			1001 => Some(Self::FaultBucket),
			1002 => Some(Self::HangDetected),
			7031 => Some(Self::ServiceCrashRestart),
			_ => None,
		}
	}
}

impl fmt::Display for FaultSignature {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::ProcessTerminated => write!(f, "process_terminated"),
			Self::FaultBucket => write!(f, "fault_bucket"),
			Self::HangDetected => write!(f, "hang_detected"),
			Self::ServiceCrashRestart => write!(f, "service_crash_restart"),
		}
	}
}

impl FromStr for FaultSignature {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"process_terminated" => Ok(Self::ProcessTerminated),
			"fault_bucket" => Ok(Self::FaultBucket),
			"hang_detected" => Ok(Self::HangDetected),
			"service_crash_restart" => Ok(Self::ServiceCrashRestart),
			_ => Err(format!("unknown fault signature: {}", s)),
		}
	}
}

/// A single qualifying entry from the OS application event log.
///
/// Crash events are reconstructed on every query and never persisted by the
/// watchdog; the log itself is the source of truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrashEvent {
	/// When the OS logged the crash.
	pub timestamp: DateTime<Utc>,
	pub signature: FaultSignature,
	/// Free-text description from the log entry.
	pub message: String,
}

impl CrashEvent {
	/// Whether this entry refers to the supervised application.
	///
	/// Relevance is a substring match on the executable name, so
	/// `"myapp"` matches log messages mentioning `myapp` or `myapp.exe`.
	pub fn mentions(&self, app_name: &str) -> bool {
		self.message.contains(app_name)
	}

	/// One-line diagnostic rendering for logs and notification bodies.
	pub fn summary(&self) -> String {
		format!(
			"{} | {} | message: {}",
			self.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
			self.signature,
			self.message
		)
	}
}

/// The most recent event wins.
pub fn latest<I>(events: I) -> Option<CrashEvent>
where
	I: IntoIterator<Item = CrashEvent>,
{
	events.into_iter().max_by_key(|e| e.timestamp)
}
