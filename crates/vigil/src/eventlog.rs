// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Crash evidence sources backed by the OS application event log.
//!
//! Both sources share one failure policy: any error opening, reading or
//! parsing the log degrades to "no crash found". A broken log must never
//! block the restart path; the evidence is for diagnostics, the decision
//! belongs to the guard.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

use vigil_core::{latest, CrashEvent, FaultSignature};

/// Capability to find the most recent crash evidence for an application.
///
/// Infallible by contract: implementations log read failures and return
/// `None`.
#[async_trait]
pub trait CrashEventSource: Send + Sync {
	async fn find_latest_crash(&self, app_name: &str) -> Option<CrashEvent>;
}

/// One entry of a JSON-lines application event log export.
#[derive(Debug, Deserialize)]
struct EventRecord {
	timestamp: DateTime<Utc>,
	event_id: u32,
	message: String,
}

/// Reads a JSON-lines event log export from disk.
///
/// Hosts that mirror their application event log to a file (one JSON object
/// per line with `timestamp`, `event_id` and `message` fields) point the
/// watchdog here. The file is only ever read.
pub struct EventLogFile {
	path: PathBuf,
}

impl EventLogFile {
	pub fn new(path: PathBuf) -> Self {
		Self { path }
	}
}

#[async_trait]
impl CrashEventSource for EventLogFile {
	async fn find_latest_crash(&self, app_name: &str) -> Option<CrashEvent> {
		let contents = match tokio::fs::read_to_string(&self.path).await {
			Ok(contents) => contents,
			Err(e) => {
				warn!(
					path = %self.path.display(),
					error = %e,
					"event log unreadable, proceeding without crash evidence"
				);
				return None;
			}
		};

		let events = contents.lines().filter_map(|line| {
			let line = line.trim();
			if line.is_empty() {
				return None;
			}

			let record: EventRecord = match serde_json::from_str(line) {
				Ok(record) => record,
				Err(e) => {
					debug!(error = %e, "skipping unparseable event log line");
					return None;
				}
			};

			let signature = FaultSignature::from_code(record.event_id)?;
			let event = CrashEvent {
				timestamp: record.timestamp,
				signature,
				message: record.message,
			};
			event.mentions(app_name).then_some(event)
		});

		latest(events)
	}
}

/// Queries the systemd journal via `journalctl --output=json`.
///
/// The journal has no numeric fault categories, so well-known message
/// phrases are mapped onto the fixed signature set instead; the allow-list
/// itself is unchanged.
pub struct JournalSource {
	lookback_lines: u32,
	unit: Option<String>,
}

impl JournalSource {
	pub fn new(lookback_lines: u32, unit: Option<String>) -> Self {
		Self {
			lookback_lines,
			unit,
		}
	}
}

fn classify(message: &str) -> Option<FaultSignature> {
	if message.contains("dumped core") || message.contains("core dumped") {
		Some(FaultSignature::ProcessTerminated)
	} else if message.contains("watchdog timeout") || message.contains("stopped responding") {
		Some(FaultSignature::HangDetected)
	} else if message.contains("Scheduled restart job") {
		Some(FaultSignature::ServiceCrashRestart)
	} else if message.contains("Failed with result") {
		Some(FaultSignature::FaultBucket)
	} else {
		None
	}
}

fn parse_journal_line(line: &str, app_name: &str) -> Option<CrashEvent> {
	let value: serde_json::Value = serde_json::from_str(line).ok()?;

	let message = value.get("MESSAGE")?.as_str()?;
	if !message.contains(app_name) {
		return None;
	}

	let signature = classify(message)?;

	let micros: i64 = value.get("__REALTIME_TIMESTAMP")?.as_str()?.parse().ok()?;
	let timestamp = DateTime::from_timestamp_micros(micros)?;

	Some(CrashEvent {
		timestamp,
		signature,
		message: message.to_string(),
	})
}

#[async_trait]
impl CrashEventSource for JournalSource {
	async fn find_latest_crash(&self, app_name: &str) -> Option<CrashEvent> {
		let mut command = tokio::process::Command::new("journalctl");
		command
			.arg("--output=json")
			.arg("--no-pager")
			.arg("-n")
			.arg(self.lookback_lines.to_string());

		if let Some(unit) = &self.unit {
			command.arg("-u").arg(unit);
		}

		let output = match command.output().await {
			Ok(output) => output,
			Err(e) => {
				warn!(error = %e, "journalctl unavailable, proceeding without crash evidence");
				return None;
			}
		};

		if !output.status.success() {
			warn!(
				status = %output.status,
				"journalctl query failed, proceeding without crash evidence"
			);
			return None;
		}

		let stdout = String::from_utf8_lossy(&output.stdout);
		let events = stdout
			.lines()
			.filter_map(|line| parse_journal_line(line, app_name));

		latest(events)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;
	use tempfile::NamedTempFile;

	fn log_file(lines: &[&str]) -> NamedTempFile {
		let mut file = NamedTempFile::new().unwrap();
		for line in lines {
			writeln!(file, "{line}").unwrap();
		}
		file.flush().unwrap();
		file
	}

	#[tokio::test]
	async fn picks_latest_qualifying_entry() {
		let file = log_file(&[
			r#"{"timestamp":"2025-06-01T10:00:00Z","event_id":1000,"message":"Faulting application name: myapp.exe"}"#,
			r#"{"timestamp":"2025-06-01T12:00:00Z","event_id":1002,"message":"The program myapp.exe stopped interacting"}"#,
			r#"{"timestamp":"2025-06-01T11:00:00Z","event_id":1001,"message":"Fault bucket for myapp.exe"}"#,
		]);
		let source = EventLogFile::new(file.path().to_path_buf());

		let event = source.find_latest_crash("myapp").await.unwrap();
		assert_eq!(event.signature, FaultSignature::HangDetected);
		assert_eq!(
			event.timestamp,
			"2025-06-01T12:00:00Z".parse::<DateTime<Utc>>().unwrap()
		);
	}

	#[tokio::test]
	async fn ignores_other_apps_and_unlisted_event_ids() {
		let file = log_file(&[
			r#"{"timestamp":"2025-06-01T10:00:00Z","event_id":1000,"message":"Faulting application name: otherapp.exe"}"#,
			r#"{"timestamp":"2025-06-01T11:00:00Z","event_id":4625,"message":"An account failed to log on: myapp.exe"}"#,
		]);
		let source = EventLogFile::new(file.path().to_path_buf());

		assert_eq!(source.find_latest_crash("myapp").await, None);
	}

	#[tokio::test]
	async fn malformed_lines_are_skipped() {
		let file = log_file(&[
			"not json at all",
			r#"{"timestamp":"2025-06-01T10:00:00Z","event_id":1000,"message":"Faulting application name: myapp.exe"}"#,
			r#"{"event_id":1000}"#,
		]);
		let source = EventLogFile::new(file.path().to_path_buf());

		let event = source.find_latest_crash("myapp").await.unwrap();
		assert_eq!(event.signature, FaultSignature::ProcessTerminated);
	}

	#[tokio::test]
	async fn missing_file_degrades_to_none() {
		let source = EventLogFile::new(PathBuf::from("/no/such/event/log.jsonl"));
		assert_eq!(source.find_latest_crash("myapp").await, None);
	}

	#[test]
	fn journal_line_with_coredump_classifies_as_process_terminated() {
		let line = r#"{"MESSAGE":"Process 4242 (myapp) of user 1000 dumped core.","__REALTIME_TIMESTAMP":"1748800000000000"}"#;
		let event = parse_journal_line(line, "myapp").unwrap();
		assert_eq!(event.signature, FaultSignature::ProcessTerminated);
		assert_eq!(event.timestamp.timestamp_micros(), 1_748_800_000_000_000);
	}

	#[test]
	fn journal_line_for_other_app_is_ignored() {
		let line = r#"{"MESSAGE":"Process 4242 (otherapp) dumped core.","__REALTIME_TIMESTAMP":"1748800000000000"}"#;
		assert_eq!(parse_journal_line(line, "myapp"), None);
	}

	#[test]
	fn journal_line_without_crash_phrase_is_ignored() {
		let line = r#"{"MESSAGE":"myapp started successfully","__REALTIME_TIMESTAMP":"1748800000000000"}"#;
		assert_eq!(parse_journal_line(line, "myapp"), None);
	}

	#[test]
	fn classify_maps_known_phrases() {
		assert_eq!(
			classify("myapp.service: Failed with result 'core-dump'."),
			Some(FaultSignature::FaultBucket)
		);
		assert_eq!(
			classify("myapp.service: watchdog timeout!"),
			Some(FaultSignature::HangDetected)
		);
		assert_eq!(
			classify("myapp.service: Scheduled restart job, restart counter is at 2."),
			Some(FaultSignature::ServiceCrashRestart)
		);
		assert_eq!(classify("myapp deployed"), None);
	}
}
