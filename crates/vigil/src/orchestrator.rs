// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The watchdog cycle: detect, decide, restart, record, notify.
//!
//! One cycle runs the same sequence regardless of how it was triggered:
//!
//! ```text
//! Idle -> Detecting -> Deciding -> Restarting -> Recording -> Notifying -> Idle
//!                          \-> Blocked ------------------------^
//! ```
//!
//! In triggered mode the detection result never gates the cycle (being
//! invoked at all means a crash was already detected externally). In polling
//! mode a cycle only proceeds when fresh crash evidence shows up. Ordering
//! within a cycle is fixed: kill before launch, launch before record, record
//! before notify. No error inside a step escapes the cycle.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use vigil_core::{CrashEvent, GuardDecision};
use vigil_notify::{Notification, NotificationSink};

use crate::config::AppConfig;
use crate::eventlog::CrashEventSource;
use crate::guard::RestartGuard;
use crate::process::ProcessControl;

/// What a single cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
	/// Polling gate: no fresh crash evidence, nothing to do.
	NoCrash,
	/// The guard refused another restart; the operator was alerted.
	Blocked,
	/// Kill/launch ran and the attempt was recorded.
	Restarted { launch_ok: bool },
}

pub struct Watchdog {
	app: AppConfig,
	source: Arc<dyn CrashEventSource>,
	control: Arc<dyn ProcessControl>,
	guard: RestartGuard,
	sinks: Vec<Arc<dyn NotificationSink>>,
	/// Polling mode only: require fresh crash evidence before acting.
	gate_on_detection: bool,
	/// Newest crash timestamp already acted on; suppresses re-triggering on
	/// the same log entry every poll tick.
	last_handled: Option<DateTime<Utc>>,
}

impl Watchdog {
	pub fn new(
		app: AppConfig,
		source: Arc<dyn CrashEventSource>,
		control: Arc<dyn ProcessControl>,
		guard: RestartGuard,
		sinks: Vec<Arc<dyn NotificationSink>>,
		gate_on_detection: bool,
	) -> Self {
		Self {
			app,
			source,
			control,
			guard,
			sinks,
			gate_on_detection,
			last_handled: None,
		}
	}

	/// Run one full cycle. Never fails; every internal error is logged and
	/// absorbed so the cycle always reaches its notification step.
	pub async fn run_cycle(&mut self) -> CycleOutcome {
		let app_name = self.app.display_name.clone();

		// Detecting
		let crash = self.source.find_latest_crash(&app_name).await;
		match &crash {
			Some(event) => info!(app = %app_name, crash = %event.summary(), "crash evidence found"),
			None => warn!(app = %app_name, "no crash evidence in the event log"),
		}

		if self.gate_on_detection {
			let fresh = match &crash {
				Some(event) => self.last_handled.map_or(true, |seen| event.timestamp > seen),
				None => false,
			};
			if !fresh {
				debug!(app = %app_name, "no fresh crash evidence, staying idle");
				return CycleOutcome::NoCrash;
			}
		}

		if let Some(event) = &crash {
			self.last_handled = Some(event.timestamp);
		}

		// Deciding
		let now = Utc::now();
		let decision = self.guard.evaluate(now).await;

		if let GuardDecision::Block { reason } = decision {
			error!(app = %app_name, reason = %reason, "restart loop detected, refusing to restart");
			let notification = self.blocked_notification(crash.as_ref());
			self.notify(&notification).await;
			return CycleOutcome::Blocked;
		}

		// Restarting: kill unconditionally, even without crash evidence, so a
		// half-dead instance can never end up duplicated by the launch.
		let report = self.control.kill_existing(&app_name).await;
		info!(
			app = %app_name,
			matched = report.matched,
			terminated = report.terminated,
			failed = report.failed,
			"kill sweep finished"
		);

		let launch_error = match self.control.launch(&self.app.executable_path).await {
			Ok(pid) => {
				info!(app = %app_name, pid = pid, "application relaunched");
				None
			}
			Err(e) => {
				error!(app = %app_name, error = %e, "application launch failed");
				Some(e.to_string())
			}
		};

		// Recording: a failed launch still consumes an attempt, otherwise a
		// bad executable path turns the poll loop into a retry storm.
		let state = self.guard.record_attempt(now).await;
		info!(app = %app_name, consecutive_count = state.consecutive_count, "restart attempt recorded");

		// Notifying
		let notification = self.restarted_notification(crash.as_ref(), launch_error.as_deref());
		self.notify(&notification).await;

		CycleOutcome::Restarted {
			launch_ok: launch_error.is_none(),
		}
	}

	/// Polling mode: run cycles strictly one after another, sleeping a fixed
	/// interval in between. The sleep aborts promptly on shutdown; a cycle
	/// already in flight always finishes first.
	pub async fn run_polling(&mut self, interval: Duration, mut shutdown: broadcast::Receiver<()>) {
		info!(
			app = %self.app.display_name,
			interval_secs = interval.as_secs(),
			"watchdog polling started"
		);

		loop {
			let _ = self.run_cycle().await;

			tokio::select! {
				_ = tokio::time::sleep(interval) => {}
				_ = shutdown.recv() => {
					info!(app = %self.app.display_name, "shutdown requested, stopping watchdog");
					break;
				}
			}
		}
	}

	async fn notify(&self, notification: &Notification) {
		for sink in &self.sinks {
			if let Err(e) = sink.send(notification).await {
				error!(
					sink = sink.name(),
					error = %e,
					"notification delivery failed"
				);
			}
		}
	}

	fn restarted_notification(
		&self,
		crash: Option<&CrashEvent>,
		launch_error: Option<&str>,
	) -> Notification {
		let app = &self.app.display_name;
		let mut body = format!("{app} crashed and was restarted.");

		if let Some(event) = crash {
			body.push_str("\n\n");
			body.push_str(&event.summary());
		}
		if let Some(error) = launch_error {
			body.push_str(&format!("\n\nLaunch failed: {error}"));
		}

		Notification::new(format!("{app} restart notice"), body)
	}

	fn blocked_notification(&self, crash: Option<&CrashEvent>) -> Notification {
		let app = &self.app.display_name;
		let max = self.guard.policy().max_attempts;
		let mut body = format!(
			"{app} crashed {max} times in a row. Automatic restarts are paused; manual intervention required."
		);

		if let Some(event) = crash {
			body.push_str("\n\n");
			body.push_str(&event.summary());
		}

		Notification::new(format!("{app} restart loop warning"), body)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::process::{KillReport, ProcessError};
	use crate::store::{StateStore, StoreError};
	use async_trait::async_trait;
	use chrono::Duration as ChronoDuration;
	use std::collections::HashMap;
	use std::path::{Path, PathBuf};
	use std::sync::Mutex;
	use vigil_core::{FaultSignature, RestartPolicy, RestartState};

	struct MemoryStore {
		records: Mutex<HashMap<String, RestartState>>,
	}

	impl MemoryStore {
		fn new() -> Arc<Self> {
			Arc::new(Self {
				records: Mutex::new(HashMap::new()),
			})
		}

		fn seeded(count: u32, age_minutes: i64) -> Arc<Self> {
			let store = Self::new();
			store.records.lock().unwrap().insert(
				"myapp".to_string(),
				RestartState {
					consecutive_count: count,
					last_attempt_at: Utc::now() - ChronoDuration::minutes(age_minutes),
				},
			);
			store
		}

		fn count(&self) -> Option<u32> {
			self.records
				.lock()
				.unwrap()
				.get("myapp")
				.map(|s| s.consecutive_count)
		}
	}

	#[async_trait]
	impl StateStore for MemoryStore {
		async fn load(&self, key: &str) -> Result<Option<RestartState>, StoreError> {
			Ok(self.records.lock().unwrap().get(key).cloned())
		}

		async fn save(&self, key: &str, state: &RestartState) -> Result<(), StoreError> {
			self.records.lock().unwrap().insert(key.to_string(), state.clone());
			Ok(())
		}
	}

	struct StaticSource {
		event: Option<CrashEvent>,
	}

	#[async_trait]
	impl CrashEventSource for StaticSource {
		async fn find_latest_crash(&self, _app_name: &str) -> Option<CrashEvent> {
			self.event.clone()
		}
	}

	#[derive(Default)]
	struct RecordingControl {
		kills: Mutex<Vec<String>>,
		launches: Mutex<Vec<PathBuf>>,
		fail_launch: bool,
	}

	#[async_trait]
	impl ProcessControl for RecordingControl {
		async fn kill_existing(&self, app_name: &str) -> KillReport {
			self.kills.lock().unwrap().push(app_name.to_string());
			KillReport::default()
		}

		async fn launch(&self, executable: &Path) -> Result<u32, ProcessError> {
			self.launches.lock().unwrap().push(executable.to_path_buf());
			if self.fail_launch {
				Err(ProcessError::NotFound(executable.to_path_buf()))
			} else {
				Ok(4242)
			}
		}
	}

	#[derive(Default)]
	struct RecordingSink {
		sent: Mutex<Vec<Notification>>,
	}

	#[async_trait]
	impl NotificationSink for RecordingSink {
		fn name(&self) -> &str {
			"recording"
		}

		async fn send(&self, notification: &Notification) -> Result<(), vigil_notify::NotifyError> {
			self.sent.lock().unwrap().push(notification.clone());
			Ok(())
		}
	}

	struct FailingSink;

	#[async_trait]
	impl NotificationSink for FailingSink {
		fn name(&self) -> &str {
			"failing"
		}

		async fn send(&self, _notification: &Notification) -> Result<(), vigil_notify::NotifyError> {
			Err(vigil_notify::NotifyError::Connection("unreachable".into()))
		}
	}

	fn app() -> AppConfig {
		AppConfig {
			display_name: "myapp".to_string(),
			executable_path: PathBuf::from("/opt/myapp/bin/myapp"),
		}
	}

	fn crash_event(age_minutes: i64) -> CrashEvent {
		CrashEvent {
			timestamp: Utc::now() - ChronoDuration::minutes(age_minutes),
			signature: FaultSignature::ProcessTerminated,
			message: "Faulting application name: myapp.exe".to_string(),
		}
	}

	struct Fixture {
		watchdog: Watchdog,
		store: Arc<MemoryStore>,
		control: Arc<RecordingControl>,
		sink: Arc<RecordingSink>,
	}

	fn fixture(
		store: Arc<MemoryStore>,
		event: Option<CrashEvent>,
		fail_launch: bool,
		gate_on_detection: bool,
	) -> Fixture {
		let control = Arc::new(RecordingControl {
			fail_launch,
			..RecordingControl::default()
		});
		let sink = Arc::new(RecordingSink::default());
		let guard = RestartGuard::new(store.clone(), RestartPolicy::default(), "myapp");

		let watchdog = Watchdog::new(
			app(),
			Arc::new(StaticSource { event }),
			control.clone(),
			guard,
			vec![sink.clone()],
			gate_on_detection,
		);

		Fixture {
			watchdog,
			store,
			control,
			sink,
		}
	}

	#[tokio::test]
	async fn crash_with_clean_slate_restarts_once() {
		let mut f = fixture(MemoryStore::new(), Some(crash_event(1)), false, false);

		let outcome = f.watchdog.run_cycle().await;

		assert_eq!(outcome, CycleOutcome::Restarted { launch_ok: true });
		assert_eq!(f.control.kills.lock().unwrap().len(), 1);
		assert_eq!(f.control.launches.lock().unwrap().len(), 1);
		assert_eq!(f.store.count(), Some(1));

		let sent = f.sink.sent.lock().unwrap();
		assert_eq!(sent.len(), 1);
		assert_eq!(sent[0].subject, "myapp restart notice");
		assert!(sent[0].body.contains("Faulting application name"));
	}

	#[tokio::test]
	async fn exhausted_counter_blocks_and_alerts() {
		let mut f = fixture(MemoryStore::seeded(3, 5), Some(crash_event(1)), false, false);

		let outcome = f.watchdog.run_cycle().await;

		assert_eq!(outcome, CycleOutcome::Blocked);
		assert!(f.control.kills.lock().unwrap().is_empty());
		assert!(f.control.launches.lock().unwrap().is_empty());
		assert_eq!(f.store.count(), Some(3));

		let sent = f.sink.sent.lock().unwrap();
		assert_eq!(sent.len(), 1);
		assert_eq!(sent[0].subject, "myapp restart loop warning");
		assert!(sent[0].body.contains("3 times in a row"));
	}

	#[tokio::test]
	async fn stale_counter_resets_and_restarts() {
		let mut f = fixture(MemoryStore::seeded(3, 90), Some(crash_event(1)), false, false);

		let outcome = f.watchdog.run_cycle().await;

		assert_eq!(outcome, CycleOutcome::Restarted { launch_ok: true });
		assert_eq!(f.store.count(), Some(1));
	}

	#[tokio::test]
	async fn launch_failure_still_records_and_notifies() {
		let mut f = fixture(MemoryStore::new(), Some(crash_event(1)), true, false);

		let outcome = f.watchdog.run_cycle().await;

		assert_eq!(outcome, CycleOutcome::Restarted { launch_ok: false });
		assert_eq!(f.control.kills.lock().unwrap().len(), 1);
		assert_eq!(f.control.launches.lock().unwrap().len(), 1);
		assert_eq!(f.store.count(), Some(1));

		let sent = f.sink.sent.lock().unwrap();
		assert_eq!(sent.len(), 1);
		assert_eq!(sent[0].subject, "myapp restart notice");
		assert!(sent[0].body.contains("Launch failed"));
	}

	#[tokio::test]
	async fn triggered_mode_restarts_without_crash_evidence() {
		let mut f = fixture(MemoryStore::new(), None, false, false);

		let outcome = f.watchdog.run_cycle().await;

		assert_eq!(outcome, CycleOutcome::Restarted { launch_ok: true });
		assert_eq!(f.control.kills.lock().unwrap().len(), 1);
	}

	#[tokio::test]
	async fn polling_mode_stays_idle_without_crash_evidence() {
		let mut f = fixture(MemoryStore::new(), None, false, true);

		let outcome = f.watchdog.run_cycle().await;

		assert_eq!(outcome, CycleOutcome::NoCrash);
		assert!(f.control.kills.lock().unwrap().is_empty());
		assert!(f.sink.sent.lock().unwrap().is_empty());
		assert_eq!(f.store.count(), None);
	}

	#[tokio::test]
	async fn polling_mode_does_not_rehandle_the_same_event() {
		let mut f = fixture(MemoryStore::new(), Some(crash_event(1)), false, true);

		assert_eq!(
			f.watchdog.run_cycle().await,
			CycleOutcome::Restarted { launch_ok: true }
		);
		assert_eq!(f.watchdog.run_cycle().await, CycleOutcome::NoCrash);

		assert_eq!(f.control.launches.lock().unwrap().len(), 1);
		assert_eq!(f.store.count(), Some(1));
	}

	#[tokio::test]
	async fn sink_failure_never_changes_the_outcome() {
		let store = MemoryStore::new();
		let control = Arc::new(RecordingControl::default());
		let guard = RestartGuard::new(store.clone(), RestartPolicy::default(), "myapp");
		let mut watchdog = Watchdog::new(
			app(),
			Arc::new(StaticSource {
				event: Some(crash_event(1)),
			}),
			control.clone(),
			guard,
			vec![Arc::new(FailingSink)],
			false,
		);

		let outcome = watchdog.run_cycle().await;

		assert_eq!(outcome, CycleOutcome::Restarted { launch_ok: true });
		assert_eq!(store.count(), Some(1));
	}

	#[tokio::test]
	async fn notification_fans_out_to_every_sink() {
		let store = MemoryStore::new();
		let first = Arc::new(RecordingSink::default());
		let second = Arc::new(RecordingSink::default());
		let guard = RestartGuard::new(store, RestartPolicy::default(), "myapp");
		let mut watchdog = Watchdog::new(
			app(),
			Arc::new(StaticSource {
				event: Some(crash_event(1)),
			}),
			Arc::new(RecordingControl::default()),
			guard,
			vec![first.clone(), Arc::new(FailingSink), second.clone()],
			false,
		);

		watchdog.run_cycle().await;

		assert_eq!(first.sent.lock().unwrap().len(), 1);
		assert_eq!(second.sent.lock().unwrap().len(), 1);
	}

	#[tokio::test]
	async fn shutdown_aborts_the_polling_sleep() {
		let mut f = fixture(MemoryStore::new(), None, false, true);
		let (tx, rx) = broadcast::channel(1);

		// Shutdown already requested: the loop must run exactly one cycle and
		// return without waiting out the interval.
		tx.send(()).unwrap();

		tokio::time::timeout(
			Duration::from_secs(5),
			f.watchdog.run_polling(Duration::from_secs(3600), rx),
		)
		.await
		.expect("polling loop did not honor shutdown");
	}
}
