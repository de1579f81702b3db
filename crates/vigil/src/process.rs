// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Process termination and relaunch for the supervised application.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::{error, info, warn};

/// How long to wait for a killed process to actually exit.
const KILL_WAIT_TIMEOUT: Duration = Duration::from_secs(5);
const KILL_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
	#[error("executable not found: {}", .0.display())]
	NotFound(PathBuf),

	#[error("not a regular file: {}", .0.display())]
	NotAFile(PathBuf),

	#[error("spawn failed: {0}")]
	Spawn(#[from] std::io::Error),
}

/// Outcome of a kill sweep. Zero matches is success, not failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KillReport {
	/// Processes whose name matched the supervised application.
	pub matched: usize,
	/// Matches that exited within the kill timeout.
	pub terminated: usize,
	/// Matches where the kill request failed or the process outlived the timeout.
	pub failed: usize,
}

/// Capability to terminate and relaunch the supervised application.
#[async_trait]
pub trait ProcessControl: Send + Sync {
	/// Kill every running instance matching `app_name`, waiting a bounded
	/// time per process. Per-process failures are logged, never raised.
	async fn kill_existing(&self, app_name: &str) -> KillReport;

	/// Start a fresh instance. The child is not supervised after spawn.
	async fn launch(&self, executable: &Path) -> Result<u32, ProcessError>;
}

/// [`ProcessControl`] backed by the OS process table.
#[derive(Debug, Default)]
pub struct SystemProcessControl;

impl SystemProcessControl {
	pub fn new() -> Self {
		Self
	}
}

fn name_matches(process_name: &OsStr, app_name: &str) -> bool {
	let name = process_name.to_string_lossy();
	name == app_name || name == format!("{app_name}.exe")
}

#[async_trait]
impl ProcessControl for SystemProcessControl {
	async fn kill_existing(&self, app_name: &str) -> KillReport {
		let mut system = System::new();
		system.refresh_processes_specifics(ProcessesToUpdate::All, true, ProcessRefreshKind::new());

		let targets: Vec<Pid> = system
			.processes()
			.iter()
			.filter(|(_, process)| name_matches(process.name(), app_name))
			.map(|(pid, _)| *pid)
			.collect();

		let mut report = KillReport {
			matched: targets.len(),
			..KillReport::default()
		};

		if targets.is_empty() {
			info!(app = %app_name, "no running instances to kill");
			return report;
		}

		for pid in targets {
			let Some(process) = system.process(pid) else {
				// Exited between enumeration and kill.
				report.terminated += 1;
				continue;
			};

			warn!(app = %app_name, pid = %pid, "killing existing process");

			if !process.kill() {
				error!(app = %app_name, pid = %pid, "kill request failed");
				report.failed += 1;
				continue;
			}

			if wait_for_exit(&mut system, pid).await {
				report.terminated += 1;
			} else {
				error!(
					app = %app_name,
					pid = %pid,
					timeout_secs = KILL_WAIT_TIMEOUT.as_secs(),
					"process did not exit within timeout"
				);
				report.failed += 1;
			}
		}

		report
	}

	async fn launch(&self, executable: &Path) -> Result<u32, ProcessError> {
		if !executable.exists() {
			return Err(ProcessError::NotFound(executable.to_path_buf()));
		}
		if !executable.is_file() {
			return Err(ProcessError::NotAFile(executable.to_path_buf()));
		}

		let child = tokio::process::Command::new(executable)
			.stdin(Stdio::null())
			.stdout(Stdio::null())
			.stderr(Stdio::null())
			.spawn()?;

		let pid = child.id().unwrap_or_default();
		info!(executable = %executable.display(), pid = pid, "launched application");

		// Deliberately drop the handle: the watchdog does not wait on,
		// reparent or otherwise track the child beyond this call.
		Ok(pid)
	}
}

/// Poll the process table until `pid` is gone or the kill timeout elapses.
async fn wait_for_exit(system: &mut System, pid: Pid) -> bool {
	let deadline = tokio::time::Instant::now() + KILL_WAIT_TIMEOUT;

	loop {
		system.refresh_processes_specifics(
			ProcessesToUpdate::Some(&[pid]),
			true,
			ProcessRefreshKind::new(),
		);

		if system.process(pid).is_none() {
			return true;
		}

		if tokio::time::Instant::now() >= deadline {
			return false;
		}

		tokio::time::sleep(KILL_POLL_INTERVAL).await;
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn kill_with_no_matches_is_empty_success() {
		let control = SystemProcessControl::new();
		let report = control.kill_existing("vigil-test-no-such-process").await;

		assert_eq!(report.matched, 0);
		assert_eq!(report.terminated, 0);
		assert_eq!(report.failed, 0);
	}

	#[tokio::test]
	async fn launch_missing_executable_errors() {
		let control = SystemProcessControl::new();
		let err = control
			.launch(Path::new("/definitely/not/here/vigil-app"))
			.await
			.unwrap_err();

		assert!(matches!(err, ProcessError::NotFound(_)));
	}

	#[tokio::test]
	async fn launch_directory_errors() {
		let control = SystemProcessControl::new();
		let tmp = tempfile::TempDir::new().unwrap();
		let err = control.launch(tmp.path()).await.unwrap_err();

		assert!(matches!(err, ProcessError::NotAFile(_)));
	}

	#[cfg(target_os = "linux")]
	#[tokio::test]
	async fn launch_real_executable_returns_pid() {
		let control = SystemProcessControl::new();
		let pid = control.launch(Path::new("/bin/true")).await.unwrap();
		assert!(pid > 0);
	}

	#[test]
	fn name_matching_accepts_exe_suffix() {
		assert!(name_matches(OsStr::new("myapp"), "myapp"));
		assert!(name_matches(OsStr::new("myapp.exe"), "myapp"));
		assert!(!name_matches(OsStr::new("myapp2"), "myapp"));
		assert!(!name_matches(OsStr::new("notmyapp"), "myapp"));
	}
}
