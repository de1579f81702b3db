// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Durable storage for the restart counter.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{debug, warn};

use vigil_core::RestartState;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),
}

/// Durable record store for [`RestartState`], keyed by application identity.
///
/// Contract: callers must serialize access externally. The watchdog relies on
/// a host-level single-instance guarantee, so implementations are not required
/// to make load-then-save atomic across processes.
#[async_trait]
pub trait StateStore: Send + Sync {
	async fn load(&self, key: &str) -> Result<Option<RestartState>, StoreError>;
	async fn save(&self, key: &str, state: &RestartState) -> Result<(), StoreError>;
}

/// File-backed store: one JSON record per key under a state directory.
///
/// Writes go through a temp file and an atomic rename so a crash mid-write
/// never leaves a truncated record behind. A record that fails to parse is
/// treated as absent rather than an error; the guard prefers restarting over
/// refusing to act on a garbled counter.
pub struct FileStateStore {
	state_dir: PathBuf,
}

impl FileStateStore {
	pub fn new(state_dir: PathBuf) -> Self {
		Self { state_dir }
	}

	/// Platform default state directory (`.../vigil` under the XDG state or
	/// data directory).
	pub fn default_dir() -> Option<PathBuf> {
		dirs::state_dir()
			.or_else(dirs::data_dir)
			.map(|d| d.join("vigil"))
	}

	fn record_path(&self, key: &str) -> PathBuf {
		self.state_dir.join(format!("{key}.json"))
	}
}

#[async_trait]
impl StateStore for FileStateStore {
	async fn load(&self, key: &str) -> Result<Option<RestartState>, StoreError> {
		let path = self.record_path(key);

		if !path.exists() {
			debug!(key = %key, path = %path.display(), "no restart state on disk");
			return Ok(None);
		}

		let contents = tokio::fs::read_to_string(&path).await?;

		match serde_json::from_str::<RestartState>(&contents) {
			Ok(state) => {
				debug!(
					key = %key,
					count = state.consecutive_count,
					"loaded restart state from disk"
				);
				Ok(Some(state))
			}
			Err(e) => {
				warn!(
					key = %key,
					path = %path.display(),
					error = %e,
					"restart state unparseable, treating as absent"
				);
				Ok(None)
			}
		}
	}

	async fn save(&self, key: &str, state: &RestartState) -> Result<(), StoreError> {
		tokio::fs::create_dir_all(&self.state_dir).await?;

		let path = self.record_path(key);
		let tmp_path = self.state_dir.join(format!("{key}.json.tmp"));

		let json = serde_json::to_string_pretty(state)?;

		tokio::fs::write(&tmp_path, &json).await?;
		tokio::fs::rename(&tmp_path, &path).await?;

		debug!(
			key = %key,
			count = state.consecutive_count,
			path = %path.display(),
			"saved restart state to disk"
		);

		Ok(())
	}
}
