// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The restart guard: bounded, time-windowed consecutive restart accounting.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, warn};

use vigil_core::{evaluate, next_attempt, GuardDecision, RestartPolicy, RestartState};

use crate::store::StateStore;

/// Decides whether another restart attempt is allowed and records attempts.
///
/// Storage failures never block a restart: an unreadable or unwritable record
/// is treated as count zero. One extra restart is a better failure mode than
/// a watchdog wedged by a storage glitch.
pub struct RestartGuard {
	store: Arc<dyn StateStore>,
	policy: RestartPolicy,
	key: String,
}

impl RestartGuard {
	pub fn new(store: Arc<dyn StateStore>, policy: RestartPolicy, key: impl Into<String>) -> Self {
		Self {
			store,
			policy,
			key: key.into(),
		}
	}

	pub fn policy(&self) -> &RestartPolicy {
		&self.policy
	}

	/// The persisted state, if any. Read-only; used by `vigil status`.
	pub async fn current_state(&self) -> Option<RestartState> {
		self.load_or_none().await
	}

	/// Evaluate whether a restart attempt is allowed right now.
	///
	/// Pure with respect to storage: calling this any number of times without
	/// an intervening [`record_attempt`](Self::record_attempt) neither changes
	/// the decision nor the persisted count.
	pub async fn evaluate(&self, now: DateTime<Utc>) -> GuardDecision {
		let state = self.load_or_none().await;
		let decision = evaluate(state.as_ref(), &self.policy, now);
		debug!(
			key = %self.key,
			allowed = decision.is_allowed(),
			count = state.as_ref().map(|s| s.consecutive_count).unwrap_or(0),
			"restart guard evaluated"
		);
		decision
	}

	/// Record that a restart was attempted. Call only after the attempt,
	/// never on a blocked decision.
	pub async fn record_attempt(&self, now: DateTime<Utc>) -> RestartState {
		let state = self.load_or_none().await;
		let next = next_attempt(state.as_ref(), &self.policy, now);

		if let Err(e) = self.store.save(&self.key, &next).await {
			error!(
				key = %self.key,
				error = %e,
				"failed to persist restart state; counter may undercount"
			);
		}

		next
	}

	async fn load_or_none(&self) -> Option<RestartState> {
		match self.store.load(&self.key).await {
			Ok(state) => state,
			Err(e) => {
				warn!(
					key = %self.key,
					error = %e,
					"restart state unreadable, failing open"
				);
				None
			}
		}
	}
}
