// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Restart counter state and the guard decision functions.
//!
//! The watchdog keeps one small durable record per supervised application:
//! how many times in a row it has been restarted, and when the last attempt
//! happened. The functions here are pure; loading and saving the record is
//! the daemon's job.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// The persisted restart counter.
///
/// Invariants:
/// - `consecutive_count` is incremented exactly once per restart attempt
///   (see [`next_attempt`]), never on a blocked attempt.
/// - A record older than the policy's reset window is treated as count 0 at
///   evaluation time; the stored value is stale, not rewritten in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartState {
	pub consecutive_count: u32,
	pub last_attempt_at: DateTime<Utc>,
}

/// Bounds on consecutive restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
	/// Maximum consecutive restart attempts before the guard blocks.
	pub max_attempts: u32,
	/// How long after the last attempt the counter is considered stale.
	pub reset_window: Duration,
}

impl Default for RestartPolicy {
	fn default() -> Self {
		Self {
			max_attempts: 3,
			reset_window: Duration::minutes(60),
		}
	}
}

/// Outcome of a guard evaluation. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
	Allow,
	Block { reason: String },
}

impl GuardDecision {
	pub fn is_allowed(&self) -> bool {
		matches!(self, Self::Allow)
	}
}

/// The count that actually applies right now.
///
/// Absent state counts as zero. State whose last attempt is older than the
/// reset window also counts as zero: the run of crashes it recorded ended.
pub fn effective_count(state: Option<&RestartState>, policy: &RestartPolicy, now: DateTime<Utc>) -> u32 {
	match state {
		None => 0,
		Some(s) if now.signed_duration_since(s.last_attempt_at) > policy.reset_window => 0,
		Some(s) => s.consecutive_count,
	}
}

/// Decide whether another restart attempt is allowed.
///
/// Pure and side-effect free: evaluating any number of times without an
/// intervening [`next_attempt`] yields the same decision.
pub fn evaluate(state: Option<&RestartState>, policy: &RestartPolicy, now: DateTime<Utc>) -> GuardDecision {
	let count = effective_count(state, policy, now);
	if count >= policy.max_attempts {
		GuardDecision::Block {
			reason: format!(
				"restarted {} times in a row within the last {} minutes",
				count,
				policy.reset_window.num_minutes()
			),
		}
	} else {
		GuardDecision::Allow
	}
}

/// The record to persist after a restart has actually been attempted.
///
/// Bumps the effective count by exactly one and stamps the attempt time,
/// superseding any stale stored value.
pub fn next_attempt(state: Option<&RestartState>, policy: &RestartPolicy, now: DateTime<Utc>) -> RestartState {
	RestartState {
		consecutive_count: effective_count(state, policy, now) + 1,
		last_attempt_at: now,
	}
}
