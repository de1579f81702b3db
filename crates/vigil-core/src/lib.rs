// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core types for the vigil crash watchdog.
//!
//! This crate holds the domain model shared by the daemon and its
//! notification transports:
//!
//! - [`CrashEvent`] and [`FaultSignature`]: what the OS event log told us
//!   about the supervised application's death
//! - [`RestartState`], [`RestartPolicy`] and [`GuardDecision`]: the bounded,
//!   time-windowed restart counter and the pure decision functions over it
//!
//! Everything here is I/O-free. Persistence, process control and delivery
//! live in the `vigil` and `vigil-notify` crates.

pub mod event;
pub mod state;

pub use event::{latest, CrashEvent, FaultSignature};
pub use state::{effective_count, evaluate, next_attempt, GuardDecision, RestartPolicy, RestartState};
