// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Vigil - crash watchdog for a single supervised application
#[derive(Parser, Debug)]
#[command(name = "vigil")]
pub struct Cli {
	/// Path to the TOML configuration file
	#[arg(long, env = "VIGIL_CONFIG", default_value = "vigil.toml", global = true)]
	pub config: PathBuf,

	#[command(subcommand)]
	pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
	/// Poll for crash evidence and restart the application as needed
	Run,
	/// Run one detection/restart cycle and exit (for external crash triggers)
	Once,
	/// Show the persisted restart state and what the guard would decide now
	Status,
}
