// SPDX-FileCopyrightText: © 2025 revid contributors
//
// SPDX-License-Identifier: MPL-2.0

//! `revid` — the embedded capture/transcode/forward pipeline, as a CLI host.
//!
//! `revid run` assembles the pipeline described by `revid.toml` (or
//! `--config`), layered with `REVID_`-prefixed environment overrides, and
//! runs it until `SIGINT`. `revid validate-config` and
//! `revid print-default-config` support config authoring without starting
//! a session.

mod cli;
mod config;
mod logging;

use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = cli::Cli::parse();
    cli::handle_command(&cli).await;
}
