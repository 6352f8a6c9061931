// SPDX-FileCopyrightText: © 2025 revid contributors
//
// SPDX-License-Identifier: MPL-2.0

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use crate::config;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the session configuration file.
    #[arg(short, long, default_value = "revid.toml")]
    pub config: String,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Assembles the configured pipeline and runs it until interrupted.
    Run {
        /// Overrides the file a rolling log is written to, in addition to the console.
        #[arg(long)]
        log_file: Option<String>,
    },
    /// Loads and validates a configuration file without starting the pipeline.
    ValidateConfig,
    /// Prints the default configuration as TOML to stdout.
    PrintDefaultConfig,
}

fn log_startup_info(cfg: &revid_core::config::SessionConfig) {
    info!(
        input = ?cfg.input,
        input_codec = ?cfg.input_codec,
        outputs = ?cfg.outputs,
        frame_rate = cfg.frame_rate,
        "starting revid session"
    );
}

#[allow(clippy::disallowed_macros)]
async fn handle_run_command(config_path: &str, log_file: Option<&str>) {
    let load_result = match config::load(config_path) {
        Ok(result) => result,
        Err(e) => {
            eprintln!("failed to load configuration: {e}");
            std::process::exit(1);
        },
    };

    let _log_guard = match crate::logging::init_logging(load_result.config.logging, log_file) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("failed to initialize logging: {e}");
            std::process::exit(1);
        },
    };

    if let Some(missing) = &load_result.file_missing {
        warn!(config_path = %missing, "config file not found, using defaults");
    }

    log_startup_info(&load_result.config);

    // `Session::new` clamps out-of-range values itself; this is the same
    // config the startup log above already reflects.
    let session = std::sync::Arc::new(revid_engine::Session::new(load_result.config));
    if let Err(e) = session.start().await {
        error!(error = %e, "failed to start session");
        std::process::exit(1);
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
    }
    info!("shutdown requested, stopping session");
    session.stop().await;
}

#[allow(clippy::disallowed_macros)]
fn handle_validate_config_command(config_path: &str) {
    match config::load(config_path) {
        Ok(mut result) => {
            result.config.validate_and_clamp();
            if let Some(missing) = &result.file_missing {
                println!("config file not found at {missing}, defaults apply");
            }
            println!("configuration is valid");
        },
        Err(e) => {
            eprintln!("configuration is invalid: {e}");
            std::process::exit(1);
        },
    }
}

#[allow(clippy::disallowed_macros)]
fn handle_print_default_config_command() {
    match config::generate_default() {
        Ok(toml_string) => {
            println!("# Default revid configuration file");
            println!("{toml_string}");
        },
        Err(e) => {
            eprintln!("failed to generate default config: {e}");
            std::process::exit(1);
        },
    }
}

pub async fn handle_command(cli: &Cli) {
    match cli.command.as_ref().unwrap_or(&Commands::Run { log_file: None }) {
        Commands::Run { log_file } => handle_run_command(&cli.config, log_file.as_deref()).await,
        Commands::ValidateConfig => handle_validate_config_command(&cli.config),
        Commands::PrintDefaultConfig => handle_print_default_config_command(),
    }
}
