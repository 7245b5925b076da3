// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: procd entrypoint: runs one program under a fresh root process
//!
//! Usage: `procd [--config FILE] PROGRAM [ARGS...]`

use std::path::PathBuf;

use clap::Parser;
use procbridge_spawn::{BridgeConfig, Environment};
use procd::{Procd, ServerError};

#[derive(Parser, Debug)]
#[command(name = "procd")]
#[command(about = "Runs a program under the process bridge host.", long_about = None)]
struct Cli {
    /// Bridge configuration (TOML).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Program to start, followed by its arguments.
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

fn main() {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match BridgeConfig::load(path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("procd: {err}");
                std::process::exit(1);
            }
        },
        None => BridgeConfig::default(),
    };

    let procd = Procd::builder(config).build();
    let env = Environment::from_envp(std::env::vars().map(|(name, value)| format!("{name}={value}")));
    let cwd = std::env::current_dir()
        .ok()
        .and_then(|dir| dir.to_str().map(str::to_string))
        .unwrap_or_else(|| "/".to_string());
    match procd.run(&cli.command, env, &cwd) {
        Ok(status) => std::process::exit(status),
        Err(ServerError::Process(err)) => {
            eprintln!("procd: {}: {err}", cli.command.first().map(String::as_str).unwrap_or("?"));
            std::process::exit(127);
        }
        Err(err) => {
            eprintln!("procd: exited with error: {err}");
            std::process::exit(1);
        }
    }
}
