// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

mod capture;
mod channels;
mod devices;
mod error;
mod formats;
mod metrics;
mod playout;
mod profile;
mod utils;

use clap::{Parser, Subcommand};
use error::result_to_exit_code;
use std::{path::PathBuf, process::ExitCode};

/// sdilink CLI - SDI card channel arbitration and frame pipeline tool
#[derive(Parser)]
#[command(name = "sdilink")]
#[command(version)]
#[command(about = "sdilink CLI - SDI card channel arbitration and frame pipeline tool")]
#[command(long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging (use RUST_LOG=trace for more)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Simulated card topology (JSON); defaults to an 8K Pro and a Duo 2
    #[arg(long, global = true, value_name = "FILE")]
    topology: Option<PathBuf>,

    /// Port mapping settings (JSON)
    #[arg(long, global = true, value_name = "FILE", env = "SDILINK_SETTINGS")]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List devices with their duplex profile and open channels
    Devices(devices::Args),

    /// Show channel routing and availability of a device
    Channels(channels::Args),

    /// Query supported display modes and pixel formats of a channel
    Formats(formats::Args),

    /// Show or change the duplex profile of a device
    Profile(profile::Args),

    /// Play a test pattern out of a channel and measure pacing
    Playout(playout::Args),

    /// Capture frames from a channel and measure throughput
    Capture(capture::Args),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.quiet);

    let env = utils::Environment {
        topology: cli.topology,
        settings: cli.settings,
    };

    let result = match cli.command {
        Commands::Devices(args) => devices::execute(args, &env, cli.json),
        Commands::Channels(args) => channels::execute(args, &env, cli.json),
        Commands::Formats(args) => formats::execute(args, &env, cli.json),
        Commands::Profile(args) => profile::execute(args, &env, cli.json),
        Commands::Playout(args) => playout::execute(args, &env, cli.json),
        Commands::Capture(args) => capture::execute(args, &env, cli.json),
    };

    result_to_exit_code(result)
}

/// Initialize env_logger based on verbosity flags
fn init_logging(verbose: bool, quiet: bool) {
    let env = env_logger::Env::default();

    let env = if quiet {
        env.default_filter_or("error")
    } else if verbose {
        env.default_filter_or("debug")
    } else {
        env.default_filter_or("info")
    };

    env_logger::Builder::from_env(env)
        .format_timestamp(None)
        .format_target(false)
        .init();

    log::debug!("sdilink {}", sdilink::version());
}
