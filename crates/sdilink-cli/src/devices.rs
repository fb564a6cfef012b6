// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Device listing.

use crate::{error::CliError, utils};
use clap::Args as ClapArgs;
use sdilink::{registry::DeviceInfo, sim::ClockMode};
use serde::Serialize;

#[derive(ClapArgs, Debug)]
pub struct Args {
    /// Show only devices of this model
    #[arg(long)]
    model: Option<String>,

    /// Show the duplex profiles each device supports
    #[arg(long)]
    profiles: bool,
}

#[derive(Debug, Serialize)]
struct DevicesOutput {
    devices: Vec<DeviceInfo>,
    summary: Summary,
}

#[derive(Debug, Serialize)]
struct Summary {
    devices: usize,
    sub_units: usize,
    open_channels: usize,
}

pub fn execute(args: Args, env: &utils::Environment, json: bool) -> Result<(), CliError> {
    log::debug!("Executing devices command: {:?}", args);

    let (_driver, registry) = env.open(ClockMode::Manual)?;

    let mut devices = Vec::new();
    for desc in registry.devices() {
        let info = registry.device_info(desc.index)?;
        if let Some(model) = &args.model {
            if !info.model_name.eq_ignore_ascii_case(model) {
                continue;
            }
        }
        devices.push(info);
    }

    let output = DevicesOutput {
        summary: Summary {
            devices: devices.len(),
            sub_units: devices.iter().map(|d| d.sub_unit_count).sum(),
            open_channels: devices.iter().map(|d| d.open_channels.len()).sum(),
        },
        devices,
    };

    if json {
        return utils::print_json(&output);
    }

    if output.devices.is_empty() {
        println!("No devices found");
        return Ok(());
    }

    for info in &output.devices {
        println!("[{}] {}", info.index, info.display_name);
        println!("    Group:     {:#x}", info.group_id);
        println!("    State:     {}", info.state);
        println!("    Profile:   {}", info.active_profile);
        println!("    Sub-units: {}", info.sub_unit_count);
        if args.profiles {
            println!("    Supported profiles:");
            for profile in &info.profiles {
                let marker = if *profile == info.active_profile { "*" } else { " " };
                println!("      {} {}", marker, profile);
            }
        }
    }
    println!(
        "\n{} devices, {} sub-units",
        output.summary.devices, output.summary.sub_units
    );
    Ok(())
}
