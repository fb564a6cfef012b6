// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Channel routing and availability of one device.

use crate::{error::CliError, utils};
use clap::Args as ClapArgs;
use sdilink::{channel::Channel, format::Direction, registry::DeviceRegistry, sim::ClockMode};
use serde::Serialize;

#[derive(ClapArgs, Debug)]
pub struct Args {
    /// Device index or display name
    #[arg(default_value = "0")]
    device: String,
}

#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
enum Availability {
    Available,
    Busy,
    Unmapped,
}

#[derive(Debug, Serialize)]
struct ChannelRow {
    channel: Channel,
    name: &'static str,
    /// Name as labelled on the installation, after port remapping
    mapped_name: String,
    output: Availability,
    input: Availability,
}

#[derive(Debug, Serialize)]
struct ChannelsOutput {
    device: u32,
    display_name: String,
    profile: String,
    channels: Vec<ChannelRow>,
}

fn availability(
    registry: &DeviceRegistry,
    index: u32,
    direction: Direction,
    channel: Channel,
) -> Result<Availability, CliError> {
    if !registry.mapped_channels(index, direction)?.contains(&channel) {
        return Ok(Availability::Unmapped);
    }
    if registry.available_channels(index, direction)?.contains(&channel) {
        Ok(Availability::Available)
    } else {
        Ok(Availability::Busy)
    }
}

pub fn execute(args: Args, env: &utils::Environment, json: bool) -> Result<(), CliError> {
    log::debug!("Executing channels command: {:?}", args);

    let (_driver, registry) = env.open(ClockMode::Manual)?;
    let index = utils::resolve_device(&registry, &args.device)?;
    let info = registry.device_info(index)?;

    let mut channels = Vec::new();
    for channel in Channel::ALL {
        let output = availability(&registry, index, Direction::Output, channel)?;
        let input = availability(&registry, index, Direction::Input, channel)?;
        if output == Availability::Unmapped && input == Availability::Unmapped {
            continue;
        }
        channels.push(ChannelRow {
            channel,
            name: DeviceRegistry::channel_name(channel),
            mapped_name: registry.port_mapped_channel_name(index, channel)?,
            output,
            input,
        });
    }

    let output = ChannelsOutput {
        device: index,
        display_name: info.display_name,
        profile: info.active_profile.to_string(),
        channels,
    };

    if json {
        return utils::print_json(&output);
    }

    println!("{} ({})", output.display_name, output.profile);
    println!("  {:<16} {:<16} {:<10} {:<10}", "Channel", "Label", "Output", "Input");
    for row in &output.channels {
        println!(
            "  {:<16} {:<16} {:<10} {:<10}",
            row.name,
            row.mapped_name,
            format!("{:?}", row.output).to_lowercase(),
            format!("{:?}", row.input).to_lowercase()
        );
    }
    Ok(())
}
