// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Capability queries for one channel.

use crate::{error::CliError, utils};
use clap::Args as ClapArgs;
use sdilink::{
    channel::Channel,
    format::{Direction, FrameGeometry, FrameRate, PixelFormat},
    sim::ClockMode,
};
use serde::Serialize;

#[derive(ClapArgs, Debug)]
pub struct Args {
    /// Device index or display name
    device: String,

    /// Channel name ("Single Link 2") or port number
    channel: Channel,

    /// Direction to query (output, input)
    #[arg(short, long, default_value = "output")]
    direction: Direction,

    /// Restrict the listing to one geometry (NTSC, HD1080, 1920x1080, ...)
    #[arg(short, long)]
    geometry: Option<FrameGeometry>,

    /// Restrict the listing to one frame rate (requires --geometry)
    #[arg(short, long, requires = "geometry")]
    rate: Option<FrameRate>,
}

#[derive(Debug, Serialize)]
struct ModeEntry {
    geometry: FrameGeometry,
    width: u32,
    height: u32,
    rate: FrameRate,
    pixel_formats: Vec<PixelFormat>,
}

pub fn execute(args: Args, env: &utils::Environment, json: bool) -> Result<(), CliError> {
    log::debug!("Executing formats command: {:?}", args);

    let (_driver, registry) = env.open(ClockMode::Manual)?;
    let index = utils::resolve_device(&registry, &args.device)?;
    let (direction, channel) = (args.direction, args.channel);

    let geometries = match args.geometry {
        Some(geometry) => vec![geometry],
        None => registry.supported_geometries(index, direction, channel)?,
    };

    let mut entries = Vec::new();
    for geometry in geometries {
        let rates = match args.rate {
            Some(rate) => vec![rate],
            None => registry.supported_frame_rates(index, direction, channel, geometry)?,
        };
        for rate in rates {
            let pixel_formats =
                registry.supported_pixel_formats(index, direction, channel, geometry, rate)?;
            if pixel_formats.is_empty() {
                continue;
            }
            let (width, height) = geometry.dimensions();
            entries.push(ModeEntry {
                geometry,
                width,
                height,
                rate,
                pixel_formats,
            });
        }
    }

    if json {
        return utils::print_json(&entries);
    }

    if entries.is_empty() {
        return Err(CliError::Unavailable(format!(
            "no supported modes for {} {}",
            channel, direction
        )));
    }
    println!("{} {} on device {}:", channel, direction, index);
    for entry in &entries {
        let formats: Vec<&str> = entry.pixel_formats.iter().map(|pf| pf.short_name()).collect();
        println!(
            "  {:<8} {:>4}x{:<4} {:>7} fps  {}",
            entry.geometry.name(),
            entry.width,
            entry.height,
            entry.rate.name(),
            formats.join(", ")
        );
    }
    Ok(())
}
