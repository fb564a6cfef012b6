// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Duplex profile inspection and switching.

use crate::{error::CliError, utils};
use clap::Args as ClapArgs;
use sdilink::{device::DeviceState, hardware::DuplexProfile, sim::ClockMode};
use serde::Serialize;
use std::{
    thread,
    time::{Duration, Instant},
};

#[derive(ClapArgs, Debug)]
pub struct Args {
    /// Device index or display name
    device: String,

    /// Switch to this profile (e.g. two-sub-devices-full-duplex)
    #[arg(long)]
    set: Option<DuplexProfile>,

    /// Seconds to wait for the card to activate the new profile
    #[arg(short, long, default_value = "2.0", value_parser = utils::seconds_arg)]
    timeout: Duration,
}

#[derive(Debug, Serialize)]
struct ProfileOutput {
    device: u32,
    display_name: String,
    active_profile: DuplexProfile,
    profiles: Vec<DuplexProfile>,
    sub_unit_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    switch_ms: Option<u64>,
}

pub fn execute(args: Args, env: &utils::Environment, json: bool) -> Result<(), CliError> {
    log::debug!("Executing profile command: {:?}", args);

    let (_driver, registry) = env.open(ClockMode::Manual)?;
    let index = utils::resolve_device(&registry, &args.device)?;

    let mut switch_ms = None;
    if let Some(profile) = args.set {
        if !registry.profiles(index)?.contains(&profile) {
            return Err(CliError::Unavailable(format!(
                "device {} does not support profile {}",
                index, profile
            )));
        }
        let start = Instant::now();
        registry.set_active_profile(index, profile)?;
        log::info!("Requested profile {} on device {}", profile, index);

        loop {
            let info = registry.device_info(index)?;
            if info.state == DeviceState::Initialized && info.active_profile == profile {
                break;
            }
            if start.elapsed() >= args.timeout {
                return Err(CliError::Timeout(format!(
                    "profile {} not active after {:.1}s",
                    profile,
                    args.timeout.as_secs_f64()
                )));
            }
            thread::sleep(Duration::from_millis(10));
        }
        switch_ms = Some(start.elapsed().as_millis() as u64);
    }

    let info = registry.device_info(index)?;
    let output = ProfileOutput {
        device: index,
        display_name: info.display_name,
        active_profile: info.active_profile,
        profiles: info.profiles,
        sub_unit_count: info.sub_unit_count,
        switch_ms,
    };

    if json {
        return utils::print_json(&output);
    }

    println!("{}", output.display_name);
    for profile in &output.profiles {
        let marker = if *profile == output.active_profile { "*" } else { " " };
        println!("  {} {}", marker, profile);
    }
    println!("Sub-units: {}", output.sub_unit_count);
    if let Some(ms) = output.switch_ms {
        println!("Profile switch took {} ms", ms);
    }
    Ok(())
}
