// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::error::CliError;
use sdilink::{
    registry::{DeviceRegistry, RegistryOptions},
    settings::Settings,
    sim::{ClockMode, SimulatedDriver, Topology},
};
use signal_hook::consts::SIGINT;
use signal_hook::flag;
use std::{
    path::PathBuf,
    sync::{atomic::AtomicBool, Arc},
    time::Duration,
};

/// Global options shared by every subcommand
#[derive(Debug, Default)]
pub struct Environment {
    pub topology: Option<PathBuf>,
    pub settings: Option<PathBuf>,
}

impl Environment {
    /// Builds the simulated driver and the device registry on top of it.
    pub fn open(&self, clock: ClockMode) -> Result<(Arc<SimulatedDriver>, DeviceRegistry), CliError> {
        let topology = match &self.topology {
            Some(path) => Topology::load(path).map_err(|e| {
                CliError::InvalidArgs(format!("topology {}: {}", path.display(), e))
            })?,
            None => Topology::default(),
        };
        log::debug!("Topology: {} cards", topology.cards.len());

        let settings = self
            .settings
            .as_ref()
            .map(Settings::load_or_default)
            .unwrap_or_default();

        let driver = Arc::new(SimulatedDriver::new(topology, clock));
        let options = RegistryOptions {
            settings,
            ..Default::default()
        };
        let registry = DeviceRegistry::new(driver.clone(), options)?;
        Ok((driver, registry))
    }
}

/// Resolve a device argument given as an index or a display name
///
/// # Examples
/// `0`, `1`, `"DeckLink Duo 2 - 1"`
pub fn resolve_device(registry: &DeviceRegistry, device: &str) -> Result<u32, CliError> {
    if let Ok(index) = device.trim().parse::<u32>() {
        if (index as usize) < registry.device_count() {
            return Ok(index);
        }
        return Err(CliError::NotFound(format!("no device with index {}", index)));
    }
    registry
        .device_by_display_name(device)
        .ok_or_else(|| CliError::NotFound(format!("no device named '{}'", device)))
}

/// Parse a duration given in (fractional) seconds
pub fn parse_seconds(s: &str) -> Result<Duration, CliError> {
    let secs = s
        .trim()
        .parse::<f64>()
        .map_err(|_| CliError::InvalidArgs(format!("Invalid duration: {}", s)))?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(CliError::InvalidArgs(format!(
            "Duration must be a non-negative number of seconds: {}",
            s
        )));
    }
    Ok(Duration::from_secs_f64(secs))
}

/// clap value parser for [`parse_seconds`]
pub fn seconds_arg(s: &str) -> Result<Duration, String> {
    parse_seconds(s).map_err(|e| e.to_string())
}

/// Install signal handler for graceful shutdown on Ctrl+C
///
/// Returns an Arc<AtomicBool> that will be set to true when SIGINT is received.
/// Check this flag periodically in your main loop to exit gracefully.
pub fn install_signal_handler() -> Result<Arc<AtomicBool>, CliError> {
    let term = Arc::new(AtomicBool::new(false));

    flag::register(SIGINT, Arc::clone(&term))
        .map_err(|e| CliError::General(format!("Failed to register signal handler: {}", e)))?;

    log::debug!("Installed SIGINT handler");
    Ok(term)
}

/// Print a serializable value as pretty JSON
pub fn print_json<T: serde::Serialize>(value: &T) -> Result<(), CliError> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| CliError::General(format!("Failed to serialize JSON: {}", e)))?;
    println!("{}", json);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_seconds() {
        assert_eq!(parse_seconds("1.5").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_seconds("0").unwrap(), Duration::ZERO);
        assert!(parse_seconds("-1").is_err());
        assert!(parse_seconds("abc").is_err());
    }

    #[test]
    fn test_resolve_device() {
        let (_driver, registry) = Environment::default().open(ClockMode::Manual).unwrap();
        assert_eq!(resolve_device(&registry, "1").unwrap(), 1);
        assert_eq!(
            resolve_device(&registry, "DeckLink 8K Pro - 0").unwrap(),
            0
        );
        assert!(matches!(
            resolve_device(&registry, "5"),
            Err(CliError::NotFound(_))
        ));
        assert!(matches!(
            resolve_device(&registry, "Intensity - 0"),
            Err(CliError::NotFound(_))
        ));
    }

    #[test]
    fn test_missing_topology() {
        let env = Environment {
            topology: Some(PathBuf::from("/nonexistent/topology.json")),
            settings: None,
        };
        assert!(matches!(
            env.open(ClockMode::Manual),
            Err(CliError::InvalidArgs(_))
        ));
    }
}
