// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Connector port remapping.
//!
//! Installations often label the physical SDI connectors differently from
//! the card's silk screen. A mapping per card model rewrites the port
//! numbers in channel names in both directions:
//!
//! ```json
//! {
//!   "sdi_port_mappings": [
//!     {
//!       "model_name": "DeckLink 8K Pro",
//!       "sdi_port_mapping": [
//!         { "source_port": 1, "target_port": 3 },
//!         { "source_port": 3, "target_port": 1 }
//!       ]
//!     }
//!   ]
//! }
//! ```

use crate::{channel_map, Error};
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, fs, path::Path};

/// One connector renumbering: `source_port` is shown as `target_port`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub source_port: u32,
    pub target_port: u32,
}

/// Port mappings applied to every card of one model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelPortMapping {
    pub model_name: String,
    #[serde(default)]
    pub sdi_port_mapping: Vec<PortMapping>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub sdi_port_mappings: Vec<ModelPortMapping>,
}

impl Settings {
    /// Parses and validates settings from JSON.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let settings: Settings = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        log::debug!("loading settings from {}", path.display());
        Settings::from_json(&fs::read_to_string(path)?)
    }

    /// Loads settings, falling back to defaults with an error log when the
    /// file is unreadable or invalid.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Settings::load(path.as_ref()) {
            Ok(settings) => settings,
            Err(err) => {
                log::error!(
                    "{}: {}. Using default settings.",
                    path.as_ref().display(),
                    err
                );
                Settings::default()
            }
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        for model in &self.sdi_port_mappings {
            let name = &model.model_name;
            if name.is_empty() {
                return Err(Error::InvalidSettings(
                    "empty model name in port mappings".into(),
                ));
            }
            let Some(port_count) = channel_map::port_count(name) else {
                return Err(Error::InvalidSettings(format!(
                    "device model not supported: {}",
                    name
                )));
            };

            let mut sources = HashSet::new();
            let mut targets = HashSet::new();
            for entry in &model.sdi_port_mapping {
                let (src, dst) = (entry.source_port, entry.target_port);
                if !(1..=port_count).contains(&src) || !(1..=port_count).contains(&dst) {
                    return Err(Error::InvalidSettings(format!(
                        "invalid port mapping for device {}: {} > {} (ports 1-{})",
                        name, src, dst, port_count
                    )));
                }
                if !sources.insert(src) || !targets.insert(dst) {
                    return Err(Error::InvalidSettings(format!(
                        "duplicate source or target port in port mapping for device {}: {} > {}",
                        name, src, dst
                    )));
                }
            }
        }
        Ok(())
    }

    fn port_pairs(&self, model_name: &str) -> impl Iterator<Item = (u32, u32)> + '_ {
        let model_name = model_name.to_owned();
        self.sdi_port_mappings
            .iter()
            .filter(move |m| m.model_name == model_name)
            .flat_map(|m| m.sdi_port_mapping.iter())
            .map(|e| (e.source_port, e.target_port))
    }

    /// Rewrites the port numbers in `name` as shown for `model_name`.
    pub fn map_name(&self, model_name: &str, name: &str) -> String {
        replace_ports(name, |port| {
            self.port_pairs(model_name)
                .find(|&(src, _)| src == port)
                .map(|(_, dst)| dst)
        })
    }

    /// Inverse of [`Settings::map_name`].
    pub fn unmap_name(&self, model_name: &str, name: &str) -> String {
        replace_ports(name, |port| {
            self.port_pairs(model_name)
                .find(|&(_, dst)| dst == port)
                .map(|(src, _)| src)
        })
    }
}

/// Replaces every maximal run of digits in one pass, so swaps like 1<->3 do
/// not cascade.
fn replace_ports(name: &str, lookup: impl Fn(u32) -> Option<u32>) -> String {
    let mut out = String::with_capacity(name.len());
    let mut rest = name;
    while let Some(start) = rest.find(|c: char| c.is_ascii_digit()) {
        out.push_str(&rest[..start]);
        let digits = &rest[start..];
        let end = digits
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(digits.len());
        let run = &digits[..end];
        match run.parse::<u32>().ok().and_then(&lookup) {
            Some(port) => out.push_str(&port.to_string()),
            None => out.push_str(run),
        }
        rest = &digits[end..];
    }
    out.push_str(rest);
    out
}
