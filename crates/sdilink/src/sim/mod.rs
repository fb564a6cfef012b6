// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! In-process card driver.
//!
//! Each simulated card is partitioned into sub-units according to its duplex
//! profile, exactly like the hardware it stands in for. Every sub-unit has a
//! [`SimOutput`] and a [`SimInput`].
//!
//! In [`ClockMode::Manual`] nothing happens on its own: tests drive the
//! hardware with [`SimOutput::complete_next`], [`SimInput::inject_frame`] and
//! [`SimCard::notify_profile_changing`] / [`SimCard::activate_profile`],
//! which deliver notifications synchronously on the calling thread.
//! In [`ClockMode::Realtime`] playback and capture are paced by background
//! threads at the frame rate of the enabled display mode, and profile
//! changes are carried out on a thread of their own.

mod input;
mod output;

pub use input::SimInput;
pub use output::SimOutput;

use crate::{
    channel_map,
    format::{DisplayMode, FrameGeometry, PixelFormat},
    hardware::{
        Driver, DuplexProfile, HardwareUnit, ProfileCallback, ProfileManager, UnitAttributes,
        VideoInput, VideoOutput,
    },
    sync::lock,
    Error,
};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::Path,
    sync::{Arc, Mutex, Weak},
    thread,
};

/// Display modes and pixel formats a simulated card accepts. An empty list
/// accepts everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Capabilities {
    pub geometries: Vec<FrameGeometry>,
    pub pixel_formats: Vec<PixelFormat>,
}

impl Capabilities {
    pub fn all() -> Self {
        Capabilities::default()
    }

    pub fn supports(&self, mode: DisplayMode, pixel_format: PixelFormat) -> bool {
        (self.geometries.is_empty() || self.geometries.contains(&mode.geometry()))
            && (self.pixel_formats.is_empty() || self.pixel_formats.contains(&pixel_format))
    }
}

/// How simulated hardware advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClockMode {
    /// Only explicit test calls move frames
    #[default]
    Manual,
    /// Background threads run at the display mode's frame rate
    Realtime,
}

/// One simulated card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardConfig {
    pub model_name: String,
    /// Assigned from the card's position when absent
    #[serde(default)]
    pub group_id: Option<i64>,
    pub profile: DuplexProfile,
    #[serde(default)]
    pub capabilities: Capabilities,
}

impl CardConfig {
    pub fn new(model_name: impl Into<String>, profile: DuplexProfile) -> Self {
        CardConfig {
            model_name: model_name.into(),
            group_id: None,
            profile,
            capabilities: Capabilities::all(),
        }
    }
}

/// The set of cards a [`SimulatedDriver`] exposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    pub cards: Vec<CardConfig>,
}

impl Default for Topology {
    fn default() -> Self {
        Topology {
            cards: vec![
                CardConfig::new("DeckLink 8K Pro", DuplexProfile::FourSubDevicesHalfDuplex),
                CardConfig::new("DeckLink Duo 2", DuplexProfile::FourSubDevicesHalfDuplex),
            ],
        }
    }
}

impl Topology {
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let topology: Topology = serde_json::from_str(json)?;
        topology.validate()?;
        Ok(topology)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        log::debug!("loading topology from {}", path.display());
        Topology::from_json(&fs::read_to_string(path)?)
    }

    /// Rejects cards whose profile their model cannot run.
    pub fn validate(&self) -> Result<(), Error> {
        for card in &self.cards {
            if card.model_name.trim().is_empty() {
                return Err(Error::InvalidSettings("card with empty model name".into()));
            }
            let profiles = channel_map::profiles(&card.model_name);
            if !profiles.is_empty() && !profiles.contains(&card.profile) {
                return Err(Error::InvalidSettings(format!(
                    "{} does not support profile {}",
                    card.model_name, card.profile
                )));
            }
        }
        Ok(())
    }
}

/// Simulated driver: enumerates the sub-units of every configured card.
pub struct SimulatedDriver {
    cards: Vec<Arc<SimCard>>,
}

impl SimulatedDriver {
    pub fn new(topology: Topology, clock: ClockMode) -> Self {
        let cards = topology
            .cards
            .into_iter()
            .enumerate()
            .map(|(index, config)| SimCard::new(index, config, clock))
            .collect();
        SimulatedDriver { cards }
    }

    pub fn manual(topology: Topology) -> Self {
        SimulatedDriver::new(topology, ClockMode::Manual)
    }

    pub fn realtime(topology: Topology) -> Self {
        SimulatedDriver::new(topology, ClockMode::Realtime)
    }

    pub fn card(&self, index: usize) -> Option<Arc<SimCard>> {
        self.cards.get(index).cloned()
    }

    pub fn cards(&self) -> &[Arc<SimCard>] {
        &self.cards
    }
}

impl Driver for SimulatedDriver {
    fn enumerate(&self) -> Result<Vec<Arc<dyn HardwareUnit>>, Error> {
        let mut units: Vec<Arc<dyn HardwareUnit>> = Vec::new();
        for card in &self.cards {
            for unit in lock(&card.units).iter() {
                units.push(Arc::clone(unit) as Arc<dyn HardwareUnit>);
            }
        }
        Ok(units)
    }
}

/// A simulated physical card and its duplex profile control.
pub struct SimCard {
    index: usize,
    model_name: String,
    group_id: i64,
    capabilities: Capabilities,
    clock: ClockMode,
    profiles: Vec<DuplexProfile>,
    active: Mutex<DuplexProfile>,
    units: Mutex<Vec<Arc<SimUnit>>>,
    callback: Mutex<Option<Arc<dyn ProfileCallback>>>,
    me: Weak<SimCard>,
}

impl SimCard {
    fn new(index: usize, config: CardConfig, clock: ClockMode) -> Arc<Self> {
        let mut profiles = channel_map::profiles(&config.model_name);
        if profiles.is_empty() {
            profiles.push(config.profile);
        }
        let group_id = config.group_id.unwrap_or(0x5d1_0000 + index as i64);
        let card = Arc::new_cyclic(|me| SimCard {
            index,
            model_name: config.model_name,
            group_id,
            capabilities: config.capabilities,
            clock,
            profiles,
            active: Mutex::new(config.profile),
            units: Mutex::new(Vec::new()),
            callback: Mutex::new(None),
            me: me.clone(),
        });
        *lock(&card.units) = card.build_units(config.profile);
        card
    }

    fn build_units(&self, profile: DuplexProfile) -> Vec<Arc<SimUnit>> {
        (0..profile.sub_unit_count())
            .map(|sub| {
                Arc::new(SimUnit {
                    card: self.me.clone(),
                    attributes: UnitAttributes {
                        model_name: self.model_name.clone(),
                        sub_unit_index: sub,
                        group_id: self.group_id,
                        profile_id: profile.id(),
                        persistent_id: self.group_id,
                        topological_id: ((self.index as i64) << 8) | sub as i64,
                        handle: format!("sim:{}/{}", self.index, sub),
                    },
                    output: SimOutput::new(self.capabilities.clone(), self.clock),
                    input: SimInput::new(self.capabilities.clone(), self.clock),
                })
            })
            .collect()
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn group_id(&self) -> i64 {
        self.group_id
    }

    /// Playback hardware of sub-unit `sub` under the current profile.
    pub fn output(&self, sub: u32) -> Option<Arc<SimOutput>> {
        lock(&self.units)
            .iter()
            .find(|u| u.attributes.sub_unit_index == sub)
            .map(|u| Arc::clone(&u.output))
    }

    /// Capture hardware of sub-unit `sub` under the current profile.
    pub fn input(&self, sub: u32) -> Option<Arc<SimInput>> {
        lock(&self.units)
            .iter()
            .find(|u| u.attributes.sub_unit_index == sub)
            .map(|u| Arc::clone(&u.input))
    }

    /// Announces an upcoming profile change to the subscriber.
    pub fn notify_profile_changing(&self, profile: DuplexProfile) {
        let callback = lock(&self.callback).clone();
        log::debug!("{}: profile changing to {}", self.model_name, profile);
        if let Some(callback) = callback {
            callback.profile_changing(profile, true);
        }
    }

    /// Repartitions the card under `profile` and announces it. Streams on the
    /// old sub-units are forced to stop.
    pub fn activate_profile(&self, profile: DuplexProfile) {
        let old = {
            let mut units = lock(&self.units);
            *lock(&self.active) = profile;
            std::mem::replace(&mut *units, self.build_units(profile))
        };
        for unit in old {
            unit.output.force_stop();
            unit.input.force_stop();
        }
        log::debug!("{}: profile {} active", self.model_name, profile);

        let callback = lock(&self.callback).clone();
        if let Some(callback) = callback {
            callback.profile_activated(profile);
        }
    }
}

impl ProfileManager for SimCard {
    fn profiles(&self) -> Vec<DuplexProfile> {
        self.profiles.clone()
    }

    fn active_profile(&self) -> DuplexProfile {
        *lock(&self.active)
    }

    fn set_active_profile(&self, profile: DuplexProfile) -> Result<(), Error> {
        if !self.profiles.contains(&profile) {
            return Err(Error::Hardware(format!(
                "{} does not support profile {}",
                self.model_name, profile
            )));
        }
        if self.active_profile() == profile {
            return Ok(());
        }
        let card = self
            .me
            .upgrade()
            .ok_or_else(|| Error::Hardware("card is gone".into()))?;
        thread::Builder::new()
            .name(format!("sim-profile-{}", self.index))
            .spawn(move || {
                card.notify_profile_changing(profile);
                card.activate_profile(profile);
            })?;
        Ok(())
    }

    fn set_callback(&self, callback: Option<Arc<dyn ProfileCallback>>) {
        *lock(&self.callback) = callback;
    }
}

/// One sub-unit of a simulated card.
struct SimUnit {
    card: Weak<SimCard>,
    attributes: UnitAttributes,
    output: Arc<SimOutput>,
    input: Arc<SimInput>,
}

impl HardwareUnit for SimUnit {
    fn attributes(&self) -> UnitAttributes {
        self.attributes.clone()
    }

    fn output(&self) -> Option<Arc<dyn VideoOutput>> {
        Some(Arc::clone(&self.output) as Arc<dyn VideoOutput>)
    }

    fn input(&self) -> Option<Arc<dyn VideoInput>> {
        Some(Arc::clone(&self.input) as Arc<dyn VideoInput>)
    }

    fn profile_manager(&self) -> Option<Arc<dyn ProfileManager>> {
        self.card
            .upgrade()
            .map(|card| card as Arc<dyn ProfileManager>)
    }
}
