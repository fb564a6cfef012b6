// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Devices: one physical card, its sub-units, and channel arbitration.
//!
//! A device resolves `(direction, channel)` to exactly one [`SubUnit`]
//! through its [`ChannelMap`] and records every successful open in its
//! open-channel registry. Per-tick operations (wait, transfer, start, stop)
//! resolve through that registry only, so a channel that was never opened,
//! or was implicitly closed by a profile change, is a lookup failure.
//!
//! When the card announces a duplex profile change the device is
//! [invalidated](Device::invalidate): every open channel is closed and the
//! sub-units are dropped. Once the new profile is active the device is
//! [rebuilt in place](Device::reinit) from a fresh enumeration, keeping its
//! index and its invalidation subscribers.

use crate::{
    callbacks::{
        CallbackId, CallbackRegistry, DeviceInvalidatedCallback, FormatChangeCallback,
        FrameResultCallback,
    },
    channel::Channel,
    channel_map::ChannelMap,
    format::{Direction, DisplayMode, PixelFormat},
    hardware::{Driver, DuplexProfile, HardwareUnit, ProfileManager},
    io::{HandlerConfig, HandlerStats},
    subunit::SubUnit,
    sync::lock,
    Error,
};
use serde::Serialize;
use std::{
    collections::BTreeMap,
    fmt,
    sync::{Arc, Mutex},
    time::Duration,
};

/// Lifecycle of a device across duplex profile changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    Initialized,
    /// Sub-units are gone until the new profile is activated
    Invalidated,
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceState::Initialized => f.write_str("initialized"),
            DeviceState::Invalidated => f.write_str("invalidated"),
        }
    }
}

/// Which sub-unit and direction an open channel is bound to.
#[derive(Clone)]
pub struct Binding {
    pub sub_unit: Arc<SubUnit>,
    pub direction: Direction,
}

/// Groups enumerated units by card, in order of first appearance.
pub fn group_units(
    units: Vec<Arc<dyn HardwareUnit>>,
) -> Vec<(i64, Vec<Arc<dyn HardwareUnit>>)> {
    let mut groups: Vec<(i64, Vec<Arc<dyn HardwareUnit>>)> = Vec::new();
    for unit in units {
        let group_id = unit.attributes().group_id;
        match groups.iter_mut().find(|(id, _)| *id == group_id) {
            Some((_, members)) => members.push(unit),
            None => groups.push((group_id, vec![unit])),
        }
    }
    groups
}

/// One physical card.
pub struct Device {
    index: u32,
    group_id: i64,
    model_name: String,
    state: DeviceState,
    profile: DuplexProfile,
    profile_manager: Option<Arc<dyn ProfileManager>>,
    sub_units: Vec<Arc<SubUnit>>,
    channel_map: ChannelMap,
    open_channels: Mutex<BTreeMap<Channel, Binding>>,
    invalidated_callbacks: Arc<CallbackRegistry<DeviceInvalidatedCallback>>,
    output_config: HandlerConfig,
    input_config: HandlerConfig,
}

impl Device {
    /// Builds a device from the units of one card group.
    pub fn new(
        index: u32,
        units: Vec<Arc<dyn HardwareUnit>>,
        output_config: &HandlerConfig,
        input_config: &HandlerConfig,
    ) -> Self {
        Device::build(
            index,
            units,
            output_config,
            input_config,
            Arc::new(CallbackRegistry::new()),
        )
    }

    fn build(
        index: u32,
        units: Vec<Arc<dyn HardwareUnit>>,
        output_config: &HandlerConfig,
        input_config: &HandlerConfig,
        invalidated_callbacks: Arc<CallbackRegistry<DeviceInvalidatedCallback>>,
    ) -> Self {
        let mut sub_units: Vec<Arc<SubUnit>> = units
            .into_iter()
            .map(|unit| Arc::new(SubUnit::new(unit, output_config, input_config)))
            .collect();
        sub_units.sort_by_key(|s| s.index());

        let (model_name, group_id, profile_id) = match sub_units.first() {
            Some(first) => (
                first.model_name().to_string(),
                first.group_id(),
                Some(first.attributes().profile_id),
            ),
            None => {
                log::error!("No sub-device provided for device index: {}", index);
                (String::new(), 0, None)
            }
        };

        let profile_manager = sub_units
            .first()
            .and_then(|s| s.hardware().profile_manager());
        let profile = match &profile_manager {
            Some(manager) => manager.active_profile(),
            None => profile_id
                .and_then(|id| DuplexProfile::ALL.into_iter().find(|p| p.id() == id))
                .unwrap_or(DuplexProfile::OneSubDeviceHalfDuplex),
        };

        let channel_map = ChannelMap::build(&model_name, profile, &sub_units);

        log::info!(
            "{} - {}: {} sub-units under {}",
            model_name,
            index,
            sub_units.len(),
            profile
        );

        Device {
            index,
            group_id,
            model_name,
            state: DeviceState::Initialized,
            profile,
            profile_manager,
            sub_units,
            channel_map,
            open_channels: Mutex::new(BTreeMap::new()),
            invalidated_callbacks,
            output_config: output_config.clone(),
            input_config: input_config.clone(),
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn group_id(&self) -> i64 {
        self.group_id
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Unique name of the form `"<model> - <index>"`.
    pub fn display_name(&self) -> String {
        format!("{} - {}", self.model_name, self.index)
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn is_invalidated(&self) -> bool {
        self.state == DeviceState::Invalidated
    }

    /// Duplex profile the channel map was built for.
    pub fn active_profile(&self) -> DuplexProfile {
        self.profile
    }

    pub fn profiles(&self) -> Vec<DuplexProfile> {
        match &self.profile_manager {
            Some(manager) => manager.profiles(),
            None => vec![self.profile],
        }
    }

    pub fn profile_manager(&self) -> Option<&Arc<dyn ProfileManager>> {
        self.profile_manager.as_ref()
    }

    pub fn sub_units(&self) -> &[Arc<SubUnit>] {
        &self.sub_units
    }

    /// Requests a duplex profile change. The device is invalidated and
    /// rebuilt asynchronously once the card announces the change.
    pub fn set_active_profile(&self, profile: DuplexProfile) -> Result<(), Error> {
        let manager = self.profile_manager.as_ref().ok_or_else(|| {
            Error::Hardware(format!("{} has no selectable profiles", self.display_name()))
        })?;
        log::info!("{}: requesting profile {}", self.display_name(), profile);
        manager.set_active_profile(profile)
    }

    fn check_valid(&self) -> Result<(), Error> {
        match self.state {
            DeviceState::Initialized => Ok(()),
            DeviceState::Invalidated => Err(Error::Invalidated(self.index)),
        }
    }

    /// Sub-unit statically mapped to `(direction, channel)`, busy or not.
    pub fn sub_unit_of_channel(
        &self,
        direction: Direction,
        channel: Channel,
    ) -> Result<Arc<SubUnit>, Error> {
        self.check_valid()?;
        self.channel_map
            .resolve(direction, channel)
            .cloned()
            .ok_or(Error::NoSubUnit { direction, channel })
    }

    /// Every channel the active profile routes in `direction`.
    pub fn mapped_channels(&self, direction: Direction) -> Vec<Channel> {
        self.channel_map.channels(direction)
    }

    fn arbitrate(
        &self,
        open: &BTreeMap<Channel, Binding>,
        direction: Direction,
        channel: Channel,
    ) -> Result<Arc<SubUnit>, Error> {
        let sub_unit = self.sub_unit_of_channel(direction, channel)?;
        let busy = open.contains_key(&channel)
            || sub_unit.is_busy(direction)
            || (self.channel_map.is_half_duplex() && sub_unit.is_busy(direction.opposite()));
        if busy {
            return Err(Error::ChannelBusy { direction, channel });
        }
        Ok(sub_unit)
    }

    /// Resolves `(direction, channel)` to the sub-unit that would serve it,
    /// failing if none is mapped or it is already in use.
    pub fn can_open_channel(
        &self,
        direction: Direction,
        channel: Channel,
    ) -> Result<Arc<SubUnit>, Error> {
        let open = lock(&self.open_channels);
        self.arbitrate(&open, direction, channel)
    }

    /// Channels that can currently be opened in `direction`.
    pub fn available_channels(&self, direction: Direction) -> Vec<Channel> {
        let open = lock(&self.open_channels);
        Channel::ALL
            .into_iter()
            .filter(|&channel| self.arbitrate(&open, direction, channel).is_ok())
            .collect()
    }

    fn open_with(
        &self,
        direction: Direction,
        channel: Channel,
        open: impl FnOnce(&SubUnit) -> Result<(), Error>,
    ) -> Result<(), Error> {
        let mut channels = lock(&self.open_channels);
        let sub_unit = match self.arbitrate(&channels, direction, channel) {
            Ok(sub_unit) => sub_unit,
            Err(err) => {
                log::error!(
                    "(Device {}) {} {}: cannot open: {}",
                    self.index,
                    channel,
                    direction,
                    err
                );
                return Err(err);
            }
        };
        sub_unit.tag(self.index, direction, channel);
        open(&sub_unit)?;
        channels.insert(
            channel,
            Binding {
                sub_unit,
                direction,
            },
        );
        Ok(())
    }

    pub fn open_output(
        &self,
        channel: Channel,
        mode: DisplayMode,
        pixel_format: PixelFormat,
    ) -> Result<(), Error> {
        self.open_with(Direction::Output, channel, |sub_unit| {
            sub_unit.open_output(mode, pixel_format)
        })
    }

    /// Opens a capture channel. Without `mode` the input starts at the
    /// default mode and follows the detected signal.
    pub fn open_input(
        &self,
        channel: Channel,
        mode: Option<DisplayMode>,
        pixel_format: PixelFormat,
    ) -> Result<(), Error> {
        self.open_with(Direction::Input, channel, |sub_unit| {
            sub_unit.open_input(mode, pixel_format)
        })
    }

    /// Binding of an open channel.
    pub fn binding(&self, channel: Channel) -> Result<Binding, Error> {
        self.check_valid()?;
        lock(&self.open_channels)
            .get(&channel)
            .cloned()
            .ok_or_else(|| {
                log::error!("(Device {}) no open channel found: {}", self.index, channel);
                Error::ChannelNotOpen(channel)
            })
    }

    pub fn is_open(&self, channel: Channel) -> bool {
        lock(&self.open_channels).contains_key(&channel)
    }

    /// Open channels and their directions, in port order.
    pub fn open_channels(&self) -> Vec<(Channel, Direction)> {
        lock(&self.open_channels)
            .iter()
            .map(|(channel, binding)| (*channel, binding.direction))
            .collect()
    }

    pub fn close_channel(&self, channel: Channel) -> Result<(), Error> {
        self.check_valid()?;
        let mut channels = lock(&self.open_channels);
        let Some(binding) = channels.get(&channel) else {
            log::error!("(Device {}) no open channel found: {}", self.index, channel);
            return Err(Error::ChannelNotOpen(channel));
        };
        binding.sub_unit.close(binding.direction)?;
        channels.remove(&channel);
        Ok(())
    }

    pub fn start_stream(&self, channel: Channel) -> Result<(), Error> {
        let binding = self.binding(channel)?;
        binding.sub_unit.start(binding.direction)
    }

    pub fn stop_stream(&self, channel: Channel) -> Result<(), Error> {
        let binding = self.binding(channel)?;
        binding.sub_unit.stop(binding.direction)
    }

    /// Blocks until the channel has a frame to transfer or `timeout`
    /// elapses. No device lock is held while waiting.
    pub fn wait_frame(&self, channel: Channel, timeout: Duration) -> Result<(), Error> {
        let binding = self.binding(channel)?;
        binding.sub_unit.wait_frame(binding.direction, timeout)
    }

    pub fn transfer_frame(&self, channel: Channel, buffer: &mut [u8]) -> Result<usize, Error> {
        let binding = self.binding(channel)?;
        binding.sub_unit.transfer_frame(binding.direction, buffer)
    }

    /// `(frame_duration, time_scale)` of the open channel.
    pub fn delta_seconds(&self, channel: Channel) -> Result<(u32, u32), Error> {
        let binding = self.binding(channel)?;
        binding.sub_unit.delta_seconds(binding.direction)
    }

    pub fn stats(&self, channel: Channel) -> Result<HandlerStats, Error> {
        let binding = self.binding(channel)?;
        binding.sub_unit.stats(binding.direction)
    }

    /// Subscribes to frame results of an open channel.
    pub fn add_frame_result_callback(
        &self,
        channel: Channel,
        callback: Arc<FrameResultCallback>,
    ) -> Result<CallbackId, Error> {
        let binding = self.binding(channel)?;
        binding
            .sub_unit
            .add_frame_result_callback(binding.direction, callback)
    }

    pub fn remove_frame_result_callback(
        &self,
        channel: Channel,
        id: CallbackId,
    ) -> Result<bool, Error> {
        let binding = self.binding(channel)?;
        Ok(binding
            .sub_unit
            .remove_frame_result_callback(binding.direction, id))
    }

    /// Subscribes to signal format changes on the input mapped to
    /// `channel`, whether or not it is open.
    pub fn add_format_change_callback(
        &self,
        channel: Channel,
        callback: Arc<FormatChangeCallback>,
    ) -> Result<CallbackId, Error> {
        self.sub_unit_of_channel(Direction::Input, channel)?
            .add_format_change_callback(callback)
    }

    pub fn remove_format_change_callback(
        &self,
        channel: Channel,
        id: CallbackId,
    ) -> Result<bool, Error> {
        Ok(self
            .sub_unit_of_channel(Direction::Input, channel)?
            .remove_format_change_callback(id))
    }

    pub fn add_invalidated_callback(&self, callback: Arc<DeviceInvalidatedCallback>) -> CallbackId {
        self.invalidated_callbacks.add(callback)
    }

    pub fn remove_invalidated_callback(&self, id: CallbackId) -> bool {
        self.invalidated_callbacks.remove(id)
    }

    /// Closes every open channel and drops the sub-units.
    ///
    /// Returns the invalidation subscribers so the caller can notify them
    /// after releasing its exclusive lock on the device.
    pub fn invalidate(&mut self) -> Vec<Arc<DeviceInvalidatedCallback>> {
        let open = std::mem::take(&mut *lock(&self.open_channels));
        for (channel, binding) in open {
            log::info!(
                "(Device {}) {} {}: closed by profile change",
                self.index,
                channel,
                binding.direction
            );
            if let Err(err) = binding.sub_unit.close(binding.direction) {
                log::warn!(
                    "(Device {}) {} {}: close failed: {}",
                    self.index,
                    channel,
                    binding.direction,
                    err
                );
            }
        }
        for sub_unit in &self.sub_units {
            sub_unit.close_all();
        }
        self.channel_map = ChannelMap::default();
        self.sub_units.clear();
        self.state = DeviceState::Invalidated;
        log::info!("{}: invalidated", self.display_name());
        self.invalidated_callbacks.snapshot()
    }

    /// Re-enumerates the hardware and replaces this device with the group
    /// sharing its group id, keeping the index and invalidation subscribers.
    pub fn reinit(&mut self, driver: &dyn Driver) -> Result<(), Error> {
        if self.state == DeviceState::Initialized {
            // Activation without a preceding change notification.
            let callbacks = self.invalidate();
            for callback in callbacks {
                callback(self.index);
            }
        }

        let units = driver
            .enumerate()?
            .into_iter()
            .filter(|u| u.attributes().group_id == self.group_id)
            .collect::<Vec<_>>();
        if units.is_empty() {
            log::error!(
                "{}: group {:#x} not found after profile change",
                self.display_name(),
                self.group_id
            );
            return Err(Error::DeviceNotFound(self.index));
        }

        *self = Device::build(
            self.index,
            units,
            &self.output_config,
            &self.input_config,
            Arc::clone(&self.invalidated_callbacks),
        );
        Ok(())
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        for sub_unit in &self.sub_units {
            sub_unit.close_all();
        }
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("index", &self.index)
            .field("model_name", &self.model_name)
            .field("group_id", &self.group_id)
            .field("state", &self.state)
            .field("profile", &self.profile)
            .field("sub_units", &self.sub_units.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        format::{FrameGeometry, FrameRate},
        sim::{CardConfig, SimulatedDriver, Topology},
    };
    use std::sync::atomic::{AtomicU32, Ordering};

    fn device(model: &str, profile: DuplexProfile) -> (SimulatedDriver, Device) {
        let driver = SimulatedDriver::manual(Topology {
            cards: vec![CardConfig::new(model, profile)],
        });
        let units = driver.enumerate().unwrap();
        let device = Device::new(0, units, &HandlerConfig::output(), &HandlerConfig::input());
        (driver, device)
    }

    fn hd() -> DisplayMode {
        DisplayMode::new(FrameGeometry::Hd720, FrameRate::P50).unwrap()
    }

    #[test]
    fn test_group_units() {
        let driver = SimulatedDriver::manual(Topology::default());
        let groups = group_units(driver.enumerate().unwrap());
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].1.len(), 4);
        assert_ne!(groups[0].0, groups[1].0);
    }

    #[test]
    fn test_display_name() {
        let (_driver, device) = device("DeckLink 8K Pro", DuplexProfile::FourSubDevicesHalfDuplex);
        assert_eq!(device.display_name(), "DeckLink 8K Pro - 0");
        assert_eq!(device.sub_units().len(), 4);
        assert_eq!(device.active_profile(), DuplexProfile::FourSubDevicesHalfDuplex);
    }

    #[test]
    fn test_second_open_fails() {
        let (_driver, device) = device("DeckLink 8K Pro", DuplexProfile::FourSubDevicesHalfDuplex);
        device
            .open_output(Channel::SingleLink1, hd(), PixelFormat::Ycbcr8Bit)
            .unwrap();
        assert!(matches!(
            device.open_output(Channel::SingleLink1, hd(), PixelFormat::Ycbcr8Bit),
            Err(Error::ChannelBusy { .. })
        ));
        // Half duplex: the same sub-unit cannot capture while playing out.
        assert!(matches!(
            device.open_input(Channel::SingleLink1, None, PixelFormat::Ycbcr8Bit),
            Err(Error::ChannelBusy { .. })
        ));
        assert_eq!(device.open_channels(), vec![(Channel::SingleLink1, Direction::Output)]);
    }

    #[test]
    fn test_label_names_opened_channel() {
        let (_driver, device) = device("DeckLink 8K Pro", DuplexProfile::TwoSubDevicesFullDuplex);
        device
            .open_output(Channel::SingleLink1, hd(), PixelFormat::Ycbcr8Bit)
            .unwrap();
        let unit = device
            .sub_unit_of_channel(Direction::Output, Channel::SingleLink1)
            .unwrap();
        assert_eq!(unit.output().unwrap().label(), "(Device 0) Single Link 1 Output");

        device.close_channel(Channel::SingleLink1).unwrap();
        device
            .open_output(Channel::SingleLink2, hd(), PixelFormat::Ycbcr8Bit)
            .unwrap();
        assert_eq!(unit.output().unwrap().label(), "(Device 0) Single Link 2 Output");
    }

    #[test]
    fn test_unmapped_channel() {
        let (_driver, device) = device("DeckLink 8K Pro", DuplexProfile::FourSubDevicesHalfDuplex);
        assert!(matches!(
            device.can_open_channel(Direction::Output, Channel::SingleLink5),
            Err(Error::NoSubUnit { .. })
        ));
        assert_eq!(device.available_channels(Direction::Input).len(), 4);
    }

    #[test]
    fn test_direction_limited_routes() {
        let (_driver, device) = device("DeckLink Duo 2", DuplexProfile::TwoSubDevicesFullDuplex);
        assert_eq!(
            device.available_channels(Direction::Output),
            vec![Channel::SingleLink1, Channel::SingleLink3]
        );
        device
            .open_output(Channel::SingleLink1, hd(), PixelFormat::Ycbcr8Bit)
            .unwrap();
        // Full duplex: sub-unit 0 still captures on its other connector.
        device
            .open_input(Channel::SingleLink2, Some(hd()), PixelFormat::Ycbcr8Bit)
            .unwrap();
        assert_eq!(device.open_channels().len(), 2);
    }

    #[test]
    fn test_unopened_channel_not_found() {
        let (_driver, device) = device("DeckLink 8K Pro", DuplexProfile::FourSubDevicesHalfDuplex);
        let err = device
            .wait_frame(Channel::SingleLink2, Duration::from_millis(1))
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(device.close_channel(Channel::SingleLink2).unwrap_err().is_not_found());
    }

    #[test]
    fn test_invalidate_and_reinit() {
        let (driver, mut device) = device("DeckLink 8K Pro", DuplexProfile::FourSubDevicesHalfDuplex);
        let fired = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&fired);
        device.add_invalidated_callback(Arc::new(move |_: u32| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        device
            .open_output(Channel::SingleLink3, hd(), PixelFormat::Ycbcr8Bit)
            .unwrap();
        let old = device.sub_unit_of_channel(Direction::Output, Channel::SingleLink3).unwrap();

        for callback in device.invalidate() {
            callback(device.index());
        }
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(device.is_invalidated());
        assert!(!old.is_busy(Direction::Output));
        assert!(matches!(
            device.wait_frame(Channel::SingleLink3, Duration::from_millis(1)),
            Err(Error::Invalidated(0))
        ));

        driver
            .card(0)
            .unwrap()
            .activate_profile(DuplexProfile::TwoSubDevicesHalfDuplex);
        device.reinit(&driver).unwrap();
        assert_eq!(device.state(), DeviceState::Initialized);
        assert_eq!(device.active_profile(), DuplexProfile::TwoSubDevicesHalfDuplex);
        assert_eq!(device.sub_units().len(), 2);
        assert!(device.open_channels().is_empty());
        assert!(device
            .available_channels(Direction::Output)
            .contains(&Channel::SingleLink3));

        // Subscribers survive the rebuild.
        device.invalidate();
        assert_eq!(device.invalidate().len(), 1);
    }
}
