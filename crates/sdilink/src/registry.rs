// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Process-wide device registry.
//!
//! The registry enumerates the driver once, groups sub-units into
//! [`Device`]s and serves every operation by device index. Each device sits
//! behind its own reader/writer lock: queries and per-tick calls take it
//! shared, duplex profile handling takes it exclusive. Blocking calls
//! (`wait_frame`) resolve the channel binding first and wait without holding
//! the device lock.

use crate::{
    callbacks::CallbackId,
    channel::Channel,
    device::{group_units, Binding, Device, DeviceState},
    format::{Direction, DisplayMode, FrameGeometry, FrameRate, PixelFormat},
    hardware::{Driver, DuplexProfile, ProfileCallback},
    io::{FrameResult, HandlerConfig, HandlerStats},
    settings::Settings,
    sync::{read, write},
    Error,
};
use serde::Serialize;
use std::{
    sync::{Arc, RwLock, RwLockReadGuard, Weak},
    time::Duration,
};

/// Construction options for a [`DeviceRegistry`].
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    pub output: HandlerConfig,
    pub input: HandlerConfig,
    pub settings: Settings,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        RegistryOptions {
            output: HandlerConfig::output(),
            input: HandlerConfig::input(),
            settings: Settings::default(),
        }
    }
}

/// Entry of [`DeviceRegistry::devices`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceDesc {
    pub index: u32,
    pub display_name: String,
}

/// Detailed description of one device.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub index: u32,
    pub display_name: String,
    pub model_name: String,
    pub group_id: i64,
    pub state: DeviceState,
    pub active_profile: DuplexProfile,
    pub profiles: Vec<DuplexProfile>,
    pub sub_unit_count: usize,
    pub open_channels: Vec<(Channel, Direction)>,
}

/// Parameters of [`DeviceRegistry::open_channel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelRequest {
    pub direction: Direction,
    pub channel: Channel,
    pub pixel_format: PixelFormat,
    /// Required for output; optional for input, which otherwise follows the
    /// detected signal
    pub geometry: Option<FrameGeometry>,
    pub frame_rate: Option<FrameRate>,
}

impl ChannelRequest {
    pub fn output(channel: Channel, pixel_format: PixelFormat) -> Self {
        ChannelRequest {
            direction: Direction::Output,
            channel,
            pixel_format,
            geometry: None,
            frame_rate: None,
        }
    }

    pub fn input(channel: Channel, pixel_format: PixelFormat) -> Self {
        ChannelRequest {
            direction: Direction::Input,
            ..ChannelRequest::output(channel, pixel_format)
        }
    }

    pub fn with_mode(mut self, geometry: FrameGeometry, frame_rate: FrameRate) -> Self {
        self.geometry = Some(geometry);
        self.frame_rate = Some(frame_rate);
        self
    }

    /// The requested display mode, if any.
    pub fn mode(&self) -> Result<Option<DisplayMode>, Error> {
        match (self.geometry, self.frame_rate) {
            (None, None) => Ok(None),
            (Some(geometry), Some(rate)) => DisplayMode::new(geometry, rate)
                .map(Some)
                .ok_or_else(|| {
                    Error::UnsupportedFormat(format!("{} has no {} mode", geometry, rate))
                }),
            _ => Err(Error::UnsupportedFormat(
                "geometry and frame rate must be given together".into(),
            )),
        }
    }
}

struct Inner {
    driver: Arc<dyn Driver>,
    devices: Vec<RwLock<Device>>,
    settings: RwLock<Settings>,
}

impl Inner {
    fn device(&self, index: u32) -> Result<RwLockReadGuard<'_, Device>, Error> {
        match self.devices.get(index as usize) {
            Some(device) => Ok(read(device)),
            None => {
                log::error!("No such device with index {}", index);
                Err(Error::DeviceNotFound(index))
            }
        }
    }

    fn watch(self: &Arc<Self>, index: u32) {
        let Some(device) = self.devices.get(index as usize) else {
            return;
        };
        if let Some(manager) = read(device).profile_manager() {
            manager.set_callback(Some(Arc::new(ProfileWatcher {
                registry: Arc::downgrade(self),
                index,
            })));
        }
    }

    fn invalidate(&self, index: u32) {
        let Some(device) = self.devices.get(index as usize) else {
            return;
        };
        let callbacks = {
            let mut device = write(device);
            if device.is_invalidated() {
                return;
            }
            device.invalidate()
        };
        for callback in callbacks {
            callback(index);
        }
    }

    fn reinit(self: &Arc<Self>, index: u32) {
        let Some(device) = self.devices.get(index as usize) else {
            return;
        };
        self.invalidate(index);
        let result = write(device).reinit(self.driver.as_ref());
        match result {
            Ok(()) => self.watch(index),
            Err(err) => log::error!("(Device {}) rebuild failed: {}", index, err),
        }
    }
}

/// Receives duplex profile notifications for one device.
struct ProfileWatcher {
    registry: Weak<Inner>,
    index: u32,
}

impl ProfileCallback for ProfileWatcher {
    fn profile_changing(&self, profile: DuplexProfile, streams_will_be_forced_to_stop: bool) {
        log::info!(
            "(Device {}) profile changing to {} (streams forced to stop: {})",
            self.index,
            profile,
            streams_will_be_forced_to_stop
        );
        if let Some(registry) = self.registry.upgrade() {
            registry.invalidate(self.index);
        }
    }

    fn profile_activated(&self, profile: DuplexProfile) {
        log::info!("(Device {}) profile {} activated", self.index, profile);
        if let Some(registry) = self.registry.upgrade() {
            registry.reinit(self.index);
        }
    }
}

/// Every device found on the system, served by index.
pub struct DeviceRegistry {
    inner: Arc<Inner>,
}

impl DeviceRegistry {
    /// Enumerates `driver` and builds one device per card group.
    ///
    /// Invalid port-mapping settings are logged and replaced by defaults.
    pub fn new(driver: Arc<dyn Driver>, options: RegistryOptions) -> Result<Self, Error> {
        let settings = match options.settings.validate() {
            Ok(()) => options.settings,
            Err(err) => {
                log::error!("{}. Using default settings.", err);
                Settings::default()
            }
        };

        let devices: Vec<RwLock<Device>> = group_units(driver.enumerate()?)
            .into_iter()
            .enumerate()
            .map(|(index, (_, units))| {
                RwLock::new(Device::new(
                    index as u32,
                    units,
                    &options.output,
                    &options.input,
                ))
            })
            .collect();
        log::info!("found {} devices", devices.len());

        let inner = Arc::new(Inner {
            driver,
            devices,
            settings: RwLock::new(settings),
        });
        for index in 0..inner.devices.len() {
            inner.watch(index as u32);
        }
        Ok(DeviceRegistry { inner })
    }

    pub fn device_count(&self) -> usize {
        self.inner.devices.len()
    }

    pub fn devices(&self) -> Vec<DeviceDesc> {
        self.inner
            .devices
            .iter()
            .map(|device| {
                let device = read(device);
                DeviceDesc {
                    index: device.index(),
                    display_name: device.display_name(),
                }
            })
            .collect()
    }

    pub fn device_info(&self, index: u32) -> Result<DeviceInfo, Error> {
        let device = self.inner.device(index)?;
        Ok(DeviceInfo {
            index: device.index(),
            display_name: device.display_name(),
            model_name: device.model_name().to_string(),
            group_id: device.group_id(),
            state: device.state(),
            active_profile: device.active_profile(),
            profiles: device.profiles(),
            sub_unit_count: device.sub_units().len(),
            open_channels: device.open_channels(),
        })
    }

    /// Index of the device whose display name is `name`.
    pub fn device_by_display_name(&self, name: &str) -> Option<u32> {
        self.inner
            .devices
            .iter()
            .map(read)
            .find(|device| device.display_name() == name)
            .map(|device| device.index())
    }

    /// Channels that can be opened right now in `direction`.
    pub fn available_channels(&self, index: u32, direction: Direction) -> Result<Vec<Channel>, Error> {
        Ok(self.inner.device(index)?.available_channels(direction))
    }

    /// Channels routed in `direction` under the active profile, open or not.
    pub fn mapped_channels(&self, index: u32, direction: Direction) -> Result<Vec<Channel>, Error> {
        Ok(self.inner.device(index)?.mapped_channels(direction))
    }

    pub fn channel_name(channel: Channel) -> &'static str {
        channel.name()
    }

    pub fn channel_from_name(name: &str) -> Option<Channel> {
        Channel::from_name(name)
    }

    /// Channel name with the port numbers remapped for the device's model.
    pub fn port_mapped_channel_name(&self, index: u32, channel: Channel) -> Result<String, Error> {
        let model_name = self.inner.device(index)?.model_name().to_string();
        Ok(read(&self.inner.settings).map_name(&model_name, channel.name()))
    }

    /// Inverse of [`DeviceRegistry::port_mapped_channel_name`].
    pub fn channel_from_port_mapped_name(&self, index: u32, name: &str) -> Result<Option<Channel>, Error> {
        let model_name = self.inner.device(index)?.model_name().to_string();
        let original = read(&self.inner.settings).unmap_name(&model_name, name);
        Ok(Channel::from_name(&original))
    }

    pub fn settings(&self) -> Settings {
        read(&self.inner.settings).clone()
    }

    /// Replaces the port-mapping settings after validating them.
    pub fn set_settings(&self, settings: Settings) -> Result<(), Error> {
        settings.validate()?;
        *write(&self.inner.settings) = settings;
        Ok(())
    }

    /// Geometries the channel supports in any pixel format.
    pub fn supported_geometries(
        &self,
        index: u32,
        direction: Direction,
        channel: Channel,
    ) -> Result<Vec<FrameGeometry>, Error> {
        let sub_unit = self.inner.device(index)?.sub_unit_of_channel(direction, channel)?;
        Ok(sub_unit
            .supported_formats(direction, &PixelFormat::ALL)
            .into_keys()
            .collect())
    }

    pub fn supported_frame_rates(
        &self,
        index: u32,
        direction: Direction,
        channel: Channel,
        geometry: FrameGeometry,
    ) -> Result<Vec<FrameRate>, Error> {
        let sub_unit = self.inner.device(index)?.sub_unit_of_channel(direction, channel)?;
        Ok(sub_unit
            .supported_formats(direction, &PixelFormat::ALL)
            .remove(&geometry)
            .map(|rates| rates.into_iter().collect())
            .unwrap_or_default())
    }

    pub fn supported_pixel_formats(
        &self,
        index: u32,
        direction: Direction,
        channel: Channel,
        geometry: FrameGeometry,
        frame_rate: FrameRate,
    ) -> Result<Vec<PixelFormat>, Error> {
        let sub_unit = self.inner.device(index)?.sub_unit_of_channel(direction, channel)?;
        let Some(mode) = DisplayMode::new(geometry, frame_rate) else {
            return Ok(Vec::new());
        };
        Ok(sub_unit.supported_pixel_formats(direction, mode))
    }

    pub fn open_channel(&self, index: u32, request: &ChannelRequest) -> Result<(), Error> {
        let mode = request.mode()?;
        let device = self.inner.device(index)?;
        match request.direction {
            Direction::Output => {
                let mode = mode.ok_or_else(|| {
                    Error::UnsupportedFormat("output requires a display mode".into())
                })?;
                device.open_output(request.channel, mode, request.pixel_format)
            }
            Direction::Input => device.open_input(request.channel, mode, request.pixel_format),
        }
    }

    pub fn close_channel(&self, index: u32, channel: Channel) -> Result<(), Error> {
        self.inner.device(index)?.close_channel(channel)
    }

    fn binding(&self, index: u32, channel: Channel) -> Result<Binding, Error> {
        self.inner.device(index)?.binding(channel)
    }

    pub fn start_stream(&self, index: u32, channel: Channel) -> Result<(), Error> {
        let binding = self.binding(index, channel)?;
        binding.sub_unit.start(binding.direction)
    }

    pub fn stop_stream(&self, index: u32, channel: Channel) -> Result<(), Error> {
        let binding = self.binding(index, channel)?;
        binding.sub_unit.stop(binding.direction)
    }

    /// Blocks until the channel has a frame to transfer, at most `timeout`.
    pub fn wait_frame(&self, index: u32, channel: Channel, timeout: Duration) -> Result<(), Error> {
        let binding = self.binding(index, channel)?;
        binding.sub_unit.wait_frame(binding.direction, timeout)
    }

    /// Copies one frame between `buffer` and the channel: into the next
    /// playout slot for output, out of the oldest capture for input.
    pub fn transfer_frame(&self, index: u32, channel: Channel, buffer: &mut [u8]) -> Result<usize, Error> {
        let binding = self.binding(index, channel)?;
        binding.sub_unit.transfer_frame(binding.direction, buffer)
    }

    /// `(frame_duration, time_scale)` of the open channel's display mode.
    pub fn delta_seconds(&self, index: u32, channel: Channel) -> Result<(u32, u32), Error> {
        self.inner.device(index)?.delta_seconds(channel)
    }

    pub fn handler_stats(&self, index: u32, channel: Channel) -> Result<HandlerStats, Error> {
        self.inner.device(index)?.stats(channel)
    }

    pub fn register_format_change_callback<F>(
        &self,
        index: u32,
        channel: Channel,
        callback: F,
    ) -> Result<CallbackId, Error>
    where
        F: Fn(FrameGeometry, FrameRate, PixelFormat) + Send + Sync + 'static,
    {
        self.inner
            .device(index)?
            .add_format_change_callback(channel, Arc::new(callback))
    }

    pub fn unregister_format_change_callback(
        &self,
        index: u32,
        channel: Channel,
        id: CallbackId,
    ) -> Result<bool, Error> {
        self.inner
            .device(index)?
            .remove_format_change_callback(channel, id)
    }

    /// Subscribes to frame results of an open channel. The callback receives
    /// the result and the processed-frame number.
    pub fn register_frame_result_callback<F>(
        &self,
        index: u32,
        channel: Channel,
        callback: F,
    ) -> Result<CallbackId, Error>
    where
        F: Fn(FrameResult, u64) + Send + Sync + 'static,
    {
        self.inner
            .device(index)?
            .add_frame_result_callback(channel, Arc::new(callback))
    }

    pub fn unregister_frame_result_callback(
        &self,
        index: u32,
        channel: Channel,
        id: CallbackId,
    ) -> Result<bool, Error> {
        self.inner
            .device(index)?
            .remove_frame_result_callback(channel, id)
    }

    /// Subscribes to profile-change invalidation of a device. Subscriptions
    /// survive the device's rebuild.
    pub fn register_device_invalidated_callback<F>(&self, index: u32, callback: F) -> Result<CallbackId, Error>
    where
        F: Fn(u32) + Send + Sync + 'static,
    {
        Ok(self
            .inner
            .device(index)?
            .add_invalidated_callback(Arc::new(callback)))
    }

    pub fn unregister_device_invalidated_callback(&self, index: u32, id: CallbackId) -> Result<bool, Error> {
        Ok(self.inner.device(index)?.remove_invalidated_callback(id))
    }

    pub fn active_profile(&self, index: u32) -> Result<DuplexProfile, Error> {
        Ok(self.inner.device(index)?.active_profile())
    }

    pub fn profiles(&self, index: u32) -> Result<Vec<DuplexProfile>, Error> {
        Ok(self.inner.device(index)?.profiles())
    }

    /// Requests a duplex profile change. Open channels on the device are
    /// closed and the device is rebuilt once the card reports the change.
    pub fn set_active_profile(&self, index: u32, profile: DuplexProfile) -> Result<(), Error> {
        let device = self.inner.device(index)?;
        if device.active_profile() == profile && !device.is_invalidated() {
            return Ok(());
        }
        device.set_active_profile(profile)
    }
}

impl Drop for DeviceRegistry {
    fn drop(&mut self) {
        for device in &self.inner.devices {
            if let Some(manager) = read(device).profile_manager() {
                manager.set_callback(None);
            }
        }
    }
}
