// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::{
    callbacks::{CallbackId, FormatChangeCallback, FrameResultCallback},
    channel::Channel,
    format::{Direction, DisplayMode, FrameGeometry, FrameRate, PixelFormat},
    hardware::{HardwareUnit, UnitAttributes},
    io::{HandlerConfig, HandlerStats, InputHandler, IoHandler, OutputHandler},
    sync::lock,
    Error,
};
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::{Arc, Mutex},
    time::Duration,
};

/// Every display mode and pixel format pair a direction accepted when probed.
pub type ModeSupport = Arc<Vec<(DisplayMode, PixelFormat)>>;

/// One independently operable hardware sub-unit with its two I/O handlers.
pub struct SubUnit {
    unit: Arc<dyn HardwareUnit>,
    attributes: UnitAttributes,
    output: Option<OutputHandler>,
    input: Option<InputHandler>,
    probed: Mutex<HashMap<Direction, ModeSupport>>,
}

impl SubUnit {
    pub fn new(
        unit: Arc<dyn HardwareUnit>,
        output_config: &HandlerConfig,
        input_config: &HandlerConfig,
    ) -> Self {
        let attributes = unit.attributes();
        let output = unit
            .output()
            .map(|hw| OutputHandler::new(hw, output_config.clone()));
        let input = unit
            .input()
            .map(|hw| InputHandler::new(hw, input_config.clone()));
        log::debug!(
            "{} sub-unit {} ({}): output={} input={}",
            attributes.model_name,
            attributes.sub_unit_index,
            attributes.handle,
            output.is_some(),
            input.is_some()
        );
        SubUnit {
            unit,
            attributes,
            output,
            input,
            probed: Mutex::new(HashMap::new()),
        }
    }

    pub fn attributes(&self) -> &UnitAttributes {
        &self.attributes
    }

    /// Position of this sub-unit within its card.
    pub fn index(&self) -> u32 {
        self.attributes.sub_unit_index
    }

    pub fn model_name(&self) -> &str {
        &self.attributes.model_name
    }

    pub fn group_id(&self) -> i64 {
        self.attributes.group_id
    }

    pub fn hardware(&self) -> &Arc<dyn HardwareUnit> {
        &self.unit
    }

    pub fn output(&self) -> Option<&OutputHandler> {
        self.output.as_ref()
    }

    pub fn input(&self) -> Option<&InputHandler> {
        self.input.as_ref()
    }

    pub fn handler(&self, direction: Direction) -> Option<&dyn IoHandler> {
        match direction {
            Direction::Output => self.output.as_ref().map(|h| h as &dyn IoHandler),
            Direction::Input => self.input.as_ref().map(|h| h as &dyn IoHandler),
        }
    }

    fn missing(&self, direction: Direction) -> Error {
        Error::Hardware(format!(
            "{} sub-unit {} has no {} interface",
            self.attributes.model_name, self.attributes.sub_unit_index, direction
        ))
    }

    fn require(&self, direction: Direction) -> Result<&dyn IoHandler, Error> {
        self.handler(direction)
            .ok_or_else(|| self.missing(direction))
    }

    fn require_input(&self) -> Result<&InputHandler, Error> {
        self.input
            .as_ref()
            .ok_or_else(|| self.missing(Direction::Input))
    }

    /// True iff the handler for `direction` is open.
    pub fn is_busy(&self, direction: Direction) -> bool {
        self.handler(direction)
            .map(|h| h.state().is_open())
            .unwrap_or(false)
    }

    /// Labels the handler's log messages with the device and channel it
    /// currently serves.
    pub fn tag(&self, device: u32, direction: Direction, channel: Channel) {
        let label = format!("(Device {}) {} {}", device, channel, direction);
        match direction {
            Direction::Output => {
                if let Some(output) = &self.output {
                    output.set_label(label);
                }
            }
            Direction::Input => {
                if let Some(input) = &self.input {
                    input.set_label(label);
                }
            }
        }
    }

    /// Probes every display mode and pixel format against the hardware.
    ///
    /// The probe runs once per direction; later calls reuse the result.
    pub fn supported_modes(&self, direction: Direction) -> ModeSupport {
        let mut probed = lock(&self.probed);
        if let Some(support) = probed.get(&direction) {
            return Arc::clone(support);
        }

        let supports = |mode: DisplayMode, pf: PixelFormat| match direction {
            Direction::Output => self
                .output
                .as_ref()
                .map(|h| h.supports(mode, pf))
                .unwrap_or(false),
            Direction::Input => self
                .input
                .as_ref()
                .map(|h| h.supports(mode, pf))
                .unwrap_or(false),
        };
        let support: Vec<(DisplayMode, PixelFormat)> = DisplayMode::all()
            .flat_map(|mode| PixelFormat::ALL.into_iter().map(move |pf| (mode, pf)))
            .filter(|&(mode, pf)| supports(mode, pf))
            .collect();
        log::debug!(
            "{} sub-unit {}: {} {} mode/format pairs supported",
            self.attributes.model_name,
            self.attributes.sub_unit_index,
            support.len(),
            direction
        );

        let support = Arc::new(support);
        probed.insert(direction, Arc::clone(&support));
        support
    }

    /// Geometries and their frame rates supported in any of `pixel_formats`.
    pub fn supported_formats(
        &self,
        direction: Direction,
        pixel_formats: &[PixelFormat],
    ) -> BTreeMap<FrameGeometry, BTreeSet<FrameRate>> {
        let mut formats: BTreeMap<FrameGeometry, BTreeSet<FrameRate>> = BTreeMap::new();
        for (mode, pf) in self.supported_modes(direction).iter() {
            if pixel_formats.contains(pf) {
                formats.entry(mode.geometry()).or_default().insert(mode.rate());
            }
        }
        formats
    }

    /// Pixel formats supported for one display mode.
    pub fn supported_pixel_formats(&self, direction: Direction, mode: DisplayMode) -> Vec<PixelFormat> {
        self.supported_modes(direction)
            .iter()
            .filter(|(m, _)| *m == mode)
            .map(|&(_, pf)| pf)
            .collect()
    }

    pub fn open_output(&self, mode: DisplayMode, pixel_format: PixelFormat) -> Result<(), Error> {
        self.require(Direction::Output)?.open(mode, pixel_format)
    }

    /// Opens the input in `mode`, or in the default mode when `None`.
    pub fn open_input(
        &self,
        mode: Option<DisplayMode>,
        pixel_format: PixelFormat,
    ) -> Result<(), Error> {
        self.require_input()?.open_detecting(mode, pixel_format)
    }

    pub fn close(&self, direction: Direction) -> Result<(), Error> {
        self.require(direction)?.close()
    }

    pub fn start(&self, direction: Direction) -> Result<(), Error> {
        self.require(direction)?.start()
    }

    pub fn stop(&self, direction: Direction) -> Result<(), Error> {
        self.require(direction)?.stop()
    }

    pub fn wait_frame(&self, direction: Direction, timeout: Duration) -> Result<(), Error> {
        self.require(direction)?.wait_frame(timeout)
    }

    pub fn transfer_frame(&self, direction: Direction, buffer: &mut [u8]) -> Result<usize, Error> {
        self.require(direction)?.transfer_frame(buffer)
    }

    pub fn delta_seconds(&self, direction: Direction) -> Result<(u32, u32), Error> {
        self.require(direction)?
            .delta_seconds()
            .ok_or(Error::InvalidState("handler is not open"))
    }

    pub fn stats(&self, direction: Direction) -> Result<HandlerStats, Error> {
        Ok(self.require(direction)?.stats())
    }

    pub fn add_frame_result_callback(
        &self,
        direction: Direction,
        callback: Arc<FrameResultCallback>,
    ) -> Result<CallbackId, Error> {
        match direction {
            Direction::Output => self
                .output
                .as_ref()
                .map(|h| h.add_frame_result_callback(callback)),
            Direction::Input => self
                .input
                .as_ref()
                .map(|h| h.add_frame_result_callback(callback)),
        }
        .ok_or_else(|| self.missing(direction))
    }

    pub fn remove_frame_result_callback(&self, direction: Direction, id: CallbackId) -> bool {
        match direction {
            Direction::Output => self
                .output
                .as_ref()
                .map(|h| h.remove_frame_result_callback(id))
                .unwrap_or(false),
            Direction::Input => self
                .input
                .as_ref()
                .map(|h| h.remove_frame_result_callback(id))
                .unwrap_or(false),
        }
    }

    pub fn add_format_change_callback(
        &self,
        callback: Arc<FormatChangeCallback>,
    ) -> Result<CallbackId, Error> {
        Ok(self.require_input()?.add_format_change_callback(callback))
    }

    pub fn remove_format_change_callback(&self, id: CallbackId) -> bool {
        self.input
            .as_ref()
            .map(|h| h.remove_format_change_callback(id))
            .unwrap_or(false)
    }

    /// Closes whichever handlers are open. Used when the sub-unit is about to
    /// be discarded.
    pub fn close_all(&self) {
        for direction in Direction::ALL {
            if self.is_busy(direction) {
                if let Err(err) = self.close(direction) {
                    log::warn!(
                        "{} sub-unit {}: unable to close {}: {}",
                        self.attributes.model_name,
                        self.attributes.sub_unit_index,
                        direction,
                        err
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        hardware::{Driver, DuplexProfile},
        sim::{CardConfig, SimulatedDriver, Topology},
    };

    fn sub_unit(config: CardConfig) -> SubUnit {
        let driver = SimulatedDriver::manual(Topology { cards: vec![config] });
        let unit = driver.enumerate().unwrap().remove(0);
        SubUnit::new(unit, &HandlerConfig::output(), &HandlerConfig::input())
    }

    #[test]
    fn test_busy_tracks_open() {
        let unit = sub_unit(CardConfig::new("DeckLink Duo 2", DuplexProfile::FourSubDevicesHalfDuplex));
        let mode = DisplayMode::new(FrameGeometry::Hd720, FrameRate::P50).unwrap();
        assert!(!unit.is_busy(Direction::Output));

        unit.open_output(mode, PixelFormat::Ycbcr8Bit).unwrap();
        assert!(unit.is_busy(Direction::Output));
        assert!(!unit.is_busy(Direction::Input));

        unit.start(Direction::Output).unwrap();
        assert!(unit.is_busy(Direction::Output));

        unit.close(Direction::Output).unwrap();
        assert!(!unit.is_busy(Direction::Output));
    }

    #[test]
    fn test_supported_formats_filtered() {
        let mut config = CardConfig::new("DeckLink Duo 2", DuplexProfile::FourSubDevicesHalfDuplex);
        config.capabilities.geometries = vec![FrameGeometry::Pal, FrameGeometry::Hd1080];
        config.capabilities.pixel_formats = vec![PixelFormat::Ycbcr8Bit, PixelFormat::Ycbcr10Bit];
        let unit = sub_unit(config);

        let formats = unit.supported_formats(Direction::Output, &PixelFormat::YCBCR);
        assert_eq!(
            formats.keys().copied().collect::<Vec<_>>(),
            vec![FrameGeometry::Pal, FrameGeometry::Hd1080]
        );
        assert_eq!(formats[&FrameGeometry::Pal].len(), 2);
        assert!(formats[&FrameGeometry::Hd1080].contains(&FrameRate::P5994));

        assert!(unit
            .supported_formats(Direction::Output, &[PixelFormat::Bgra8Bit])
            .is_empty());

        let mode = DisplayMode::new(FrameGeometry::Pal, FrameRate::P50).unwrap();
        assert_eq!(
            unit.supported_pixel_formats(Direction::Input, mode),
            vec![PixelFormat::Ycbcr8Bit, PixelFormat::Ycbcr10Bit]
        );
    }

    #[test]
    fn test_probe_memoized() {
        let unit = sub_unit(CardConfig::new("DeckLink Duo 2", DuplexProfile::FourSubDevicesHalfDuplex));
        let first = unit.supported_modes(Direction::Output);
        let second = unit.supported_modes(Direction::Output);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_tag_labels_handler() {
        let unit = sub_unit(CardConfig::new("DeckLink Duo 2", DuplexProfile::FourSubDevicesHalfDuplex));
        unit.tag(1, Direction::Input, Channel::SingleLink3);
        assert_eq!(unit.input().unwrap().label(), "(Device 1) Single Link 3 Input");
    }
}
