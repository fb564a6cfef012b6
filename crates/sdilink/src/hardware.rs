// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Capability traits a card driver implements.
//!
//! The driver owns a notification thread of its own. Everything in the
//! `*Callback` traits is invoked from that thread, asynchronously, with no
//! ordering relationship to the caller's thread. Handlers call most request
//! methods while holding their session lock, so implementations may deliver
//! notifications synchronously only from [`VideoOutput::stop_playback`],
//! [`VideoInput::pause_streams`], [`VideoInput::stop_streams`] and
//! [`ProfileManager::set_active_profile`]'s asynchronous follow-up.
//!
//! Notification sinks never fail and never panic. They report everything
//! through handler queues, counters and subscriber callbacks.

use crate::{
    format::{DisplayMode, PixelFormat},
    frame::FrameBuffer,
    Error,
};
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};

/// Static identity of one hardware sub-unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitAttributes {
    /// Card model, e.g. `"DeckLink 8K Pro"`
    pub model_name: String,
    /// Position of this sub-unit inside its card
    pub sub_unit_index: u32,
    /// Identifier shared by every sub-unit of the same physical card
    pub group_id: i64,
    /// Identifier of the duplex profile the sub-unit was enumerated under
    pub profile_id: i64,
    pub persistent_id: i64,
    pub topological_id: i64,
    /// Driver handle string
    pub handle: String,
}

/// Hardware partitioning of a card's connectors among sub-units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DuplexProfile {
    OneSubDeviceFullDuplex,
    OneSubDeviceHalfDuplex,
    TwoSubDevicesFullDuplex,
    TwoSubDevicesHalfDuplex,
    FourSubDevicesHalfDuplex,
}

impl DuplexProfile {
    pub const ALL: [DuplexProfile; 5] = [
        DuplexProfile::OneSubDeviceFullDuplex,
        DuplexProfile::OneSubDeviceHalfDuplex,
        DuplexProfile::TwoSubDevicesFullDuplex,
        DuplexProfile::TwoSubDevicesHalfDuplex,
        DuplexProfile::FourSubDevicesHalfDuplex,
    ];

    /// Half-duplex sub-units can run only one direction at a time.
    pub fn is_half_duplex(self) -> bool {
        matches!(
            self,
            DuplexProfile::OneSubDeviceHalfDuplex
                | DuplexProfile::TwoSubDevicesHalfDuplex
                | DuplexProfile::FourSubDevicesHalfDuplex
        )
    }

    pub fn sub_unit_count(self) -> u32 {
        match self {
            DuplexProfile::OneSubDeviceFullDuplex | DuplexProfile::OneSubDeviceHalfDuplex => 1,
            DuplexProfile::TwoSubDevicesFullDuplex | DuplexProfile::TwoSubDevicesHalfDuplex => 2,
            DuplexProfile::FourSubDevicesHalfDuplex => 4,
        }
    }

    /// Numeric identifier reported in [`UnitAttributes::profile_id`].
    pub fn id(self) -> i64 {
        match self {
            DuplexProfile::OneSubDeviceFullDuplex => 0x31_64_66_64,
            DuplexProfile::OneSubDeviceHalfDuplex => 0x31_64_68_64,
            DuplexProfile::TwoSubDevicesFullDuplex => 0x32_64_66_64,
            DuplexProfile::TwoSubDevicesHalfDuplex => 0x32_64_68_64,
            DuplexProfile::FourSubDevicesHalfDuplex => 0x34_64_68_64,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DuplexProfile::OneSubDeviceFullDuplex => "one-sub-device-full-duplex",
            DuplexProfile::OneSubDeviceHalfDuplex => "one-sub-device-half-duplex",
            DuplexProfile::TwoSubDevicesFullDuplex => "two-sub-devices-full-duplex",
            DuplexProfile::TwoSubDevicesHalfDuplex => "two-sub-devices-half-duplex",
            DuplexProfile::FourSubDevicesHalfDuplex => "four-sub-devices-half-duplex",
        }
    }
}

impl fmt::Display for DuplexProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for DuplexProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DuplexProfile::ALL
            .into_iter()
            .find(|p| p.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown duplex profile: {}", s))
    }
}

/// How the hardware finished with a scheduled output frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CompletionResult {
    /// Displayed on time
    Completed,
    /// Displayed, but after its scheduled time
    DisplayedLate,
    /// Never displayed
    Dropped,
    /// Returned unused because playback stopped
    Flushed,
}

/// Enumerates the hardware units present in the system.
pub trait Driver: Send + Sync {
    /// Returns every sub-unit of every card, as currently partitioned.
    ///
    /// A duplex profile change invalidates previously returned units; callers
    /// enumerate again once the new profile is active.
    fn enumerate(&self) -> Result<Vec<Arc<dyn HardwareUnit>>, Error>;
}

/// One independently operable sub-unit of a card.
pub trait HardwareUnit: Send + Sync {
    fn attributes(&self) -> UnitAttributes;

    /// Playback interface, if the unit has one.
    fn output(&self) -> Option<Arc<dyn VideoOutput>>;

    /// Capture interface, if the unit has one.
    fn input(&self) -> Option<Arc<dyn VideoInput>>;

    /// Duplex profile control, if the card has selectable profiles.
    fn profile_manager(&self) -> Option<Arc<dyn ProfileManager>>;
}

/// Playback side of a sub-unit.
pub trait VideoOutput: Send + Sync {
    fn supports_mode(&self, mode: DisplayMode, pixel_format: PixelFormat) -> bool;

    fn create_frame(&self, mode: DisplayMode, pixel_format: PixelFormat)
        -> Result<FrameBuffer, Error>;

    fn enable(&self, mode: DisplayMode, pixel_format: PixelFormat) -> Result<(), Error>;

    fn disable(&self) -> Result<(), Error>;

    fn set_callback(&self, callback: Option<Arc<dyn OutputCallback>>);

    fn start_playback(&self, start_time: i64, time_scale: u32) -> Result<(), Error>;

    /// Stops playback. Frames still scheduled are returned through
    /// [`OutputCallback::frame_completed`] with [`CompletionResult::Flushed`],
    /// followed by [`OutputCallback::playback_stopped`].
    fn stop_playback(&self) -> Result<(), Error>;

    /// Queues `frame` for display at `display_time` in `time_scale` units.
    ///
    /// On rejection the frame is handed back with the error so that no buffer
    /// is lost.
    fn schedule_frame(
        &self,
        frame: FrameBuffer,
        display_time: i64,
        duration: u32,
        time_scale: u32,
    ) -> Result<(), (FrameBuffer, Error)>;
}

/// Capture side of a sub-unit.
pub trait VideoInput: Send + Sync {
    fn supports_mode(&self, mode: DisplayMode, pixel_format: PixelFormat) -> bool;

    fn create_frame(&self, mode: DisplayMode, pixel_format: PixelFormat)
        -> Result<FrameBuffer, Error>;

    /// Enables capture with signal format detection. Calling it again while
    /// enabled reconfigures the input.
    fn enable(&self, mode: DisplayMode, pixel_format: PixelFormat) -> Result<(), Error>;

    fn disable(&self) -> Result<(), Error>;

    fn set_callback(&self, callback: Option<Arc<dyn InputCallback>>);

    /// Gives an empty buffer to the hardware to capture into.
    fn supply_buffer(&self, frame: FrameBuffer) -> Result<(), (FrameBuffer, Error)>;

    fn start_streams(&self) -> Result<(), Error>;

    fn stop_streams(&self) -> Result<(), Error>;

    fn pause_streams(&self) -> Result<(), Error>;

    /// Discards pending captures and returns every supplied buffer.
    fn flush_streams(&self) -> Vec<FrameBuffer>;
}

/// Duplex profile selection for a card.
pub trait ProfileManager: Send + Sync {
    fn profiles(&self) -> Vec<DuplexProfile>;

    fn active_profile(&self) -> DuplexProfile;

    /// Requests a profile change. The change is announced asynchronously
    /// through [`ProfileCallback`].
    fn set_active_profile(&self, profile: DuplexProfile) -> Result<(), Error>;

    fn set_callback(&self, callback: Option<Arc<dyn ProfileCallback>>);
}

/// Playback notifications.
pub trait OutputCallback: Send + Sync {
    fn frame_completed(&self, frame: FrameBuffer, result: CompletionResult);

    fn playback_stopped(&self);
}

/// Capture notifications.
pub trait InputCallback: Send + Sync {
    fn frame_arrived(&self, frame: FrameBuffer);

    fn format_changed(&self, mode: DisplayMode, pixel_format: PixelFormat);
}

/// Duplex profile notifications.
pub trait ProfileCallback: Send + Sync {
    /// Sub-units enumerated under the old profile are about to disappear.
    fn profile_changing(&self, profile: DuplexProfile, streams_will_be_forced_to_stop: bool);

    /// The new profile is active and the card can be enumerated again.
    fn profile_activated(&self, profile: DuplexProfile);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_shape() {
        assert!(DuplexProfile::FourSubDevicesHalfDuplex.is_half_duplex());
        assert!(!DuplexProfile::TwoSubDevicesFullDuplex.is_half_duplex());
        assert_eq!(DuplexProfile::FourSubDevicesHalfDuplex.sub_unit_count(), 4);
        assert_eq!(DuplexProfile::OneSubDeviceFullDuplex.sub_unit_count(), 1);
    }

    #[test]
    fn test_profile_names() {
        for profile in DuplexProfile::ALL {
            assert_eq!(profile.name().parse::<DuplexProfile>(), Ok(profile));
        }
        let json = serde_json::to_string(&DuplexProfile::TwoSubDevicesHalfDuplex).unwrap();
        assert_eq!(json, "\"two-sub-devices-half-duplex\"");
    }

    #[test]
    fn test_profile_ids_distinct() {
        let mut ids: Vec<_> = DuplexProfile::ALL.iter().map(|p| p.id()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), DuplexProfile::ALL.len());
    }
}
