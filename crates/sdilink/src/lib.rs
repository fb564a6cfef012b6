// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! sdilink: channel arbitration and frame transfer for SDI capture and
//! playback cards.
//!
//! A physical card is exposed by its driver as a group of independently
//! operable *sub-units*. Which connectors ("channels") a sub-unit can drive
//! depends on the card's active duplex profile, and that profile can change
//! underneath a running application. This crate owns that problem:
//!
//! - [`registry::DeviceRegistry`] enumerates hardware units, groups them into
//!   [`device::Device`]s and serves every operation by device index.
//! - [`device::Device`] resolves a `(direction, channel)` pair to exactly one
//!   [`subunit::SubUnit`], enforces exclusivity and rebuilds itself when the
//!   duplex profile changes.
//! - [`io::OutputHandler`] and [`io::InputHandler`] run the buffer pool and
//!   frame queue that bridge the driver's notification thread with a caller
//!   that waits and transfers once per video frame.
//!
//! The driver is abstracted behind the traits in [`hardware`]. The [`sim`]
//! module provides an in-process implementation used by the tests and the
//! command-line tool.
//!
//! # Quick Start
//!
//! ```no_run
//! use sdilink::{
//!     channel::Channel,
//!     format::{Direction, FrameGeometry, FrameRate, PixelFormat},
//!     registry::{ChannelRequest, DeviceRegistry, RegistryOptions},
//!     sim::{SimulatedDriver, Topology},
//! };
//! use std::{sync::Arc, time::Duration};
//!
//! let driver = Arc::new(SimulatedDriver::realtime(Topology::default()));
//! let registry = DeviceRegistry::new(driver, RegistryOptions::default())?;
//!
//! let request = ChannelRequest::output(Channel::SingleLink1, PixelFormat::Ycbcr8Bit)
//!     .with_mode(FrameGeometry::Hd1080, FrameRate::P50);
//! registry.open_channel(0, &request)?;
//! registry.start_stream(0, Channel::SingleLink1)?;
//!
//! let payload = vec![0x80u8; 1920 * 2 * 1080];
//! for _ in 0..50 {
//!     registry.wait_frame(0, Channel::SingleLink1, Duration::from_millis(100))?;
//!     let mut buffer = payload.clone();
//!     registry.transfer_frame(0, Channel::SingleLink1, &mut buffer)?;
//! }
//! registry.close_channel(0, Channel::SingleLink1)?;
//! # Ok::<(), sdilink::Error>(())
//! ```

use std::{error, fmt, time::Duration};

use channel::Channel;
use format::Direction;

/// Error type for sdilink operations
#[derive(Debug)]
pub enum Error {
    /// No device is registered under this index
    DeviceNotFound(u32),

    /// The channel has no open session on the device
    ChannelNotOpen(Channel),

    /// No sub-unit is mapped to this direction and channel under the active
    /// duplex profile
    NoSubUnit {
        direction: Direction,
        channel: Channel,
    },

    /// The sub-unit mapped to this direction and channel is already in use
    ChannelBusy {
        direction: Direction,
        channel: Channel,
    },

    /// The device is between a profile change and its rebuild
    Invalidated(u32),

    /// The operation is not valid in the handler's current lifecycle state
    InvalidState(&'static str),

    /// The hardware does not support the requested display mode or pixel
    /// format
    UnsupportedFormat(String),

    /// The hardware rejected a request
    Hardware(String),

    /// A frame buffer could not be allocated
    Allocation(String),

    /// No frame became available before the timeout elapsed
    Timeout(Duration),

    /// Connector port mapping settings are invalid
    InvalidSettings(String),

    /// I/O error while reading configuration
    Io(std::io::Error),

    /// JSON error while parsing configuration
    Json(serde_json::Error),
}

impl Error {
    /// Returns true for lookup failures: unknown device, channel without an
    /// open session, channel without a mapped sub-unit, or a device whose
    /// sub-units are being rebuilt.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::DeviceNotFound(_)
                | Error::ChannelNotOpen(_)
                | Error::NoSubUnit { .. }
                | Error::Invalidated(_)
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::DeviceNotFound(index) => write!(f, "no device with index {}", index),
            Error::ChannelNotOpen(channel) => write!(f, "no open channel found: {}", channel),
            Error::NoSubUnit { direction, channel } => {
                write!(f, "no sub-unit serves {} as {}", channel, direction)
            }
            Error::ChannelBusy { direction, channel } => {
                write!(f, "{} {} is busy", channel, direction)
            }
            Error::Invalidated(index) => {
                write!(f, "device {} is changing its duplex profile", index)
            }
            Error::InvalidState(msg) => write!(f, "invalid state: {}", msg),
            Error::UnsupportedFormat(msg) => write!(f, "unsupported format: {}", msg),
            Error::Hardware(msg) => write!(f, "hardware error: {}", msg),
            Error::Allocation(msg) => write!(f, "frame allocation failed: {}", msg),
            Error::Timeout(timeout) => {
                write!(f, "timed out after {} ms", timeout.as_millis())
            }
            Error::InvalidSettings(msg) => write!(f, "invalid settings: {}", msg),
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::Json(err) => write!(f, "JSON error: {}", err),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Json(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err)
    }
}

/// Display modes, pixel formats and I/O direction.
pub mod format;

/// Logical connector identities.
pub mod channel;

/// Connector port remapping settings.
pub mod settings;

/// Hardware-backed frame buffers.
pub mod frame;

/// Capability traits implemented by card drivers.
pub mod hardware;

/// Subscriber registries for asynchronous notifications.
pub mod callbacks;

/// Per-direction I/O handlers.
pub mod io;

/// Sub-unit aggregation and capability probing.
pub mod subunit;

/// Static channel routing tables.
pub mod channel_map;

/// Devices, channel arbitration and profile recovery.
pub mod device;

/// Process-wide device registry.
pub mod registry;

/// In-process simulated card driver.
pub mod sim;

mod sync;

pub use registry::DeviceRegistry;

/// Get the sdilink library version string
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
        assert_eq!(version().split('.').count(), 3);
    }

    #[test]
    fn test_not_found_classification() {
        assert!(Error::DeviceNotFound(3).is_not_found());
        assert!(Error::ChannelNotOpen(Channel::SingleLink2).is_not_found());
        assert!(Error::NoSubUnit {
            direction: Direction::Input,
            channel: Channel::SingleLink8,
        }
        .is_not_found());
        assert!(!Error::Timeout(Duration::from_millis(100)).is_not_found());
        assert!(!Error::ChannelBusy {
            direction: Direction::Output,
            channel: Channel::SingleLink1,
        }
        .is_not_found());
    }

    #[test]
    fn test_error_display() {
        let err = Error::ChannelNotOpen(Channel::SingleLink3);
        assert_eq!(err.to_string(), "no open channel found: Single Link 3");

        let err = Error::Timeout(Duration::from_millis(250));
        assert_eq!(err.to_string(), "timed out after 250 ms");
    }

    #[test]
    fn test_error_source() {
        use std::error::Error as _;

        let err = Error::from(std::io::Error::new(std::io::ErrorKind::NotFound, "missing"));
        assert!(err.source().is_some());
        assert!(Error::InvalidState("closed").source().is_none());
    }
}
