// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// A logical SDI connector as seen by callers.
///
/// Channels are lookup keys only. Which sub-unit serves a channel depends on
/// the card model and its active duplex profile, see [`crate::channel_map`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Channel {
    #[serde(rename = "Single Link 1")]
    SingleLink1,
    #[serde(rename = "Single Link 2")]
    SingleLink2,
    #[serde(rename = "Single Link 3")]
    SingleLink3,
    #[serde(rename = "Single Link 4")]
    SingleLink4,
    #[serde(rename = "Single Link 5")]
    SingleLink5,
    #[serde(rename = "Single Link 6")]
    SingleLink6,
    #[serde(rename = "Single Link 7")]
    SingleLink7,
    #[serde(rename = "Single Link 8")]
    SingleLink8,
}

impl Channel {
    pub const ALL: [Channel; 8] = [
        Channel::SingleLink1,
        Channel::SingleLink2,
        Channel::SingleLink3,
        Channel::SingleLink4,
        Channel::SingleLink5,
        Channel::SingleLink6,
        Channel::SingleLink7,
        Channel::SingleLink8,
    ];

    /// Display name, e.g. `"Single Link 3"`.
    pub fn name(self) -> &'static str {
        match self {
            Channel::SingleLink1 => "Single Link 1",
            Channel::SingleLink2 => "Single Link 2",
            Channel::SingleLink3 => "Single Link 3",
            Channel::SingleLink4 => "Single Link 4",
            Channel::SingleLink5 => "Single Link 5",
            Channel::SingleLink6 => "Single Link 6",
            Channel::SingleLink7 => "Single Link 7",
            Channel::SingleLink8 => "Single Link 8",
        }
    }

    /// Inverse of [`Channel::name`]. Unknown names yield `None`.
    pub fn from_name(name: &str) -> Option<Channel> {
        Channel::ALL.into_iter().find(|c| c.name() == name)
    }

    /// One-based physical port number.
    pub fn port(self) -> u32 {
        self as u32 + 1
    }

    pub fn from_port(port: u32) -> Option<Channel> {
        let index = usize::try_from(port.checked_sub(1)?).ok()?;
        Channel::ALL.get(index).copied()
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Channel {
    type Err = String;

    /// Accepts the display name (`Single Link 2`) or a bare port number (`2`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(channel) = Channel::ALL
            .into_iter()
            .find(|c| c.name().eq_ignore_ascii_case(s))
        {
            return Ok(channel);
        }
        s.parse::<u32>()
            .ok()
            .and_then(Channel::from_port)
            .ok_or_else(|| format!("unknown channel: {}", s))
    }
}
