// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, time::Duration};

/// Direction of a video stream relative to the card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Capture: the card produces frames for the caller
    Input,
    /// Playback: the caller produces frames for the card
    Output,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::Input, Direction::Output];

    /// The other direction.
    pub fn opposite(self) -> Direction {
        match self {
            Direction::Input => Direction::Output,
            Direction::Output => Direction::Input,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Input => f.write_str("Input"),
            Direction::Output => f.write_str("Output"),
        }
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "input" | "in" | "capture" => Ok(Direction::Input),
            "output" | "out" | "playout" | "playback" => Ok(Direction::Output),
            _ => Err(format!("unknown direction: {}", s)),
        }
    }
}

/// Pixel layouts understood by the cards.
///
/// The short names (`yuv8`, `yuv10`, ...) are used on the command line and in
/// configuration files; [`PixelFormat::fourcc`] gives the driver code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 4:2:2 YCbCr, 8 bits per component ('2vuy')
    #[serde(rename = "yuv8")]
    Ycbcr8Bit,
    /// 4:2:2 YCbCr, 10 bits per component packed in 128-bit blocks ('v210')
    #[serde(rename = "yuv10")]
    Ycbcr10Bit,
    /// 4:4:4:4 ARGB, 8 bits per component
    #[serde(rename = "argb8")]
    Argb8Bit,
    /// 4:4:4:4 BGRA, 8 bits per component
    #[serde(rename = "bgra8")]
    Bgra8Bit,
    /// 4:4:4 RGB, 10 bits per component ('r210')
    #[serde(rename = "rgb10")]
    Rgb10Bit,
    /// 4:4:4 RGB, 12 bits per component ('R12B')
    #[serde(rename = "rgb12")]
    Rgb12Bit,
}

impl PixelFormat {
    pub const ALL: [PixelFormat; 6] = [
        PixelFormat::Ycbcr8Bit,
        PixelFormat::Ycbcr10Bit,
        PixelFormat::Argb8Bit,
        PixelFormat::Bgra8Bit,
        PixelFormat::Rgb10Bit,
        PixelFormat::Rgb12Bit,
    ];

    /// The YCbCr formats probed when a caller does not name any.
    pub const YCBCR: [PixelFormat; 2] = [PixelFormat::Ycbcr8Bit, PixelFormat::Ycbcr10Bit];

    /// Short name used on the command line and in configuration files.
    pub fn short_name(self) -> &'static str {
        match self {
            PixelFormat::Ycbcr8Bit => "yuv8",
            PixelFormat::Ycbcr10Bit => "yuv10",
            PixelFormat::Argb8Bit => "argb8",
            PixelFormat::Bgra8Bit => "bgra8",
            PixelFormat::Rgb10Bit => "rgb10",
            PixelFormat::Rgb12Bit => "rgb12",
        }
    }

    /// Driver pixel format code.
    pub fn fourcc(self) -> [u8; 4] {
        match self {
            PixelFormat::Ycbcr8Bit => *b"2vuy",
            PixelFormat::Ycbcr10Bit => *b"v210",
            PixelFormat::Argb8Bit => [0, 0, 0, 32],
            PixelFormat::Bgra8Bit => *b"BGRA",
            PixelFormat::Rgb10Bit => *b"r210",
            PixelFormat::Rgb12Bit => *b"R12B",
        }
    }

    /// Bytes per row for a frame `width` pixels wide, including the padding
    /// the packed formats require.
    ///
    /// # Example
    ///
    /// ```
    /// use sdilink::format::PixelFormat;
    ///
    /// assert_eq!(PixelFormat::Ycbcr8Bit.row_bytes(1920), 3840);
    /// assert_eq!(PixelFormat::Ycbcr10Bit.row_bytes(1920), 5120);
    /// ```
    pub fn row_bytes(self, width: u32) -> u32 {
        match self {
            PixelFormat::Ycbcr8Bit => width * 2,
            PixelFormat::Ycbcr10Bit => (width + 47) / 48 * 128,
            PixelFormat::Argb8Bit | PixelFormat::Bgra8Bit => width * 4,
            PixelFormat::Rgb10Bit => (width + 63) / 64 * 256,
            PixelFormat::Rgb12Bit => width * 36 / 8,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PixelFormat::Ycbcr8Bit => "YCbCr 8-bit",
            PixelFormat::Ycbcr10Bit => "YCbCr 10-bit",
            PixelFormat::Argb8Bit => "ARGB 8-bit",
            PixelFormat::Bgra8Bit => "BGRA 8-bit",
            PixelFormat::Rgb10Bit => "RGB 10-bit",
            PixelFormat::Rgb12Bit => "RGB 12-bit",
        };
        f.write_str(name)
    }
}

impl FromStr for PixelFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        PixelFormat::ALL
            .into_iter()
            .find(|pf| {
                pf.short_name().eq_ignore_ascii_case(wanted)
                    || pf.to_string().eq_ignore_ascii_case(wanted)
                    || pf.fourcc() == wanted.as_bytes()
            })
            .ok_or_else(|| format!("unknown pixel format: {}", s))
    }
}

/// Raster sizes the cards can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FrameGeometry {
    #[serde(rename = "NTSC")]
    Ntsc,
    #[serde(rename = "PAL")]
    Pal,
    #[serde(rename = "HD720")]
    Hd720,
    #[serde(rename = "HD1080")]
    Hd1080,
    #[serde(rename = "2K")]
    TwoK,
    #[serde(rename = "2KDCI")]
    TwoKDci,
    #[serde(rename = "4K2160")]
    FourK,
    #[serde(rename = "4KDCI")]
    FourKDci,
    #[serde(rename = "8K4320")]
    EightK,
    #[serde(rename = "8KDCI")]
    EightKDci,
}

const CINE_RATES: &[FrameRate] = &[FrameRate::P2398, FrameRate::P24, FrameRate::P25];

const BROADCAST_RATES: &[FrameRate] = &[
    FrameRate::P2398,
    FrameRate::P24,
    FrameRate::P25,
    FrameRate::P2997,
    FrameRate::P30,
    FrameRate::P4795,
    FrameRate::P48,
    FrameRate::P50,
    FrameRate::P5994,
    FrameRate::P60,
];

const HIGH_FRAME_RATES: &[FrameRate] = &[
    FrameRate::P2398,
    FrameRate::P24,
    FrameRate::P25,
    FrameRate::P2997,
    FrameRate::P30,
    FrameRate::P4795,
    FrameRate::P48,
    FrameRate::P50,
    FrameRate::P5994,
    FrameRate::P60,
    FrameRate::P9590,
    FrameRate::P96,
    FrameRate::P100,
    FrameRate::P11988,
    FrameRate::P120,
];

impl FrameGeometry {
    pub const ALL: [FrameGeometry; 10] = [
        FrameGeometry::Ntsc,
        FrameGeometry::Pal,
        FrameGeometry::Hd720,
        FrameGeometry::Hd1080,
        FrameGeometry::TwoK,
        FrameGeometry::TwoKDci,
        FrameGeometry::FourK,
        FrameGeometry::FourKDci,
        FrameGeometry::EightK,
        FrameGeometry::EightKDci,
    ];

    pub fn name(self) -> &'static str {
        match self {
            FrameGeometry::Ntsc => "NTSC",
            FrameGeometry::Pal => "PAL",
            FrameGeometry::Hd720 => "HD720",
            FrameGeometry::Hd1080 => "HD1080",
            FrameGeometry::TwoK => "2K",
            FrameGeometry::TwoKDci => "2KDCI",
            FrameGeometry::FourK => "4K2160",
            FrameGeometry::FourKDci => "4KDCI",
            FrameGeometry::EightK => "8K4320",
            FrameGeometry::EightKDci => "8KDCI",
        }
    }

    /// Width and height in pixels.
    pub fn dimensions(self) -> (u32, u32) {
        match self {
            FrameGeometry::Ntsc => (720, 486),
            FrameGeometry::Pal => (720, 576),
            FrameGeometry::Hd720 => (1280, 720),
            FrameGeometry::Hd1080 => (1920, 1080),
            FrameGeometry::TwoK => (2048, 1556),
            FrameGeometry::TwoKDci => (2048, 1080),
            FrameGeometry::FourK => (3840, 2160),
            FrameGeometry::FourKDci => (4096, 2160),
            FrameGeometry::EightK => (7680, 4320),
            FrameGeometry::EightKDci => (8192, 4320),
        }
    }

    /// Frame rates defined for this geometry.
    pub fn frame_rates(self) -> &'static [FrameRate] {
        match self {
            FrameGeometry::Ntsc => &[FrameRate::P2997, FrameRate::P5994],
            FrameGeometry::Pal => &[FrameRate::P25, FrameRate::P50],
            FrameGeometry::Hd720 => &[FrameRate::P50, FrameRate::P5994, FrameRate::P60],
            FrameGeometry::TwoK => CINE_RATES,
            FrameGeometry::Hd1080 | FrameGeometry::TwoKDci => HIGH_FRAME_RATES,
            FrameGeometry::FourK
            | FrameGeometry::FourKDci
            | FrameGeometry::EightK
            | FrameGeometry::EightKDci => BROADCAST_RATES,
        }
    }
}

impl fmt::Display for FrameGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FrameGeometry {
    type Err = String;

    /// Accepts a geometry name (`HD1080`) or its dimensions (`1920x1080`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        if let Some(geometry) = FrameGeometry::ALL
            .into_iter()
            .find(|g| g.name().eq_ignore_ascii_case(wanted))
        {
            return Ok(geometry);
        }
        if let Some((w, h)) = wanted.split_once(['x', 'X']) {
            if let (Ok(w), Ok(h)) = (w.parse::<u32>(), h.parse::<u32>()) {
                if let Some(geometry) = FrameGeometry::ALL
                    .into_iter()
                    .find(|g| g.dimensions() == (w, h))
                {
                    return Ok(geometry);
                }
            }
        }
        Err(format!("unknown frame geometry: {}", s))
    }
}

/// Progressive frame rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FrameRate {
    #[serde(rename = "23.98")]
    P2398,
    #[serde(rename = "24")]
    P24,
    #[serde(rename = "25")]
    P25,
    #[serde(rename = "29.97")]
    P2997,
    #[serde(rename = "30")]
    P30,
    #[serde(rename = "47.95")]
    P4795,
    #[serde(rename = "48")]
    P48,
    #[serde(rename = "50")]
    P50,
    #[serde(rename = "59.94")]
    P5994,
    #[serde(rename = "60")]
    P60,
    #[serde(rename = "95.90")]
    P9590,
    #[serde(rename = "96")]
    P96,
    #[serde(rename = "100")]
    P100,
    #[serde(rename = "119.88")]
    P11988,
    #[serde(rename = "120")]
    P120,
}

impl FrameRate {
    pub const ALL: [FrameRate; 15] = [
        FrameRate::P2398,
        FrameRate::P24,
        FrameRate::P25,
        FrameRate::P2997,
        FrameRate::P30,
        FrameRate::P4795,
        FrameRate::P48,
        FrameRate::P50,
        FrameRate::P5994,
        FrameRate::P60,
        FrameRate::P9590,
        FrameRate::P96,
        FrameRate::P100,
        FrameRate::P11988,
        FrameRate::P120,
    ];

    pub fn name(self) -> &'static str {
        match self {
            FrameRate::P2398 => "23.98",
            FrameRate::P24 => "24",
            FrameRate::P25 => "25",
            FrameRate::P2997 => "29.97",
            FrameRate::P30 => "30",
            FrameRate::P4795 => "47.95",
            FrameRate::P48 => "48",
            FrameRate::P50 => "50",
            FrameRate::P5994 => "59.94",
            FrameRate::P60 => "60",
            FrameRate::P9590 => "95.90",
            FrameRate::P96 => "96",
            FrameRate::P100 => "100",
            FrameRate::P11988 => "119.88",
            FrameRate::P120 => "120",
        }
    }

    /// Frame duration and time scale: one frame lasts `duration / time_scale`
    /// seconds.
    ///
    /// # Example
    ///
    /// ```
    /// use sdilink::format::FrameRate;
    ///
    /// assert_eq!(FrameRate::P5994.duration_timescale(), (1001, 60000));
    /// assert_eq!(FrameRate::P50.duration_timescale(), (1000, 50000));
    /// ```
    pub fn duration_timescale(self) -> (u32, u32) {
        match self {
            FrameRate::P2398 => (1001, 24000),
            FrameRate::P24 => (1000, 24000),
            FrameRate::P25 => (1000, 25000),
            FrameRate::P2997 => (1001, 30000),
            FrameRate::P30 => (1000, 30000),
            FrameRate::P4795 => (1001, 48000),
            FrameRate::P48 => (1000, 48000),
            FrameRate::P50 => (1000, 50000),
            FrameRate::P5994 => (1001, 60000),
            FrameRate::P60 => (1000, 60000),
            FrameRate::P9590 => (1001, 96000),
            FrameRate::P96 => (1000, 96000),
            FrameRate::P100 => (1000, 100000),
            FrameRate::P11988 => (1001, 120000),
            FrameRate::P120 => (1000, 120000),
        }
    }

    pub fn fps(self) -> f64 {
        let (duration, scale) = self.duration_timescale();
        scale as f64 / duration as f64
    }

    /// Wall-clock length of one frame.
    pub fn frame_duration(self) -> Duration {
        let (duration, scale) = self.duration_timescale();
        Duration::from_nanos(duration as u64 * 1_000_000_000 / scale as u64)
    }
}

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FrameRate {
    type Err = String;

    /// Accepts the rate name (`59.94`), optionally prefixed with `p`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        let wanted = wanted.strip_prefix(['p', 'P']).unwrap_or(wanted);
        FrameRate::ALL
            .into_iter()
            .find(|r| r.name() == wanted)
            .ok_or_else(|| format!("unknown frame rate: {}", s))
    }
}

/// A valid geometry and frame rate pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DisplayMode {
    geometry: FrameGeometry,
    rate: FrameRate,
}

impl DisplayMode {
    /// Returns `None` when the rate is not defined for the geometry.
    pub fn new(geometry: FrameGeometry, rate: FrameRate) -> Option<Self> {
        geometry
            .frame_rates()
            .contains(&rate)
            .then_some(DisplayMode { geometry, rate })
    }

    /// Every defined display mode, ordered by geometry then rate.
    pub fn all() -> impl Iterator<Item = DisplayMode> {
        FrameGeometry::ALL.into_iter().flat_map(|geometry| {
            geometry
                .frame_rates()
                .iter()
                .map(move |&rate| DisplayMode { geometry, rate })
        })
    }

    pub fn geometry(&self) -> FrameGeometry {
        self.geometry
    }

    pub fn rate(&self) -> FrameRate {
        self.rate
    }

    pub fn width(&self) -> u32 {
        self.geometry.dimensions().0
    }

    pub fn height(&self) -> u32 {
        self.geometry.dimensions().1
    }
}

/// 1080p50, the mode an input starts in before format detection settles.
impl Default for DisplayMode {
    fn default() -> Self {
        DisplayMode {
            geometry: FrameGeometry::Hd1080,
            rate: FrameRate::P50,
        }
    }
}

impl fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} p{}", self.geometry, self.rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_bytes() {
        assert_eq!(PixelFormat::Ycbcr8Bit.row_bytes(720), 1440);
        assert_eq!(PixelFormat::Ycbcr10Bit.row_bytes(1280), 3456);
        assert_eq!(PixelFormat::Bgra8Bit.row_bytes(1920), 7680);
        assert_eq!(PixelFormat::Rgb10Bit.row_bytes(1920), 7680);
        assert_eq!(PixelFormat::Rgb12Bit.row_bytes(1920), 8640);
    }

    #[test]
    fn test_pixel_format_parse() {
        assert_eq!("yuv10".parse::<PixelFormat>(), Ok(PixelFormat::Ycbcr10Bit));
        assert_eq!("v210".parse::<PixelFormat>(), Ok(PixelFormat::Ycbcr10Bit));
        assert_eq!("BGRA 8-bit".parse::<PixelFormat>(), Ok(PixelFormat::Bgra8Bit));
        assert!("nv12".parse::<PixelFormat>().is_err());
    }

    #[test]
    fn test_geometry_parse() {
        assert_eq!("hd1080".parse::<FrameGeometry>(), Ok(FrameGeometry::Hd1080));
        assert_eq!("3840x2160".parse::<FrameGeometry>(), Ok(FrameGeometry::FourK));
        assert_eq!("4KDCI".parse::<FrameGeometry>(), Ok(FrameGeometry::FourKDci));
        assert!("1000x1000".parse::<FrameGeometry>().is_err());
    }

    #[test]
    fn test_frame_rate_parse() {
        assert_eq!("59.94".parse::<FrameRate>(), Ok(FrameRate::P5994));
        assert_eq!("p50".parse::<FrameRate>(), Ok(FrameRate::P50));
        assert!("59.9".parse::<FrameRate>().is_err());
    }

    #[test]
    fn test_frame_duration() {
        assert_eq!(FrameRate::P50.frame_duration(), Duration::from_millis(20));
        assert_eq!(FrameRate::P2997.frame_duration(), Duration::from_nanos(33_366_666));
        assert!((FrameRate::P2398.fps() - 23.976).abs() < 0.001);
    }

    #[test]
    fn test_display_mode_validation() {
        assert!(DisplayMode::new(FrameGeometry::Hd1080, FrameRate::P120).is_some());
        assert!(DisplayMode::new(FrameGeometry::Pal, FrameRate::P5994).is_none());
        assert!(DisplayMode::new(FrameGeometry::Ntsc, FrameRate::P2997).is_some());

        let mode = DisplayMode::new(FrameGeometry::Hd720, FrameRate::P60).unwrap();
        assert_eq!(mode.to_string(), "HD720 p60");
        assert_eq!((mode.width(), mode.height()), (1280, 720));
    }

    #[test]
    fn test_display_mode_catalog() {
        let modes: Vec<_> = DisplayMode::all().collect();
        let expected: usize = FrameGeometry::ALL
            .iter()
            .map(|g| g.frame_rates().len())
            .sum();
        assert_eq!(modes.len(), expected);
        assert!(modes.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_direction() {
        assert_eq!(Direction::Input.opposite(), Direction::Output);
        assert_eq!("out".parse::<Direction>(), Ok(Direction::Output));
        assert_eq!(Direction::Input.to_string(), "Input");
    }
}
