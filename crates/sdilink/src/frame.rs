// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::{
    format::{DisplayMode, PixelFormat},
    Error,
};
use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};
use unix_ts::Timestamp;

static NEXT_FRAME_ID: AtomicU64 = AtomicU64::new(1);

/// A hardware-backed video frame buffer.
///
/// A `FrameBuffer` is deliberately not `Clone`: at any moment it is owned by
/// exactly one of the handler's free pool, its frame queue, or the hardware.
/// Moving the value between those places is how buffer ownership is tracked.
pub struct FrameBuffer {
    id: u64,
    width: u32,
    height: u32,
    row_bytes: u32,
    pixel_format: PixelFormat,
    data: Vec<u8>,
    timestamp: Option<Timestamp>,
}

impl FrameBuffer {
    /// Allocates a zeroed frame for `width` x `height` pixels.
    ///
    /// # Example
    ///
    /// ```
    /// use sdilink::{format::PixelFormat, frame::FrameBuffer};
    ///
    /// let frame = FrameBuffer::new(1920, 1080, PixelFormat::Ycbcr8Bit)?;
    /// assert_eq!(frame.row_bytes(), 3840);
    /// assert_eq!(frame.len(), 3840 * 1080);
    /// # Ok::<(), sdilink::Error>(())
    /// ```
    pub fn new(width: u32, height: u32, pixel_format: PixelFormat) -> Result<Self, Error> {
        let row_bytes = pixel_format.row_bytes(width);
        let size = row_bytes as usize * height as usize;
        if size == 0 {
            return Err(Error::Allocation(format!(
                "empty frame {}x{} {}",
                width, height, pixel_format
            )));
        }

        let mut data = Vec::new();
        data.try_reserve_exact(size)
            .map_err(|e| Error::Allocation(format!("{} bytes: {}", size, e)))?;
        data.resize(size, 0);

        Ok(FrameBuffer {
            id: NEXT_FRAME_ID.fetch_add(1, Ordering::Relaxed),
            width,
            height,
            row_bytes,
            pixel_format,
            data,
            timestamp: None,
        })
    }

    /// Allocates a frame sized for a display mode.
    pub fn for_mode(mode: DisplayMode, pixel_format: PixelFormat) -> Result<Self, Error> {
        FrameBuffer::new(mode.width(), mode.height(), pixel_format)
    }

    /// Process-unique identifier, stable for the lifetime of the buffer.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn row_bytes(&self) -> u32 {
        self.row_bytes
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    /// Size of the pixel payload in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Copies as much of `src` as fits, returning the number of bytes copied.
    pub fn write_from(&mut self, src: &[u8]) -> usize {
        let n = src.len().min(self.data.len());
        self.data[..n].copy_from_slice(&src[..n]);
        n
    }

    /// Copies as much of the payload as fits into `dst`, returning the number
    /// of bytes copied.
    pub fn read_into(&self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.data.len());
        dst[..n].copy_from_slice(&self.data[..n]);
        n
    }

    /// Wall-clock time the frame was last scheduled or captured.
    pub fn timestamp(&self) -> Option<&Timestamp> {
        self.timestamp.as_ref()
    }

    /// Stamps the frame with the current wall-clock time.
    pub fn stamp_now(&mut self) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        self.timestamp = Some(Timestamp::new(now.as_secs() as i64, now.subsec_nanos()));
    }
}

impl fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("id", &self.id)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("row_bytes", &self.row_bytes)
            .field("pixel_format", &self.pixel_format)
            .field("stamped", &self.timestamp.is_some())
            .finish()
    }
}
