// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Per-direction I/O handlers.
//!
//! Each sub-unit owns one [`OutputHandler`] and one [`InputHandler`]. Both
//! follow the same lifecycle:
//!
//! ```text
//! Closed --open--> Open --start--> Running
//!   ^               |  ^              |
//!   +----close------+  +----stop------+
//! ```
//!
//! While open, a handler owns a small pool of [`FrameBuffer`]s. Every buffer
//! is at all times in exactly one place: the handler's free list, its
//! [`FrameQueue`], or the hardware. [`HandlerStats`] exposes the three counts
//! so the invariant `pool_size == free + queued + in_flight` can be observed.
//!
//! The caller drives a handler once per frame tick: [`IoHandler::wait_frame`]
//! blocks (bounded) until the queue has a buffer, then
//! [`IoHandler::transfer_frame`] copies the payload in or out.

use crate::{
    format::{Direction, DisplayMode, PixelFormat},
    frame::FrameBuffer,
    Error,
};
use serde::{Deserialize, Serialize};
use std::{collections::VecDeque, fmt, time::Duration};

pub mod input;
pub mod output;

pub use input::InputHandler;
pub use output::OutputHandler;

/// Lifecycle state of an I/O handler. `Running` implies open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum IoState {
    #[default]
    Closed,
    Open,
    Running,
}

impl IoState {
    pub fn is_open(self) -> bool {
        self != IoState::Closed
    }

    pub fn is_running(self) -> bool {
        self == IoState::Running
    }
}

impl fmt::Display for IoState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoState::Closed => f.write_str("closed"),
            IoState::Open => f.write_str("open"),
            IoState::Running => f.write_str("running"),
        }
    }
}

/// Health-relevant outcome of a frame, reported to frame-result subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FrameResult {
    Completed,
    Dropped,
}

/// What an input does when a frame arrives and its queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Drop the oldest queued frame and queue the new one
    #[default]
    KeepNewest,
    /// Drop the arriving frame
    KeepOldest,
}

/// Buffering configuration for one handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerConfig {
    /// Number of frame buffers allocated on open
    pub buffer_count: usize,
    /// Maximum number of captured frames waiting to be read (input only)
    pub queue_depth: usize,
    pub overflow: OverflowPolicy,
    /// Bound on waiting for the hardware to confirm a stop
    pub stop_timeout: Duration,
}

impl HandlerConfig {
    /// Triple-buffered playback.
    pub fn output() -> Self {
        HandlerConfig {
            buffer_count: 3,
            queue_depth: 3,
            overflow: OverflowPolicy::KeepNewest,
            stop_timeout: Duration::from_millis(100),
        }
    }

    /// Four capture buffers with a two-frame read queue.
    pub fn input() -> Self {
        HandlerConfig {
            buffer_count: 4,
            queue_depth: 2,
            overflow: OverflowPolicy::KeepNewest,
            stop_timeout: Duration::from_millis(100),
        }
    }

    pub fn with_buffer_count(mut self, buffer_count: usize) -> Self {
        self.buffer_count = buffer_count.max(1);
        self
    }

    pub fn with_queue_depth(mut self, queue_depth: usize) -> Self {
        self.queue_depth = queue_depth.max(1);
        self
    }

    pub fn with_overflow(mut self, overflow: OverflowPolicy) -> Self {
        self.overflow = overflow;
        self
    }

    pub fn with_stop_timeout(mut self, stop_timeout: Duration) -> Self {
        self.stop_timeout = stop_timeout;
        self
    }
}

impl Default for HandlerConfig {
    fn default() -> Self {
        HandlerConfig::output()
    }
}

/// Point-in-time view of a handler's buffers and session counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct HandlerStats {
    pub state: IoState,
    /// Buffers allocated for the current open period
    pub pool_size: usize,
    /// Buffers held by the handler outside the queue
    pub free: usize,
    /// Buffers in the frame queue
    pub queued: usize,
    /// Buffers currently owned by the hardware
    pub in_flight: usize,
    pub frames_scheduled: u64,
    pub frames_processed: u64,
    pub frames_dropped: u64,
}

impl HandlerStats {
    /// Every allocated buffer is accounted for exactly once.
    pub fn is_conserved(&self) -> bool {
        self.pool_size == self.free + self.queued + self.in_flight
    }
}

/// Bounded FIFO of frame buffers.
///
/// For an output it holds buffers ready to be filled and scheduled; for an
/// input it holds captured frames ready to be read.
pub struct FrameQueue {
    frames: VecDeque<FrameBuffer>,
    capacity: usize,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        FrameQueue {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// A full queue holding `frames`, oldest first.
    pub fn from_frames(frames: Vec<FrameBuffer>) -> Self {
        FrameQueue {
            capacity: frames.len(),
            frames: frames.into(),
        }
    }

    /// Appends at the tail. A full queue hands the frame back.
    pub fn push(&mut self, frame: FrameBuffer) -> Result<(), FrameBuffer> {
        if self.is_full() {
            return Err(frame);
        }
        self.frames.push_back(frame);
        Ok(())
    }

    /// Returns a frame to the head, ahead of everything queued.
    pub fn push_front(&mut self, frame: FrameBuffer) -> Result<(), FrameBuffer> {
        if self.is_full() {
            return Err(frame);
        }
        self.frames.push_front(frame);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<FrameBuffer> {
        self.frames.pop_front()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.frames.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Removes every queued frame, oldest first.
    pub fn drain(&mut self) -> Vec<FrameBuffer> {
        self.frames.drain(..).collect()
    }
}

impl fmt::Debug for FrameQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameQueue")
            .field("len", &self.frames.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// Lifecycle and per-tick contract shared by both directions.
pub trait IoHandler: Send + Sync {
    fn direction(&self) -> Direction;

    /// Allocates the buffer pool, enables the hardware direction and installs
    /// the notification sink. Fails without changing state if the handler is
    /// already open, the mode is unsupported, or allocation fails.
    fn open(&self, mode: DisplayMode, pixel_format: PixelFormat) -> Result<(), Error>;

    /// Stops if running, disables the hardware direction and releases the
    /// buffer pool. Fails if the handler is not open.
    fn close(&self) -> Result<(), Error>;

    /// Begins streaming and resets the session counters. A running handler is
    /// left untouched.
    fn start(&self) -> Result<(), Error>;

    /// Ends streaming without releasing buffers. An open, stopped handler is
    /// left untouched.
    fn stop(&self) -> Result<(), Error>;

    /// Blocks until the frame queue holds a buffer or `timeout` elapses.
    fn wait_frame(&self, timeout: Duration) -> Result<(), Error>;

    /// Copies between `buffer` and the head of the frame queue. Returns the
    /// number of bytes copied, zero if the queue was empty.
    fn transfer_frame(&self, buffer: &mut [u8]) -> Result<usize, Error>;

    fn state(&self) -> IoState;

    /// Frame duration and time scale of the open mode.
    fn delta_seconds(&self) -> Option<(u32, u32)>;

    fn stats(&self) -> HandlerStats;
}
