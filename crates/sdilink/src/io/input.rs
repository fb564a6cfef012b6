// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Capture handler.
//!
//! Empty buffers are supplied to the hardware, which fills them and hands
//! them back through the arrival notification. Arrivals are queued for the
//! caller in a shallow [`FrameQueue`]; when it is full the configured
//! [`OverflowPolicy`] decides which frame is dropped, and the dropped buffer
//! is supplied to the hardware again. Reading a frame copies it out and
//! recycles its buffer the same way.
//!
//! Signal format changes are handled on the notification thread: pause,
//! reconfigure, flush, reallocate the pool for the new frame size, resume,
//! then notify format-change subscribers.

use super::{FrameQueue, FrameResult, HandlerConfig, HandlerStats, IoHandler, IoState, OverflowPolicy};
use crate::{
    callbacks::{CallbackId, CallbackRegistry, FormatChangeCallback, FrameResultCallback},
    format::{Direction, DisplayMode, PixelFormat},
    frame::FrameBuffer,
    hardware::{InputCallback, VideoInput},
    sync::lock,
    Error,
};
use std::{
    mem,
    sync::{Arc, Condvar, Mutex, PoisonError, Weak},
    time::Duration,
};

struct Session {
    state: IoState,
    mode: Option<DisplayMode>,
    pixel_format: PixelFormat,
    queue: FrameQueue,
    free: Vec<FrameBuffer>,
    pool_size: usize,
    in_flight: usize,
    generation: u64,
    frames_processed: u64,
    frames_dropped: u64,
}

impl Session {
    /// Queues a frame, parking it on the free list if the queue is full.
    fn enqueue(&mut self, frame: FrameBuffer) {
        if let Err(frame) = self.queue.push(frame) {
            self.free.push(frame);
        }
    }
}

struct Shared {
    hardware: Arc<dyn VideoInput>,
    config: HandlerConfig,
    session: Mutex<Session>,
    frame_ready: Condvar,
    frame_results: CallbackRegistry<FrameResultCallback>,
    format_changes: CallbackRegistry<FormatChangeCallback>,
    label: Mutex<String>,
}

impl Shared {
    fn label(&self) -> String {
        lock(&self.label).clone()
    }

    /// Hands buffers to the hardware. The caller has already counted them as
    /// in flight.
    fn supply(&self, generation: u64, frames: Vec<FrameBuffer>) {
        for frame in frames {
            if let Err((frame, err)) = self.hardware.supply_buffer(frame) {
                log::warn!("{}: hardware refused capture buffer: {}", self.label(), err);
                let mut session = lock(&self.session);
                if session.generation == generation && session.state.is_open() {
                    session.in_flight = session.in_flight.saturating_sub(1);
                    session.free.push(frame);
                }
            }
        }
    }

    /// Takes back every buffer held by the hardware and discards queued
    /// captures. Returns the number of discarded captures.
    fn reclaim(&self, generation: u64) -> usize {
        let returned = self.hardware.flush_streams();
        let mut session = lock(&self.session);
        if session.generation != generation || !session.state.is_open() {
            return 0;
        }
        session.in_flight = session.in_flight.saturating_sub(returned.len());
        session.free.extend(returned);
        let stale = session.queue.drain();
        let discarded = stale.len();
        session.free.extend(stale);
        discarded
    }

    /// Supplies every free buffer and restarts streaming if still running.
    fn resume(&self, generation: u64) -> Result<(), Error> {
        let frames = {
            let mut session = lock(&self.session);
            if session.generation != generation || !session.state.is_running() {
                return Ok(());
            }
            let frames = mem::take(&mut session.free);
            session.in_flight += frames.len();
            frames
        };
        self.supply(generation, frames);
        self.hardware.start_streams()
    }

    fn frame_arrived(&self, generation: u64, mut frame: FrameBuffer) {
        let mut session = lock(&self.session);
        if session.generation != generation || !session.state.is_open() {
            log::trace!("releasing frame {} captured after close", frame.id());
            return;
        }
        session.in_flight = session.in_flight.saturating_sub(1);
        if !session.state.is_running() {
            session.free.push(frame);
            return;
        }

        frame.stamp_now();
        session.frames_processed += 1;
        let processed = session.frames_processed;

        let (recycle, result) = if session.queue.is_full() {
            session.frames_dropped += 1;
            match self.config.overflow {
                OverflowPolicy::KeepNewest => {
                    let oldest = session.queue.pop();
                    session.enqueue(frame);
                    (oldest, FrameResult::Dropped)
                }
                OverflowPolicy::KeepOldest => (Some(frame), FrameResult::Dropped),
            }
        } else {
            session.enqueue(frame);
            (None, FrameResult::Completed)
        };
        if recycle.is_some() {
            session.in_flight += 1;
        }
        drop(session);
        self.frame_ready.notify_all();

        if let Some(frame) = recycle {
            self.supply(generation, vec![frame]);
        }
        if result == FrameResult::Dropped {
            log::debug!("{}: input queue full, frame {} dropped", self.label(), processed);
        }
        for callback in self.frame_results.snapshot() {
            callback(result, processed);
        }
    }

    /// Returns to `previous` after a rejected reconfiguration. If that fails
    /// too, capture stops and the handler falls back to `Open`.
    fn restore(&self, generation: u64, previous: Option<(DisplayMode, PixelFormat)>) {
        let restored = match previous {
            Some((mode, pixel_format)) => self
                .hardware
                .enable(mode, pixel_format)
                .and_then(|()| self.resume(generation)),
            None => Err(Error::InvalidState("input has no display mode")),
        };
        let Err(err) = restored else {
            log::warn!("{}: kept previous input format", self.label());
            return;
        };

        log::error!("{}: unable to restore input, capture stopped: {}", self.label(), err);
        if let Err(err) = self.hardware.stop_streams() {
            log::warn!("{}: unable to stop input: {}", self.label(), err);
        }
        let mut session = lock(&self.session);
        if session.generation == generation && session.state.is_running() {
            session.state = IoState::Open;
        }
        drop(session);
        self.reclaim(generation);
        self.frame_ready.notify_all();
    }

    fn format_changed(&self, generation: u64, mode: DisplayMode, pixel_format: PixelFormat) {
        let (pool_size, previous) = {
            let session = lock(&self.session);
            if session.generation != generation || !session.state.is_open() {
                return;
            }
            if session.mode == Some(mode) && session.pixel_format == pixel_format {
                return;
            }
            (session.pool_size, session.mode.map(|m| (m, session.pixel_format)))
        };
        log::info!(
            "{}: input signal changed to {} {}",
            self.label(),
            mode,
            pixel_format
        );

        if let Err(err) = self.hardware.pause_streams() {
            log::warn!("{}: unable to pause input: {}", self.label(), err);
        }
        if let Err(err) = self.hardware.enable(mode, pixel_format) {
            log::error!(
                "{}: unable to reconfigure input for {} {}: {}",
                self.label(),
                mode,
                pixel_format,
                err
            );
            self.restore(generation, previous);
            return;
        }
        self.reclaim(generation);

        let mut frames = Vec::with_capacity(pool_size);
        for _ in 0..pool_size {
            match self.hardware.create_frame(mode, pixel_format) {
                Ok(frame) => frames.push(frame),
                Err(err) => {
                    log::error!("{}: unable to reallocate capture buffer: {}", self.label(), err);
                    break;
                }
            }
        }

        {
            let mut session = lock(&self.session);
            if session.generation != generation || !session.state.is_open() {
                return;
            }
            session.pool_size = frames.len() + session.in_flight + session.queue.len();
            session.free = frames;
            session.mode = Some(mode);
            session.pixel_format = pixel_format;
        }
        if let Err(err) = self.resume(generation) {
            log::error!("{}: unable to restart input: {}", self.label(), err);
        }

        for callback in self.format_changes.snapshot() {
            callback(mode.geometry(), mode.rate(), pixel_format);
        }
    }
}

/// Receives notifications on the driver's callback thread.
struct InputSink {
    shared: Weak<Shared>,
    generation: u64,
}

impl InputCallback for InputSink {
    fn frame_arrived(&self, frame: FrameBuffer) {
        if let Some(shared) = self.shared.upgrade() {
            shared.frame_arrived(self.generation, frame);
        }
    }

    fn format_changed(&self, mode: DisplayMode, pixel_format: PixelFormat) {
        if let Some(shared) = self.shared.upgrade() {
            shared.format_changed(self.generation, mode, pixel_format);
        }
    }
}

/// Capture side of a sub-unit.
pub struct InputHandler {
    shared: Arc<Shared>,
}

impl InputHandler {
    pub fn new(hardware: Arc<dyn VideoInput>, config: HandlerConfig) -> Self {
        let queue_depth = config.queue_depth;
        InputHandler {
            shared: Arc::new(Shared {
                hardware,
                config,
                session: Mutex::new(Session {
                    state: IoState::Closed,
                    mode: None,
                    pixel_format: PixelFormat::Ycbcr8Bit,
                    queue: FrameQueue::new(queue_depth),
                    free: Vec::new(),
                    pool_size: 0,
                    in_flight: 0,
                    generation: 0,
                    frames_processed: 0,
                    frames_dropped: 0,
                }),
                frame_ready: Condvar::new(),
                frame_results: CallbackRegistry::new(),
                format_changes: CallbackRegistry::new(),
                label: Mutex::new("Input".to_string()),
            }),
        }
    }

    /// Sets the prefix used in log messages.
    pub fn set_label(&self, label: impl Into<String>) {
        *lock(&self.shared.label) = label.into();
    }

    pub fn label(&self) -> String {
        self.shared.label()
    }

    pub fn supports(&self, mode: DisplayMode, pixel_format: PixelFormat) -> bool {
        self.shared.hardware.supports_mode(mode, pixel_format)
    }

    /// Display mode and pixel format currently captured.
    pub fn format(&self) -> Option<(DisplayMode, PixelFormat)> {
        let session = lock(&self.shared.session);
        session.mode.map(|mode| (mode, session.pixel_format))
    }

    /// Opens the input in `mode`, or in the default 1080p50 mode when `None`,
    /// leaving format detection to adopt the actual signal.
    pub fn open_detecting(
        &self,
        mode: Option<DisplayMode>,
        pixel_format: PixelFormat,
    ) -> Result<(), Error> {
        self.open(mode.unwrap_or_default(), pixel_format)
    }

    /// Copies the oldest captured frame into `dst` and recycles its buffer.
    ///
    /// A size mismatch is logged and the copy truncated. With no captured
    /// frame the call is a no-op returning zero.
    pub fn read_frame(&self, dst: &mut [u8]) -> Result<usize, Error> {
        let shared = &self.shared;
        let mut session = lock(&shared.session);
        if !session.state.is_open() {
            return Err(Error::InvalidState("input is not open"));
        }
        let Some(frame) = session.queue.pop() else {
            log::warn!("{}: no captured frame to transfer", shared.label());
            return Ok(0);
        };
        if dst.len() != frame.len() {
            log::warn!(
                "{}: transfer size {} does not match frame size {}",
                shared.label(),
                dst.len(),
                frame.len()
            );
        }
        let copied = frame.read_into(dst);

        if session.state.is_running() {
            let generation = session.generation;
            session.in_flight += 1;
            drop(session);
            shared.supply(generation, vec![frame]);
        } else {
            session.free.push(frame);
        }
        Ok(copied)
    }

    /// Pauses capture, discards frames held by the hardware and the queue,
    /// then resumes if the input is running.
    pub fn flush(&self) -> Result<(), Error> {
        let shared = &self.shared;
        let generation = {
            let session = lock(&shared.session);
            if !session.state.is_open() {
                return Err(Error::InvalidState("input is not open"));
            }
            session.generation
        };
        if let Err(err) = shared.hardware.pause_streams() {
            log::warn!("{}: unable to pause input: {}", shared.label(), err);
        }
        let discarded = shared.reclaim(generation);
        log::debug!("{}: flushed {} queued frames", shared.label(), discarded);
        shared.resume(generation)
    }

    pub fn add_frame_result_callback(&self, callback: Arc<FrameResultCallback>) -> CallbackId {
        self.shared.frame_results.add(callback)
    }

    pub fn remove_frame_result_callback(&self, id: CallbackId) -> bool {
        self.shared.frame_results.remove(id)
    }

    pub fn add_format_change_callback(&self, callback: Arc<FormatChangeCallback>) -> CallbackId {
        self.shared.format_changes.add(callback)
    }

    pub fn remove_format_change_callback(&self, id: CallbackId) -> bool {
        self.shared.format_changes.remove(id)
    }
}

impl IoHandler for InputHandler {
    fn direction(&self) -> Direction {
        Direction::Input
    }

    fn open(&self, mode: DisplayMode, pixel_format: PixelFormat) -> Result<(), Error> {
        let shared = &self.shared;
        let mut session = lock(&shared.session);
        if session.state.is_open() {
            return Err(Error::InvalidState("input is already open"));
        }
        if !shared.hardware.supports_mode(mode, pixel_format) {
            log::error!("{}: {} {} is not supported", shared.label(), mode, pixel_format);
            return Err(Error::UnsupportedFormat(format!("{} {}", mode, pixel_format)));
        }

        let count = shared.config.buffer_count;
        let mut frames = Vec::with_capacity(count);
        for _ in 0..count {
            frames.push(shared.hardware.create_frame(mode, pixel_format)?);
        }

        if let Err(err) = shared.hardware.enable(mode, pixel_format) {
            log::error!("{}: unable to enable input: {}", shared.label(), err);
            return Err(err);
        }

        session.generation += 1;
        shared.hardware.set_callback(Some(Arc::new(InputSink {
            shared: Arc::downgrade(shared),
            generation: session.generation,
        })));

        session.state = IoState::Open;
        session.mode = Some(mode);
        session.pixel_format = pixel_format;
        session.queue = FrameQueue::new(shared.config.queue_depth);
        session.free = frames;
        session.pool_size = count;
        session.in_flight = 0;
        session.frames_processed = 0;
        session.frames_dropped = 0;

        log::info!(
            "{}: opened {} {} with {} buffers",
            shared.label(),
            mode,
            pixel_format,
            count
        );
        Ok(())
    }

    fn close(&self) -> Result<(), Error> {
        let shared = &self.shared;
        match self.state() {
            IoState::Closed => return Err(Error::InvalidState("input is not open")),
            IoState::Running => self.stop()?,
            IoState::Open => {}
        }

        if let Err(err) = shared.hardware.disable() {
            log::warn!("{}: unable to disable input: {}", shared.label(), err);
        }
        shared.hardware.set_callback(None);

        let mut session = lock(&shared.session);
        session.state = IoState::Closed;
        session.mode = None;
        let released = session.free.len() + session.queue.drain().len();
        session.free.clear();
        session.pool_size = 0;
        session.in_flight = 0;
        drop(session);
        shared.frame_ready.notify_all();

        log::info!("{}: closed, released {} buffers", shared.label(), released);
        Ok(())
    }

    fn start(&self) -> Result<(), Error> {
        let shared = &self.shared;
        let generation = {
            let mut session = lock(&shared.session);
            match session.state {
                IoState::Closed => return Err(Error::InvalidState("input is not open")),
                IoState::Running => return Ok(()),
                IoState::Open => {}
            }
            session.frames_processed = 0;
            session.frames_dropped = 0;
            session.state = IoState::Running;
            session.generation
        };

        if let Err(err) = shared.resume(generation) {
            log::error!("{}: unable to start input: {}", shared.label(), err);
            lock(&shared.session).state = IoState::Open;
            shared.reclaim(generation);
            return Err(err);
        }
        log::info!("{}: started", shared.label());
        Ok(())
    }

    fn stop(&self) -> Result<(), Error> {
        let shared = &self.shared;
        let generation = {
            let mut session = lock(&shared.session);
            match session.state {
                IoState::Closed => return Err(Error::InvalidState("input is not open")),
                IoState::Open => return Ok(()),
                IoState::Running => session.state = IoState::Open,
            }
            session.generation
        };

        if let Err(err) = shared.hardware.pause_streams() {
            log::warn!("{}: unable to pause input: {}", shared.label(), err);
        }
        let discarded = shared.reclaim(generation);
        if let Err(err) = shared.hardware.stop_streams() {
            log::warn!("{}: unable to stop input: {}", shared.label(), err);
        }
        log::info!("{}: stopped, discarded {} queued frames", shared.label(), discarded);
        Ok(())
    }

    fn wait_frame(&self, timeout: Duration) -> Result<(), Error> {
        let shared = &self.shared;
        let session = lock(&shared.session);
        if !session.state.is_open() {
            return Err(Error::InvalidState("input is not open"));
        }
        let (session, _) = shared
            .frame_ready
            .wait_timeout_while(session, timeout, |s| {
                s.state.is_open() && s.queue.is_empty()
            })
            .unwrap_or_else(PoisonError::into_inner);

        if !session.state.is_open() {
            return Err(Error::InvalidState("input closed while waiting"));
        }
        if session.queue.is_empty() {
            log::debug!("{}: timeout waiting for frame", shared.label());
            return Err(Error::Timeout(timeout));
        }
        Ok(())
    }

    fn transfer_frame(&self, buffer: &mut [u8]) -> Result<usize, Error> {
        self.read_frame(buffer)
    }

    fn state(&self) -> IoState {
        lock(&self.shared.session).state
    }

    fn delta_seconds(&self) -> Option<(u32, u32)> {
        lock(&self.shared.session)
            .mode
            .map(|mode| mode.rate().duration_timescale())
    }

    fn stats(&self) -> HandlerStats {
        let session = lock(&self.shared.session);
        HandlerStats {
            state: session.state,
            pool_size: session.pool_size,
            free: session.free.len(),
            queued: session.queue.len(),
            in_flight: session.in_flight,
            frames_scheduled: 0,
            frames_processed: session.frames_processed,
            frames_dropped: session.frames_dropped,
        }
    }
}

impl Drop for InputHandler {
    fn drop(&mut self) {
        if self.state().is_open() {
            if let Err(err) = self.close() {
                log::warn!("{}: close on drop failed: {}", self.label(), err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        format::{FrameGeometry, FrameRate},
        sim::{Capabilities, ClockMode, SimInput},
    };

    fn pal() -> DisplayMode {
        DisplayMode::new(FrameGeometry::Pal, FrameRate::P25).unwrap()
    }

    fn handler(config: HandlerConfig) -> (Arc<SimInput>, InputHandler) {
        let hardware = SimInput::new(Capabilities::all(), ClockMode::Manual);
        let handler = InputHandler::new(hardware.clone(), config);
        (hardware, handler)
    }

    #[test]
    fn test_default_mode() {
        let (_hw, input) = handler(HandlerConfig::input());
        input.open_detecting(None, PixelFormat::Ycbcr10Bit).unwrap();
        let (mode, pf) = input.format().unwrap();
        assert_eq!(mode, DisplayMode::default());
        assert_eq!(pf, PixelFormat::Ycbcr10Bit);
    }

    #[test]
    fn test_keep_oldest_overflow() {
        let config = HandlerConfig::input()
            .with_queue_depth(1)
            .with_overflow(OverflowPolicy::KeepOldest);
        let (hw, input) = handler(config);
        input.open(pal(), PixelFormat::Ycbcr8Bit).unwrap();
        input.start().unwrap();

        assert!(hw.inject_frame(&[1u8; 64]));
        assert!(hw.inject_frame(&[2u8; 64]));

        let stats = input.stats();
        assert_eq!(stats.frames_dropped, 1);
        assert_eq!(stats.queued, 1);
        assert!(stats.is_conserved());

        let mut out = vec![0u8; 720 * 2 * 576];
        input.read_frame(&mut out).unwrap();
        assert_eq!(out[0], 1);
    }

    #[test]
    fn test_not_running_arrivals_ignored() {
        let (hw, input) = handler(HandlerConfig::input());
        input.open(pal(), PixelFormat::Ycbcr8Bit).unwrap();
        assert!(!hw.inject_frame(&[9u8; 8]));
        assert_eq!(input.stats().queued, 0);
    }

    #[test]
    fn test_flush_discards_queue() {
        let (hw, input) = handler(HandlerConfig::input());
        input.open(pal(), PixelFormat::Ycbcr8Bit).unwrap();
        input.start().unwrap();
        hw.inject_frame(&[1u8; 8]);
        hw.inject_frame(&[2u8; 8]);
        assert_eq!(input.stats().queued, 2);

        input.flush().unwrap();
        let stats = input.stats();
        assert_eq!(stats.queued, 0);
        assert_eq!(stats.in_flight, stats.pool_size);
        assert!(stats.is_conserved());
        assert_eq!(input.state(), IoState::Running);
    }

    #[test]
    fn test_rejected_format_keeps_previous() {
        let caps = Capabilities {
            geometries: vec![FrameGeometry::Pal],
            pixel_formats: vec![],
        };
        let hw = SimInput::new(caps, ClockMode::Manual);
        let input = InputHandler::new(hw.clone(), HandlerConfig::input());
        let changes = Arc::new(Mutex::new(0u32));
        let counter = Arc::clone(&changes);
        input.add_format_change_callback(Arc::new(
            move |_: FrameGeometry, _: FrameRate, _: PixelFormat| {
                *counter.lock().unwrap() += 1;
            },
        ));

        input.open(pal(), PixelFormat::Ycbcr8Bit).unwrap();
        input.start().unwrap();
        assert!(hw.inject_frame(&[1u8; 8]));

        let hd = DisplayMode::new(FrameGeometry::Hd1080, FrameRate::P50).unwrap();
        assert!(hw.signal_format_change(hd, PixelFormat::Ycbcr8Bit));

        assert_eq!(*changes.lock().unwrap(), 0);
        assert_eq!(input.format(), Some((pal(), PixelFormat::Ycbcr8Bit)));
        assert_eq!(hw.enabled_format(), Some((pal(), PixelFormat::Ycbcr8Bit)));
        assert_eq!(input.state(), IoState::Running);
        assert!(hw.is_streaming());

        assert!(hw.inject_frame(&[2u8; 8]));
        input.wait_frame(Duration::from_millis(10)).unwrap();
        let stats = input.stats();
        assert_eq!(stats.queued, 2);
        assert!(stats.is_conserved());
    }

    #[test]
    fn test_stop_reclaims_buffers() {
        let (hw, input) = handler(HandlerConfig::input());
        input.open(pal(), PixelFormat::Ycbcr8Bit).unwrap();
        input.start().unwrap();
        hw.inject_frame(&[3u8; 8]);
        input.stop().unwrap();

        let stats = input.stats();
        assert_eq!(stats.state, IoState::Open);
        assert_eq!(stats.free, stats.pool_size);
        assert_eq!(hw.supplied_len(), 0);
    }
}
