// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Playback handler.
//!
//! The frame queue holds buffers that are free to be filled. A transfer
//! fills the head buffer and hands it to the hardware, scheduled at the next
//! presentation slot (`frames_scheduled * frame_duration`). The hardware's
//! completion notification puts the buffer back at the tail and wakes the
//! waiting caller, so the pool cycles as a bounded producer/consumer ring.

use super::{FrameQueue, FrameResult, HandlerConfig, HandlerStats, IoHandler, IoState};
use crate::{
    callbacks::{CallbackId, CallbackRegistry, FrameResultCallback},
    format::{Direction, DisplayMode, PixelFormat},
    frame::FrameBuffer,
    hardware::{CompletionResult, OutputCallback, VideoOutput},
    sync::lock,
    Error,
};
use std::{
    sync::{Arc, Condvar, Mutex, PoisonError, Weak},
    time::Duration,
};

struct Session {
    state: IoState,
    mode: Option<DisplayMode>,
    pixel_format: PixelFormat,
    queue: FrameQueue,
    pool_size: usize,
    in_flight: usize,
    /// Incremented on every open so that a sink left over from an earlier
    /// open period cannot return stale buffers.
    generation: u64,
    frames_scheduled: u64,
    frames_completed: u64,
    frames_dropped: u64,
    /// Completion number of the first late frame since the last start.
    first_late_frame: Option<u64>,
    playback_stopped: bool,
}

impl Session {
    fn reset_counters(&mut self) {
        self.frames_scheduled = 0;
        self.frames_completed = 0;
        self.frames_dropped = 0;
        self.first_late_frame = None;
    }
}

struct Shared {
    hardware: Arc<dyn VideoOutput>,
    config: HandlerConfig,
    session: Mutex<Session>,
    frame_ready: Condvar,
    stopped: Condvar,
    frame_results: CallbackRegistry<FrameResultCallback>,
    label: Mutex<String>,
}

impl Shared {
    fn label(&self) -> String {
        lock(&self.label).clone()
    }

    fn frame_completed(&self, generation: u64, frame: FrameBuffer, result: CompletionResult) {
        let mut session = lock(&self.session);
        if session.generation != generation || !session.state.is_open() {
            log::trace!("releasing frame {} completed after close", frame.id());
            return;
        }

        session.in_flight = session.in_flight.saturating_sub(1);
        if result != CompletionResult::Flushed {
            session.frames_completed += 1;
        }
        let processed = session.frames_completed;

        let dropped = match result {
            CompletionResult::Completed | CompletionResult::Flushed => false,
            CompletionResult::DisplayedLate => {
                if session.first_late_frame.is_none() {
                    session.first_late_frame = Some(processed);
                    true
                } else {
                    false
                }
            }
            CompletionResult::Dropped => true,
        };
        if dropped {
            session.frames_dropped += 1;
        }

        if let Err(frame) = session.queue.push(frame) {
            log::error!(
                "{}: output queue full, releasing frame {}",
                self.label(),
                frame.id()
            );
        }
        drop(session);
        self.frame_ready.notify_all();

        if dropped {
            log::warn!(
                "{}: frame {} reported {:?}",
                self.label(),
                processed,
                result
            );
            for callback in self.frame_results.snapshot() {
                callback(FrameResult::Dropped, processed);
            }
        }
    }

    fn playback_stopped(&self, generation: u64) {
        let mut session = lock(&self.session);
        if session.generation != generation {
            return;
        }
        session.playback_stopped = true;
        drop(session);
        self.stopped.notify_all();
    }
}

/// Receives notifications on the driver's callback thread.
struct OutputSink {
    shared: Weak<Shared>,
    generation: u64,
}

impl OutputCallback for OutputSink {
    fn frame_completed(&self, frame: FrameBuffer, result: CompletionResult) {
        if let Some(shared) = self.shared.upgrade() {
            shared.frame_completed(self.generation, frame, result);
        }
    }

    fn playback_stopped(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.playback_stopped(self.generation);
        }
    }
}

/// Playback side of a sub-unit.
pub struct OutputHandler {
    shared: Arc<Shared>,
}

impl OutputHandler {
    pub fn new(hardware: Arc<dyn VideoOutput>, config: HandlerConfig) -> Self {
        let buffer_count = config.buffer_count;
        OutputHandler {
            shared: Arc::new(Shared {
                hardware,
                config,
                session: Mutex::new(Session {
                    state: IoState::Closed,
                    mode: None,
                    pixel_format: PixelFormat::Ycbcr8Bit,
                    queue: FrameQueue::new(buffer_count),
                    pool_size: 0,
                    in_flight: 0,
                    generation: 0,
                    frames_scheduled: 0,
                    frames_completed: 0,
                    frames_dropped: 0,
                    first_late_frame: None,
                    playback_stopped: true,
                }),
                frame_ready: Condvar::new(),
                stopped: Condvar::new(),
                frame_results: CallbackRegistry::new(),
                label: Mutex::new("Output".to_string()),
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

    /// Display mode and pixel format of the current open period.
    pub fn format(&self) -> Option<(DisplayMode, PixelFormat)> {
        let session = lock(&self.shared.session);
        session.mode.map(|mode| (mode, session.pixel_format))
    }

    pub fn add_frame_result_callback(&self, callback: Arc<FrameResultCallback>) -> CallbackId {
        self.shared.frame_results.add(callback)
    }

    pub fn remove_frame_result_callback(&self, id: CallbackId) -> bool {
        self.shared.frame_results.remove(id)
    }

    /// Fills the head buffer with `payload` and schedules it for display.
    ///
    /// A size mismatch is logged and the copy truncated. With no free buffer
    /// the call is a no-op returning zero. Frames written before `start` are
    /// scheduled from slot zero and play once playback starts.
    pub fn write_frame(&self, payload: &[u8]) -> Result<usize, Error> {
        let shared = &self.shared;
        let mut session = lock(&shared.session);
        if !session.state.is_open() {
            return Err(Error::InvalidState("output is not open"));
        }
        let mode = session
            .mode
            .ok_or(Error::InvalidState("output has no display mode"))?;

        let Some(mut frame) = session.queue.pop() else {
            log::warn!("{}: no free output buffer, frame skipped", shared.label());
            return Ok(0);
        };
        if payload.len() != frame.len() {
            log::warn!(
                "{}: transfer size {} does not match frame size {}",
                shared.label(),
                payload.len(),
                frame.len()
            );
        }
        let copied = frame.write_from(payload);
        if !session.state.is_running() {
            log::debug!("{}: pre-rolling frame {}", shared.label(), session.frames_scheduled);
        }

        let (duration, time_scale) = mode.rate().duration_timescale();
        let display_time = session.frames_scheduled as i64 * duration as i64;
        let generation = session.generation;
        session.frames_scheduled += 1;
        session.in_flight += 1;
        drop(session);

        frame.stamp_now();
        match shared
            .hardware
            .schedule_frame(frame, display_time, duration, time_scale)
        {
            Ok(()) => {
                log::trace!("{}: scheduled frame at {}", shared.label(), display_time);
                Ok(copied)
            }
            Err((frame, err)) => {
                log::error!(
                    "{}: failed to schedule frame at {}: {}",
                    shared.label(),
                    display_time,
                    err
                );
                let mut session = lock(&shared.session);
                if session.generation == generation && session.state.is_open() {
                    session.in_flight = session.in_flight.saturating_sub(1);
                    session.frames_scheduled = session.frames_scheduled.saturating_sub(1);
                    if let Err(frame) = session.queue.push_front(frame) {
                        log::error!("{}: output queue full, releasing frame {}", shared.label(), frame.id());
                    }
                }
                drop(session);
                shared.frame_ready.notify_all();
                Err(err)
            }
        }
    }

    fn wait_playback_stopped(&self) {
        let shared = &self.shared;
        let session = lock(&shared.session);
        let timeout = shared.config.stop_timeout;
        let (session, _) = shared
            .stopped
            .wait_timeout_while(session, timeout, |s| !s.playback_stopped)
            .unwrap_or_else(PoisonError::into_inner);
        if !session.playback_stopped {
            log::error!(
                "{}: timed out after {} ms waiting for playback to stop",
                shared.label(),
                timeout.as_millis()
            );
        }
    }
}

impl IoHandler for OutputHandler {
    fn direction(&self) -> Direction {
        Direction::Output
    }

    fn open(&self, mode: DisplayMode, pixel_format: PixelFormat) -> Result<(), Error> {
        let shared = &self.shared;
        let mut session = lock(&shared.session);
        if session.state.is_open() {
            return Err(Error::InvalidState("output is already open"));
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
            log::error!("{}: unable to enable output: {}", shared.label(), err);
            return Err(err);
        }

        session.generation += 1;
        shared.hardware.set_callback(Some(Arc::new(OutputSink {
            shared: Arc::downgrade(shared),
            generation: session.generation,
        })));

        session.state = IoState::Open;
        session.mode = Some(mode);
        session.pixel_format = pixel_format;
        session.queue = FrameQueue::from_frames(frames);
        session.pool_size = count;
        session.in_flight = 0;
        session.playback_stopped = true;
        session.reset_counters();

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
            IoState::Closed => return Err(Error::InvalidState("output is not open")),
            IoState::Running => self.stop()?,
            IoState::Open => {}
        }

        if let Err(err) = shared.hardware.disable() {
            log::warn!("{}: unable to disable output: {}", shared.label(), err);
        }
        shared.hardware.set_callback(None);

        let mut session = lock(&shared.session);
        session.state = IoState::Closed;
        session.mode = None;
        let released = session.queue.drain().len();
        let outstanding = session.in_flight;
        session.pool_size = 0;
        session.in_flight = 0;
        drop(session);
        shared.frame_ready.notify_all();

        if outstanding > 0 {
            log::warn!(
                "{}: {} buffers still held by hardware at close",
                shared.label(),
                outstanding
            );
        }
        log::info!("{}: closed, released {} buffers", shared.label(), released);
        Ok(())
    }

    fn start(&self) -> Result<(), Error> {
        let shared = &self.shared;
        let mut session = lock(&shared.session);
        match session.state {
            IoState::Closed => Err(Error::InvalidState("output is not open")),
            IoState::Running => Ok(()),
            IoState::Open => {
                let mode = session
                    .mode
                    .ok_or(Error::InvalidState("output has no display mode"))?;
                let (_, time_scale) = mode.rate().duration_timescale();
                let pre_rolled = session.frames_scheduled;
                session.reset_counters();
                if session.in_flight > 0 {
                    session.frames_scheduled = pre_rolled;
                }
                session.playback_stopped = false;
                if let Err(err) = shared.hardware.start_playback(0, time_scale) {
                    session.playback_stopped = true;
                    log::error!("{}: unable to start playback: {}", shared.label(), err);
                    return Err(err);
                }
                session.state = IoState::Running;
                log::info!("{}: started", shared.label());
                Ok(())
            }
        }
    }

    fn stop(&self) -> Result<(), Error> {
        let shared = &self.shared;
        {
            let mut session = lock(&shared.session);
            match session.state {
                IoState::Closed => return Err(Error::InvalidState("output is not open")),
                IoState::Open => return Ok(()),
                IoState::Running => session.state = IoState::Open,
            }
        }

        if let Err(err) = shared.hardware.stop_playback() {
            log::error!("{}: unable to stop playback: {}", shared.label(), err);
        }
        self.wait_playback_stopped();
        lock(&shared.session).frames_scheduled = 0;
        log::info!("{}: stopped", shared.label());
        Ok(())
    }

    fn wait_frame(&self, timeout: Duration) -> Result<(), Error> {
        let shared = &self.shared;
        let session = lock(&shared.session);
        if !session.state.is_open() {
            return Err(Error::InvalidState("output is not open"));
        }
        let (session, _) = shared
            .frame_ready
            .wait_timeout_while(session, timeout, |s| {
                s.state.is_open() && s.queue.is_empty()
            })
            .unwrap_or_else(PoisonError::into_inner);

        if !session.state.is_open() {
            return Err(Error::InvalidState("output closed while waiting"));
        }
        if session.queue.is_empty() {
            log::debug!("{}: timeout waiting for frame", shared.label());
            return Err(Error::Timeout(timeout));
        }
        Ok(())
    }

    fn transfer_frame(&self, buffer: &mut [u8]) -> Result<usize, Error> {
        self.write_frame(buffer)
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
            free: 0,
            queued: session.queue.len(),
            in_flight: session.in_flight,
            frames_scheduled: session.frames_scheduled,
            frames_processed: session.frames_completed,
            frames_dropped: session.frames_dropped,
        }
    }
}

impl Drop for OutputHandler {
    fn drop(&mut self) {
        if self.state().is_open() {
            if let Err(err) = self.close() {
                log::warn!("{}: close on drop failed: {}", self.label(), err);
            }
        }
    }
}
