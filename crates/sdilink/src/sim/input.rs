// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use super::{Capabilities, ClockMode};
use crate::{
    format::{DisplayMode, PixelFormat},
    frame::FrameBuffer,
    hardware::{InputCallback, VideoInput},
    sync::lock,
    Error,
};
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, Weak},
    thread,
};

#[derive(Default)]
struct State {
    enabled: Option<(DisplayMode, PixelFormat)>,
    streaming: bool,
    paused: bool,
    supplied: VecDeque<FrameBuffer>,
    callback: Option<Arc<dyn InputCallback>>,
    captured: u64,
    /// Bumped whenever the capture thread must exit.
    epoch: u64,
}

impl State {
    fn active(&self) -> bool {
        self.streaming && !self.paused
    }
}

/// Simulated capture interface.
pub struct SimInput {
    capabilities: Capabilities,
    clock: ClockMode,
    state: Mutex<State>,
    me: Weak<SimInput>,
}

impl SimInput {
    pub fn new(capabilities: Capabilities, clock: ClockMode) -> Arc<Self> {
        Arc::new_cyclic(|me| SimInput {
            capabilities,
            clock,
            state: Mutex::new(State::default()),
            me: me.clone(),
        })
    }

    /// Number of empty buffers currently held by the hardware.
    pub fn supplied_len(&self) -> usize {
        lock(&self.state).supplied.len()
    }

    pub fn captured_count(&self) -> u64 {
        lock(&self.state).captured
    }

    pub fn is_streaming(&self) -> bool {
        lock(&self.state).active()
    }

    /// Mode the hardware is currently configured for.
    pub fn enabled_format(&self) -> Option<(DisplayMode, PixelFormat)> {
        lock(&self.state).enabled
    }

    /// Captures `payload` into the oldest supplied buffer and delivers it on
    /// the calling thread. Returns false if the input is not streaming or
    /// holds no buffer.
    pub fn inject_frame(&self, payload: &[u8]) -> bool {
        self.capture(None, |frame| {
            frame.write_from(payload);
        })
    }

    /// Reports a change of the incoming signal on the calling thread.
    pub fn signal_format_change(&self, mode: DisplayMode, pixel_format: PixelFormat) -> bool {
        let callback = {
            let state = lock(&self.state);
            if state.enabled.is_none() {
                return false;
            }
            state.callback.clone()
        };
        match callback {
            Some(callback) => {
                callback.format_changed(mode, pixel_format);
                true
            }
            None => false,
        }
    }

    pub(super) fn force_stop(&self) {
        let mut state = lock(&self.state);
        state.epoch += 1;
        state.streaming = false;
        state.enabled = None;
        state.supplied.clear();
        state.callback = None;
    }

    fn capture(&self, epoch: Option<u64>, fill: impl FnOnce(&mut FrameBuffer)) -> bool {
        let (frame, callback) = {
            let mut state = lock(&self.state);
            if epoch.is_some_and(|e| e != state.epoch) || !state.active() {
                return false;
            }
            let Some(callback) = state.callback.clone() else {
                return false;
            };
            let Some(mut frame) = state.supplied.pop_front() else {
                return false;
            };
            fill(&mut frame);
            state.captured += 1;
            (frame, callback)
        };
        callback.frame_arrived(frame);
        true
    }

    fn spawn_capture(&self, epoch: u64, mode: DisplayMode) -> Result<(), Error> {
        let me = self.me.clone();
        let period = mode.rate().frame_duration();
        thread::Builder::new()
            .name("sim-capture".into())
            .spawn(move || loop {
                thread::sleep(period);
                let Some(input) = me.upgrade() else { break };
                {
                    let state = lock(&input.state);
                    if state.epoch != epoch || !state.active() {
                        break;
                    }
                }
                let pattern = input.captured_count() as u8;
                input.capture(Some(epoch), |frame| frame.as_bytes_mut().fill(pattern));
            })?;
        Ok(())
    }
}

impl VideoInput for SimInput {
    fn supports_mode(&self, mode: DisplayMode, pixel_format: PixelFormat) -> bool {
        self.capabilities.supports(mode, pixel_format)
    }

    fn create_frame(&self, mode: DisplayMode, pixel_format: PixelFormat) -> Result<FrameBuffer, Error> {
        FrameBuffer::for_mode(mode, pixel_format)
    }

    fn enable(&self, mode: DisplayMode, pixel_format: PixelFormat) -> Result<(), Error> {
        if !self.capabilities.supports(mode, pixel_format) {
            return Err(Error::UnsupportedFormat(format!("{} {}", mode, pixel_format)));
        }
        lock(&self.state).enabled = Some((mode, pixel_format));
        Ok(())
    }

    fn disable(&self) -> Result<(), Error> {
        let mut state = lock(&self.state);
        state.epoch += 1;
        state.enabled = None;
        state.streaming = false;
        state.paused = false;
        state.supplied.clear();
        Ok(())
    }

    fn set_callback(&self, callback: Option<Arc<dyn InputCallback>>) {
        lock(&self.state).callback = callback;
    }

    fn supply_buffer(&self, frame: FrameBuffer) -> Result<(), (FrameBuffer, Error)> {
        let mut state = lock(&self.state);
        if state.enabled.is_none() {
            return Err((frame, Error::Hardware("input is not enabled".into())));
        }
        state.supplied.push_back(frame);
        Ok(())
    }

    fn start_streams(&self) -> Result<(), Error> {
        let (epoch, mode) = {
            let mut state = lock(&self.state);
            let Some((mode, _)) = state.enabled else {
                return Err(Error::Hardware("input is not enabled".into()));
            };
            state.streaming = true;
            state.paused = false;
            state.epoch += 1;
            (state.epoch, mode)
        };
        if self.clock == ClockMode::Realtime {
            self.spawn_capture(epoch, mode)?;
        }
        Ok(())
    }

    fn stop_streams(&self) -> Result<(), Error> {
        let mut state = lock(&self.state);
        state.epoch += 1;
        state.streaming = false;
        state.paused = false;
        Ok(())
    }

    fn pause_streams(&self) -> Result<(), Error> {
        let mut state = lock(&self.state);
        state.epoch += 1;
        state.paused = true;
        Ok(())
    }

    fn flush_streams(&self) -> Vec<FrameBuffer> {
        lock(&self.state).supplied.drain(..).collect()
    }
}
