// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use super::{Capabilities, ClockMode};
use crate::{
    format::{DisplayMode, PixelFormat},
    frame::FrameBuffer,
    hardware::{CompletionResult, OutputCallback, VideoOutput},
    sync::lock,
    Error,
};
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, Weak},
    thread,
};

/// Displayed payloads kept for inspection.
const DISPLAY_HISTORY: usize = 16;

struct Scheduled {
    frame: FrameBuffer,
    display_time: i64,
}

#[derive(Default)]
struct State {
    enabled: Option<(DisplayMode, PixelFormat)>,
    playing: bool,
    time_scale: u32,
    scheduled: VecDeque<Scheduled>,
    displayed: VecDeque<Vec<u8>>,
    displayed_count: u64,
    callback: Option<Arc<dyn OutputCallback>>,
    suppress_stop: bool,
    /// Bumped whenever the clock thread must exit.
    epoch: u64,
}

/// Simulated playback interface.
pub struct SimOutput {
    capabilities: Capabilities,
    clock: ClockMode,
    state: Mutex<State>,
    me: Weak<SimOutput>,
}

impl SimOutput {
    pub fn new(capabilities: Capabilities, clock: ClockMode) -> Arc<Self> {
        Arc::new_cyclic(|me| SimOutput {
            capabilities,
            clock,
            state: Mutex::new(State::default()),
            me: me.clone(),
        })
    }

    /// Number of frames waiting to be displayed.
    pub fn scheduled_len(&self) -> usize {
        lock(&self.state).scheduled.len()
    }

    /// Display times of the frames waiting to be displayed, in schedule
    /// order.
    pub fn scheduled_times(&self) -> Vec<i64> {
        lock(&self.state)
            .scheduled
            .iter()
            .map(|s| s.display_time)
            .collect()
    }

    /// Payloads of the most recently displayed frames, oldest first.
    pub fn displayed(&self) -> Vec<Vec<u8>> {
        lock(&self.state).displayed.iter().cloned().collect()
    }

    pub fn displayed_count(&self) -> u64 {
        lock(&self.state).displayed_count
    }

    pub fn is_playing(&self) -> bool {
        lock(&self.state).playing
    }

    /// When set, stopping playback no longer confirms with
    /// `playback_stopped`.
    pub fn suppress_stop_confirmation(&self, suppress: bool) {
        lock(&self.state).suppress_stop = suppress;
    }

    /// Finishes the oldest scheduled frame with `result` and notifies the
    /// callback on the calling thread. Returns false if nothing was scheduled.
    pub fn complete_next(&self, result: CompletionResult) -> bool {
        let (frame, callback) = {
            let mut state = lock(&self.state);
            let Some(scheduled) = state.scheduled.pop_front() else {
                return false;
            };
            if matches!(
                result,
                CompletionResult::Completed | CompletionResult::DisplayedLate
            ) {
                state.record(&scheduled.frame);
            }
            (scheduled.frame, state.callback.clone())
        };
        if let Some(callback) = callback {
            callback.frame_completed(frame, result);
        }
        true
    }

    /// Drops every scheduled frame without notification, as when the card is
    /// repartitioned under a running stream.
    pub(super) fn force_stop(&self) {
        let mut state = lock(&self.state);
        state.epoch += 1;
        state.playing = false;
        state.enabled = None;
        state.scheduled.clear();
        state.callback = None;
    }

    fn spawn_clock(&self, epoch: u64, mode: DisplayMode) -> Result<(), Error> {
        let me = self.me.clone();
        let period = mode.rate().frame_duration();
        let (duration, _) = mode.rate().duration_timescale();
        thread::Builder::new()
            .name("sim-playout".into())
            .spawn(move || {
                let mut tick: i64 = 0;
                loop {
                    thread::sleep(period);
                    let Some(output) = me.upgrade() else { break };
                    if !output.tick(epoch, tick * duration as i64) {
                        break;
                    }
                    tick += 1;
                }
            })?;
        Ok(())
    }

    /// Displays whatever is due at `now`. Returns false once the clock must
    /// stop.
    fn tick(&self, epoch: u64, now: i64) -> bool {
        let (frame, result, callback) = {
            let mut state = lock(&self.state);
            if state.epoch != epoch || !state.playing {
                return false;
            }
            let due = state
                .scheduled
                .front()
                .map(|s| s.display_time <= now)
                .unwrap_or(false);
            if !due {
                return true;
            }
            let Some(scheduled) = state.scheduled.pop_front() else {
                return true;
            };
            let result = if scheduled.display_time < now {
                CompletionResult::DisplayedLate
            } else {
                CompletionResult::Completed
            };
            state.record(&scheduled.frame);
            (scheduled.frame, result, state.callback.clone())
        };
        if let Some(callback) = callback {
            callback.frame_completed(frame, result);
        }
        true
    }
}

impl State {
    fn record(&mut self, frame: &FrameBuffer) {
        self.displayed_count += 1;
        if self.displayed.len() == DISPLAY_HISTORY {
            self.displayed.pop_front();
        }
        self.displayed.push_back(frame.as_bytes().to_vec());
    }
}

impl VideoOutput for SimOutput {
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
        state.playing = false;
        state.scheduled.clear();
        Ok(())
    }

    fn set_callback(&self, callback: Option<Arc<dyn OutputCallback>>) {
        lock(&self.state).callback = callback;
    }

    fn start_playback(&self, _start_time: i64, time_scale: u32) -> Result<(), Error> {
        let (epoch, mode) = {
            let mut state = lock(&self.state);
            let Some((mode, _)) = state.enabled else {
                return Err(Error::Hardware("output is not enabled".into()));
            };
            if state.playing {
                return Err(Error::Hardware("playback already started".into()));
            }
            state.playing = true;
            state.time_scale = time_scale;
            state.epoch += 1;
            (state.epoch, mode)
        };
        if self.clock == ClockMode::Realtime {
            self.spawn_clock(epoch, mode)?;
        }
        Ok(())
    }

    fn stop_playback(&self) -> Result<(), Error> {
        let (flushed, callback, confirm) = {
            let mut state = lock(&self.state);
            state.epoch += 1;
            state.playing = false;
            let flushed: Vec<FrameBuffer> = state.scheduled.drain(..).map(|s| s.frame).collect();
            (flushed, state.callback.clone(), !state.suppress_stop)
        };
        if let Some(callback) = callback {
            for frame in flushed {
                callback.frame_completed(frame, CompletionResult::Flushed);
            }
            if confirm {
                callback.playback_stopped();
            }
        }
        Ok(())
    }

    fn schedule_frame(
        &self,
        frame: FrameBuffer,
        display_time: i64,
        _duration: u32,
        time_scale: u32,
    ) -> Result<(), (FrameBuffer, Error)> {
        let mut state = lock(&self.state);
        if state.enabled.is_none() {
            return Err((frame, Error::Hardware("output is not enabled".into())));
        }
        if state.playing && time_scale != state.time_scale {
            return Err((
                frame,
                Error::Hardware(format!(
                    "time scale {} does not match playback time scale {}",
                    time_scale, state.time_scale
                )),
            ));
        }
        state.scheduled.push_back(Scheduled {
            frame,
            display_time,
        });
        Ok(())
    }
}
