// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies
//
// I/O Handler Tests
//
// TESTING LAYERS:
//
// Layer 1 (Unit Tests - No hardware required):
//   - test_output_buffer_conservation: pool == queued + in flight through a cycle
//   - test_input_buffer_conservation: pool == free + queued + in flight
//   - test_lifecycle_idempotence: double open / double close, start/stop no-ops
//   - test_output_round_trip: three payloads scheduled at 0, d, 2d, displayed FIFO
//   - test_input_drop_accounting: depth-1 queue keeps the newest of two arrivals
//   - test_input_format_change: pool reallocated, subscribers notified
//   - test_frame_results_input: completed and dropped arrivals reported
//
// Layer 2 (Timing - simulated hardware clock, run serially):
//   - test_wait_frame_timeout_bound: WaitFrame(T) fails within [T, T + eps]
//   - test_stop_without_confirmation: Stop returns after the stop timeout
//   - test_realtime_playout: clocked hardware drains the ring
//
// RUN:
//   cargo test --test io_handlers

use rand::Rng;
use sdilink::{
    format::{DisplayMode, FrameGeometry, FrameRate, PixelFormat},
    frame::FrameBuffer,
    hardware::CompletionResult,
    io::{FrameResult, HandlerConfig, InputHandler, IoHandler, IoState, OutputHandler},
    sim::{Capabilities, ClockMode, SimInput, SimOutput},
    Error,
};
use serial_test::serial;
use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

fn ntsc() -> DisplayMode {
    DisplayMode::new(FrameGeometry::Ntsc, FrameRate::P2997).unwrap()
}

fn pal() -> DisplayMode {
    DisplayMode::new(FrameGeometry::Pal, FrameRate::P25).unwrap()
}

fn frame_len(mode: DisplayMode, pixel_format: PixelFormat) -> usize {
    FrameBuffer::for_mode(mode, pixel_format).unwrap().len()
}

fn output(clock: ClockMode) -> (Arc<SimOutput>, OutputHandler) {
    let hardware = SimOutput::new(Capabilities::all(), clock);
    let handler = OutputHandler::new(hardware.clone(), HandlerConfig::output());
    (hardware, handler)
}

fn input(config: HandlerConfig) -> (Arc<SimInput>, InputHandler) {
    let hardware = SimInput::new(Capabilities::all(), ClockMode::Manual);
    let handler = InputHandler::new(hardware.clone(), config);
    (hardware, handler)
}

// =============================================================================
// Buffer conservation
// =============================================================================

#[test]
fn test_output_buffer_conservation() {
    let (hw, output) = output(ClockMode::Manual);
    let payload = vec![0x10u8; frame_len(ntsc(), PixelFormat::Ycbcr8Bit)];

    output.open(ntsc(), PixelFormat::Ycbcr8Bit).unwrap();
    assert!(output.stats().is_conserved());
    output.start().unwrap();

    for written in 1..=3 {
        output.wait_frame(Duration::from_millis(10)).unwrap();
        output.transfer_frame(&mut payload.clone()).unwrap();
        let stats = output.stats();
        assert!(stats.is_conserved(), "{:?}", stats);
        assert_eq!(stats.in_flight, written);
        assert_eq!(hw.scheduled_len(), written);
    }

    hw.complete_next(CompletionResult::Completed);
    hw.complete_next(CompletionResult::Dropped);
    let stats = output.stats();
    assert!(stats.is_conserved());
    assert_eq!((stats.queued, stats.in_flight), (2, 1));

    output.stop().unwrap();
    let stats = output.stats();
    assert!(stats.is_conserved());
    assert_eq!((stats.queued, stats.in_flight), (3, 0));
    assert_eq!(stats.state, IoState::Open);

    output.close().unwrap();
    let stats = output.stats();
    assert_eq!(stats.pool_size, 0);
    assert!(stats.is_conserved());
}

#[test]
fn test_input_buffer_conservation() {
    let (hw, input) = input(HandlerConfig::input());
    input.open(pal(), PixelFormat::Ycbcr8Bit).unwrap();
    assert!(input.stats().is_conserved());
    input.start().unwrap();

    let mut dst = vec![0u8; frame_len(pal(), PixelFormat::Ycbcr8Bit)];
    for round in 0..10u8 {
        assert!(hw.inject_frame(&[round; 32]));
        assert!(input.stats().is_conserved());
        if round % 3 != 0 {
            input.wait_frame(Duration::from_millis(10)).unwrap();
            input.transfer_frame(&mut dst).unwrap();
            assert!(input.stats().is_conserved());
        }
    }

    input.stop().unwrap();
    let stats = input.stats();
    assert!(stats.is_conserved());
    assert_eq!(stats.free, stats.pool_size);
    input.close().unwrap();
}

// =============================================================================
// Lifecycle
// =============================================================================

#[test]
fn test_lifecycle_idempotence() {
    let (_hw, output) = output(ClockMode::Manual);
    assert!(output.open(ntsc(), PixelFormat::Ycbcr8Bit).is_ok());
    assert!(matches!(
        output.open(ntsc(), PixelFormat::Ycbcr10Bit),
        Err(Error::InvalidState(_))
    ));
    assert_eq!(output.format(), Some((ntsc(), PixelFormat::Ycbcr8Bit)));

    output.start().unwrap();
    output.start().unwrap();
    assert_eq!(output.state(), IoState::Running);
    output.stop().unwrap();
    output.stop().unwrap();
    assert_eq!(output.state(), IoState::Open);

    assert!(output.close().is_ok());
    assert!(matches!(output.close(), Err(Error::InvalidState(_))));
    assert_eq!(output.state(), IoState::Closed);

    // Reopen after close starts a fresh period.
    output.open(pal(), PixelFormat::Ycbcr8Bit).unwrap();
    assert_eq!(output.stats().frames_scheduled, 0);
}

#[test]
fn test_transfer_requires_open() {
    let (_hw, input) = input(HandlerConfig::input());
    let mut dst = [0u8; 16];
    assert!(matches!(
        input.transfer_frame(&mut dst),
        Err(Error::InvalidState(_))
    ));
    assert!(matches!(
        input.wait_frame(Duration::from_millis(1)),
        Err(Error::InvalidState(_))
    ));
}

// =============================================================================
// Output round trip
// =============================================================================

#[test]
fn test_output_round_trip() {
    let (hw, output) = output(ClockMode::Manual);
    let mode = ntsc();
    let size = frame_len(mode, PixelFormat::Ycbcr8Bit);
    output.open(mode, PixelFormat::Ycbcr8Bit).unwrap();
    assert_eq!(output.stats().pool_size, 3);
    output.start().unwrap();

    let mut rng = rand::rng();
    let payloads: Vec<Vec<u8>> = (0..3)
        .map(|_| (0..size).map(|_| rng.random::<u8>()).collect())
        .collect();
    for payload in &payloads {
        output.wait_frame(Duration::from_millis(10)).unwrap();
        let copied = output.transfer_frame(&mut payload.clone()).unwrap();
        assert_eq!(copied, size);
    }

    let (duration, time_scale) = output.delta_seconds().unwrap();
    assert_eq!((duration, time_scale), (1001, 30000));
    assert_eq!(
        hw.scheduled_times(),
        vec![0, duration as i64, 2 * duration as i64]
    );

    // All buffers are with the hardware until something completes.
    assert!(matches!(
        output.wait_frame(Duration::from_millis(5)),
        Err(Error::Timeout(_))
    ));
    for _ in 0..3 {
        assert!(hw.complete_next(CompletionResult::Completed));
    }
    assert_eq!(hw.displayed(), payloads);
    output.wait_frame(Duration::from_millis(5)).unwrap();
    assert_eq!(output.stats().frames_processed, 3);
    assert_eq!(output.stats().frames_dropped, 0);
}

#[test]
fn test_output_size_mismatch_truncates() {
    let (hw, output) = output(ClockMode::Manual);
    output.open(pal(), PixelFormat::Ycbcr8Bit).unwrap();
    output.start().unwrap();

    let mut short = vec![0xAAu8; 100];
    assert_eq!(output.transfer_frame(&mut short).unwrap(), 100);
    hw.complete_next(CompletionResult::Completed);
    let displayed = hw.displayed();
    assert_eq!(displayed[0].len(), frame_len(pal(), PixelFormat::Ycbcr8Bit));
    assert!(displayed[0][..100].iter().all(|&b| b == 0xAA));
}

// =============================================================================
// Input queue discipline
// =============================================================================

#[test]
fn test_input_drop_accounting() {
    let (hw, input) = input(HandlerConfig::input().with_queue_depth(1));
    input.open(pal(), PixelFormat::Ycbcr8Bit).unwrap();
    input.start().unwrap();

    assert!(hw.inject_frame(&[1u8; 64]));
    assert!(hw.inject_frame(&[2u8; 64]));

    let stats = input.stats();
    assert_eq!(stats.frames_dropped, 1);
    assert_eq!(stats.frames_processed, 2);
    assert_eq!(stats.queued, 1);
    assert!(stats.is_conserved());

    let mut dst = vec![0u8; frame_len(pal(), PixelFormat::Ycbcr8Bit)];
    input.transfer_frame(&mut dst).unwrap();
    assert_eq!(&dst[..64], &[2u8; 64]);
    assert_eq!(input.stats().queued, 0);
}

#[test]
fn test_frame_results_input() {
    let (hw, input) = input(HandlerConfig::input().with_queue_depth(2));
    let results = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&results);
    input.add_frame_result_callback(Arc::new(move |result: FrameResult, frame: u64| {
        sink.lock().unwrap().push((result, frame));
    }));

    input.open(pal(), PixelFormat::Ycbcr8Bit).unwrap();
    input.start().unwrap();
    for value in 0..3u8 {
        hw.inject_frame(&[value; 8]);
    }

    assert_eq!(
        *results.lock().unwrap(),
        vec![
            (FrameResult::Completed, 1),
            (FrameResult::Completed, 2),
            (FrameResult::Dropped, 3),
        ]
    );
}

#[test]
fn test_input_format_change() {
    let _ = env_logger::builder().is_test(true).try_init();
    let (hw, input) = input(HandlerConfig::input());
    let seen = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&seen);
    input.add_format_change_callback(Arc::new(
        move |geometry: FrameGeometry, rate: FrameRate, pixel_format: PixelFormat| {
            *sink.lock().unwrap() = Some((geometry, rate, pixel_format));
        },
    ));

    input.open_detecting(None, PixelFormat::Ycbcr8Bit).unwrap();
    input.start().unwrap();
    hw.inject_frame(&[7u8; 8]);
    assert_eq!(input.stats().queued, 1);

    let hd720 = DisplayMode::new(FrameGeometry::Hd720, FrameRate::P5994).unwrap();
    assert!(hw.signal_format_change(hd720, PixelFormat::Ycbcr10Bit));

    assert_eq!(
        *seen.lock().unwrap(),
        Some((FrameGeometry::Hd720, FrameRate::P5994, PixelFormat::Ycbcr10Bit))
    );
    assert_eq!(input.format(), Some((hd720, PixelFormat::Ycbcr10Bit)));
    assert_eq!(input.delta_seconds(), Some((1001, 60000)));

    let stats = input.stats();
    assert_eq!(stats.queued, 0, "stale frames are flushed");
    assert_eq!(stats.in_flight, stats.pool_size);
    assert!(stats.is_conserved());
    assert_eq!(input.state(), IoState::Running);

    assert!(hw.inject_frame(&[9u8; 8]));
    let mut dst = vec![0u8; frame_len(hd720, PixelFormat::Ycbcr10Bit)];
    assert_eq!(input.transfer_frame(&mut dst).unwrap(), dst.len());
}

#[test]
fn test_same_format_ignored() {
    let (hw, input) = input(HandlerConfig::input());
    let calls = Arc::new(Mutex::new(0));
    let sink = Arc::clone(&calls);
    input.add_format_change_callback(Arc::new(move |_: FrameGeometry, _: FrameRate, _: PixelFormat| {
        *sink.lock().unwrap() += 1;
    }));
    input.open(pal(), PixelFormat::Ycbcr8Bit).unwrap();
    hw.signal_format_change(pal(), PixelFormat::Ycbcr8Bit);
    assert_eq!(*calls.lock().unwrap(), 0);
}

// =============================================================================
// Timing
// =============================================================================

#[test]
#[serial]
fn test_wait_frame_timeout_bound() {
    let _ = env_logger::builder().is_test(true).try_init();
    let (_hw, input) = input(HandlerConfig::input());
    input.open(pal(), PixelFormat::Ycbcr8Bit).unwrap();
    input.start().unwrap();

    let timeout = Duration::from_millis(50);
    let start = Instant::now();
    let result = input.wait_frame(timeout);
    let elapsed = start.elapsed();

    assert!(matches!(result, Err(Error::Timeout(t)) if t == timeout));
    assert!(elapsed >= timeout, "returned early after {:?}", elapsed);
    assert!(
        elapsed < timeout + Duration::from_millis(200),
        "returned late after {:?}",
        elapsed
    );
}

#[test]
#[serial]
fn test_stop_without_confirmation() {
    let _ = env_logger::builder().is_test(true).try_init();
    let hardware = SimOutput::new(Capabilities::all(), ClockMode::Manual);
    let config = HandlerConfig::output().with_stop_timeout(Duration::from_millis(30));
    let output = OutputHandler::new(hardware.clone(), config);
    hardware.suppress_stop_confirmation(true);

    output.open(pal(), PixelFormat::Ycbcr8Bit).unwrap();
    output.start().unwrap();

    let start = Instant::now();
    output.stop().unwrap();
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(30));
    assert!(elapsed < Duration::from_millis(500));
    assert_eq!(output.state(), IoState::Open);
}

#[test]
#[serial]
fn test_realtime_playout() {
    let _ = env_logger::builder().is_test(true).try_init();
    let (hw, output) = output(ClockMode::Realtime);
    let mode = DisplayMode::new(FrameGeometry::Pal, FrameRate::P50).unwrap();
    let mut payload = vec![0u8; frame_len(mode, PixelFormat::Ycbcr8Bit)];
    output.open(mode, PixelFormat::Ycbcr8Bit).unwrap();
    output.start().unwrap();

    for _ in 0..10 {
        output.wait_frame(Duration::from_millis(200)).unwrap();
        output.transfer_frame(&mut payload).unwrap();
    }
    output.wait_frame(Duration::from_millis(200)).unwrap();
    assert!(hw.displayed_count() >= 8, "displayed {}", hw.displayed_count());

    output.close().unwrap();
    assert!(!hw.is_playing());
}
