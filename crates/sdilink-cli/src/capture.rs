// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Timed capture loop.

use crate::{error::CliError, metrics::MetricsCollector, utils};
use clap::Args as ClapArgs;
use sdilink::{
    channel::Channel,
    format::{DisplayMode, FrameGeometry, FrameRate, PixelFormat},
    frame::FrameBuffer,
    io::FrameResult,
    registry::ChannelRequest,
    sim::ClockMode,
};
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

#[derive(ClapArgs, Debug)]
pub struct Args {
    /// Device index or display name
    device: String,

    /// Channel name ("Single Link 2") or port number
    channel: Channel,

    /// Expected frame geometry; detected from the signal when omitted
    #[arg(short, long, requires = "rate")]
    geometry: Option<FrameGeometry>,

    /// Expected frame rate; detected from the signal when omitted
    #[arg(short, long, requires = "geometry")]
    rate: Option<FrameRate>,

    /// Pixel format (yuv8, yuv10, argb8, bgra8, rgb10, rgb12)
    #[arg(short, long, default_value = "yuv8")]
    pixel_format: PixelFormat,

    /// Number of frames to capture (0 = until Ctrl+C)
    #[arg(short, long, default_value = "250")]
    frames: u64,

    /// Seconds to wait for a captured frame
    #[arg(short, long, default_value = "1.0", value_parser = utils::seconds_arg)]
    timeout: Duration,

    /// Print detailed pacing metrics
    #[arg(long)]
    metrics: bool,
}

fn frame_size(mode: DisplayMode, pixel_format: PixelFormat) -> Result<usize, CliError> {
    Ok(FrameBuffer::for_mode(mode, pixel_format)?.len())
}

pub fn execute(args: Args, env: &utils::Environment, json: bool) -> Result<(), CliError> {
    log::debug!("Capture parameters: {:?}", args);

    let term = utils::install_signal_handler()?;
    let (_driver, registry) = env.open(ClockMode::Realtime)?;
    let index = utils::resolve_device(&registry, &args.device)?;
    let channel = args.channel;

    let mut request = ChannelRequest::input(channel, args.pixel_format);
    if let (Some(geometry), Some(rate)) = (args.geometry, args.rate) {
        request = request.with_mode(geometry, rate);
    }
    let mode = request.mode()?.unwrap_or_default();

    // Signal changes are picked up by the loop to resize the read buffer.
    let detected = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&detected);
    registry.register_format_change_callback(index, channel, move |geometry, rate, pixel_format| {
        log::info!("Input signal changed to {} {} {}", geometry, rate, pixel_format);
        if let Some(mode) = DisplayMode::new(geometry, rate) {
            if let Ok(mut detected) = sink.lock() {
                *detected = Some((mode, pixel_format));
            }
        }
    })?;

    registry.open_channel(index, &request)?;
    log::info!(
        "Opened {} on device {} for {} {}",
        channel,
        index,
        mode,
        args.pixel_format
    );

    let dropped = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&dropped);
    registry.register_frame_result_callback(index, channel, move |result, frame| {
        if result == FrameResult::Dropped {
            log::debug!("Frame {} dropped, reader too slow", frame);
            counter.fetch_add(1, Ordering::Relaxed);
        }
    })?;

    let mut buffer = vec![0u8; frame_size(mode, args.pixel_format)?];
    let mut metrics_collector = MetricsCollector::new();
    let max_frames = if args.frames == 0 {
        u64::MAX
    } else {
        args.frames
    };

    registry.start_stream(index, channel)?;
    log::info!(
        "Capturing {} frames (Ctrl+C to stop)...",
        if max_frames == u64::MAX {
            "unlimited".to_string()
        } else {
            max_frames.to_string()
        }
    );

    let mut frame_count = 0u64;
    let result = loop {
        if frame_count >= max_frames || term.load(Ordering::Relaxed) {
            break Ok(());
        }
        let change = detected.lock().ok().and_then(|mut d| d.take());
        if let Some((mode, pixel_format)) = change {
            match frame_size(mode, pixel_format) {
                Ok(size) => buffer.resize(size, 0),
                Err(err) => break Err(err),
            }
        }

        if let Err(err) = registry.wait_frame(index, channel, args.timeout) {
            if matches!(err, sdilink::Error::Timeout(_)) {
                metrics_collector.record_timeout();
                log::warn!("Timeout waiting for frame");
                break Err(CliError::Timeout(format!(
                    "no frame after {:.1}s",
                    args.timeout.as_secs_f64()
                )));
            }
            break Err(err.into());
        }

        match registry.transfer_frame(index, channel, &mut buffer) {
            Ok(copied) => metrics_collector.record_transfer(copied),
            Err(err) => break Err(err.into()),
        }
        frame_count += 1;

        if frame_count % 50 == 0 {
            log::debug!("Captured {} frames", frame_count);
        }
    };

    if term.load(Ordering::Relaxed) {
        log::info!("Received Ctrl+C, stopping...");
    }
    if let Ok(stats) = registry.handler_stats(index, channel) {
        log::debug!("Handler stats: {:?}", stats);
    }
    metrics_collector.set_dropped(dropped.load(Ordering::Relaxed));
    registry.stop_stream(index, channel)?;
    registry.close_channel(index, channel)?;
    log::info!("Captured {} frames total", frame_count);
    result?;

    if args.metrics || json {
        if json {
            metrics_collector
                .print_json()
                .map_err(|e| CliError::General(format!("Failed to output JSON metrics: {}", e)))?;
        } else {
            metrics_collector.print_text();
        }
    }

    Ok(())
}
