// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Timed playout of a moving test pattern.

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
        Arc,
    },
    time::Duration,
};

#[derive(ClapArgs, Debug)]
pub struct Args {
    /// Device index or display name
    device: String,

    /// Channel name ("Single Link 1") or port number
    channel: Channel,

    /// Frame geometry (NTSC, PAL, HD720, HD1080, 1920x1080, ...)
    #[arg(short, long, default_value = "HD1080")]
    geometry: FrameGeometry,

    /// Frame rate (25, 29.97, 50, 59.94, ...)
    #[arg(short, long, default_value = "50")]
    rate: FrameRate,

    /// Pixel format (yuv8, yuv10, argb8, bgra8, rgb10, rgb12)
    #[arg(short, long, default_value = "yuv8")]
    pixel_format: PixelFormat,

    /// Number of frames to play (0 = until Ctrl+C)
    #[arg(short, long, default_value = "250")]
    frames: u64,

    /// Seconds to wait for a free buffer
    #[arg(short, long, default_value = "1.0", value_parser = utils::seconds_arg)]
    timeout: Duration,

    /// Print detailed pacing metrics
    #[arg(long)]
    metrics: bool,
}

pub fn execute(args: Args, env: &utils::Environment, json: bool) -> Result<(), CliError> {
    log::debug!("Playout parameters: {:?}", args);

    let mode = DisplayMode::new(args.geometry, args.rate).ok_or_else(|| {
        CliError::InvalidArgs(format!(
            "{} is not available at {} fps",
            args.geometry, args.rate
        ))
    })?;
    let timeout = args.timeout;

    let term = utils::install_signal_handler()?;
    let (_driver, registry) = env.open(ClockMode::Realtime)?;
    let index = utils::resolve_device(&registry, &args.device)?;
    let channel = args.channel;

    let request = ChannelRequest::output(channel, args.pixel_format)
        .with_mode(args.geometry, args.rate);
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
            log::warn!("Frame {} dropped", frame);
            counter.fetch_add(1, Ordering::Relaxed);
        }
    })?;

    let size = FrameBuffer::for_mode(mode, args.pixel_format)?.len();
    let mut payload = vec![0u8; size];
    let mut metrics_collector = MetricsCollector::new();
    let max_frames = if args.frames == 0 {
        u64::MAX
    } else {
        args.frames
    };

    registry.start_stream(index, channel)?;
    log::info!(
        "Playing {} frames (Ctrl+C to stop)...",
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
        if let Err(err) = registry.wait_frame(index, channel, timeout) {
            if matches!(err, sdilink::Error::Timeout(_)) {
                metrics_collector.record_timeout();
                log::warn!("Timeout waiting for a free buffer");
                break Err(CliError::Timeout(format!(
                    "no free buffer after {:.1}s",
                    timeout.as_secs_f64()
                )));
            }
            break Err(err.into());
        }

        payload.fill(frame_count as u8);
        match registry.transfer_frame(index, channel, &mut payload) {
            Ok(copied) => metrics_collector.record_transfer(copied),
            Err(err) => break Err(err.into()),
        }
        frame_count += 1;

        if frame_count % 50 == 0 {
            log::debug!("Played {} frames", frame_count);
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
    log::info!("Played {} frames total", frame_count);
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
