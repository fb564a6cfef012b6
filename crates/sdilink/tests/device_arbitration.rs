// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies
//
// Device and Registry Tests
//
// TESTING LAYERS:
//
// Layer 1 (Unit Tests - No hardware required):
//   - test_channel_exclusivity: one open per channel, freed on close
//   - test_sub_unit_conflict: two channels sharing one sub-unit
//   - test_full_duplex_pairing: input alongside output on a full-duplex sub-unit
//   - test_port_mapping: mapped channel names resolve both ways
//   - test_frame_results_via_registry: drop notifications reach subscribers
//   - test_format_change_via_registry: subscribe before open, adopt new signal
//   - test_device_info: JSON-friendly device summary
//
// Layer 2 (Profile changes - simulated card, run serially):
//   - test_profile_invalidation: channels closed, callbacks fired, rebuild
//   - test_set_active_profile: asynchronous switch from the API
//
// RUN:
//   cargo test --test device_arbitration

use sdilink::{
    channel::Channel,
    device::DeviceState,
    format::{Direction, FrameGeometry, FrameRate, PixelFormat},
    hardware::DuplexProfile,
    io::FrameResult,
    registry::{ChannelRequest, DeviceRegistry, RegistryOptions},
    settings::Settings,
    sim::{CardConfig, SimulatedDriver, Topology},
    Error,
};
use serial_test::serial;
use std::{
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Mutex,
    },
    thread,
    time::{Duration, Instant},
};

const PRO: &str = "DeckLink 8K Pro";

fn registry_with(topology: Topology) -> (Arc<SimulatedDriver>, DeviceRegistry) {
    let driver = Arc::new(SimulatedDriver::manual(topology));
    let registry = DeviceRegistry::new(driver.clone(), RegistryOptions::default()).unwrap();
    (driver, registry)
}

fn default_registry() -> (Arc<SimulatedDriver>, DeviceRegistry) {
    registry_with(Topology::default())
}

fn two_sub_pro() -> Topology {
    Topology {
        cards: vec![CardConfig::new(PRO, DuplexProfile::TwoSubDevicesFullDuplex)],
    }
}

fn output(channel: Channel) -> ChannelRequest {
    ChannelRequest::output(channel, PixelFormat::Ycbcr8Bit)
        .with_mode(FrameGeometry::Pal, FrameRate::P25)
}

fn input(channel: Channel) -> ChannelRequest {
    ChannelRequest::input(channel, PixelFormat::Ycbcr8Bit)
        .with_mode(FrameGeometry::Pal, FrameRate::P25)
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

// =============================================================================
// Arbitration
// =============================================================================

#[test]
fn test_channel_exclusivity() {
    let (_driver, registry) = default_registry();
    let ch = Channel::SingleLink1;

    registry.open_channel(0, &output(ch)).unwrap();
    assert!(matches!(
        registry.open_channel(0, &output(ch)),
        Err(Error::ChannelBusy { .. })
    ));
    // Half duplex: the same connector cannot capture while playing.
    assert!(matches!(
        registry.open_channel(0, &input(ch)),
        Err(Error::ChannelBusy { .. })
    ));
    assert!(!registry
        .available_channels(0, Direction::Output)
        .unwrap()
        .contains(&ch));

    registry.close_channel(0, ch).unwrap();
    assert!(registry
        .available_channels(0, Direction::Output)
        .unwrap()
        .contains(&ch));
    registry.open_channel(0, &input(ch)).unwrap();
    assert_eq!(
        registry.device_info(0).unwrap().open_channels,
        vec![(ch, Direction::Input)]
    );
}

#[test]
fn test_sub_unit_conflict() {
    let _ = env_logger::builder().is_test(true).try_init();
    let (_driver, registry) = registry_with(two_sub_pro());

    registry.open_channel(0, &output(Channel::SingleLink1)).unwrap();
    let busy = registry.open_channel(0, &output(Channel::SingleLink2));
    assert!(matches!(
        busy,
        Err(Error::ChannelBusy {
            direction: Direction::Output,
            channel: Channel::SingleLink2
        })
    ));
    // The other sub-unit is unaffected.
    registry.open_channel(0, &output(Channel::SingleLink3)).unwrap();

    registry.close_channel(0, Channel::SingleLink1).unwrap();
    registry.open_channel(0, &output(Channel::SingleLink2)).unwrap();
}

#[test]
fn test_full_duplex_pairing() {
    let (_driver, registry) = registry_with(two_sub_pro());
    registry.open_channel(0, &output(Channel::SingleLink1)).unwrap();
    registry.open_channel(0, &input(Channel::SingleLink2)).unwrap();

    let available = registry.available_channels(0, Direction::Input).unwrap();
    assert_eq!(available, vec![Channel::SingleLink3, Channel::SingleLink4]);
}

#[test]
fn test_closed_channel_operations() {
    let (_driver, registry) = default_registry();
    let ch = Channel::SingleLink2;
    let err = registry
        .wait_frame(0, ch, Duration::from_millis(1))
        .unwrap_err();
    assert!(err.is_not_found());
    assert!(registry.close_channel(0, ch).unwrap_err().is_not_found());
    assert!(registry.start_stream(0, ch).unwrap_err().is_not_found());
    assert!(registry.delta_seconds(9, ch).unwrap_err().is_not_found());
}

#[test]
fn test_unmapped_channel() {
    let (_driver, registry) = default_registry();
    let err = registry
        .open_channel(0, &output(Channel::SingleLink6))
        .unwrap_err();
    assert!(matches!(err, Error::NoSubUnit { .. }));
    assert!(registry
        .supported_geometries(0, Direction::Output, Channel::SingleLink6)
        .unwrap_err()
        .is_not_found());
}

// =============================================================================
// Port mapping
// =============================================================================

#[test]
fn test_port_mapping() {
    let (_driver, registry) = default_registry();
    let settings = Settings::from_json(
        r#"{ "sdi_port_mappings": [ { "model_name": "DeckLink 8K Pro",
             "sdi_port_mapping": [ { "source_port": 1, "target_port": 3 },
                                   { "source_port": 3, "target_port": 1 } ] } ] }"#,
    )
    .unwrap();
    registry.set_settings(settings).unwrap();

    assert_eq!(
        registry
            .port_mapped_channel_name(0, Channel::SingleLink1)
            .unwrap(),
        "Single Link 3"
    );
    assert_eq!(
        registry
            .channel_from_port_mapped_name(0, "Single Link 3")
            .unwrap(),
        Some(Channel::SingleLink1)
    );
    assert_eq!(
        registry
            .port_mapped_channel_name(1, Channel::SingleLink1)
            .unwrap(),
        "Single Link 1"
    );
    assert_eq!(
        registry
            .channel_from_port_mapped_name(0, "Dual Link 1")
            .unwrap(),
        None
    );
    assert_eq!(
        DeviceRegistry::channel_from_name("Single Link 4"),
        Some(Channel::SingleLink4)
    );
}

#[test]
fn test_invalid_settings_rejected() {
    let (_driver, registry) = default_registry();
    let mut settings = Settings::default();
    settings.sdi_port_mappings.push(sdilink::settings::ModelPortMapping {
        model_name: "Unknown Card".into(),
        sdi_port_mapping: vec![],
    });
    assert!(matches!(
        registry.set_settings(settings),
        Err(Error::InvalidSettings(_))
    ));
    assert!(registry.settings().sdi_port_mappings.is_empty());
}

// =============================================================================
// Callbacks
// =============================================================================

#[test]
fn test_frame_results_via_registry() {
    let (driver, registry) = default_registry();
    let ch = Channel::SingleLink1;
    registry.open_channel(0, &input(ch)).unwrap();

    let results = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&results);
    let id = registry
        .register_frame_result_callback(0, ch, move |result, frame| {
            sink.lock().unwrap().push((result, frame));
        })
        .unwrap();
    registry.start_stream(0, ch).unwrap();

    let hw = driver.card(0).unwrap().input(0).unwrap();
    for value in 0..3u8 {
        assert!(hw.inject_frame(&[value; 16]));
    }
    assert_eq!(results.lock().unwrap().len(), 3);
    assert_eq!(results.lock().unwrap()[2], (FrameResult::Dropped, 3));

    assert!(registry.unregister_frame_result_callback(0, ch, id).unwrap());
    assert!(!registry.unregister_frame_result_callback(0, ch, id).unwrap());

    let stats = registry.handler_stats(0, ch).unwrap();
    assert_eq!(stats.frames_dropped, 1);
    assert!(stats.is_conserved());
}

#[test]
fn test_format_change_via_registry() {
    let (driver, registry) = default_registry();
    let ch = Channel::SingleLink2;
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    registry
        .register_format_change_callback(0, ch, move |geometry, rate, pixel_format| {
            sink.lock().unwrap().push((geometry, rate, pixel_format));
        })
        .unwrap();

    registry
        .open_channel(0, &ChannelRequest::input(ch, PixelFormat::Ycbcr8Bit))
        .unwrap();
    registry.start_stream(0, ch).unwrap();
    assert_eq!(registry.delta_seconds(0, ch).unwrap(), (1000, 50000));

    let hw = driver.card(0).unwrap().input(1).unwrap();
    let ntsc = sdilink::format::DisplayMode::new(FrameGeometry::Ntsc, FrameRate::P2997).unwrap();
    assert!(hw.signal_format_change(ntsc, PixelFormat::Ycbcr8Bit));

    assert_eq!(
        *seen.lock().unwrap(),
        vec![(FrameGeometry::Ntsc, FrameRate::P2997, PixelFormat::Ycbcr8Bit)]
    );
    assert_eq!(registry.delta_seconds(0, ch).unwrap(), (1001, 30000));
}

#[test]
fn test_device_info() {
    let (_driver, registry) = default_registry();
    let info = registry.device_info(1).unwrap();
    assert_eq!(info.model_name, "DeckLink Duo 2");
    assert_eq!(info.state, DeviceState::Initialized);
    assert_eq!(info.active_profile, DuplexProfile::FourSubDevicesHalfDuplex);
    assert_eq!(info.sub_unit_count, 4);
    assert!(info.profiles.contains(&DuplexProfile::TwoSubDevicesFullDuplex));

    let json = serde_json::to_value(&info).unwrap();
    assert_eq!(json["display_name"], "DeckLink Duo 2 - 1");
    assert_eq!(json["state"], "initialized");
}

// =============================================================================
// Profile changes
// =============================================================================

#[test]
#[serial]
fn test_profile_invalidation() {
    let _ = env_logger::builder().is_test(true).try_init();
    let (driver, registry) = default_registry();
    let ch = Channel::SingleLink1;
    let card = driver.card(0).unwrap();

    let invalidated = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&invalidated);
    registry
        .register_device_invalidated_callback(0, move |index| {
            assert_eq!(index, 0);
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    registry.open_channel(0, &output(ch)).unwrap();
    registry.start_stream(0, ch).unwrap();

    let profile = DuplexProfile::TwoSubDevicesFullDuplex;
    card.notify_profile_changing(profile);

    let info = registry.device_info(0).unwrap();
    assert_eq!(info.state, DeviceState::Invalidated);
    assert!(info.open_channels.is_empty());
    assert!(registry
        .wait_frame(0, ch, Duration::from_millis(1))
        .unwrap_err()
        .is_not_found());
    assert_eq!(invalidated.load(Ordering::SeqCst), 1);
    // The other card is untouched.
    registry.open_channel(1, &output(ch)).unwrap();

    card.activate_profile(profile);
    let info = registry.device_info(0).unwrap();
    assert_eq!(info.state, DeviceState::Initialized);
    assert_eq!(info.active_profile, profile);
    assert_eq!(info.sub_unit_count, 2);
    assert!(registry
        .available_channels(0, Direction::Output)
        .unwrap()
        .contains(&ch));
    assert_eq!(invalidated.load(Ordering::SeqCst), 1);

    // Subscriptions survive the rebuild.
    card.notify_profile_changing(DuplexProfile::FourSubDevicesHalfDuplex);
    assert_eq!(invalidated.load(Ordering::SeqCst), 2);
    card.activate_profile(DuplexProfile::FourSubDevicesHalfDuplex);
    assert_eq!(registry.device_info(0).unwrap().sub_unit_count, 4);
}

#[test]
#[serial]
fn test_set_active_profile() {
    let _ = env_logger::builder().is_test(true).try_init();
    let (_driver, registry) = default_registry();
    let profile = DuplexProfile::TwoSubDevicesFullDuplex;
    registry.open_channel(1, &input(Channel::SingleLink2)).unwrap();

    registry.set_active_profile(1, profile).unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        registry
            .device_info(1)
            .map(|info| info.state == DeviceState::Initialized && info.active_profile == profile)
            .unwrap_or(false)
    }));

    // Duo 2 full duplex: output on odd connectors, input on even ones.
    assert_eq!(
        registry.available_channels(1, Direction::Output).unwrap(),
        vec![Channel::SingleLink1, Channel::SingleLink3]
    );
    assert_eq!(
        registry.available_channels(1, Direction::Input).unwrap(),
        vec![Channel::SingleLink2, Channel::SingleLink4]
    );

    // Unsupported profile on this card.
    assert!(registry
        .set_active_profile(1, DuplexProfile::OneSubDeviceFullDuplex)
        .is_err());
    // Already active: nothing to do.
    registry.set_active_profile(1, profile).unwrap();
}
