// tests/recovery.rs

//! Drives `RecoveryController` over a scripted headless window system.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;
use std::time::Duration;

use backdrop::output::{
    fault_channel, DesktopBounds, EnumerationError, Fault, FaultSender, HeadlessControl,
    HeadlessSystem, MonitorOutput, OutputState, ProtocolError, RecoveryController, Rect,
    RenderDriver, WallpaperOutput,
};
use test_log::test;

#[derive(Default)]
struct RecordingDriver {
    resizes: Vec<DesktopBounds>,
}

impl RenderDriver for RecordingDriver {
    fn resize_window(&mut self, bounds: DesktopBounds) {
        self.resizes.push(bounds);
    }
}

struct Harness {
    controller: RecoveryController,
    control: HeadlessControl,
    faults: FaultSender,
    driver: RecordingDriver,
}

fn monitor(name: &str, rect: Rect) -> MonitorOutput {
    MonitorOutput {
        name: name.to_string(),
        connected: true,
        geometry: Some(rect),
    }
}

fn two_monitors() -> Vec<MonitorOutput> {
    vec![
        monitor("DP-1", Rect::new(0, 0, 1920, 1080)),
        monitor("HDMI-1", Rect::new(1920, 0, 1920, 1080)),
    ]
}

fn harness_with(
    screens: &[&str],
    retry: Duration,
    script: impl FnOnce(&HeadlessControl),
) -> Harness {
    let (system, control) = HeadlessSystem::new(DesktopBounds::new(3840, 1080));
    control.set_monitors(two_monitors());
    script(&control);

    let screens: BTreeSet<String> = screens.iter().map(|s| s.to_string()).collect();
    let output = Box::new(WallpaperOutput::new(system, screens));
    let (faults, inbox) = fault_channel();
    let mut driver = RecordingDriver::default();
    let controller = RecoveryController::new(output, inbox, retry, &mut driver);

    Harness {
        controller,
        control,
        faults,
        driver,
    }
}

fn harness(screens: &[&str]) -> Harness {
    harness_with(screens, Duration::ZERO, |_| {})
}

fn bad_drawable() -> ProtocolError {
    ProtocolError {
        error_code: 9,
        request_code: 62,
        minor_code: 0,
        resource_id: 0x40_0001,
        serial: 11,
        description: "BadDrawable (invalid Pixmap or Window parameter)".to_string(),
    }
}

#[test]
fn scenario_a_only_configured_monitor_is_resolved() {
    let h = harness(&["DP-1"]);

    assert_eq!(h.controller.state(), OutputState::Healthy);
    let viewports = h.controller.viewports();
    assert_eq!(viewports.len(), 1);
    assert_eq!(viewports["DP-1"].rect, Rect::new(0, 0, 1920, 1080));
    assert_eq!(h.controller.bounds(), Some(DesktopBounds::new(3840, 1080)));
    assert!(!h.controller.render_multiple());
    assert_eq!(h.driver.resizes, vec![DesktopBounds::new(3840, 1080)]);
}

#[test]
fn bounds_do_not_depend_on_configured_viewports() {
    for screens in [&[][..], &["DP-1"][..], &["DP-1", "HDMI-1"][..]] {
        let h = harness(screens);
        assert_eq!(h.controller.bounds(), Some(DesktopBounds::new(3840, 1080)));
    }
}

#[test]
fn scenario_b_enumeration_unavailable_still_reaches_healthy() {
    let mut h = harness_with(&["DP-1", "HDMI-1"], Duration::ZERO, |control| {
        control.set_enumeration_error(EnumerationError::Unavailable);
    });

    assert_eq!(h.controller.state(), OutputState::Healthy);
    assert!(h.controller.viewports().is_empty());
    assert!(!h.controller.render_multiple());
    assert!(h.controller.have_image_buffer());
    assert_eq!(
        h.controller.image_buffer().map(|b| b.len()),
        Some(3840 * 1080 * 4)
    );
}

#[test]
fn no_matching_monitor_falls_back_to_full_desktop() {
    let h = harness(&["eDP-1"]);
    assert_eq!(h.controller.state(), OutputState::Healthy);
    assert!(h.controller.viewports().is_empty());
    assert!(h.controller.have_image_buffer());
}

#[test]
fn scenario_c_fatal_fault_rebuilds_identical_viewports() {
    let mut h = harness(&["DP-1", "HDMI-1"]);
    assert!(h.controller.render_multiple());
    let before = h.controller.viewports().clone();

    assert!(h.faults.post(Fault::ConnectionLost));
    h.controller.update_render(&mut h.driver);

    assert_eq!(h.controller.state(), OutputState::Healthy);
    assert_eq!(h.controller.viewports(), &before);
    assert_eq!(h.control.reconnects(), 1);
    assert_eq!(h.control.live_surfaces(), 1);
    assert_eq!(h.control.surfaces_created(), 2);
    assert_eq!(h.controller.stats().recoveries, 1);
    assert_eq!(h.driver.resizes.len(), 2);
}

#[test]
fn scenario_d_update_before_allocation_writes_nothing() {
    let mut h = harness_with(&["DP-1"], Duration::from_secs(3600), |control| {
        control.fail_next_surface();
    });

    assert_eq!(h.controller.state(), OutputState::Recovering);
    assert!(!h.controller.have_image_buffer());
    assert!(h.controller.image_buffer().is_none());

    h.controller.update_render(&mut h.driver);

    assert_eq!(h.control.property_writes(), 0);
    assert_eq!(h.control.presented_frames(), 0);
    assert_eq!(h.controller.stats().frames_published, 0);
}

#[test]
fn publication_advertises_current_surface() {
    let mut h = harness(&["DP-1"]);
    h.controller.update_render(&mut h.driver);
    let first = h.control.last_presented().unwrap();
    assert_eq!(h.control.property("_XROOTPMAP_ID"), Some(first));
    assert_eq!(h.control.property("ESETROOT_PMAP_ID"), Some(first));

    h.controller.reset(&mut h.driver);
    h.controller.update_render(&mut h.driver);
    let second = h.control.last_presented().unwrap();
    assert_ne!(first, second);
    assert_eq!(h.control.property("_XROOTPMAP_ID"), Some(second));
    assert_eq!(h.control.property("ESETROOT_PMAP_ID"), Some(second));
    assert_eq!(h.control.property_writes(), 4);
}

#[test]
fn repeated_resets_never_leak_surfaces() {
    let mut h = harness(&["DP-1"]);
    for round in 1..=10u64 {
        h.controller.reset(&mut h.driver);
        assert_eq!(h.control.live_surfaces(), 1);
        assert_eq!(h.control.surfaces_created(), round + 1);
        assert!(h.controller.have_image_buffer());
    }
    h.controller.shutdown();
    h.controller.shutdown();
    assert_eq!(h.controller.state(), OutputState::ShutDown);
    assert_eq!(h.control.live_surfaces(), 0);
}

#[test]
fn protocol_error_is_forwarded_without_touching_resources() {
    let mut h = harness(&["DP-1"]);
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    h.controller
        .set_protocol_error_hook(move |err| sink.borrow_mut().push(err.clone()));

    h.faults.post(Fault::Protocol(bad_drawable()));
    h.controller.update_render(&mut h.driver);

    assert_eq!(h.controller.state(), OutputState::Healthy);
    assert_eq!(h.control.forwarded_errors(), vec![bad_drawable()]);
    assert_eq!(*seen.borrow(), vec![bad_drawable()]);
    assert_eq!(h.control.surfaces_created(), 1);
    assert_eq!(h.controller.stats().protocol_errors, 1);
    assert_eq!(h.controller.stats().frames_published, 1);
}

#[test]
fn topology_change_picks_up_new_layout_without_reconnecting() {
    let mut h = harness(&["DP-1", "HDMI-1"]);
    h.control.set_monitors(vec![monitor("DP-1", Rect::new(0, 0, 2560, 1440))]);
    h.control.set_screen_bounds(DesktopBounds::new(2560, 1440));
    h.control.push_event(Fault::TopologyChanged);

    h.controller.update_render(&mut h.driver);

    assert_eq!(h.controller.state(), OutputState::Healthy);
    assert_eq!(h.control.reconnects(), 0);
    assert_eq!(h.controller.viewports().len(), 1);
    assert_eq!(h.controller.bounds(), Some(DesktopBounds::new(2560, 1440)));
    assert_eq!(h.driver.resizes.last(), Some(&DesktopBounds::new(2560, 1440)));
}

#[test]
fn failed_reconnect_waits_for_retry_interval() {
    let mut h = harness_with(&["DP-1"], Duration::from_secs(3600), |_| {});
    h.control.fail_reconnects(1);
    h.faults.post(Fault::ConnectionLost);

    h.controller.update_render(&mut h.driver);
    assert_eq!(h.controller.state(), OutputState::Recovering);
    assert!(h.control.is_connection_lost());
    assert_eq!(h.control.live_surfaces(), 0);
    assert_eq!(h.controller.stats().failed_rebuilds, 1);

    // Retry interval not elapsed: nothing happens.
    h.controller.update_render(&mut h.driver);
    assert_eq!(h.controller.state(), OutputState::Recovering);
    assert_eq!(h.control.reconnects(), 0);

    // An explicit reset does not wait.
    h.controller.reset(&mut h.driver);
    assert_eq!(h.controller.state(), OutputState::Healthy);
    assert_eq!(h.control.reconnects(), 1);
    assert!(!h.control.is_connection_lost());
}

#[test]
fn faults_raised_mid_frame_are_handled_on_next_update() {
    let mut h = harness(&["DP-1"]);
    h.controller.update_render(&mut h.driver);
    let first = h.control.last_presented();

    // A fault posted while the renderer holds the buffer is only acted on
    // once the buffer borrow has ended.
    if let Some(buffer) = h.controller.image_buffer() {
        buffer[0] = 0xff;
        h.faults.post(Fault::ConnectionLost);
    }
    h.controller.update_render(&mut h.driver);

    assert_eq!(h.control.presented_frames(), 2);
    assert_ne!(h.control.last_presented(), first);
    assert_eq!(h.controller.state(), OutputState::Healthy);
    assert_eq!(h.control.reconnects(), 1);
    assert_eq!(
        h.controller.image_buffer().map(|b| b[0]),
        Some(0),
        "rebuilt surface starts black"
    );
}

#[test]
fn several_fatal_faults_in_one_batch_rebuild_once() {
    let mut h = harness(&["DP-1"]);
    h.faults.post(Fault::TopologyChanged);
    h.faults.post(Fault::ConnectionLost);
    h.faults.post(Fault::TopologyChanged);

    h.controller.update_render(&mut h.driver);

    assert_eq!(h.control.reconnects(), 1);
    assert_eq!(h.control.surfaces_created(), 2);
    assert_eq!(h.controller.stats().recoveries, 1);
}

#[test]
fn reset_after_shutdown_is_ignored() {
    let mut h = harness(&["DP-1"]);
    h.controller.shutdown();
    h.controller.reset(&mut h.driver);
    h.controller.update_render(&mut h.driver);

    assert_eq!(h.controller.state(), OutputState::ShutDown);
    assert_eq!(h.control.live_surfaces(), 0);
    assert_eq!(h.control.surfaces_created(), 1);
}

#[test]
fn protocol_error_queued_during_recovery_is_still_reported() {
    let mut h = harness_with(&["DP-1"], Duration::from_secs(3600), |_| {});
    let hook_calls = Rc::new(RefCell::new(0u32));
    let counter = Rc::clone(&hook_calls);
    h.controller
        .set_protocol_error_hook(move |_| *counter.borrow_mut() += 1);

    h.control.fail_reconnects(1);
    h.faults.post(Fault::ConnectionLost);
    h.controller.update_render(&mut h.driver);
    assert_eq!(h.controller.state(), OutputState::Recovering);

    h.faults.post(Fault::Protocol(bad_drawable()));
    h.faults.post(Fault::ConnectionLost);
    h.controller.reset(&mut h.driver);
    h.controller.update_render(&mut h.driver);

    assert_eq!(h.controller.state(), OutputState::Healthy);
    assert_eq!(*hook_calls.borrow(), 1);
    assert_eq!(h.controller.stats().protocol_errors, 1);
    assert_eq!(h.control.forwarded_errors(), vec![bad_drawable()]);
    // The queued ConnectionLost was covered by the reconnect that just ran.
    assert_eq!(h.control.reconnects(), 1);
}

#[test]
fn shutdown_closes_the_connection() {
    let mut h = harness(&["DP-1"]);
    assert!(!h.control.is_closed());

    h.controller.shutdown();

    assert!(h.control.is_closed());
    assert_eq!(h.control.live_surfaces(), 0);

    // A closed connection cannot be revived by later faults.
    h.faults.post(Fault::ConnectionLost);
    h.controller.update_render(&mut h.driver);
    assert_eq!(h.control.reconnects(), 0);
    assert_eq!(h.controller.state(), OutputState::ShutDown);
}

#[test]
fn frame_target_pairs_buffer_with_viewports() {
    let mut h = harness_with(&["DP-1", "HDMI-1"], Duration::from_secs(3600), |_| {});
    let expected = h.controller.viewports().clone();

    let (buffer, viewports) = h.controller.frame_target().unwrap();
    assert_eq!(buffer.len(), 3840 * 1080 * 4);
    assert_eq!(viewports, &expected);

    h.faults.post(Fault::TopologyChanged);
    h.control.fail_next_surface();
    h.controller.update_render(&mut h.driver);
    assert_eq!(h.controller.state(), OutputState::Recovering);
    assert!(h.controller.frame_target().is_none());
}
