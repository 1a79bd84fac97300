// tests/render_loop.rs

//! End-to-end: pattern renderer drawing into a headless wallpaper output.

use std::collections::BTreeSet;
use std::time::Duration;

use backdrop::config::Config;
use backdrop::output::{
    create_output, fault_channel, DesktopBounds, Fault, HeadlessSystem, MonitorOutput,
    OutputState, RecoveryController, Rect, WallpaperOutput,
};
use backdrop::renderer::PatternRenderer;
use test_log::test;

fn frame(controller: &mut RecoveryController, renderer: &mut PatternRenderer) {
    let vflip = controller.render_vflip();
    let composite = controller.render_multiple();
    if let Some((buffer, viewports)) = controller.frame_target() {
        renderer.draw(buffer, viewports, composite, vflip);
    }
    controller.update_render(renderer);
}

#[test]
fn headless_backend_from_config_publishes_frames() {
    let config = Config::from_json(
        r#"{ "backend": "headless", "headless_size": { "width": 64, "height": 32 } }"#,
    )
    .unwrap();
    let (faults, inbox) = fault_channel();
    let output = create_output(&config, faults).unwrap();
    let mut renderer = PatternRenderer::new();
    let mut controller =
        RecoveryController::new(output, inbox, config.recovery_retry(), &mut renderer);

    assert_eq!(controller.backend_name(), "headless");
    assert_eq!(renderer.bounds(), DesktopBounds::new(64, 32));

    for _ in 0..3 {
        frame(&mut controller, &mut renderer);
    }

    assert_eq!(renderer.frame(), 3);
    assert_eq!(controller.stats().frames_published, 3);
    assert!(controller
        .image_buffer()
        .map(|b| b.iter().any(|byte| *byte != 0))
        .unwrap_or(false));
}

#[test]
fn renderer_follows_the_desktop_through_a_topology_change() {
    let (system, control) = HeadlessSystem::new(DesktopBounds::new(200, 100));
    control.set_monitors(vec![
        MonitorOutput {
            name: "left".into(),
            connected: true,
            geometry: Some(Rect::new(0, 0, 100, 100)),
        },
        MonitorOutput {
            name: "right".into(),
            connected: true,
            geometry: Some(Rect::new(100, 0, 100, 100)),
        },
    ]);
    let screens: BTreeSet<String> = ["left", "right"].iter().map(|s| s.to_string()).collect();
    let (_faults, inbox) = fault_channel();
    let mut renderer = PatternRenderer::new();
    let mut controller = RecoveryController::new(
        Box::new(WallpaperOutput::new(system, screens)),
        inbox,
        Duration::ZERO,
        &mut renderer,
    );

    frame(&mut controller, &mut renderer);
    assert!(controller.render_multiple());
    assert_eq!(renderer.targets(controller.viewports(), true).len(), 2);

    control.set_screen_bounds(DesktopBounds::new(100, 100));
    control.set_monitors(vec![MonitorOutput {
        name: "left".into(),
        connected: true,
        geometry: Some(Rect::new(0, 0, 100, 100)),
    }]);
    control.push_event(Fault::TopologyChanged);

    frame(&mut controller, &mut renderer);
    assert_eq!(controller.state(), OutputState::Healthy);
    assert_eq!(renderer.bounds(), DesktopBounds::new(100, 100));
    assert!(!controller.render_multiple());

    frame(&mut controller, &mut renderer);
    assert_eq!(controller.stats().frames_published, 3);
    assert_eq!(control.live_surfaces(), 1);
}
