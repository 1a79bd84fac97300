// src/main.rs

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use anyhow::{Context, Result};
use libc::c_int;
use log::{info, warn};
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

use backdrop::config::{Config, USAGE};
use backdrop::output::{create_output, fault_channel, RecoveryController};
use backdrop::renderer::PatternRenderer;
use backdrop::scheduler::FrameScheduler;

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn request_shutdown(_signal: c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

fn install_signal_handlers() -> Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(request_shutdown),
        SaFlags::empty(),
        SigSet::empty(),
    );
    for signal in [Signal::SIGINT, Signal::SIGTERM] {
        // SAFETY: the handler only stores to an atomic.
        unsafe { sigaction(signal, &action) }
            .with_context(|| format!("Failed to install {} handler", signal))?;
    }
    Ok(())
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        println!("{}", USAGE);
        return Ok(());
    }

    let config = Config::load(&args)?;

    // Default filter is "info" (or the configured one) if RUST_LOG is not set.
    let default_filter = config.log_filter.clone().unwrap_or_else(|| "info".to_string());
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp_micros()
        .init();

    info!("Starting backdrop...");
    info!(
        "Configuration: backend={:?} screens={:?} target_fps={} max_frames={:?}",
        config.backend, config.screens, config.target_fps, config.max_frames
    );
    if config.screens.is_empty() {
        warn!("No screens configured; the wallpaper covers the whole desktop");
    }

    install_signal_handlers()?;

    let (faults, inbox) = fault_channel();
    let output = create_output(&config, faults)?;
    let mut renderer = PatternRenderer::new();
    let mut controller =
        RecoveryController::new(output, inbox, config.recovery_retry(), &mut renderer);
    let scheduler = FrameScheduler::new(config.target_fps);

    info!(
        "Render loop started on {} output, frame budget {:?}",
        controller.backend_name(),
        scheduler.frame_budget()
    );

    let mut frame: u64 = 0;
    while !SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
        if let Some(max) = config.max_frames {
            if frame >= max {
                info!("Reached max_frames={}, exiting loop", max);
                break;
            }
        }

        let frame_start = Instant::now();
        let vflip = controller.render_vflip();
        let composite = controller.render_multiple();
        if let Some((buffer, viewports)) = controller.frame_target() {
            renderer.draw(buffer, viewports, composite, vflip);
        }
        controller.update_render(&mut renderer);

        if frame % 300 == 0 {
            info!("frame={} state={:?}", frame, controller.state());
        }
        frame += 1;
        scheduler.wait(frame_start);
    }

    if SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
        info!("Shutdown requested by signal");
    }
    controller.shutdown();
    info!("backdrop exited cleanly. Stats: {:?}", controller.stats());
    Ok(())
}
