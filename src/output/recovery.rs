// src/output/recovery.rs
//! Fault recovery controller.
//!
//! Owns the `Output` and is the only path to it, so nothing else can hold on
//! to a surface across a rebuild. Native callbacks never run recovery logic
//! themselves; they post a `Fault` into the inbox and the controller drains it
//! before and after each publication.
//!
//! ```text
//!   Healthy --protocol error--> Degraded --forwarded + logged--> Healthy
//!   Healthy --fatal fault-----> Recovering --rebuild ok--------> Healthy
//!   any ------shutdown--------> ShutDown
//! ```

use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use super::{
    DesktopBounds, Fault, FaultInbox, Output, ProtocolError, RenderDriver, ViewportMap,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputState {
    Healthy,
    /// A protocol error is being reported; output continues.
    Degraded,
    /// Resources are released and waiting to be rebuilt.
    Recovering,
    ShutDown,
}

/// How much has to be rebuilt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Rebuild {
    /// Connection intact, resources and viewports stale.
    Reinitialize,
    /// Connection dead, reopen it first.
    Reconnect,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputStats {
    pub frames_published: u64,
    pub protocol_errors: u64,
    pub recoveries: u64,
    pub failed_rebuilds: u64,
}

type ProtocolErrorHook = Box<dyn FnMut(&ProtocolError)>;

pub struct RecoveryController {
    output: Box<dyn Output>,
    inbox: FaultInbox,
    state: OutputState,
    pending: Option<Rebuild>,
    retry_interval: Duration,
    last_attempt: Option<Instant>,
    hook: Option<ProtocolErrorHook>,
    stats: OutputStats,
    initialized: bool,
}

impl RecoveryController {
    /// Takes ownership of `output` and runs the initial screen load.
    ///
    /// A failed initial load does not fail construction; the controller
    /// starts in `Recovering` and retries on later frames.
    pub fn new(
        output: Box<dyn Output>,
        inbox: FaultInbox,
        retry_interval: Duration,
        driver: &mut dyn RenderDriver,
    ) -> Self {
        let mut controller = Self {
            output,
            inbox,
            state: OutputState::Recovering,
            pending: Some(Rebuild::Reinitialize),
            retry_interval,
            last_attempt: None,
            hook: None,
            stats: OutputStats::default(),
            initialized: false,
        };
        controller.rebuild(driver);
        controller
    }

    pub fn state(&self) -> OutputState {
        self.state
    }

    pub fn stats(&self) -> OutputStats {
        self.stats
    }

    pub fn backend_name(&self) -> &'static str {
        self.output.backend_name()
    }

    /// Installs a diagnostic hook that sees every protocol error.
    pub fn set_protocol_error_hook<F>(&mut self, hook: F)
    where
        F: FnMut(&ProtocolError) + 'static,
    {
        self.hook = Some(Box::new(hook));
    }

    /// Pixel memory of the current surface, or `None` while recovering.
    pub fn image_buffer(&mut self) -> Option<&mut [u8]> {
        if self.state != OutputState::Healthy {
            return None;
        }
        self.output.image_buffer()
    }

    /// Pixel memory plus the viewports to draw into it, or `None` while
    /// recovering.
    pub fn frame_target(&mut self) -> Option<(&mut [u8], &ViewportMap)> {
        if self.state != OutputState::Healthy {
            return None;
        }
        self.output.frame_target()
    }

    pub fn have_image_buffer(&self) -> bool {
        self.state == OutputState::Healthy && self.output.have_image_buffer()
    }

    pub fn render_vflip(&self) -> bool {
        self.output.render_vflip()
    }

    pub fn render_multiple(&self) -> bool {
        self.output.render_multiple()
    }

    pub fn viewports(&self) -> &ViewportMap {
        self.output.viewports()
    }

    pub fn bounds(&self) -> Option<DesktopBounds> {
        self.output.bounds()
    }

    /// Publishes one frame, handling any faults raised before or during it.
    pub fn update_render(&mut self, driver: &mut dyn RenderDriver) {
        self.process_faults(driver);
        if self.state == OutputState::Healthy && self.output.update_render() {
            self.stats.frames_published += 1;
        }
        self.process_faults(driver);
    }

    /// Forces an immediate release and rebuild.
    pub fn reset(&mut self, driver: &mut dyn RenderDriver) {
        if self.state == OutputState::ShutDown {
            warn!("Reset requested after shutdown; ignoring");
            return;
        }
        info!("Reset requested");
        self.enter_recovering(Rebuild::Reinitialize);
        self.last_attempt = None;
        self.rebuild(driver);
    }

    /// Drains pending faults and advances the state machine.
    pub fn process_faults(&mut self, driver: &mut dyn RenderDriver) {
        if self.state == OutputState::ShutDown {
            return;
        }

        let mut faults = self.output.pump_events();
        faults.extend(self.inbox.drain());

        for fault in faults {
            match fault {
                Fault::Protocol(err) => self.on_protocol_error(err),
                Fault::ConnectionLost => {
                    error!("Fatal windowing-system fault: {}", Fault::ConnectionLost);
                    self.output.mark_connection_lost();
                    self.enter_recovering(Rebuild::Reconnect);
                }
                Fault::TopologyChanged => {
                    info!("Screen topology changed, rebuilding output");
                    self.enter_recovering(Rebuild::Reinitialize);
                }
            }
        }

        if self.state == OutputState::Recovering && self.retry_due() {
            self.rebuild(driver);
        }
    }

    /// Releases the surface set once, closes the connection and moves to
    /// `ShutDown`. Later calls do nothing.
    pub fn shutdown(&mut self) {
        if self.state == OutputState::ShutDown {
            return;
        }
        self.output.free();
        self.output.close();
        self.state = OutputState::ShutDown;
        self.pending = None;
        info!(
            "Output shut down: {} frames, {} protocol errors, {} recoveries, {} failed rebuilds",
            self.stats.frames_published,
            self.stats.protocol_errors,
            self.stats.recoveries,
            self.stats.failed_rebuilds
        );
    }

    fn on_protocol_error(&mut self, err: ProtocolError) {
        self.stats.protocol_errors += 1;
        let resume = self.state;
        if resume == OutputState::Healthy {
            self.state = OutputState::Degraded;
        }

        warn!("Windowing-system protocol error: {}", err);
        self.output.forward_protocol_error(&err);
        if let Some(hook) = self.hook.as_mut() {
            hook(&err);
        }

        if self.state == OutputState::Degraded {
            self.state = resume;
        }
    }

    fn enter_recovering(&mut self, rebuild: Rebuild) {
        if self.state != OutputState::Recovering {
            debug!("Releasing output resources for {:?}", rebuild);
            self.output.free();
            self.state = OutputState::Recovering;
        }
        self.pending = self.pending.max(Some(rebuild));
    }

    fn retry_due(&self) -> bool {
        match self.last_attempt {
            Some(at) => at.elapsed() >= self.retry_interval,
            None => true,
        }
    }

    fn rebuild(&mut self, driver: &mut dyn RenderDriver) {
        let Some(rebuild) = self.pending else {
            return;
        };
        self.last_attempt = Some(Instant::now());

        if rebuild == Rebuild::Reconnect {
            if let Err(e) = self.output.reconnect() {
                self.stats.failed_rebuilds += 1;
                error!("Reconnecting to the windowing system failed: {:#}", e);
                return;
            }
            // Fatal faults queued so far are covered by this rebuild.
            // Protocol errors are still reported.
            for fault in self.inbox.drain() {
                match fault {
                    Fault::Protocol(err) => self.on_protocol_error(err),
                    fatal => debug!("Already rebuilding; dropping {}", fatal),
                }
            }
            self.pending = Some(Rebuild::Reinitialize);
        }

        match self.output.load_screen_info(driver) {
            Ok(()) => {
                self.pending = None;
                self.last_attempt = None;
                self.state = OutputState::Healthy;
                if self.initialized {
                    self.stats.recoveries += 1;
                }
                self.initialized = true;
                info!(
                    "{} output ready: {} viewport(s)",
                    self.output.backend_name(),
                    self.output.viewports().len()
                );
            }
            Err(e) => {
                self.stats.failed_rebuilds += 1;
                self.output.free();
                error!(
                    "Rebuilding output failed, retrying in {:?}: {:#}",
                    self.retry_interval, e
                );
            }
        }
    }
}

impl Drop for RecoveryController {
    fn drop(&mut self) {
        self.shutdown();
    }
}
