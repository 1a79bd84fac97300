// src/output/mod.rs
//! Wallpaper output subsystem.
//!
//! Two trait layers split the work, the same way a display driver is split
//! from the manager that drives it:
//! - `WindowSystem`: minimal native primitives (enumerate monitors, create a
//!   surface, put pixels, set root properties, flush). One implementation per
//!   windowing system.
//! - `Output`: the capability set the rest of the program talks to. It is
//!   implemented once, by `WallpaperOutput<S>`, on top of any `WindowSystem`.
//!
//! `RecoveryController` owns a `Box<dyn Output>` and turns windowing-system
//! faults into release/rebuild cycles.

pub mod fault;
pub mod headless;
pub mod publisher;
pub mod recovery;
pub mod surface;
pub mod viewport;
pub mod wallpaper;
pub mod x11;

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;

use anyhow::{Context, Result};
use log::info;

use crate::config::{BackendKind, Config};
pub use fault::{fault_channel, EnumerationError, Fault, FaultInbox, FaultSender, ProtocolError};
pub use headless::{HeadlessControl, HeadlessSystem};
pub use recovery::{OutputState, OutputStats, RecoveryController};
pub use wallpaper::WallpaperOutput;

/// Bytes per pixel of every surface: one packed 32-bit color.
pub const BYTES_PER_PIXEL: usize = 4;

/// A rectangle in root-window coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}+{}+{}", self.width, self.height, self.x, self.y)
    }
}

/// A named monitor region targeted for output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Viewport {
    pub name: String,
    pub rect: Rect,
}

/// Viewports keyed by monitor name.
pub type ViewportMap = BTreeMap<String, Viewport>;

/// Bounding box of the virtual desktop, as reported for the default screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DesktopBounds {
    pub full_width: u32,
    pub full_height: u32,
}

impl DesktopBounds {
    pub fn new(full_width: u32, full_height: u32) -> Self {
        Self {
            full_width,
            full_height,
        }
    }

    /// Size in bytes of a pixel buffer covering the whole desktop.
    pub fn byte_len(&self) -> usize {
        self.full_width as usize * self.full_height as usize * BYTES_PER_PIXEL
    }

    pub fn is_empty(&self) -> bool {
        self.full_width == 0 || self.full_height == 0
    }
}

impl fmt::Display for DesktopBounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.full_width, self.full_height)
    }
}

/// One output as enumerated by the windowing system, before filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorOutput {
    pub name: String,
    pub connected: bool,
    /// Geometry of the CRTC driving this output. `None` when the output is
    /// connected but not currently scanned out.
    pub geometry: Option<Rect>,
}

/// The render driver's side of the contract: it sizes its render targets to
/// whatever the output allocated.
pub trait RenderDriver {
    fn resize_window(&mut self, bounds: DesktopBounds);
}

/// A native pixel surface: off-screen buffer, drawing context, mirrored image
/// and the raw memory behind it, owned as one unit.
///
/// Dropping the value releases every member.
pub trait NativeSurface {
    /// Identifier advertised to compositors (the off-screen buffer's id).
    fn id(&self) -> u64;
    fn bounds(&self) -> DesktopBounds;
    fn pixels(&self) -> &[u8];
    fn pixels_mut(&mut self) -> &mut [u8];
}

/// Minimal windowing-system primitives used by `WallpaperOutput`.
pub trait WindowSystem {
    type Surface: NativeSurface;

    fn name(&self) -> &'static str;

    /// Dimensions of the default screen's root window.
    fn screen_bounds(&self) -> DesktopBounds;

    /// Lists every output the windowing system knows about.
    fn enumerate_monitors(&mut self) -> Result<Vec<MonitorOutput>, EnumerationError>;

    /// Creates a surface covering `bounds`, pre-filled with black and set as
    /// the root background.
    fn create_surface(&mut self, bounds: DesktopBounds) -> Result<Self::Surface>;

    /// Copies the surface's mirrored image into its off-screen buffer.
    fn put_image(&mut self, surface: &mut Self::Surface);

    /// Writes the surface-identity properties on the root window.
    fn set_identity(&mut self, surface_id: u64);

    /// Repaints the root window and flushes pending requests.
    fn repaint_and_flush(&mut self);

    /// Drains native events, translating the interesting ones into faults.
    fn pump_events(&mut self) -> Vec<Fault>;

    /// Marks the connection unusable; later releases skip server round trips.
    fn mark_connection_lost(&mut self);

    /// Drops the current connection and opens a new one.
    fn reconnect(&mut self) -> Result<()>;

    /// Hands a protocol error to whatever reporter was installed before us.
    fn forward_protocol_error(&mut self, error: &ProtocolError);

    /// Closes the connection for good and uninstalls anything registered
    /// process-wide. Later calls do nothing.
    fn close(&mut self);
}

/// Capability set of a wallpaper output backend.
pub trait Output {
    fn backend_name(&self) -> &'static str;

    /// Resolves viewports, then allocates a surface for the desktop bounds
    /// and tells `driver` about the new size.
    fn load_screen_info(&mut self, driver: &mut dyn RenderDriver) -> Result<()>;

    /// Releases everything, then loads screen info again.
    fn reset(&mut self, driver: &mut dyn RenderDriver) -> Result<()> {
        self.free();
        self.load_screen_info(driver)
    }

    /// Releases the surface set. Safe to call repeatedly.
    fn free(&mut self);

    fn image_buffer(&mut self) -> Option<&mut [u8]>;

    /// The image buffer together with the viewports to draw into it.
    fn frame_target(&mut self) -> Option<(&mut [u8], &ViewportMap)>;

    fn render_vflip(&self) -> bool;
    fn render_multiple(&self) -> bool;
    fn have_image_buffer(&self) -> bool;

    /// Publishes the current image buffer as the desktop background.
    /// Returns `false` when there was nothing to publish.
    fn update_render(&mut self) -> bool;

    fn viewports(&self) -> &ViewportMap;
    fn bounds(&self) -> Option<DesktopBounds>;

    fn pump_events(&mut self) -> Vec<Fault>;
    fn mark_connection_lost(&mut self);
    fn reconnect(&mut self) -> Result<()>;
    fn forward_protocol_error(&mut self, error: &ProtocolError);

    /// Releases the surface set and closes the windowing-system connection.
    fn close(&mut self);
}

/// Builds the output backend selected by `config`.
///
/// Faults raised by native callbacks are posted through `faults`.
pub fn create_output(config: &Config, faults: FaultSender) -> Result<Box<dyn Output>> {
    let screens: BTreeSet<String> = config.screen_set();
    match config.backend {
        BackendKind::X11 => {
            info!("Creating X11 output (display {:?})", config.display);
            let system = x11::X11System::open(config.display.as_deref(), faults)
                .context("Failed to open X11 output")?;
            Ok(Box::new(WallpaperOutput::new(system, screens)))
        }
        BackendKind::Headless => {
            info!("Creating headless output {}", config.headless_size);
            let (system, _control) = HeadlessSystem::new(config.headless_size.into());
            Ok(Box::new(WallpaperOutput::new(system, screens)))
        }
    }
}
