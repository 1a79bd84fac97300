// src/output/publisher.rs
//! Render publisher: pushes the finished frame to the root window and keeps
//! compositors from clearing it.

use log::trace;

use super::surface::SurfaceManager;
use super::{NativeSurface, WindowSystem};

/// Root-window properties through which a background setter advertises its
/// pixmap. Compositors read them at arbitrary times, so both are rewritten on
/// every publication.
pub const IDENTITY_PROPERTIES: [&str; 2] = ["_XROOTPMAP_ID", "ESETROOT_PMAP_ID"];

/// Publishes the current surface. Returns `false` without touching the window
/// system when no surface is allocated.
pub fn publish<S: WindowSystem>(
    system: &mut S,
    surfaces: &mut SurfaceManager<S::Surface>,
) -> bool {
    let Some(surface) = surfaces.current_mut() else {
        trace!("Nothing allocated, skipping publication");
        return false;
    };

    system.put_image(surface);
    system.set_identity(surface.id());
    system.repaint_and_flush();
    trace!("Published surface 0x{:x}", surface.id());
    true
}
