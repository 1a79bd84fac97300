// src/output/wallpaper.rs
//! `WallpaperOutput`: the `Output` capability set on top of any `WindowSystem`.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use log::{debug, info};

use super::publisher;
use super::surface::SurfaceManager;
use super::viewport::{self, ScreenLayout};
use super::{
    DesktopBounds, Fault, Output, ProtocolError, RenderDriver, ViewportMap, WindowSystem,
};

pub struct WallpaperOutput<S: WindowSystem> {
    screens: BTreeSet<String>,
    layout: ScreenLayout,
    // Declared before `system` so surfaces are released before the
    // connection they belong to.
    surfaces: SurfaceManager<S::Surface>,
    system: S,
}

impl<S: WindowSystem> WallpaperOutput<S> {
    /// Wraps `system`. Nothing is resolved or allocated until
    /// `load_screen_info` runs.
    pub fn new(system: S, screens: BTreeSet<String>) -> Self {
        Self {
            screens,
            layout: ScreenLayout::default(),
            surfaces: SurfaceManager::new(),
            system,
        }
    }

    pub fn layout(&self) -> &ScreenLayout {
        &self.layout
    }
}

impl<S: WindowSystem> Output for WallpaperOutput<S> {
    fn backend_name(&self) -> &'static str {
        self.system.name()
    }

    fn load_screen_info(&mut self, driver: &mut dyn RenderDriver) -> Result<()> {
        self.surfaces.release();
        self.layout = viewport::resolve(&mut self.system, &self.screens);
        info!(
            "{}: {} viewport(s) on a {} desktop",
            self.system.name(),
            self.layout.viewports.len(),
            self.layout.bounds
        );

        let bounds = self.layout.bounds;
        self.surfaces
            .allocate(&mut self.system, bounds, driver)
            .with_context(|| format!("Failed to allocate a {} wallpaper surface", bounds))
    }

    fn free(&mut self) {
        debug!("{}: releasing surface set", self.system.name());
        self.surfaces.release();
    }

    fn image_buffer(&mut self) -> Option<&mut [u8]> {
        self.surfaces.pixels_mut()
    }

    fn frame_target(&mut self) -> Option<(&mut [u8], &ViewportMap)> {
        let viewports = &self.layout.viewports;
        self.surfaces.pixels_mut().map(|pixels| (pixels, viewports))
    }

    fn render_vflip(&self) -> bool {
        false
    }

    fn render_multiple(&self) -> bool {
        self.layout.is_multiple()
    }

    fn have_image_buffer(&self) -> bool {
        self.surfaces.is_allocated()
    }

    fn update_render(&mut self) -> bool {
        publisher::publish(&mut self.system, &mut self.surfaces)
    }

    fn viewports(&self) -> &ViewportMap {
        &self.layout.viewports
    }

    fn bounds(&self) -> Option<DesktopBounds> {
        self.surfaces.bounds()
    }

    fn pump_events(&mut self) -> Vec<Fault> {
        self.system.pump_events()
    }

    fn mark_connection_lost(&mut self) {
        self.system.mark_connection_lost();
    }

    fn reconnect(&mut self) -> Result<()> {
        self.surfaces.release();
        self.system.reconnect()
    }

    fn forward_protocol_error(&mut self, error: &ProtocolError) {
        self.system.forward_protocol_error(error);
    }

    fn close(&mut self) {
        self.surfaces.release();
        self.system.close();
    }
}
