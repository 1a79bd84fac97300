// src/output/surface.rs
//! Native surface manager.
//!
//! Owns at most one `NativeSurface`. A surface is either fully allocated or
//! absent: the window system hands back a complete surface or an error, and
//! releasing drops every member at once.

use anyhow::{bail, Result};
use log::{debug, info, trace};

use super::{DesktopBounds, NativeSurface, RenderDriver, WindowSystem};

#[derive(Debug)]
pub struct SurfaceManager<T: NativeSurface> {
    current: Option<T>,
}

impl<T: NativeSurface> Default for SurfaceManager<T> {
    fn default() -> Self {
        Self { current: None }
    }
}

impl<T: NativeSurface> SurfaceManager<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a surface spanning `bounds` and tells `driver` the new size.
    ///
    /// Any surface still held is released first. On error nothing is held.
    pub fn allocate<S>(
        &mut self,
        system: &mut S,
        bounds: DesktopBounds,
        driver: &mut dyn RenderDriver,
    ) -> Result<()>
    where
        S: WindowSystem<Surface = T>,
    {
        self.release();

        if bounds.is_empty() {
            bail!("Refusing to allocate an empty {} surface", bounds);
        }

        let surface = system.create_surface(bounds)?;
        if surface.pixels().len() != bounds.byte_len() {
            bail!(
                "{} surface has {} bytes of pixel memory, expected {}",
                system.name(),
                surface.pixels().len(),
                bounds.byte_len()
            );
        }

        info!(
            "Allocated {} surface 0x{:x} ({} bytes)",
            bounds,
            surface.id(),
            bounds.byte_len()
        );
        self.current = Some(surface);
        driver.resize_window(bounds);
        Ok(())
    }

    /// Drops the current surface, if any.
    pub fn release(&mut self) {
        match self.current.take() {
            Some(surface) => {
                debug!("Releasing surface 0x{:x}", surface.id());
                drop(surface);
            }
            None => trace!("Surface release requested with nothing allocated"),
        }
    }

    pub fn is_allocated(&self) -> bool {
        self.current.is_some()
    }

    pub fn bounds(&self) -> Option<DesktopBounds> {
        self.current.as_ref().map(|surface| surface.bounds())
    }

    pub fn pixels_mut(&mut self) -> Option<&mut [u8]> {
        self.current.as_mut().map(|surface| surface.pixels_mut())
    }

    pub fn current_mut(&mut self) -> Option<&mut T> {
        self.current.as_mut()
    }
}

impl<T: NativeSurface> Drop for SurfaceManager<T> {
    fn drop(&mut self) {
        self.release();
    }
}
