// src/output/x11/resources.rs
#![allow(non_snake_case)] // Allow non-snake case for X11 types

//! RAII wrappers for the X11 resources that make up a wallpaper surface.

use std::ptr;
use std::rc::Rc;

use anyhow::{anyhow, Result};
use log::{debug, trace};
use x11::{xlib, xrandr};

use super::connection::{Connection, ManagedDisplay};
use crate::output::{DesktopBounds, NativeSurface};

/// Depth of the wallpaper pixmap and image: 24-bit color packed in 32 bits.
const SURFACE_DEPTH: u32 = 24;
const BITMAP_PAD: i32 = 32;

/// Off-screen pixmap, freed with `XFreePixmap`.
#[derive(Debug)]
pub struct SafePixmap {
    id: xlib::Pixmap,
    display: Rc<ManagedDisplay>,
}

impl SafePixmap {
    fn create(connection: &Connection, bounds: DesktopBounds) -> Result<Self> {
        let id = unsafe {
            xlib::XCreatePixmap(
                connection.display(),
                connection.root(),
                bounds.full_width,
                bounds.full_height,
                SURFACE_DEPTH,
            )
        };
        if id == 0 {
            return Err(anyhow!("XCreatePixmap failed for {}", bounds));
        }
        Ok(Self {
            id,
            display: connection.shared_display(),
        })
    }

    #[inline]
    pub fn id(&self) -> xlib::Pixmap {
        self.id
    }
}

impl Drop for SafePixmap {
    fn drop(&mut self) {
        if self.display.is_lost() {
            trace!("Connection lost, not freeing pixmap 0x{:x}", self.id);
            return;
        }
        trace!("Freeing pixmap 0x{:x}", self.id);
        unsafe { xlib::XFreePixmap(self.display.raw(), self.id) };
    }
}

/// Graphics context, freed with `XFreeGC`.
#[derive(Debug)]
pub struct SafeGc {
    gc: xlib::GC,
    display: Rc<ManagedDisplay>,
}

impl SafeGc {
    fn create(connection: &Connection, drawable: xlib::Drawable) -> Result<Self> {
        let gc = unsafe { xlib::XCreateGC(connection.display(), drawable, 0, ptr::null_mut()) };
        if gc.is_null() {
            return Err(anyhow!("XCreateGC failed for drawable 0x{:x}", drawable));
        }
        Ok(Self {
            gc,
            display: connection.shared_display(),
        })
    }

    #[inline]
    pub fn raw(&self) -> xlib::GC {
        self.gc
    }
}

impl Drop for SafeGc {
    fn drop(&mut self) {
        // XFreeGC also releases the client-side structure, so it runs even on
        // a lost connection; Xlib drops the request itself.
        trace!("Freeing GC {:p}", self.gc);
        unsafe { xlib::XFreeGC(self.display.raw(), self.gc) };
    }
}

/// Client-side `XImage` whose pixel data is borrowed from a `Box<[u8]>` kept
/// alongside it.
#[derive(Debug)]
pub struct SafeImage {
    ptr: *mut xlib::XImage,
}

impl SafeImage {
    /// # Safety
    ///
    /// `memory` must hold `bounds.byte_len()` bytes and must outlive the image.
    unsafe fn create(
        connection: &Connection,
        memory: &mut [u8],
        bounds: DesktopBounds,
    ) -> Result<Self> {
        let ptr = xlib::XCreateImage(
            connection.display(),
            connection.visual(),
            SURFACE_DEPTH,
            xlib::ZPixmap,
            0,
            memory.as_mut_ptr() as *mut libc::c_char,
            bounds.full_width,
            bounds.full_height,
            BITMAP_PAD,
            0,
        );
        if ptr.is_null() {
            return Err(anyhow!("XCreateImage failed for {}", bounds));
        }
        Ok(Self { ptr })
    }

    #[inline]
    pub fn raw(&self) -> *mut xlib::XImage {
        self.ptr
    }
}

impl Drop for SafeImage {
    fn drop(&mut self) {
        trace!("Destroying XImage {:p}", self.ptr);
        unsafe {
            // The pixel memory is owned by X11Surface; keep XDestroyImage
            // from freeing it.
            (*self.ptr).data = ptr::null_mut();
            xlib::XDestroyImage(self.ptr);
        }
    }
}

/// Everything behind one wallpaper frame.
///
/// Fields drop in declaration order: the image first (it points into
/// `memory`), then the GC and pixmap, and the raw memory last.
#[derive(Debug)]
pub struct X11Surface {
    image: SafeImage,
    gc: SafeGc,
    pixmap: SafePixmap,
    memory: Box<[u8]>,
    bounds: DesktopBounds,
}

impl X11Surface {
    /// Creates the pixmap, fills it black, makes it the root background and
    /// wraps a fresh pixel buffer in an `XImage`.
    ///
    /// A failure at any step drops whatever was already created.
    pub fn create(connection: &Connection, bounds: DesktopBounds) -> Result<Self> {
        let pixmap = SafePixmap::create(connection, bounds)?;
        let gc = SafeGc::create(connection, pixmap.id())?;

        unsafe {
            let display = connection.display();
            xlib::XSetForeground(
                display,
                gc.raw(),
                xlib::XBlackPixel(display, connection.screen()),
            );
            xlib::XFillRectangle(
                display,
                pixmap.id(),
                gc.raw(),
                0,
                0,
                bounds.full_width,
                bounds.full_height,
            );
            xlib::XSetWindowBackgroundPixmap(display, connection.root(), pixmap.id());
        }

        let mut memory = vec![0u8; bounds.byte_len()].into_boxed_slice();
        // SAFETY: the boxed slice's heap block does not move when the box
        // does, and `image` is dropped before `memory`.
        let image = unsafe { SafeImage::create(connection, &mut memory, bounds)? };

        debug!("Created X11 surface: pixmap 0x{:x}, {}", pixmap.id(), bounds);
        Ok(Self {
            image,
            gc,
            pixmap,
            memory,
            bounds,
        })
    }

    pub fn image(&self) -> &SafeImage {
        &self.image
    }

    pub fn gc(&self) -> &SafeGc {
        &self.gc
    }

    pub fn pixmap(&self) -> &SafePixmap {
        &self.pixmap
    }
}

impl NativeSurface for X11Surface {
    fn id(&self) -> u64 {
        self.pixmap.id() as u64
    }

    fn bounds(&self) -> DesktopBounds {
        self.bounds
    }

    fn pixels(&self) -> &[u8] {
        &self.memory
    }

    fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.memory
    }
}

/// `XRRScreenResources`, freed with `XRRFreeScreenResources`.
pub struct ScreenResources {
    ptr: *mut xrandr::XRRScreenResources,
}

impl ScreenResources {
    /// Returns `None` when the server could not provide resources.
    pub fn query(connection: &Connection) -> Option<Self> {
        let ptr = unsafe { xrandr::XRRGetScreenResources(connection.display(), connection.root()) };
        if ptr.is_null() {
            None
        } else {
            Some(Self { ptr })
        }
    }

    #[inline]
    pub fn raw(&self) -> *mut xrandr::XRRScreenResources {
        self.ptr
    }

    pub fn outputs(&self) -> &[xrandr::RROutput] {
        unsafe {
            let resources = &*self.ptr;
            if resources.outputs.is_null() || resources.noutput <= 0 {
                return &[];
            }
            std::slice::from_raw_parts(resources.outputs, resources.noutput as usize)
        }
    }
}

impl Drop for ScreenResources {
    fn drop(&mut self) {
        unsafe { xrandr::XRRFreeScreenResources(self.ptr) };
    }
}
