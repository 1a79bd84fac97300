// src/output/x11/connection.rs
#![allow(non_snake_case)] // Allow non-snake case for X11 types

use std::cell::Cell;
use std::ffi::CString;
use std::ptr;
use std::rc::Rc;

use anyhow::{anyhow, Context, Result};
use libc::c_int;
use log::{debug, info, warn};
use x11::xlib;

use crate::output::DesktopBounds;

/// Owns an X11 `Display` pointer and closes it on drop.
///
/// Resources created on the display hold an `Rc` to it, so the display is
/// closed only after the last of them has been freed.
#[derive(Debug)]
pub struct ManagedDisplay {
    ptr: *mut xlib::Display,
    lost: Cell<bool>,
}

impl ManagedDisplay {
    /// Opens a connection with `XOpenDisplay`. `None` uses `$DISPLAY`.
    fn open(name: Option<&CString>) -> Result<Self> {
        let name_ptr = name.map_or(ptr::null(), |n| n.as_ptr());
        let display_ptr = unsafe { xlib::XOpenDisplay(name_ptr) };
        if display_ptr.is_null() {
            Err(anyhow!(
                "Failed to open X display {:?}. Check DISPLAY environment variable or X server status.",
                name
            ))
        } else {
            debug!("X display opened: {:p}", display_ptr);
            Ok(Self {
                ptr: display_ptr,
                lost: Cell::new(false),
            })
        }
    }

    #[inline]
    pub fn raw(&self) -> *mut xlib::Display {
        self.ptr
    }

    /// Marks the connection as dead. Server-side frees are skipped from now on.
    pub fn mark_lost(&self) {
        if !self.lost.replace(true) {
            warn!("X display {:p} marked as lost", self.ptr);
        }
    }

    #[inline]
    pub fn is_lost(&self) -> bool {
        self.lost.get()
    }
}

impl Drop for ManagedDisplay {
    fn drop(&mut self) {
        if self.ptr.is_null() {
            return;
        }
        info!("Closing X11 display connection: {:p}", self.ptr);
        // On a lost connection Xlib skips the final round trip and only frees
        // client-side state.
        let status = unsafe { xlib::XCloseDisplay(self.ptr) };
        if status != 0 {
            warn!(
                "XCloseDisplay returned non-zero status: {}. Display may not have closed cleanly.",
                status
            );
        }
    }
}

/// An open X server connection plus the default-screen identifiers the
/// wallpaper needs.
#[derive(Debug)]
pub struct Connection {
    display: Rc<ManagedDisplay>,
    screen: c_int,
    root: xlib::Window,
    visual: *mut xlib::Visual,
}

impl Connection {
    /// Connects to `name` (or `$DISPLAY`) and looks up the default screen,
    /// its root window and visual.
    pub fn open(name: Option<&str>) -> Result<Self> {
        info!("Establishing X11 server connection.");

        let name = name
            .map(CString::new)
            .transpose()
            .context("X display name contains a NUL byte")?;
        let display = Rc::new(ManagedDisplay::open(name.as_ref())?);

        let screen = unsafe { xlib::XDefaultScreen(display.raw()) };
        let root = unsafe { xlib::XRootWindow(display.raw(), screen) };
        let visual = unsafe { xlib::XDefaultVisual(display.raw(), screen) };
        if visual.is_null() {
            // ManagedDisplay's Drop closes the display.
            return Err(anyhow!("Failed to get default visual for screen {}.", screen));
        }
        debug!(
            "Default screen {}, root window 0x{:x}, visual {:p}",
            screen, root, visual
        );

        info!("X11 server connection established successfully.");
        Ok(Self {
            display,
            screen,
            root,
            visual,
        })
    }

    #[inline]
    pub fn display(&self) -> *mut xlib::Display {
        self.display.raw()
    }

    /// Shared handle given to resources so they can outlive a borrow of the
    /// connection but not the display itself.
    pub fn shared_display(&self) -> Rc<ManagedDisplay> {
        Rc::clone(&self.display)
    }

    #[inline]
    pub fn screen(&self) -> c_int {
        self.screen
    }

    #[inline]
    pub fn root(&self) -> xlib::Window {
        self.root
    }

    #[inline]
    pub fn visual(&self) -> *mut xlib::Visual {
        self.visual
    }

    pub fn mark_lost(&self) {
        self.display.mark_lost();
    }

    pub fn is_lost(&self) -> bool {
        self.display.is_lost()
    }

    /// Size of the default screen in pixels.
    pub fn screen_bounds(&self) -> DesktopBounds {
        let (width, height) = unsafe {
            (
                xlib::XDisplayWidth(self.display(), self.screen),
                xlib::XDisplayHeight(self.display(), self.screen),
            )
        };
        DesktopBounds::new(width.max(0) as u32, height.max(0) as u32)
    }
}
