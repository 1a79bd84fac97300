// src/output/x11/mod.rs

//! Xlib + XRandR window system.
//!
//! Submodules:
//! - `connection`: the display connection and default-screen identifiers.
//! - `resources`: RAII wrappers for pixmap, GC, image and RandR resources.
//! - `error_handler`: process-wide Xlib error handlers that post faults.
//!
//! `X11System` implements `WindowSystem`: it enumerates RandR outputs, keeps a
//! full-desktop pixmap as the root background and advertises it through the
//! `_XROOTPMAP_ID` / `ESETROOT_PMAP_ID` root properties.

pub mod connection;
pub mod error_handler;
pub mod resources;

use std::ffi::CString;
use std::mem;

use anyhow::{anyhow, Context, Result};
use libc::{c_char, c_int, c_ulong};
use log::{debug, error, info, trace, warn};
use x11::{xlib, xrandr};

use self::connection::Connection;
use self::error_handler::ErrorHandlerRegistration;
use self::resources::{ScreenResources, X11Surface};
use crate::output::publisher::IDENTITY_PROPERTIES;
use crate::output::{
    DesktopBounds, EnumerationError, Fault, FaultSender, MonitorOutput, NativeSurface,
    ProtocolError, Rect, WindowSystem,
};

/// RandR extension bases for the current connection.
#[derive(Debug, Clone, Copy)]
struct Randr {
    event_base: c_int,
}

/// Atoms of the surface-identity properties.
#[derive(Debug, Clone, Copy)]
struct IdentityAtoms {
    atoms: [xlib::Atom; 2],
}

impl IdentityAtoms {
    fn intern(connection: &Connection) -> Result<Self> {
        let mut atoms = [0; 2];
        for (slot, name) in atoms.iter_mut().zip(IDENTITY_PROPERTIES) {
            let c_name = CString::new(name).context("Atom name contains a NUL byte")?;
            *slot = unsafe {
                xlib::XInternAtom(
                    connection.display(),
                    c_name.as_ptr() as *const c_char,
                    xlib::False,
                )
            };
            if *slot == 0 {
                return Err(anyhow!("Failed to intern atom {}", name));
            }
        }
        Ok(Self { atoms })
    }
}

/// A live connection with everything derived from it.
struct Session {
    connection: Connection,
    randr: Option<Randr>,
    atoms: IdentityAtoms,
}

impl Session {
    fn open(display_name: Option<&str>, handlers: &ErrorHandlerRegistration) -> Result<Self> {
        let connection = Connection::open(display_name)?;
        handlers.attach(connection.display());

        let randr = query_randr(&connection);
        let atoms = IdentityAtoms::intern(&connection)?;

        Ok(Self {
            connection,
            randr,
            atoms,
        })
    }
}

fn query_randr(connection: &Connection) -> Option<Randr> {
    let mut event_base: c_int = 0;
    let mut error_base: c_int = 0;
    let present = unsafe {
        xrandr::XRRQueryExtension(connection.display(), &mut event_base, &mut error_base)
    };
    if present == 0 {
        warn!("XRandR is not present; configured screens cannot be detected");
        return None;
    }

    unsafe {
        xrandr::XRRSelectInput(
            connection.display(),
            connection.root(),
            xrandr::RRScreenChangeNotifyMask,
        );
    }
    debug!(
        "XRandR present (event base {}, error base {})",
        event_base, error_base
    );
    Some(Randr { event_base })
}

pub struct X11System {
    display_name: Option<String>,
    // Declared before `handlers` so the display closes while our handlers
    // are still installed.
    session: Option<Session>,
    /// `None` once closed.
    handlers: Option<ErrorHandlerRegistration>,
}

impl X11System {
    /// Installs the error handlers and connects to `display_name`
    /// (`None` uses `$DISPLAY`).
    pub fn open(display_name: Option<&str>, faults: FaultSender) -> Result<Self> {
        let handlers = ErrorHandlerRegistration::install(faults);
        let session = Session::open(display_name, &handlers)?;
        Ok(Self {
            display_name: display_name.map(str::to_owned),
            session: Some(session),
            handlers: Some(handlers),
        })
    }

    fn live_session(&self) -> Option<&Session> {
        self.session
            .as_ref()
            .filter(|session| !session.connection.is_lost())
    }
}

impl WindowSystem for X11System {
    type Surface = X11Surface;

    fn name(&self) -> &'static str {
        "x11"
    }

    fn screen_bounds(&self) -> DesktopBounds {
        match self.live_session() {
            Some(session) => session.connection.screen_bounds(),
            None => DesktopBounds::default(),
        }
    }

    fn enumerate_monitors(&mut self) -> Result<Vec<MonitorOutput>, EnumerationError> {
        let session = self.live_session().ok_or(EnumerationError::Unavailable)?;
        if session.randr.is_none() {
            return Err(EnumerationError::Unavailable);
        }
        let connection = &session.connection;
        let resources = ScreenResources::query(connection).ok_or_else(|| {
            EnumerationError::QueryFailed("XRRGetScreenResources returned nothing".to_string())
        })?;

        let mut monitors = Vec::with_capacity(resources.outputs().len());
        for &output in resources.outputs() {
            if let Some(monitor) = unsafe { read_output(connection, &resources, output) } {
                monitors.push(monitor);
            }
        }
        debug!("XRandR reported {} output(s)", monitors.len());
        Ok(monitors)
    }

    fn create_surface(&mut self, bounds: DesktopBounds) -> Result<X11Surface> {
        let session = self
            .live_session()
            .ok_or_else(|| anyhow!("No live X connection"))?;
        X11Surface::create(&session.connection, bounds)
    }

    fn put_image(&mut self, surface: &mut X11Surface) {
        let Some(session) = self.live_session() else {
            return;
        };
        let bounds = surface.bounds();
        unsafe {
            xlib::XPutImage(
                session.connection.display(),
                surface.pixmap().id(),
                surface.gc().raw(),
                surface.image().raw(),
                0,
                0,
                0,
                0,
                bounds.full_width,
                bounds.full_height,
            );
        }
    }

    fn set_identity(&mut self, surface_id: u64) {
        let Some(session) = self.live_session() else {
            return;
        };
        // Format-32 property data is an array of C longs.
        let value: c_ulong = surface_id as c_ulong;
        for atom in session.atoms.atoms {
            unsafe {
                xlib::XChangeProperty(
                    session.connection.display(),
                    session.connection.root(),
                    atom,
                    xlib::XA_PIXMAP,
                    32,
                    xlib::PropModeReplace,
                    &value as *const c_ulong as *const u8,
                    1,
                );
            }
        }
    }

    fn repaint_and_flush(&mut self) {
        let Some(session) = self.live_session() else {
            return;
        };
        unsafe {
            xlib::XClearWindow(session.connection.display(), session.connection.root());
            xlib::XFlush(session.connection.display());
        }
    }

    fn pump_events(&mut self) -> Vec<Fault> {
        let mut faults = Vec::new();
        let Some(session) = self.live_session() else {
            return faults;
        };
        let display = session.connection.display();

        unsafe {
            while xlib::XPending(display) > 0 {
                let mut event: xlib::XEvent = mem::zeroed();
                xlib::XNextEvent(display, &mut event);

                match session.randr {
                    Some(randr)
                        if event.get_type()
                            == randr.event_base + xrandr::RRScreenChangeNotify =>
                    {
                        xrandr::XRRUpdateConfiguration(&mut event);
                        info!("XRandR screen change notification");
                        if !faults.contains(&Fault::TopologyChanged) {
                            faults.push(Fault::TopologyChanged);
                        }
                    }
                    _ => trace!("Ignoring X event type {}", event.get_type()),
                }
            }
        }
        faults
    }

    fn mark_connection_lost(&mut self) {
        if let Some(session) = self.session.as_ref() {
            session.connection.mark_lost();
        }
    }

    fn reconnect(&mut self) -> Result<()> {
        if let Some(old) = self.session.take() {
            old.connection.mark_lost();
            drop(old);
        }
        let handlers = self
            .handlers
            .as_ref()
            .ok_or_else(|| anyhow!("X11 output is closed"))?;
        info!("Reconnecting to X display {:?}", self.display_name);
        let session = Session::open(self.display_name.as_deref(), handlers).map_err(|e| {
            error!("Failed to reconnect to the X server: {:#}", e);
            e
        })?;
        self.session = Some(session);
        Ok(())
    }

    fn forward_protocol_error(&mut self, error: &ProtocolError) {
        let display = self
            .live_session()
            .map_or(std::ptr::null_mut(), |session| session.connection.display());
        if let Some(handlers) = self.handlers.as_ref() {
            handlers.forward(display, error);
        }
    }

    fn close(&mut self) {
        if self.session.take().is_some() {
            info!("X11 session closed");
        }
        // Restores the previous handlers once the display is gone.
        self.handlers.take();
    }
}

/// Reads one RandR output, with CRTC geometry when it is connected.
///
/// # Safety
///
/// `output` must come from `resources`, which must belong to `connection`.
unsafe fn read_output(
    connection: &Connection,
    resources: &ScreenResources,
    output: xrandr::RROutput,
) -> Option<MonitorOutput> {
    let display = connection.display();
    let info = xrandr::XRRGetOutputInfo(display, resources.raw(), output);
    if info.is_null() {
        return None;
    }

    let name_bytes = std::slice::from_raw_parts(
        (*info).name as *const u8,
        (*info).nameLen.max(0) as usize,
    );
    let name = String::from_utf8_lossy(name_bytes).into_owned();
    let connected = c_int::from((*info).connection) == xrandr::RR_Connected as c_int;

    let mut geometry = None;
    if connected && (*info).crtc != 0 {
        let crtc = xrandr::XRRGetCrtcInfo(display, resources.raw(), (*info).crtc);
        if !crtc.is_null() {
            geometry = Some(Rect::new(
                (*crtc).x,
                (*crtc).y,
                (*crtc).width,
                (*crtc).height,
            ));
            xrandr::XRRFreeCrtcInfo(crtc);
        }
    }
    xrandr::XRRFreeOutputInfo(info);

    Some(MonitorOutput {
        name,
        connected,
        geometry,
    })
}
