// src/output/x11/error_handler.rs
#![allow(non_snake_case)] // Allow non-snake case for X11 types

//! Xlib error-handler registration.
//!
//! Xlib error handlers are process-wide C function pointers with no user
//! data, so the callbacks reach their `FaultSender` through a private slot.
//! `ErrorHandlerRegistration` fills the slot when installed and puts back the
//! previous handlers and sender when dropped. The callbacks only post faults.

use std::ffi::CStr;
use std::sync::Mutex;

use libc::{c_char, c_int};
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use x11::xlib;

use crate::output::{Fault, FaultSender, ProtocolError};

type ErrorHandlerFn = unsafe extern "C" fn(*mut xlib::Display, *mut xlib::XErrorEvent) -> c_int;
type XErrorHandler = Option<ErrorHandlerFn>;
type XIOErrorHandler = Option<unsafe extern "C" fn(*mut xlib::Display) -> c_int>;

static ACTIVE_SINK: Lazy<Mutex<Option<FaultSender>>> = Lazy::new(|| Mutex::new(None));

fn post_fault(fault: Fault) {
    // try_lock: the callback may fire while this thread holds the slot lock
    // inside install/drop.
    match ACTIVE_SINK.try_lock() {
        Ok(slot) => match slot.as_ref() {
            Some(sender) => {
                if !sender.post(fault) {
                    debug!("Fault inbox closed; dropping fault");
                }
            }
            None => debug!("No fault sink registered; dropping {}", fault),
        },
        Err(_) => warn!("Fault sink busy; dropping {}", fault),
    }
}

/// Reads the error text for `code` from Xlib's error database.
unsafe fn error_text(display: *mut xlib::Display, code: u8) -> String {
    let mut buffer = [0 as c_char; 256];
    xlib::XGetErrorText(
        display,
        c_int::from(code),
        buffer.as_mut_ptr(),
        buffer.len() as c_int,
    );
    CStr::from_ptr(buffer.as_ptr()).to_string_lossy().into_owned()
}

unsafe extern "C" fn on_protocol_error(
    display: *mut xlib::Display,
    event: *mut xlib::XErrorEvent,
) -> c_int {
    if event.is_null() {
        return 0;
    }
    let event = &*event;
    let description = if display.is_null() {
        format!("X error {}", event.error_code)
    } else {
        error_text(display, event.error_code)
    };
    post_fault(Fault::Protocol(ProtocolError {
        error_code: event.error_code,
        request_code: event.request_code,
        minor_code: event.minor_code,
        resource_id: event.resourceid as u64,
        serial: event.serial as u64,
        description,
    }));
    0
}

unsafe extern "C" fn on_io_error(_display: *mut xlib::Display) -> c_int {
    post_fault(Fault::ConnectionLost);
    0
}

#[cfg(has_xio_error_exit_handler)]
mod exit_handler {
    use libc::c_void;
    use x11::xlib;

    pub type IoErrorExitHandler = unsafe extern "C" fn(*mut xlib::Display, *mut c_void);

    extern "C" {
        pub fn XSetIOErrorExitHandler(
            display: *mut xlib::Display,
            handler: Option<IoErrorExitHandler>,
            user_data: *mut c_void,
        );
    }

    /// Replaces Xlib's final `exit()` after an IO error. Returning from it
    /// leaves the display unusable but the process alive.
    pub unsafe extern "C" fn on_io_error_exit(_display: *mut xlib::Display, _data: *mut c_void) {
        super::post_fault(crate::output::Fault::ConnectionLost);
    }
}

/// Installed Xlib error handlers. Dropping restores the previous ones.
#[derive(Debug)]
pub struct ErrorHandlerRegistration {
    prior_error: XErrorHandler,
    prior_io_error: XIOErrorHandler,
    /// Prior handler worth forwarding to. Xlib's default is left out: it
    /// prints the error and exits.
    forward_to: Option<ErrorHandlerFn>,
    previous_sink: Option<FaultSender>,
}

impl ErrorHandlerRegistration {
    pub fn install(sender: FaultSender) -> Self {
        let previous_sink = {
            let mut slot = ACTIVE_SINK.lock().unwrap_or_else(|e| e.into_inner());
            slot.replace(sender)
        };

        let (prior_error, prior_io_error, forward_to) = unsafe {
            // Passing None installs Xlib's default and hands back whatever
            // was there; the second call then returns the default itself.
            let prior_error = xlib::XSetErrorHandler(None);
            let default_error = xlib::XSetErrorHandler(Some(on_protocol_error));
            let prior_io_error = xlib::XSetIOErrorHandler(Some(on_io_error));
            (
                prior_error,
                prior_io_error,
                forwardable(prior_error, default_error),
            )
        };

        info!(
            "X error handlers installed (forwarding protocol errors: {})",
            forward_to.is_some()
        );
        Self {
            prior_error,
            prior_io_error,
            forward_to,
            previous_sink,
        }
    }

    /// Registers the IO-error exit handler on `display` so a dead connection
    /// does not end the process.
    pub fn attach(&self, display: *mut xlib::Display) {
        #[cfg(has_xio_error_exit_handler)]
        unsafe {
            exit_handler::XSetIOErrorExitHandler(
                display,
                Some(exit_handler::on_io_error_exit),
                std::ptr::null_mut(),
            );
            debug!("IO error exit handler attached to {:p}", display);
        }
        #[cfg(not(has_xio_error_exit_handler))]
        warn!(
            "XSetIOErrorExitHandler unavailable; losing display {:p} will terminate the process",
            display
        );
    }

    /// Hands `error` to the handler that was installed before ours, if any.
    pub fn forward(&self, display: *mut xlib::Display, error: &ProtocolError) {
        forward_to_prior(self.forward_to, display, error);
    }
}

impl Drop for ErrorHandlerRegistration {
    fn drop(&mut self) {
        unsafe {
            xlib::XSetErrorHandler(self.prior_error);
            xlib::XSetIOErrorHandler(self.prior_io_error);
        }
        let mut slot = ACTIVE_SINK.lock().unwrap_or_else(|e| e.into_inner());
        *slot = self.previous_sink.take();
        debug!("X error handlers restored");
    }
}

/// Calls `handler` with an `XErrorEvent` rebuilt from `error`. Returns
/// whether it was called.
///
/// Handlers expect a live display (they typically call `XGetErrorText` on
/// it), so nothing is forwarded without one.
fn forward_to_prior(
    handler: Option<ErrorHandlerFn>,
    display: *mut xlib::Display,
    error: &ProtocolError,
) -> bool {
    let Some(handler) = handler else {
        return false;
    };
    if display.is_null() {
        warn!("No live X display; not forwarding {}", error);
        return false;
    }
    let mut event = xlib::XErrorEvent {
        type_: 0,
        display,
        resourceid: error.resource_id as xlib::XID,
        serial: error.serial as libc::c_ulong,
        error_code: error.error_code,
        request_code: error.request_code,
        minor_code: error.minor_code,
    };
    unsafe { handler(display, &mut event) };
    true
}

/// Picks the prior handler to forward to: anything that is neither Xlib's
/// default nor our own callback.
fn forwardable(prior: XErrorHandler, default: XErrorHandler) -> Option<ErrorHandlerFn> {
    let prior = prior?;
    let ours = on_protocol_error as ErrorHandlerFn as usize;
    if prior as usize == ours {
        return None;
    }
    match default {
        Some(default) if default as usize == prior as usize => None,
        _ => Some(prior),
    }
}
