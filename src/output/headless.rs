// src/output/headless.rs
//! Headless window system.
//!
//! Keeps surfaces in plain memory and records every native call it would have
//! made. `HeadlessControl` shares its state so a caller can script the
//! topology, inject faults and inspect what was published.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use anyhow::{bail, Result};
use log::{debug, info, trace};

use super::publisher::IDENTITY_PROPERTIES;
use super::{
    DesktopBounds, EnumerationError, Fault, MonitorOutput, NativeSurface, ProtocolError, Rect,
    WindowSystem,
};

/// Name of the single monitor reported by a fresh headless system.
pub const HEADLESS_MONITOR: &str = "HEADLESS-1";

const FIRST_SURFACE_ID: u64 = 0x0040_0001;

#[derive(Debug)]
struct HeadlessState {
    bounds: DesktopBounds,
    monitors: Result<Vec<MonitorOutput>, EnumerationError>,
    next_id: u64,
    surfaces_created: u64,
    live_surfaces: usize,
    fail_next_surface: bool,
    failing_reconnects: u32,
    connection_lost: bool,
    closed: bool,
    reconnects: u64,
    pending_events: Vec<Fault>,
    properties: BTreeMap<&'static str, u64>,
    property_writes: u64,
    presented_frames: u64,
    last_presented: Option<u64>,
    flushes: u64,
    forwarded: Vec<ProtocolError>,
}

impl HeadlessState {
    fn new(bounds: DesktopBounds) -> Self {
        Self {
            bounds,
            monitors: Ok(vec![MonitorOutput {
                name: HEADLESS_MONITOR.to_string(),
                connected: true,
                geometry: Some(Rect::new(0, 0, bounds.full_width, bounds.full_height)),
            }]),
            next_id: FIRST_SURFACE_ID,
            surfaces_created: 0,
            live_surfaces: 0,
            fail_next_surface: false,
            failing_reconnects: 0,
            connection_lost: false,
            closed: false,
            reconnects: 0,
            pending_events: Vec::new(),
            properties: BTreeMap::new(),
            property_writes: 0,
            presented_frames: 0,
            last_presented: None,
            flushes: 0,
            forwarded: Vec::new(),
        }
    }
}

/// In-memory surface. Dropping it updates the shared live count.
#[derive(Debug)]
pub struct HeadlessSurface {
    id: u64,
    bounds: DesktopBounds,
    memory: Box<[u8]>,
    state: Rc<RefCell<HeadlessState>>,
}

impl NativeSurface for HeadlessSurface {
    fn id(&self) -> u64 {
        self.id
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

impl Drop for HeadlessSurface {
    fn drop(&mut self) {
        let mut state = self.state.borrow_mut();
        state.live_surfaces = state.live_surfaces.saturating_sub(1);
        trace!("Headless surface 0x{:x} dropped", self.id);
    }
}

#[derive(Debug)]
pub struct HeadlessSystem {
    state: Rc<RefCell<HeadlessState>>,
}

impl HeadlessSystem {
    /// Creates a headless system whose default screen is `bounds`, together
    /// with a control handle sharing its state.
    pub fn new(bounds: DesktopBounds) -> (Self, HeadlessControl) {
        info!("Headless window system with a {} screen", bounds);
        let state = Rc::new(RefCell::new(HeadlessState::new(bounds)));
        (
            Self {
                state: Rc::clone(&state),
            },
            HeadlessControl { state },
        )
    }
}

impl WindowSystem for HeadlessSystem {
    type Surface = HeadlessSurface;

    fn name(&self) -> &'static str {
        "headless"
    }

    fn screen_bounds(&self) -> DesktopBounds {
        self.state.borrow().bounds
    }

    fn enumerate_monitors(&mut self) -> Result<Vec<MonitorOutput>, EnumerationError> {
        self.state.borrow().monitors.clone()
    }

    fn create_surface(&mut self, bounds: DesktopBounds) -> Result<HeadlessSurface> {
        let mut state = self.state.borrow_mut();
        if state.connection_lost || state.closed {
            bail!("Cannot create a surface on a lost or closed headless connection");
        }
        if state.fail_next_surface {
            state.fail_next_surface = false;
            bail!("Scripted surface allocation failure");
        }

        let id = state.next_id;
        state.next_id += 1;
        state.surfaces_created += 1;
        state.live_surfaces += 1;
        debug!("Headless surface 0x{:x} created ({})", id, bounds);

        Ok(HeadlessSurface {
            id,
            bounds,
            memory: vec![0u8; bounds.byte_len()].into_boxed_slice(),
            state: Rc::clone(&self.state),
        })
    }

    fn put_image(&mut self, surface: &mut HeadlessSurface) {
        let mut state = self.state.borrow_mut();
        if state.connection_lost {
            return;
        }
        state.presented_frames += 1;
        state.last_presented = Some(surface.id);
    }

    fn set_identity(&mut self, surface_id: u64) {
        let mut state = self.state.borrow_mut();
        if state.connection_lost {
            return;
        }
        for name in IDENTITY_PROPERTIES {
            state.properties.insert(name, surface_id);
            state.property_writes += 1;
        }
    }

    fn repaint_and_flush(&mut self) {
        self.state.borrow_mut().flushes += 1;
    }

    fn pump_events(&mut self) -> Vec<Fault> {
        std::mem::take(&mut self.state.borrow_mut().pending_events)
    }

    fn mark_connection_lost(&mut self) {
        self.state.borrow_mut().connection_lost = true;
    }

    fn reconnect(&mut self) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if state.closed {
            bail!("Headless connection is closed");
        }
        if state.failing_reconnects > 0 {
            state.failing_reconnects -= 1;
            bail!("Scripted reconnect failure");
        }
        state.connection_lost = false;
        state.reconnects += 1;
        info!("Headless connection re-established");
        Ok(())
    }

    fn forward_protocol_error(&mut self, error: &ProtocolError) {
        self.state.borrow_mut().forwarded.push(error.clone());
    }

    fn close(&mut self) {
        let mut state = self.state.borrow_mut();
        if !state.closed {
            state.closed = true;
            info!("Headless connection closed");
        }
    }
}

/// Shared handle for scripting and inspecting a `HeadlessSystem`.
#[derive(Debug, Clone)]
pub struct HeadlessControl {
    state: Rc<RefCell<HeadlessState>>,
}

impl HeadlessControl {
    pub fn set_screen_bounds(&self, bounds: DesktopBounds) {
        self.state.borrow_mut().bounds = bounds;
    }

    pub fn set_monitors(&self, monitors: Vec<MonitorOutput>) {
        self.state.borrow_mut().monitors = Ok(monitors);
    }

    pub fn set_enumeration_error(&self, error: EnumerationError) {
        self.state.borrow_mut().monitors = Err(error);
    }

    pub fn fail_next_surface(&self) {
        self.state.borrow_mut().fail_next_surface = true;
    }

    pub fn fail_reconnects(&self, count: u32) {
        self.state.borrow_mut().failing_reconnects = count;
    }

    /// Queues a fault to be returned by the next `pump_events`.
    pub fn push_event(&self, fault: Fault) {
        self.state.borrow_mut().pending_events.push(fault);
    }

    pub fn live_surfaces(&self) -> usize {
        self.state.borrow().live_surfaces
    }

    pub fn surfaces_created(&self) -> u64 {
        self.state.borrow().surfaces_created
    }

    pub fn property(&self, name: &str) -> Option<u64> {
        self.state.borrow().properties.get(name).copied()
    }

    pub fn property_writes(&self) -> u64 {
        self.state.borrow().property_writes
    }

    pub fn presented_frames(&self) -> u64 {
        self.state.borrow().presented_frames
    }

    pub fn last_presented(&self) -> Option<u64> {
        self.state.borrow().last_presented
    }

    pub fn flushes(&self) -> u64 {
        self.state.borrow().flushes
    }

    pub fn is_connection_lost(&self) -> bool {
        self.state.borrow().connection_lost
    }

    pub fn is_closed(&self) -> bool {
        self.state.borrow().closed
    }

    pub fn reconnects(&self) -> u64 {
        self.state.borrow().reconnects
    }

    pub fn forwarded_errors(&self) -> Vec<ProtocolError> {
        self.state.borrow().forwarded.clone()
    }
}
