// src/output/viewport.rs
//! Viewport registry: resolves configured monitor names against the outputs
//! the windowing system currently reports.
//!
//! Resolution is recomputed wholesale on every (re)initialization and never
//! patched. It has no side effects beyond logging.

use std::collections::BTreeSet;

use log::{debug, info, warn};

use super::{DesktopBounds, EnumerationError, MonitorOutput, Viewport, ViewportMap, WindowSystem};

/// Result of one resolution pass.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScreenLayout {
    pub viewports: ViewportMap,
    pub bounds: DesktopBounds,
    /// Set when enumeration could not be used and the layout fell back to a
    /// single implicit full-desktop target.
    pub fallback: Option<EnumerationError>,
}

impl ScreenLayout {
    /// True when the render pipeline must composite per viewport.
    pub fn is_multiple(&self) -> bool {
        self.viewports.len() > 1
    }
}

/// Resolves the configured `screens` against the monitors reported by
/// `system`.
///
/// Bounds always come from the default screen, whatever the enumeration
/// outcome, because the mirrored surface is laid out in root-window
/// coordinates.
pub fn resolve<S: WindowSystem>(system: &mut S, screens: &BTreeSet<String>) -> ScreenLayout {
    let bounds = system.screen_bounds();
    debug!("Default screen bounds: {}", bounds);

    match system.enumerate_monitors() {
        Ok(monitors) => {
            let viewports = select_viewports(monitors, screens);
            if viewports.is_empty() && !screens.is_empty() {
                warn!(
                    "None of the configured screens {:?} is connected; drawing to the full desktop",
                    screens
                );
            }
            ScreenLayout {
                viewports,
                bounds,
                fallback: None,
            }
        }
        Err(err) => {
            warn!(
                "{} on {}; cannot detect the configured screens, drawing to the full desktop",
                err,
                system.name()
            );
            ScreenLayout {
                viewports: ViewportMap::new(),
                bounds,
                fallback: Some(err),
            }
        }
    }
}

/// Keeps the connected monitors whose names appear in `screens`.
///
/// Later duplicates overwrite earlier ones.
pub fn select_viewports(monitors: Vec<MonitorOutput>, screens: &BTreeSet<String>) -> ViewportMap {
    let mut viewports = ViewportMap::new();

    for monitor in monitors {
        if !monitor.connected {
            debug!("Skipping disconnected output {}", monitor.name);
            continue;
        }
        if !screens.contains(&monitor.name) {
            debug!("Skipping unconfigured output {}", monitor.name);
            continue;
        }
        let Some(rect) = monitor.geometry else {
            warn!(
                "Requested screen {} is connected but not active; ignoring it",
                monitor.name
            );
            continue;
        };

        info!("Found requested screen: {} -> {}", monitor.name, rect);
        viewports.insert(
            monitor.name.clone(),
            Viewport {
                name: monitor.name,
                rect,
            },
        );
    }

    viewports
}
