// src/renderer.rs

//! This module defines the `PatternRenderer`.
//!
//! It stands in for a scene renderer: it draws an animated gradient into the
//! output's image buffer, one tile per active viewport, and implements
//! `RenderDriver` so the output can tell it the negotiated desktop size.
//! Pixels are written as little-endian `0x00RRGGBB`, the layout of a depth-24
//! ZPixmap image.

use log::{info, trace, warn};

use crate::output::{DesktopBounds, Rect, RenderDriver, ViewportMap, BYTES_PER_PIXEL};

pub struct PatternRenderer {
    bounds: DesktopBounds,
    frame: u64,
}

impl Default for PatternRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl PatternRenderer {
    pub fn new() -> Self {
        Self {
            bounds: DesktopBounds::default(),
            frame: 0,
        }
    }

    /// Size last announced through `resize_window`.
    pub fn bounds(&self) -> DesktopBounds {
        self.bounds
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Rectangles to draw this frame, clipped to the desktop.
    ///
    /// With no viewport, or when the output does not composite per viewport
    /// and has none to pick, the whole desktop is one target.
    pub fn targets(&self, viewports: &ViewportMap, composite: bool) -> Vec<Rect> {
        let full = Rect::new(0, 0, self.bounds.full_width, self.bounds.full_height);
        let mut rects: Vec<Rect> = viewports
            .values()
            .filter_map(|viewport| clip(viewport.rect, self.bounds))
            .collect();

        if !composite {
            rects.truncate(1);
        }
        if rects.is_empty() {
            rects.push(full);
        }
        rects
    }

    /// Draws one frame into `buffer`, which must cover the current bounds.
    pub fn draw(&mut self, buffer: &mut [u8], viewports: &ViewportMap, composite: bool, vflip: bool) {
        if buffer.len() < self.bounds.byte_len() {
            warn!(
                "Image buffer of {} bytes is smaller than the {} desktop; skipping frame",
                buffer.len(),
                self.bounds
            );
            return;
        }

        let stride = self.bounds.full_width as usize * BYTES_PER_PIXEL;
        for (index, rect) in self.targets(viewports, composite).into_iter().enumerate() {
            let phase = self.frame.wrapping_add(index as u64 * 64);
            for row in 0..rect.height {
                let source_row = if vflip { rect.height - 1 - row } else { row };
                let y = rect.y as usize + row as usize;
                let line = &mut buffer[y * stride..(y + 1) * stride];
                for column in 0..rect.width {
                    let x = rect.x as usize + column as usize;
                    let pixel = shade(column, source_row, rect, phase);
                    line[x * BYTES_PER_PIXEL..(x + 1) * BYTES_PER_PIXEL]
                        .copy_from_slice(&pixel.to_le_bytes());
                }
            }
        }

        trace!("Rendered frame {}", self.frame);
        self.frame = self.frame.wrapping_add(1);
    }
}

impl RenderDriver for PatternRenderer {
    fn resize_window(&mut self, bounds: DesktopBounds) {
        info!("Render targets resized to {}", bounds);
        self.bounds = bounds;
    }
}

fn shade(column: u32, row: u32, rect: Rect, phase: u64) -> u32 {
    let red = (column as u64 * 255 / rect.width.max(1) as u64 + phase) as u8;
    let green = (row as u64 * 255 / rect.height.max(1) as u64) as u8;
    let blue = (phase.wrapping_mul(3)) as u8;
    u32::from_be_bytes([0, red, green, blue])
}

fn clip(rect: Rect, bounds: DesktopBounds) -> Option<Rect> {
    let left = rect.x.max(0) as i64;
    let top = rect.y.max(0) as i64;
    let right = (rect.x as i64 + rect.width as i64).min(bounds.full_width as i64);
    let bottom = (rect.y as i64 + rect.height as i64).min(bounds.full_height as i64);
    if right <= left || bottom <= top {
        return None;
    }
    Some(Rect::new(
        left as i32,
        top as i32,
        (right - left) as u32,
        (bottom - top) as u32,
    ))
}
