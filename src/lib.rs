// src/lib.rs

//! `backdrop` draws an animated scene onto the desktop background of selected
//! monitors and keeps doing so across X server hiccups.
//!
//! - `output`: monitor discovery, native surfaces, publication and fault recovery.
//! - `renderer`: the frame producer that fills the output's image buffer.
//! - `config`: JSON configuration and command line overrides.
//! - `scheduler`: frame pacing.

pub mod config;
pub mod output;
pub mod renderer;
pub mod scheduler;
