// src/config.rs

//! Configuration for the `backdrop` wallpaper renderer.
//!
//! The configuration is read from a JSON file and then overridden by command
//! line flags and environment variables. Every field has a default, so an
//! empty file (or no file at all) is a valid configuration.

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::output::DesktopBounds;

/// Environment variable naming a config file when `--config` is absent.
pub const CONFIG_ENV: &str = "BACKDROP_CONFIG";
/// Environment variable overriding `max_frames`.
pub const MAX_FRAMES_ENV: &str = "BACKDROP_MAX_FRAMES";

// --- Top-Level Configuration Structure ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Monitor names that should receive the wallpaper (e.g. "DP-1").
    pub screens: Vec<String>,
    /// Which window system to draw on.
    pub backend: BackendKind,
    /// X display name. `None` uses the `DISPLAY` environment variable.
    pub display: Option<String>,
    /// Frames per second the render loop aims for.
    pub target_fps: u32,
    /// Stop after this many frames. `None` runs until interrupted.
    pub max_frames: Option<u64>,
    /// Minimum delay between two failed attempts to rebuild the output.
    pub recovery_retry_ms: u64,
    /// Default screen size of the headless backend.
    pub headless_size: ScreenSize,
    /// Default `env_logger` filter when `RUST_LOG` is not set.
    pub log_filter: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            screens: Vec::new(),
            backend: BackendKind::X11,
            display: None,
            target_fps: 30,
            max_frames: None,
            recovery_retry_ms: 1000,
            headless_size: ScreenSize::default(),
            log_filter: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    X11,
    Headless,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScreenSize {
    pub width: u32,
    pub height: u32,
}

impl Default for ScreenSize {
    fn default() -> Self {
        ScreenSize {
            width: 1920,
            height: 1080,
        }
    }
}

impl From<ScreenSize> for DesktopBounds {
    fn from(size: ScreenSize) -> Self {
        DesktopBounds::new(size.width, size.height)
    }
}

impl fmt::Display for ScreenSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl Config {
    /// Reads a JSON config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_json(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Builds the effective configuration from command line arguments
    /// (without the program name) and the environment.
    pub fn load(args: &[String]) -> Result<Self> {
        let overrides = CliOverrides::parse(args)?;
        let path = overrides
            .config_path
            .clone()
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));

        let mut config = match path {
            Some(path) => Self::from_file(&path)?,
            None => Config::default(),
        };
        overrides.apply(&mut config);

        if let Ok(raw) = std::env::var(MAX_FRAMES_ENV) {
            let frames = raw
                .parse::<u64>()
                .with_context(|| format!("{} must be a number, got {:?}", MAX_FRAMES_ENV, raw))?;
            config.max_frames = Some(frames).filter(|n| *n > 0);
        }

        config.validate()?;
        Ok(config)
    }

    /// The configured monitor names, deduplicated.
    pub fn screen_set(&self) -> BTreeSet<String> {
        self.screens.iter().cloned().collect()
    }

    pub fn recovery_retry(&self) -> Duration {
        Duration::from_millis(self.recovery_retry_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.target_fps == 0 {
            bail!("target_fps must be at least 1");
        }
        if self.headless_size.width == 0 || self.headless_size.height == 0 {
            bail!("headless_size must be non-empty, got {}", self.headless_size);
        }
        if let Some(name) = self.screens.iter().find(|s| s.trim().is_empty()) {
            bail!("screen names must not be blank, got {:?}", name);
        }
        Ok(())
    }
}

// --- Command Line ---

/// Flags that override values from the config file.
#[derive(Debug, Default, PartialEq)]
pub struct CliOverrides {
    pub config_path: Option<PathBuf>,
    pub screens: Vec<String>,
    pub headless: bool,
    pub max_frames: Option<u64>,
}

impl CliOverrides {
    pub fn parse(args: &[String]) -> Result<Self> {
        let mut overrides = CliOverrides::default();
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--config" => {
                    let path = iter.next().ok_or_else(|| anyhow!("missing value for --config"))?;
                    overrides.config_path = Some(PathBuf::from(path));
                }
                "--screen" => {
                    let name = iter.next().ok_or_else(|| anyhow!("missing value for --screen"))?;
                    overrides.screens.push(name.clone());
                }
                "--headless" => overrides.headless = true,
                "--max-frames" => {
                    let raw = iter
                        .next()
                        .ok_or_else(|| anyhow!("missing value for --max-frames"))?;
                    let frames = raw
                        .parse::<u64>()
                        .with_context(|| format!("--max-frames expects a number, got {:?}", raw))?;
                    overrides.max_frames = Some(frames);
                }
                unknown => bail!("unknown argument: {}", unknown),
            }
        }
        Ok(overrides)
    }

    fn apply(&self, config: &mut Config) {
        if !self.screens.is_empty() {
            config.screens = self.screens.clone();
        }
        if self.headless {
            config.backend = BackendKind::Headless;
        }
        if let Some(frames) = self.max_frames {
            config.max_frames = Some(frames).filter(|n| *n > 0);
        }
    }
}

pub const USAGE: &str = "\
usage: backdrop [--config PATH] [--screen NAME]... [--headless] [--max-frames N]

  --config PATH     JSON configuration file (default: $BACKDROP_CONFIG)
  --screen NAME     monitor to draw on; repeat for several monitors
  --headless        draw into memory instead of the X root window
  --max-frames N    exit after N frames";

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test_log::test]
    fn empty_json_gives_defaults() {
        let config = Config::from_json("{}").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.backend, BackendKind::X11);
        assert_eq!(config.recovery_retry(), Duration::from_secs(1));
    }

    #[test_log::test]
    fn parses_full_document() {
        let config = Config::from_json(
            r#"{
                "screens": ["DP-1", "HDMI-1", "DP-1"],
                "backend": "headless",
                "display": ":1",
                "target_fps": 60,
                "max_frames": 10,
                "recovery_retry_ms": 250,
                "headless_size": { "width": 3840, "height": 1080 }
            }"#,
        )
        .unwrap();

        assert_eq!(config.backend, BackendKind::Headless);
        assert_eq!(config.display.as_deref(), Some(":1"));
        assert_eq!(config.screen_set().len(), 2);
        assert_eq!(
            DesktopBounds::from(config.headless_size),
            DesktopBounds::new(3840, 1080)
        );
        assert_eq!(config.recovery_retry(), Duration::from_millis(250));
    }

    #[test_log::test]
    fn rejects_zero_fps_and_unknown_backend() {
        assert!(Config::from_json(r#"{"target_fps": 0}"#).is_err());
        assert!(Config::from_json(r#"{"backend": "wayland"}"#).is_err());
        assert!(Config::from_json(r#"{"screens": ["  "]}"#).is_err());
    }

    #[test_log::test]
    fn cli_flags_override_file_values() {
        let overrides =
            CliOverrides::parse(&args(&["--screen", "DP-2", "--headless", "--max-frames", "5"]))
                .unwrap();
        let mut config = Config {
            screens: vec!["DP-1".into()],
            ..Config::default()
        };
        overrides.apply(&mut config);

        assert_eq!(config.screens, vec!["DP-2".to_string()]);
        assert_eq!(config.backend, BackendKind::Headless);
        assert_eq!(config.max_frames, Some(5));
    }

    #[test_log::test]
    fn cli_rejects_unknown_and_incomplete_flags() {
        assert!(CliOverrides::parse(&args(&["--bogus"])).is_err());
        assert!(CliOverrides::parse(&args(&["--screen"])).is_err());
        assert!(CliOverrides::parse(&args(&["--max-frames", "ten"])).is_err());
    }

    #[test_log::test]
    fn zero_max_frames_means_unbounded() {
        let overrides = CliOverrides::parse(&args(&["--max-frames", "0"])).unwrap();
        let mut config = Config::default();
        overrides.apply(&mut config);
        assert_eq!(config.max_frames, None);
    }
}
