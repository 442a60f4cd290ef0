//! bluewm configuration.
//!
//! The config is a KDL document decoded with `knuffel`. Every section is optional and falls back
//! to the built-in defaults, so an empty file and a missing file behave the same.

#[macro_use]
extern crate tracing;

use std::path::{Path, PathBuf};

use miette::{Context, IntoDiagnostic};

pub mod input;

pub use crate::input::{Input, Keyboard, Xkb};

#[derive(knuffel::Decode, Debug, Default, Clone, PartialEq)]
pub struct Config {
    #[knuffel(child, default)]
    pub input: Input,
    #[knuffel(child, default)]
    pub cursor: Cursor,
    #[knuffel(child, default)]
    pub placement: Placement,
    #[knuffel(child, unwrap(argument))]
    pub brightness: Option<f64>,
    #[knuffel(child, default)]
    pub limits: Limits,
    #[knuffel(child, default)]
    pub session: Session,
    #[knuffel(child, default)]
    pub headless: Headless,
    #[knuffel(child, default)]
    pub debug: DebugConfig,
}

#[derive(knuffel::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    #[knuffel(child, unwrap(argument), default = String::from("default"))]
    pub xcursor_theme: String,
    #[knuffel(child, unwrap(argument), default = 24)]
    pub xcursor_size: u8,
}

impl Default for Cursor {
    fn default() -> Self {
        Self {
            xcursor_theme: String::from("default"),
            xcursor_size: 24,
        }
    }
}

/// Where newly created native windows appear before anyone moves them.
#[derive(knuffel::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    #[knuffel(child, unwrap(argument), default = 50)]
    pub default_x: i32,
    #[knuffel(child, unwrap(argument), default = 50)]
    pub default_y: i32,
}

impl Default for Placement {
    fn default() -> Self {
        Self {
            default_x: 50,
            default_y: 50,
        }
    }
}

#[derive(knuffel::Decode, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    #[knuffel(child, unwrap(argument))]
    pub max_surfaces: Option<u32>,
}

#[derive(knuffel::Decode, Debug, Default, Clone, PartialEq, Eq)]
pub struct Session {
    /// Value exported as `LIBSEAT_BACKEND` before the seat is opened.
    #[knuffel(child, unwrap(argument))]
    pub libseat_backend: Option<String>,
}

#[derive(knuffel::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Headless {
    #[knuffel(child, unwrap(argument), default = 1)]
    pub outputs: u8,
    /// Simulated gamma ramp length, 0 means the virtual outputs have no gamma support.
    #[knuffel(child, unwrap(argument), default = 256)]
    pub gamma_size: u32,
}

impl Default for Headless {
    fn default() -> Self {
        Self {
            outputs: 1,
            gamma_size: 256,
        }
    }
}

#[derive(knuffel::Decode, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DebugConfig {
    #[knuffel(child)]
    pub offline_control: bool,
    #[knuffel(child)]
    pub disable_xwayland: bool,
}

impl Config {
    pub fn parse(filename: &str, text: &str) -> Result<Self, knuffel::Error> {
        let _span = tracy_client::span!("Config::parse");
        knuffel::parse(filename, text)
    }

    pub fn load(path: &Path) -> miette::Result<Self> {
        let _span = tracy_client::span!("Config::load");

        let contents = std::fs::read_to_string(path)
            .into_diagnostic()
            .with_context(|| format!("error reading {path:?}"))?;

        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("config.kdl");
        let config = Self::parse(filename, &contents).context("error parsing")?;
        debug!("loaded config from {path:?}");
        Ok(config)
    }

    /// Loads the config at `path`, or returns defaults if the file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> miette::Result<Self> {
        match path {
            Some(path) if path.exists() => Self::load(path),
            Some(path) => {
                info!("config file {path:?} not found, using defaults");
                Ok(Self::default())
            }
            None => Ok(Self::default()),
        }
    }

    /// Brightness to apply at startup, clamped the same way as runtime requests.
    pub fn initial_brightness(&self) -> f64 {
        self.brightness.unwrap_or(1.).clamp(0.1, 1.)
    }
}

/// Default config location: `$XDG_CONFIG_HOME/bluewm/config.kdl`.
pub fn default_config_path(config_dir: &Path) -> PathBuf {
    config_dir.join("config.kdl")
}
