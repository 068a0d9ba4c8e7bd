//! Configuration for display-delegate.
//!
//! The config file is KDL, decoded with `knuffel`. Errors are reported through `miette`.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use miette::{Context, IntoDiagnostic};
use tracing::debug;

pub mod output;

pub use crate::output::{
    ColorProfileKind, ColorProfiles, ConnectionKind, FakeOutput, ModeNode, Origin, OutputName,
    PhysicalSize,
};

#[derive(knuffel::Decode, Debug, Clone, PartialEq)]
pub struct Config {
    #[knuffel(child, unwrap(argument), default)]
    pub backend: BackendKind,
    #[knuffel(child, unwrap(argument, str))]
    pub background_color: Option<Argb>,
    #[knuffel(child, default)]
    pub drm: DrmConfig,
    #[knuffel(child, default)]
    pub fake: FakeConfig,
}

#[derive(knuffel::DecodeScalar, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// DRM when the configured device node exists, fake otherwise.
    #[default]
    Auto,
    Drm,
    Fake,
}

#[derive(knuffel::Decode, Debug, Clone, PartialEq, Eq)]
pub struct DrmConfig {
    #[knuffel(child, unwrap(argument), default = Self::default().device)]
    pub device: PathBuf,
    #[knuffel(child, unwrap(argument), default = Self::default().hotplug_poll_interval_ms)]
    pub hotplug_poll_interval_ms: u32,
}

impl Default for DrmConfig {
    fn default() -> Self {
        Self {
            device: PathBuf::from("/dev/dri/card0"),
            hotplug_poll_interval_ms: 1000,
        }
    }
}

#[derive(knuffel::Decode, Debug, Default, Clone, PartialEq)]
pub struct FakeConfig {
    #[knuffel(child, unwrap(argument), default)]
    pub display_control: DisplayControl,
    #[knuffel(child, unwrap(argument), default)]
    pub hdcp_negotiation: HdcpNegotiation,
    #[knuffel(children(name = "output"))]
    pub outputs: Vec<FakeOutput>,
}

/// Who holds display control when the fake backend starts.
#[derive(knuffel::DecodeScalar, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum DisplayControl {
    #[default]
    Available,
    HeldElsewhere,
}

/// How the fake backend resolves HDCP link negotiation.
#[derive(knuffel::DecodeScalar, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum HdcpNegotiation {
    /// Desired is promoted to Enabled as soon as it is requested.
    #[default]
    Succeed,
    /// The link never authenticates and the output stays Desired.
    Fail,
    /// Negotiation stays pending until the fake controller finishes it.
    Manual,
}

/// A color packed as `0xAARRGGBB`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Argb(pub u32);

impl FromStr for Argb {
    type Err = csscolorparser::ParseColorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let [r, g, b, a] = csscolorparser::parse(s)?.to_rgba8();
        Ok(Self(u32::from_be_bytes([a, r, g, b])))
    }
}

impl Config {
    pub fn load(path: &Path) -> miette::Result<Self> {
        let _span = tracy_client::span!("Config::load");

        let contents = std::fs::read_to_string(path)
            .into_diagnostic()
            .with_context(|| format!("error reading {path:?}"))?;

        let config = Self::parse(
            path.file_name()
                .and_then(OsStr::to_str)
                .unwrap_or("config.kdl"),
            &contents,
        )
        .context("error parsing")?;
        debug!("loaded config from {path:?}");
        Ok(config)
    }

    pub fn parse(filename: &str, text: &str) -> Result<Self, knuffel::Error> {
        let _span = tracy_client::span!("Config::parse");
        knuffel::parse(filename, text)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::parse(
            "default-config.kdl",
            include_str!("../../resources/default-config.kdl"),
        )
        .unwrap()
    }
}
