//! Small value types shared by the delegate contract and every backend.

use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Context};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

// =============================================================================
// Geometry
// =============================================================================

/// A position in the shared framebuffer coordinate space.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.x, self.y)
    }
}

impl FromStr for Point {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (x, y) = s.split_once(',').context("expected X,Y")?;
        let x = x.trim().parse().context("error parsing X")?;
        let y = y.trim().parse().context("error parsing Y")?;
        Ok(Self { x, y })
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

// =============================================================================
// Connection
// =============================================================================

bitflags! {
    /// Physical link types.
    ///
    /// A snapshot carries exactly one bit; unions are used as filters.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ConnectionType: u32 {
        const UNKNOWN = 1 << 0;
        const INTERNAL = 1 << 1;
        const VGA = 1 << 2;
        const HDMI = 1 << 3;
        const DVI = 1 << 4;
        const DISPLAYPORT = 1 << 5;
        const NETWORK = 1 << 6;
    }
}

impl ConnectionType {
    pub fn name(self) -> &'static str {
        const NAMES: [(ConnectionType, &str); 6] = [
            (ConnectionType::INTERNAL, "internal"),
            (ConnectionType::VGA, "vga"),
            (ConnectionType::HDMI, "hdmi"),
            (ConnectionType::DVI, "dvi"),
            (ConnectionType::DISPLAYPORT, "displayport"),
            (ConnectionType::NETWORK, "network"),
        ];

        NAMES
            .iter()
            .find_map(|&(ty, name)| (ty == self).then_some(name))
            .unwrap_or("unknown")
    }
}

// =============================================================================
// Content protection
// =============================================================================

/// Content-protection link state of an output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HdcpState {
    /// No protection requested.
    Undesired,
    /// Protection requested; the link may still be negotiating.
    Desired,
    /// Protection active and confirmed by the link.
    Enabled,
}

impl fmt::Display for HdcpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HdcpState::Undesired => "undesired",
            HdcpState::Desired => "desired",
            HdcpState::Enabled => "enabled",
        })
    }
}

impl FromStr for HdcpState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "undesired" => Self::Undesired,
            "desired" => Self::Desired,
            "enabled" => Self::Enabled,
            _ => bail!("unknown HDCP state: {s}"),
        })
    }
}

// =============================================================================
// Color
// =============================================================================

/// Pre-baked calibration a panel may be switched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ColorCalibrationProfile {
    Standard,
    Dynamic,
    Movie,
    Reading,
}

impl fmt::Display for ColorCalibrationProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Standard => "standard",
            Self::Dynamic => "dynamic",
            Self::Movie => "movie",
            Self::Reading => "reading",
        })
    }
}

impl FromStr for ColorCalibrationProfile {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "standard" => Self::Standard,
            "dynamic" => Self::Dynamic,
            "movie" => Self::Movie,
            "reading" => Self::Reading,
            _ => bail!("unknown color calibration profile: {s}"),
        })
    }
}

/// One point of a gamma or degamma lookup table.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GammaRampRgbEntry {
    pub r: u16,
    pub g: u16,
    pub b: u16,
}

impl GammaRampRgbEntry {
    pub const fn gray(value: u16) -> Self {
        Self {
            r: value,
            g: value,
            b: value,
        }
    }
}
