//! Output snapshots and their generation-tagged handles.
//!
//! A snapshot is a value describing one connected output at the time of an enumeration. The
//! backend keeps the authoritative copy in a [`SnapshotArena`]; every completed enumeration
//! starts a new generation, and handles from older generations stop resolving.

use std::fmt;
use std::str::FromStr;

use anyhow::{ensure, Context};
use serde::{Deserialize, Serialize};

use crate::types::{ColorCalibrationProfile, ConnectionType, Point, Size};

/// A resolution, refresh rate and scan type an output can be driven at.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DisplayMode {
    pub size: Size,
    pub refresh_rate: f32,
    pub is_interlaced: bool,
}

impl DisplayMode {
    pub const fn new(width: u32, height: u32, refresh_rate: f32) -> Self {
        Self {
            size: Size::new(width, height),
            refresh_rate,
            is_interlaced: false,
        }
    }

    pub const fn interlaced(mut self) -> Self {
        self.is_interlaced = true;
        self
    }
}

impl fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.size, self.refresh_rate)?;
        if self.is_interlaced {
            f.write_str("i")?;
        }
        Ok(())
    }
}

impl FromStr for DisplayMode {
    type Err = anyhow::Error;

    /// Parses `WIDTHxHEIGHT@REFRESH`, with an optional trailing `i` for interlaced modes.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (s, is_interlaced) = match s.strip_suffix('i') {
            Some(rest) => (rest, true),
            None => (s, false),
        };

        let (size, refresh) = s.split_once('@').context("expected WIDTHxHEIGHT@REFRESH")?;
        let (width, height) = size.split_once('x').context("expected WIDTHxHEIGHT")?;

        let width = width.parse().context("error parsing width")?;
        let height = height.parse().context("error parsing height")?;
        let refresh_rate: f32 = refresh.parse().context("error parsing refresh rate")?;
        ensure!(
            refresh_rate.is_finite() && refresh_rate > 0.,
            "refresh rate must be positive"
        );

        Ok(Self {
            size: Size::new(width, height),
            refresh_rate,
            is_interlaced,
        })
    }
}

/// Stable identity of an output across enumerations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DisplayId(pub u64);

impl fmt::Display for DisplayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference to an output as seen by one particular enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputHandle {
    pub id: DisplayId,
    pub generation: u64,
}

/// One connected output as reported by an enumeration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplaySnapshot {
    pub(crate) handle: OutputHandle,
    /// Connector name, e.g. `eDP-1`.
    pub name: String,
    /// Human-readable monitor name, from EDID where available.
    pub display_name: String,
    pub connection_type: ConnectionType,
    pub product_id: u32,
    /// Physical size in millimetres.
    pub physical_size: Size,
    pub origin: Point,
    pub modes: Vec<DisplayMode>,
    /// `None` when the output is disabled.
    pub current_mode: Option<DisplayMode>,
    pub native_mode: Option<DisplayMode>,
    pub hdcp_capable: bool,
    pub has_color_correction_matrix: bool,
    pub color_profiles: Vec<ColorCalibrationProfile>,
    #[serde(skip)]
    pub edid: Vec<u8>,
}

impl DisplaySnapshot {
    pub fn new(id: DisplayId, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            handle: OutputHandle { id, generation: 0 },
            display_name: name.clone(),
            name,
            connection_type: ConnectionType::UNKNOWN,
            product_id: 0,
            physical_size: Size::default(),
            origin: Point::default(),
            modes: Vec::new(),
            current_mode: None,
            native_mode: None,
            hdcp_capable: false,
            has_color_correction_matrix: false,
            color_profiles: Vec::new(),
            edid: Vec::new(),
        }
    }

    pub fn handle(&self) -> OutputHandle {
        self.handle
    }

    pub fn id(&self) -> DisplayId {
        self.handle.id
    }

    pub fn is_enabled(&self) -> bool {
        self.current_mode.is_some()
    }

    pub fn has_mode(&self, mode: &DisplayMode) -> bool {
        self.modes.contains(mode)
    }
}

// =============================================================================
// SnapshotArena
// =============================================================================

/// Why a snapshot handle did not resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleHandle {
    /// The handle comes from an enumeration that has since been superseded.
    Superseded { handle: u64, current: u64 },
    /// The generation is current but the output is not part of it.
    Unknown(DisplayId),
}

impl fmt::Display for StaleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StaleHandle::Superseded { handle, current } => write!(
                f,
                "snapshot from generation {handle} superseded by generation {current}"
            ),
            StaleHandle::Unknown(id) => write!(f, "display {id} is not in the current generation"),
        }
    }
}

impl std::error::Error for StaleHandle {}

/// Snapshot records of the most recent completed enumeration.
#[derive(Debug, Default)]
pub struct SnapshotArena {
    generation: u64,
    records: Vec<DisplaySnapshot>,
}

impl SnapshotArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generation of the current records; `0` before the first enumeration.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Replaces the records with a fresh enumeration and returns the values to hand out.
    pub fn publish(&mut self, mut records: Vec<DisplaySnapshot>) -> Vec<DisplaySnapshot> {
        self.generation += 1;
        for record in &mut records {
            record.handle.generation = self.generation;
        }
        self.records = records;
        self.records.clone()
    }

    pub fn get(&self, handle: OutputHandle) -> Result<&DisplaySnapshot, StaleHandle> {
        let idx = self.index_of(handle)?;
        Ok(&self.records[idx])
    }

    pub fn get_mut(&mut self, handle: OutputHandle) -> Result<&mut DisplaySnapshot, StaleHandle> {
        let idx = self.index_of(handle)?;
        Ok(&mut self.records[idx])
    }

    pub fn records(&self) -> &[DisplaySnapshot] {
        &self.records
    }

    fn index_of(&self, handle: OutputHandle) -> Result<usize, StaleHandle> {
        if handle.generation != self.generation || self.generation == 0 {
            return Err(StaleHandle::Superseded {
                handle: handle.generation,
                current: self.generation,
            });
        }

        self.records
            .iter()
            .position(|r| r.handle.id == handle.id)
            .ok_or(StaleHandle::Unknown(handle.id))
    }
}
