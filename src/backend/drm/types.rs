//! Type definitions for the DRM backend.

use std::fs::{File, OpenOptions};
use std::num::NonZeroU64;
use std::os::fd::{AsFd, BorrowedFd};
use std::path::Path;

use anyhow::Context;
use drm::control::dumbbuffer::DumbBuffer;
use drm::control::{connector, crtc, framebuffer, property, Mode};

use crate::snapshot::DisplayMode;
use crate::types::{Point, Size};

/// An open DRM primary node.
#[derive(Debug)]
pub struct Card(File);

impl AsFd for Card {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

impl drm::Device for Card {}
impl drm::control::Device for Card {}

impl Card {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("error opening {path:?}"))?;
        Ok(Self(file))
    }
}

// =============================================================================
// Internal Structs
// =============================================================================

/// A connector seen by an enumeration.
pub(super) struct ConnectorState {
    pub handle: connector::Handle,
    pub name: String,
    /// CRTC driving this connector, if one was available.
    pub crtc: Option<crtc::Handle>,
    /// Modes the connector advertised.
    pub modes: Vec<Mode>,
}

/// A mode registered with `add_mode`: what the caller asked for and the timings we computed.
#[derive(Debug, Clone, Copy)]
pub(super) struct CustomMode {
    pub requested: DisplayMode,
    pub mode: Mode,
}

/// What a CRTC was last set to by us.
#[derive(Debug, Clone, Copy)]
pub(super) struct Scanout {
    pub connector: connector::Handle,
    pub mode: Mode,
    pub origin: Point,
}

/// The shared framebuffer outputs scan out of.
pub(super) struct FrameBuffer {
    pub buffer: DumbBuffer,
    pub handle: framebuffer::Handle,
    pub size: Size,
}

/// Color pipeline properties of a CRTC.
///
/// Every property is optional: older drivers only have the legacy gamma ioctl.
pub(super) struct ColorProps {
    pub crtc: crtc::Handle,
    pub degamma_lut: Option<property::Handle>,
    pub degamma_lut_size: Option<property::Handle>,
    pub gamma_lut: Option<property::Handle>,
    pub gamma_lut_size: Option<property::Handle>,
    pub ctm: Option<property::Handle>,
    /// Blobs we set and must destroy when replacing them.
    pub degamma_blob: Option<NonZeroU64>,
    pub gamma_blob: Option<NonZeroU64>,
    pub ctm_blob: Option<NonZeroU64>,
    /// Whether we ever wrote to this pipeline.
    pub modified: bool,
}

/// Mirrors the kernel's `struct drm_color_lut`.
#[allow(non_camel_case_types)]
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub(super) struct drm_color_lut {
    pub red: u16,
    pub green: u16,
    pub blue: u16,
    pub reserved: u16,
}

/// Mirrors the kernel's `struct drm_color_ctm`.
#[allow(non_camel_case_types)]
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub(super) struct drm_color_ctm {
    pub matrix: [u64; 9],
}

/// Values of the connector `Content Protection` property.
pub(super) const CONTENT_PROTECTION_UNDESIRED: u64 = 0;
pub(super) const CONTENT_PROTECTION_DESIRED: u64 = 1;
pub(super) const CONTENT_PROTECTION_ENABLED: u64 = 2;

pub(super) const DRM_MODE_DPMS_ON: u64 = 0;
