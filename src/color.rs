//! Color correction pipeline values.
//!
//! The pipeline is degamma LUT, then 3x3 color transform matrix, then gamma LUT. Each stage is
//! either a table/matrix or identity; empty inputs select identity.

use anyhow::{ensure, Context};
use serde::Serialize;

use crate::types::GammaRampRgbEntry;

pub const IDENTITY_MATRIX: [f32; 9] = [1., 0., 0., 0., 1., 0., 0., 0., 1.];

/// Normalized color correction for one output.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct ColorCorrection {
    pub degamma: Option<Vec<GammaRampRgbEntry>>,
    pub gamma: Option<Vec<GammaRampRgbEntry>>,
    /// Row-major.
    pub matrix: Option<[f32; 9]>,
}

impl ColorCorrection {
    pub fn identity() -> Self {
        Self::default()
    }

    pub fn from_tables(
        degamma: &[GammaRampRgbEntry],
        gamma: &[GammaRampRgbEntry],
        matrix: &[f32],
    ) -> anyhow::Result<Self> {
        let degamma = table(degamma).context("invalid degamma table")?;
        let gamma = table(gamma).context("invalid gamma table")?;

        let matrix = if matrix.is_empty() {
            None
        } else {
            let matrix: [f32; 9] = matrix
                .try_into()
                .ok()
                .with_context(|| format!("expected 9 matrix values, got {}", matrix.len()))?;
            ensure!(
                matrix.iter().all(|v| v.is_finite()),
                "matrix values must be finite"
            );
            (matrix != IDENTITY_MATRIX).then_some(matrix)
        };

        Ok(Self {
            degamma,
            gamma,
            matrix,
        })
    }

    pub fn is_identity(&self) -> bool {
        self.degamma.is_none() && self.gamma.is_none() && self.matrix.is_none()
    }
}

fn table(entries: &[GammaRampRgbEntry]) -> anyhow::Result<Option<Vec<GammaRampRgbEntry>>> {
    if entries.is_empty() {
        return Ok(None);
    }
    ensure!(entries.len() >= 2, "a lookup table needs at least 2 entries");

    if entries == linear_ramp(entries.len()) {
        return Ok(None);
    }
    Ok(Some(entries.to_vec()))
}

/// Identity lookup table with `size` entries.
pub fn linear_ramp(size: usize) -> Vec<GammaRampRgbEntry> {
    match size {
        0 => Vec::new(),
        1 => vec![GammaRampRgbEntry::gray(0)],
        _ => (0..size)
            .map(|i| {
                let value = (i as u64 * u64::from(u16::MAX) / (size as u64 - 1)) as u16;
                GammaRampRgbEntry::gray(value)
            })
            .collect(),
    }
}

/// Linearly interpolates `table` to `size` entries, keeping both endpoints.
pub fn resample(table: &[GammaRampRgbEntry], size: usize) -> Vec<GammaRampRgbEntry> {
    if table.len() == size || table.is_empty() || size == 0 {
        return table.iter().copied().cycle().take(size).collect();
    }
    if size == 1 || table.len() == 1 {
        return vec![table[0]; size];
    }

    let lerp = |a: u16, b: u16, t: f64| {
        let (a, b) = (f64::from(a), f64::from(b));
        (a + (b - a) * t).round() as u16
    };

    let last = (table.len() - 1) as f64;
    (0..size)
        .map(|i| {
            let pos = i as f64 * last / (size - 1) as f64;
            let lo = pos.floor() as usize;
            let hi = (lo + 1).min(table.len() - 1);
            let t = pos - lo as f64;
            let (a, b) = (table[lo], table[hi]);
            GammaRampRgbEntry {
                r: lerp(a.r, b.r, t),
                g: lerp(a.g, b.g, t),
                b: lerp(a.b, b.b, t),
            }
        })
        .collect()
}

/// Splits a table into the separate red, green and blue ramps of the legacy gamma ioctl.
pub fn split_channels(table: &[GammaRampRgbEntry]) -> (Vec<u16>, Vec<u16>, Vec<u16>) {
    let red = table.iter().map(|e| e.r).collect();
    let green = table.iter().map(|e| e.g).collect();
    let blue = table.iter().map(|e| e.b).collect();
    (red, green, blue)
}

/// Converts a matrix to the S31.32 sign-magnitude fixed point used by the kernel `CTM` blob.
pub fn ctm_fixed_point(matrix: &[f32; 9]) -> [u64; 9] {
    matrix.map(|value| {
        let magnitude = (f64::from(value).abs() * (1u64 << 32) as f64) as u64 & !(1 << 63);
        if value.is_sign_negative() && magnitude != 0 {
            magnitude | (1 << 63)
        } else {
            magnitude
        }
    })
}
