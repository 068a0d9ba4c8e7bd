//! CRTC color pipeline: `DEGAMMA_LUT`, `CTM` and `GAMMA_LUT` blobs.

use std::mem;
use std::num::NonZeroU64;
use std::os::fd::AsFd;

use anyhow::{ensure, Context};
use bytemuck::cast_slice_mut;
use drm::control::{crtc, property, Device as ControlDevice};
use tracing::{debug, warn};

use super::helpers::{get_drm_property, set_gamma_for_crtc};
use super::types::{drm_color_ctm, drm_color_lut, Card, ColorProps};
use crate::color::{ctm_fixed_point, resample, ColorCorrection};
use crate::types::GammaRampRgbEntry;

impl ColorProps {
    pub fn new(card: &Card, crtc: crtc::Handle) -> anyhow::Result<Self> {
        let mut props = Self {
            crtc,
            degamma_lut: None,
            degamma_lut_size: None,
            gamma_lut: None,
            gamma_lut_size: None,
            ctm: None,
            degamma_blob: None,
            gamma_blob: None,
            ctm_blob: None,
            modified: false,
        };

        let properties = card
            .get_properties(crtc)
            .context("error getting properties")?;
        for (prop, _) in properties {
            let Ok(info) = card.get_property(prop) else {
                continue;
            };

            let Ok(name) = info.name().to_str() else {
                continue;
            };

            let (slot, is_blob) = match name {
                "DEGAMMA_LUT" => (&mut props.degamma_lut, true),
                "DEGAMMA_LUT_SIZE" => (&mut props.degamma_lut_size, false),
                "GAMMA_LUT" => (&mut props.gamma_lut, true),
                "GAMMA_LUT_SIZE" => (&mut props.gamma_lut_size, false),
                "CTM" => (&mut props.ctm, true),
                _ => continue,
            };

            let type_ok = if is_blob {
                matches!(info.value_type(), property::ValueType::Blob)
            } else {
                matches!(info.value_type(), property::ValueType::UnsignedRange(_, _))
            };
            ensure!(type_ok, "wrong {name} value type");

            *slot = Some(prop);
        }

        debug!(
            "CRTC {crtc:?} color pipeline: degamma={} ctm={} gamma={}",
            props.degamma_lut.is_some(),
            props.ctm.is_some(),
            props.gamma_lut.is_some(),
        );

        Ok(props)
    }

    pub fn has_ctm(&self) -> bool {
        self.ctm.is_some()
    }

    fn lut_size(&self, card: &Card, prop: Option<property::Handle>) -> anyhow::Result<usize> {
        let prop = prop.context("missing LUT size property")?;
        let value =
            get_drm_property(card, self.crtc, prop).context("missing LUT size property value")?;
        ensure!(value != 0, "LUT size is zero");
        Ok(value as usize)
    }

    /// Programs every stage of `correction`. Stages set to `None` are reset to pass-through.
    ///
    /// Either every stage is written or, on error, the pipeline is left as it was.
    pub fn apply(&mut self, card: &Card, correction: &ColorCorrection) -> anyhow::Result<()> {
        let _span = tracy_client::span!("ColorProps::apply");

        if correction.degamma.is_some() {
            ensure!(self.degamma_lut.is_some(), "CRTC has no DEGAMMA_LUT");
        }
        if correction.matrix.is_some() {
            ensure!(self.ctm.is_some(), "CRTC has no CTM");
        }

        // Allocate every blob before touching the CRTC.
        let mut writes = Vec::new();
        if let Err(err) = self.create_blobs(card, correction, &mut writes) {
            destroy_blobs(card, &writes);
            return Err(err);
        }

        self.modified = true;

        let crtc = self.crtc;
        let write = |update: &BlobWrite, value: u64| {
            card.set_property(crtc, update.prop, property::Value::Blob(value).into())
                .with_context(|| format!("error setting {}", update.name))
        };
        if let Err(err) = commit(&writes, write) {
            destroy_blobs(card, &writes);
            return Err(err);
        }

        if self.gamma_lut.is_none() {
            let res = match &correction.gamma {
                Some(table) => set_gamma_for_crtc(card, self.crtc, Some(table)),
                None => {
                    // Identity is always accepted, even where legacy gamma is unsupported.
                    if let Err(err) = set_gamma_for_crtc(card, self.crtc, None) {
                        debug!("error resetting legacy gamma: {err:?}");
                    }
                    Ok(())
                }
            };
            if let Err(err) = res {
                rollback(&writes, writes.len(), write);
                destroy_blobs(card, &writes);
                return Err(err);
            }
        }

        for update in writes {
            let slot = match update.name {
                "DEGAMMA_LUT" => &mut self.degamma_blob,
                "CTM" => &mut self.ctm_blob,
                _ => &mut self.gamma_blob,
            };
            if let Some(old) = mem::replace(slot, update.blob) {
                if let Err(err) = card.destroy_property_blob(old.get()) {
                    warn!("error destroying previous {} blob: {err:?}", update.name);
                }
            }
        }

        Ok(())
    }

    fn create_blobs(
        &self,
        card: &Card,
        correction: &ColorCorrection,
        writes: &mut Vec<BlobWrite>,
    ) -> anyhow::Result<()> {
        if let Some(prop) = self.degamma_lut {
            let blob = match &correction.degamma {
                Some(table) => {
                    let size = self.lut_size(card, self.degamma_lut_size)?;
                    Some(lut_blob(card, table, size)?)
                }
                None => None,
            };
            writes.push(BlobWrite::new(prop, "DEGAMMA_LUT", blob, self.degamma_blob));
        }

        if let Some(prop) = self.ctm {
            let blob = match &correction.matrix {
                Some(matrix) => Some(ctm_blob(card, matrix)?),
                None => None,
            };
            writes.push(BlobWrite::new(prop, "CTM", blob, self.ctm_blob));
        }

        if let Some(prop) = self.gamma_lut {
            let blob = match &correction.gamma {
                Some(table) => {
                    let size = self.lut_size(card, self.gamma_lut_size)?;
                    Some(lut_blob(card, table, size)?)
                }
                None => None,
            };
            writes.push(BlobWrite::new(prop, "GAMMA_LUT", blob, self.gamma_blob));
        }

        Ok(())
    }

    /// Resets the pipeline to pass-through and frees our blobs.
    pub fn reset(&mut self, card: &Card) -> anyhow::Result<()> {
        self.apply(card, &ColorCorrection::identity())
    }
}

fn create_blob(card: &Card, data: &mut [u8]) -> anyhow::Result<NonZeroU64> {
    let blob = drm_ffi::mode::create_property_blob(card.as_fd(), data)
        .context("error creating property blob")?;
    NonZeroU64::new(u64::from(blob.blob_id)).context("kernel returned blob id 0")
}

fn lut_blob(card: &Card, table: &[GammaRampRgbEntry], size: usize) -> anyhow::Result<NonZeroU64> {
    let mut data = resample(table, size)
        .into_iter()
        .map(|entry| drm_color_lut {
            red: entry.r,
            green: entry.g,
            blue: entry.b,
            reserved: 0,
        })
        .collect::<Vec<_>>();
    create_blob(card, cast_slice_mut(&mut data))
}

fn ctm_blob(card: &Card, matrix: &[f32; 9]) -> anyhow::Result<NonZeroU64> {
    let mut data = [drm_color_ctm {
        matrix: ctm_fixed_point(matrix),
    }];
    create_blob(card, cast_slice_mut(&mut data))
}

/// One blob property update: the new blob, or pass-through, replacing `previous`.
#[derive(Debug, Clone, Copy)]
struct BlobWrite {
    prop: property::Handle,
    name: &'static str,
    blob: Option<NonZeroU64>,
    previous: Option<NonZeroU64>,
}

impl BlobWrite {
    fn new(
        prop: property::Handle,
        name: &'static str,
        blob: Option<NonZeroU64>,
        previous: Option<NonZeroU64>,
    ) -> Self {
        Self {
            prop,
            name,
            blob,
            previous,
        }
    }
}

fn blob_value(blob: Option<NonZeroU64>) -> u64 {
    blob.map(NonZeroU64::get).unwrap_or(0)
}

/// Writes every update in order. If one fails, the ones before it are restored.
fn commit<W>(writes: &[BlobWrite], mut write: W) -> anyhow::Result<()>
where
    W: FnMut(&BlobWrite, u64) -> anyhow::Result<()>,
{
    let _span = tracy_client::span!("set_property");

    for (i, update) in writes.iter().enumerate() {
        if let Err(err) = write(update, blob_value(update.blob)) {
            rollback(writes, i, write);
            return Err(err);
        }
    }

    Ok(())
}

/// Points the first `written` updates back at their previous blobs.
fn rollback<W>(writes: &[BlobWrite], written: usize, mut write: W)
where
    W: FnMut(&BlobWrite, u64) -> anyhow::Result<()>,
{
    for update in writes[..written].iter().rev() {
        if let Err(err) = write(update, blob_value(update.previous)) {
            warn!("error restoring {}: {err:?}", update.name);
        }
    }
}

/// Destroys the blobs allocated for `writes`.
fn destroy_blobs(card: &Card, writes: &[BlobWrite]) {
    for update in writes {
        if let Some(blob) = update.blob {
            if let Err(err) = card.destroy_property_blob(blob.get()) {
                warn!("error destroying {} property blob: {err:?}", update.name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;

    fn update(prop: u32, name: &'static str, blob: u64, previous: u64) -> BlobWrite {
        BlobWrite::new(
            drm::control::from_u32(prop).unwrap(),
            name,
            NonZeroU64::new(blob),
            NonZeroU64::new(previous),
        )
    }

    #[test]
    fn failed_stage_restores_earlier_stages() {
        let writes = [
            update(1, "DEGAMMA_LUT", 10, 0),
            update(2, "CTM", 20, 7),
            update(3, "GAMMA_LUT", 30, 8),
        ];

        let log = RefCell::new(Vec::new());
        let res = commit(&writes, |update, value| {
            log.borrow_mut().push((update.name, value));
            anyhow::ensure!(update.name != "GAMMA_LUT" || value == 8, "rejected");
            Ok(())
        });

        assert!(res.is_err());
        assert_eq!(
            log.into_inner(),
            [
                ("DEGAMMA_LUT", 10),
                ("CTM", 20),
                ("GAMMA_LUT", 30),
                ("CTM", 7),
                ("DEGAMMA_LUT", 0),
            ]
        );
    }

    #[test]
    fn successful_commit_writes_each_stage_once() {
        let writes = [update(1, "CTM", 0, 5), update(2, "GAMMA_LUT", 12, 0)];

        let mut log = Vec::new();
        commit(&writes, |update, value| {
            log.push((update.name, value));
            Ok(())
        })
        .unwrap();

        assert_eq!(log, [("CTM", 0), ("GAMMA_LUT", 12)]);
    }
}
