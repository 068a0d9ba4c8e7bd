//! Helper functions for the DRM backend.
//!
//! Property lookups, mode conversion and timing calculation, legacy gamma.

use std::iter::zip;

use anyhow::{ensure, Context};
use drm::control::{
    connector, crtc, property, Device as ControlDevice, Mode, ModeFlags, ResourceHandle,
};
use drm_ffi::drm_mode_modeinfo;
use tracing::warn;

use crate::color::{linear_ramp, resample, split_channels};
use crate::snapshot::DisplayMode;
use crate::types::{ConnectionType, GammaRampRgbEntry};

// =============================================================================
// DRM Property Helpers
// =============================================================================

/// Find a DRM property by name.
pub(super) fn find_drm_property(
    drm: &impl ControlDevice,
    resource: impl ResourceHandle,
    name: &str,
) -> Option<(property::Handle, property::Info, property::RawValue)> {
    let props = match drm.get_properties(resource) {
        Ok(props) => props,
        Err(err) => {
            warn!("error getting properties: {err:?}");
            return None;
        }
    };

    props.into_iter().find_map(|(handle, value)| {
        let info = drm.get_property(handle).ok()?;
        let n = info.name().to_str().ok()?;

        (n == name).then_some((handle, info, value))
    })
}

/// Get a DRM property value by handle.
pub(super) fn get_drm_property(
    drm: &impl ControlDevice,
    resource: impl ResourceHandle,
    prop: property::Handle,
) -> Option<property::RawValue> {
    let props = match drm.get_properties(resource) {
        Ok(props) => props,
        Err(err) => {
            warn!("error getting properties: {err:?}");
            return None;
        }
    };

    props
        .into_iter()
        .find_map(|(handle, value)| (handle == prop).then_some(value))
}

/// Reads a blob property such as `EDID`.
pub(super) fn get_blob_property(
    drm: &impl ControlDevice,
    resource: impl ResourceHandle,
    name: &str,
) -> anyhow::Result<Vec<u8>> {
    let (_, info, value) =
        find_drm_property(drm, resource, name).with_context(|| format!("no {name} property"))?;
    let blob = info
        .value_type()
        .convert_value(value)
        .as_blob()
        .with_context(|| format!("{name} was not blob type"))?;
    ensure!(blob != 0, "{name} blob is empty");
    drm.get_property_blob(blob)
        .with_context(|| format!("error getting {name} blob value"))
}

// =============================================================================
// EDID Helpers
// =============================================================================

/// Get the raw EDID and its parsed info from a connector.
pub(super) fn get_edid_info(
    drm: &impl ControlDevice,
    connector: connector::Handle,
) -> anyhow::Result<(libdisplay_info::info::Info, Vec<u8>)> {
    let data = get_blob_property(drm, connector, "EDID")?;
    let info = libdisplay_info::info::Info::parse_edid(&data).context("error parsing EDID")?;
    Ok((info, data))
}

/// Manufacturer id and product code, bytes 8..12 of the base block.
pub(super) fn edid_product_id(edid: &[u8]) -> u32 {
    match edid.get(8..12) {
        Some(&[m0, m1, p0, p1]) => u32::from_be_bytes([m0, m1, p1, p0]),
        _ => 0,
    }
}

/// "Make Model" from the EDID, or `None` if it names neither.
pub(super) fn edid_display_name(info: &libdisplay_info::info::Info) -> Option<String> {
    match (info.make(), info.model()) {
        (Some(make), Some(model)) => Some(format!("{make} {model}")),
        (make, model) => make.or(model),
    }
}

// =============================================================================
// Connectors
// =============================================================================

pub(super) fn format_connector_name(connector: &connector::Info) -> String {
    format!("{}-{}", connector.interface().as_str(), connector.interface_id())
}

pub(super) fn connection_type(interface: connector::Interface) -> ConnectionType {
    use connector::Interface;

    match interface {
        Interface::LVDS | Interface::EmbeddedDisplayPort | Interface::DSI | Interface::DPI => {
            ConnectionType::INTERNAL
        }
        Interface::VGA => ConnectionType::VGA,
        Interface::HDMIA | Interface::HDMIB => ConnectionType::HDMI,
        Interface::DVII | Interface::DVID | Interface::DVIA => ConnectionType::DVI,
        Interface::DisplayPort => ConnectionType::DISPLAYPORT,
        Interface::Virtual => ConnectionType::NETWORK,
        _ => ConnectionType::UNKNOWN,
    }
}

/// Picks a CRTC for a connector: the one it is currently driven by if no other connector took
/// it, else the first compatible free one.
pub(super) fn pick_crtc(
    drm: &impl ControlDevice,
    connector: &connector::Info,
    taken: &[crtc::Handle],
) -> Option<crtc::Handle> {
    let is_free = |crtc: &crtc::Handle| !taken.contains(crtc);

    let current = connector
        .current_encoder()
        .and_then(|encoder| drm.get_encoder(encoder).ok())
        .and_then(|encoder| encoder.crtc())
        .filter(is_free);
    if current.is_some() {
        return current;
    }

    let resources = drm.resource_handles().ok()?;
    connector
        .encoders()
        .iter()
        .flat_map(|encoder| drm.get_encoder(*encoder))
        .find_map(|encoder| {
            resources
                .filter_crtcs(encoder.possible_crtcs())
                .into_iter()
                .find(is_free)
        })
}

// =============================================================================
// Mode Calculations
// =============================================================================

/// Refresh rate of a DRM mode in Hz, rounded to hundredths.
pub(super) fn refresh_rate(mode: &Mode) -> f32 {
    let clock = u64::from(mode.clock()) * 1000;
    let htotal = u64::from(mode.hsync().2);
    let vtotal = u64::from(mode.vsync().2);

    let mut numerator = clock;
    let mut denominator = htotal * vtotal;
    if denominator == 0 {
        return mode.vrefresh() as f32;
    }

    if mode.flags().contains(ModeFlags::INTERLACE) {
        numerator *= 2;
    }

    if mode.flags().contains(ModeFlags::DBLSCAN) {
        denominator *= 2;
    }

    if mode.vscan() > 1 {
        denominator *= u64::from(mode.vscan());
    }

    let centihertz = (numerator * 100 + denominator / 2) / denominator;
    centihertz as f32 / 100.
}

pub(super) fn display_mode(mode: &Mode) -> DisplayMode {
    let (width, height) = mode.size();
    let display_mode = DisplayMode::new(u32::from(width), u32::from(height), refresh_rate(mode));
    if mode.flags().contains(ModeFlags::INTERLACE) {
        display_mode.interlaced()
    } else {
        display_mode
    }
}

/// Calculate a DRM mode using CVT (Coordinated Video Timings) with normal blanking.
pub fn calculate_mode_cvt(width: u16, height: u16, refresh: f64) -> Mode {
    let options = libdisplay_info::cvt::Options {
        red_blank_ver: libdisplay_info::cvt::ReducedBlankingVersion::None,
        h_pixels: i32::from(width),
        v_lines: i32::from(height),
        ip_freq_rqd: refresh,

        // Defaults
        video_opt: false,
        vblank: 0f64,
        additional_hblank: 0,
        early_vsync_rqd: false,
        int_rqd: false,
        margins_rqd: false,
    };
    let cvt_timing = libdisplay_info::cvt::Timing::compute(options);

    let hsync_start = width + cvt_timing.h_front_porch as u16;
    let vsync_start = (cvt_timing.v_lines_rnd + cvt_timing.v_front_porch) as u16;
    let hsync_end = hsync_start + cvt_timing.h_sync as u16;
    let vsync_end = vsync_start + cvt_timing.v_sync as u16;

    let htotal = hsync_end + cvt_timing.h_back_porch as u16;
    let vtotal = vsync_end + cvt_timing.v_back_porch as u16;

    let clock = f64::round(cvt_timing.act_pixel_freq * 1000f64) as u32;
    let vrefresh = f64::round(cvt_timing.act_frame_rate) as u32;

    let flags = drm_ffi::DRM_MODE_FLAG_NHSYNC | drm_ffi::DRM_MODE_FLAG_PVSYNC;

    let mode_name = format!("{width}x{height}@{:.2}", cvt_timing.act_frame_rate);
    let name = modeinfo_name_slice_from_string(&mode_name);

    Mode::from(drm_mode_modeinfo {
        clock,

        hdisplay: width,
        hsync_start,
        hsync_end,
        htotal,

        vdisplay: height,
        vsync_start,
        vsync_end,
        vtotal,

        vrefresh,

        flags,
        type_: drm_ffi::DRM_MODE_TYPE_USERDEF,
        name,

        // Defaults
        hskew: 0,
        vscan: 0,
    })
}

/// Convert a string to a mode name slice (max 31 chars + null terminator).
fn modeinfo_name_slice_from_string(mode_name: &str) -> [core::ffi::c_char; 32] {
    let mut name: [core::ffi::c_char; 32] = [0; 32];

    for (a, b) in zip(&mut name[..31], mode_name.as_bytes()) {
        // Can be u8 on aarch64 and i8 on x86_64.
        *a = *b as _;
    }

    name
}

// =============================================================================
// Gamma
// =============================================================================

/// Set gamma for a CRTC using the legacy API. `None` resets to linear.
pub fn set_gamma_for_crtc(
    device: &impl ControlDevice,
    crtc: crtc::Handle,
    ramp: Option<&[GammaRampRgbEntry]>,
) -> anyhow::Result<()> {
    let _span = tracy_client::span!("set_gamma_for_crtc");

    let info = device.get_crtc(crtc).context("error getting crtc info")?;
    let gamma_length = info.gamma_length() as usize;

    ensure!(gamma_length != 0, "setting gamma is not supported");

    // The legacy API provides no way to reset the gamma, so set a linear one manually.
    let ramp = match ramp {
        Some(ramp) => resample(ramp, gamma_length),
        None => linear_ramp(gamma_length),
    };
    let (red, green, blue) = split_channels(&ramp);

    device
        .set_gamma(crtc, &red, &green, &blue)
        .context("error setting gamma")?;

    Ok(())
}
