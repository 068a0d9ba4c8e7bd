//! DRM/KMS backend on a Linux `/dev/dri/cardN` node.
//!
//! Uses legacy modesetting: one shared dumb framebuffer, `SETCRTC` per output, connector and
//! CRTC properties for content protection and color. The module is split as follows:
//! - `types.rs` - the card, connector bookkeeping and kernel struct mirrors
//! - `helpers.rs` - property lookups, mode conversion and CVT timings
//! - `color.rs` - the CRTC color pipeline
//! - `hotplug.rs` - connector polling
//!
//! Every request is a synchronous ioctl, so asynchronous operations run inline and only their
//! callbacks go through the completion queue.

mod color;
mod helpers;
mod hotplug;
mod types;

use std::cell::Cell;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use anyhow::{bail, ensure, Context};
use calloop::LoopHandle;
use display_delegate_config::DrmConfig;
use drm::buffer::DrmFourcc;
use drm::control::{connector, crtc, Device as ControlDevice, Mode, ModeTypeFlags};
use drm::Device as _;
use tracing::{debug, trace, warn};

pub use helpers::{calculate_mode_cvt, set_gamma_for_crtc};
pub use types::Card;

use helpers::{
    connection_type, display_mode, edid_display_name, edid_product_id, find_drm_property,
    format_connector_name, get_edid_info, pick_crtc,
};
use types::{
    ColorProps, ConnectorState, CustomMode, FrameBuffer, Scanout, CONTENT_PROTECTION_DESIRED,
    CONTENT_PROTECTION_ENABLED, CONTENT_PROTECTION_UNDESIRED, DRM_MODE_DPMS_ON,
};

use crate::color::ColorCorrection;
use crate::completion::CompletionQueue;
use crate::delegate::{
    ConfigureCallback, DisplayControlCallback, DisplayDelegate, GetDisplaysCallback,
    GetHdcpStateCallback, SetHdcpStateCallback,
};
use crate::grab::ServerGrab;
use crate::observer::{DisplayObserver, ObserverRegistry, ObserverToken, ServerEvent};
use crate::snapshot::{DisplayId, DisplayMode, DisplaySnapshot, OutputHandle, SnapshotArena};
use crate::types::{ColorCalibrationProfile, GammaRampRgbEntry, HdcpState, Point, Size};

/// Largest custom mode dimension we compute timings for.
const MAX_CUSTOM_MODE_SIZE: u32 = 16384;

pub struct DrmBackend {
    card: Rc<Card>,
    queue: CompletionQueue,
    observers: ObserverRegistry,
    grab: ServerGrab,
    arena: SnapshotArena,
    /// Display ids are stable for as long as the backend lives.
    ids: HashMap<connector::Handle, DisplayId>,
    next_id: u64,
    /// Connectors of the current enumeration.
    connectors: HashMap<DisplayId, ConnectorState>,
    custom_modes: HashMap<DisplayId, Vec<CustomMode>>,
    scanouts: HashMap<crtc::Handle, Scanout>,
    framebuffer: Option<FrameBuffer>,
    background_color: u32,
    color: HashMap<crtc::Handle, ColorProps>,
    is_master: bool,
    initialized: bool,
    /// Cleared on drop to stop the hotplug timer.
    alive: Rc<Cell<bool>>,
}

impl DrmBackend {
    pub fn new<D: 'static>(
        config: &DrmConfig,
        event_loop: &LoopHandle<'static, D>,
    ) -> anyhow::Result<Self> {
        let card = Rc::new(Card::open(&config.device)?);
        let queue = CompletionQueue::new(event_loop)?;
        let observers = ObserverRegistry::new();
        let alive = Rc::new(Cell::new(true));

        if config.hotplug_poll_interval_ms == 0 {
            debug!("connector polling disabled");
        } else {
            let interval = Duration::from_millis(u64::from(config.hotplug_poll_interval_ms));
            hotplug::watch(
                event_loop,
                card.clone(),
                observers.clone(),
                interval,
                alive.clone(),
            )?;
        }

        Ok(Self {
            card,
            queue,
            observers,
            grab: ServerGrab::new(),
            arena: SnapshotArena::new(),
            ids: HashMap::new(),
            next_id: 1,
            connectors: HashMap::new(),
            custom_modes: HashMap::new(),
            scanouts: HashMap::new(),
            framebuffer: None,
            background_color: 0xff000000,
            color: HashMap::new(),
            is_master: false,
            initialized: false,
            alive,
        })
    }

    fn check_grabbed(&self, what: &str) {
        if !self.grab.is_held() {
            warn!("{what} called without the server grab");
        }
    }

    /// Looks up the connector behind a snapshot handle from the current enumeration.
    fn connector(&self, handle: OutputHandle) -> anyhow::Result<&ConnectorState> {
        self.arena.get(handle)?;
        self.connectors
            .get(&handle.id)
            .context("connector is not part of the current enumeration")
    }

    /// Finds the timings for `requested` among advertised and registered modes.
    fn find_mode(&self, id: DisplayId, requested: &DisplayMode) -> Option<Mode> {
        let advertised = self
            .connectors
            .get(&id)?
            .modes
            .iter()
            .copied()
            .find(|mode| display_mode(mode) == *requested);

        advertised.or_else(|| {
            self.custom_modes
                .get(&id)?
                .iter()
                .find(|custom| custom.requested == *requested)
                .map(|custom| custom.mode)
        })
    }

    /// The mode to report for timings read back from a CRTC.
    fn reported_mode(&self, id: DisplayId, mode: &Mode) -> DisplayMode {
        self.custom_modes
            .get(&id)
            .and_then(|custom| custom.iter().find(|c| same_timings(&c.mode, mode)))
            .map(|custom| custom.requested)
            .unwrap_or_else(|| display_mode(mode))
    }

    // =========================================================================
    // Enumeration
    // =========================================================================

    fn enumerate(&mut self) -> anyhow::Result<Vec<DisplaySnapshot>> {
        let _span = tracy_client::span!("DrmBackend::enumerate");

        let card = &*self.card;
        let resources = card
            .resource_handles()
            .context("error getting DRM resources")?;

        let mut connectors = HashMap::new();
        let mut snapshots = Vec::new();
        let mut taken = Vec::new();

        for &handle in resources.connectors() {
            let info = match card.get_connector(handle, true) {
                Ok(info) => info,
                Err(err) => {
                    warn!("error probing connector: {err:?}");
                    continue;
                }
            };

            if info.state() != connector::State::Connected {
                continue;
            }

            let name = format_connector_name(&info);
            let id = *self.ids.entry(handle).or_insert_with(|| {
                let id = DisplayId(self.next_id);
                self.next_id += 1;
                id
            });

            let crtc = pick_crtc(card, &info, &taken);
            taken.extend(crtc);
            if crtc.is_none() {
                debug!("no free CRTC for {name}");
            }

            let mut snapshot = DisplaySnapshot::new(id, name.clone());
            snapshot.connection_type = connection_type(info.interface());
            if let Some((width, height)) = info.size() {
                snapshot.physical_size = Size::new(width, height);
            }

            for mode in info.modes() {
                let mode = display_mode(mode);
                if !snapshot.modes.contains(&mode) {
                    snapshot.modes.push(mode);
                }
            }
            for custom in self.custom_modes.get(&id).into_iter().flatten() {
                if !snapshot.modes.contains(&custom.requested) {
                    snapshot.modes.push(custom.requested);
                }
            }

            snapshot.native_mode = info
                .modes()
                .iter()
                .find(|mode| mode.mode_type().contains(ModeTypeFlags::PREFERRED))
                .or_else(|| info.modes().first())
                .map(display_mode);

            // Only report what is on screen if it is on the CRTC we would drive.
            let current_crtc = info
                .current_encoder()
                .and_then(|encoder| card.get_encoder(encoder).ok())
                .and_then(|encoder| encoder.crtc());
            if let Some(current) = current_crtc.filter(|c| Some(*c) == crtc) {
                match card.get_crtc(current) {
                    Ok(crtc_info) => {
                        snapshot.current_mode =
                            crtc_info.mode().map(|mode| self.reported_mode(id, &mode));
                        let (x, y) = crtc_info.position();
                        snapshot.origin = Point::new(x as i32, y as i32);
                    }
                    Err(err) => warn!("error getting CRTC info for {name}: {err:?}"),
                }
            }

            match get_edid_info(card, handle) {
                Ok((edid, data)) => {
                    if let Some(display_name) = edid_display_name(&edid) {
                        snapshot.display_name = display_name;
                    }
                    if let Some(serial) = edid.serial() {
                        debug!("{name}: serial {serial}");
                    }
                    snapshot.product_id = edid_product_id(&data);
                    snapshot.edid = data;
                }
                Err(err) => debug!("no usable EDID on {name}: {err:?}"),
            }

            snapshot.hdcp_capable =
                find_drm_property(card, handle, "Content Protection").is_some();

            if let Some(crtc) = crtc {
                match color_props(&mut self.color, card, crtc) {
                    Ok(props) => snapshot.has_color_correction_matrix = props.has_ctm(),
                    Err(err) => warn!("error getting color properties for {name}: {err:?}"),
                }
            }

            connectors.insert(
                id,
                ConnectorState {
                    handle,
                    name,
                    crtc,
                    modes: info.modes().to_vec(),
                },
            );
            snapshots.push(snapshot);
        }

        self.connectors = connectors;
        Ok(snapshots)
    }

    // =========================================================================
    // Modes
    // =========================================================================

    fn register_mode(&mut self, handle: OutputHandle, requested: DisplayMode) -> anyhow::Result<()> {
        self.connector(handle)?;

        ensure!(
            !requested.is_interlaced,
            "interlaced custom modes are not supported"
        );
        let Size { width, height } = requested.size;
        ensure!(
            (1..=MAX_CUSTOM_MODE_SIZE).contains(&width)
                && (1..=MAX_CUSTOM_MODE_SIZE).contains(&height),
            "mode size {} out of range",
            requested.size
        );
        ensure!(
            requested.refresh_rate.is_finite()
                && requested.refresh_rate > 0.
                && requested.refresh_rate <= 1000.,
            "refresh rate {} out of range",
            requested.refresh_rate
        );

        if self.find_mode(handle.id, &requested).is_some() {
            debug!("mode {requested} is already known");
            return Ok(());
        }

        let mode = calculate_mode_cvt(
            width as u16,
            height as u16,
            f64::from(requested.refresh_rate),
        );
        debug!("registered custom mode {requested}: {mode:?}");

        self.custom_modes
            .entry(handle.id)
            .or_default()
            .push(CustomMode { requested, mode });
        Ok(())
    }

    fn apply_configuration(
        &mut self,
        handle: OutputHandle,
        mode: Option<DisplayMode>,
        origin: Point,
    ) -> anyhow::Result<()> {
        let _span = tracy_client::span!("DrmBackend::apply_configuration");

        let connector = self.connector(handle)?;
        let connector_handle = connector.handle;
        let crtc = connector.crtc.context("no free CRTC")?;

        let Some(requested) = mode else {
            self.card
                .set_crtc(crtc, None, (0, 0), &[], None)
                .context("error disabling CRTC")?;
            self.scanouts.remove(&crtc);
            if let Ok(record) = self.arena.get_mut(handle) {
                record.current_mode = None;
            }
            return Ok(());
        };

        let drm_mode = self
            .find_mode(handle.id, &requested)
            .with_context(|| format!("mode {requested} is not supported"))?;
        ensure!(origin.x >= 0 && origin.y >= 0, "negative origin {origin}");

        let fb = self
            .framebuffer
            .as_ref()
            .context("no framebuffer to scan out of")?;
        ensure!(
            fits(fb.size, origin, requested.size),
            "{requested} at {origin} does not fit the {} framebuffer",
            fb.size
        );

        self.card
            .set_crtc(
                crtc,
                Some(fb.handle),
                (origin.x as u32, origin.y as u32),
                &[connector_handle],
                Some(drm_mode),
            )
            .context("error setting CRTC")?;

        self.scanouts.insert(
            crtc,
            Scanout {
                connector: connector_handle,
                mode: drm_mode,
                origin,
            },
        );
        if let Ok(record) = self.arena.get_mut(handle) {
            record.current_mode = Some(requested);
            record.origin = origin;
        }

        Ok(())
    }

    // =========================================================================
    // Framebuffer
    // =========================================================================

    fn replace_framebuffer(&mut self, size: Size) -> anyhow::Result<()> {
        let _span = tracy_client::span!("DrmBackend::replace_framebuffer");

        let card = &*self.card;
        let buffer = card
            .create_dumb_buffer((size.width, size.height), DrmFourcc::Xrgb8888, 32)
            .context("error creating dumb buffer")?;
        let handle = match card.add_framebuffer(&buffer, 24, 32) {
            Ok(handle) => handle,
            Err(err) => {
                if let Err(err) = card.destroy_dumb_buffer(buffer) {
                    warn!("error destroying dumb buffer: {err:?}");
                }
                return Err(err).context("error adding framebuffer");
            }
        };

        let mut fb = FrameBuffer {
            buffer,
            handle,
            size,
        };
        if let Err(err) = fill(card, &mut fb, self.background_color) {
            warn!("error filling framebuffer: {err:?}");
        }

        // Move what we scan out over to the new framebuffer.
        self.scanouts.retain(|crtc, scanout| {
            let (width, height) = scanout.mode.size();
            let mode_size = Size::new(u32::from(width), u32::from(height));
            let keep = fits(size, scanout.origin, mode_size);

            let res = if keep {
                let position = (scanout.origin.x as u32, scanout.origin.y as u32);
                let connectors = [scanout.connector];
                card.set_crtc(*crtc, Some(handle), position, &connectors, Some(scanout.mode))
            } else {
                warn!("CRTC {crtc:?} does not fit the {size} framebuffer, disabling");
                card.set_crtc(*crtc, None, (0, 0), &[], None)
            };

            if let Err(err) = res {
                warn!("error moving CRTC {crtc:?} to the new framebuffer: {err:?}");
                return false;
            }
            keep
        });

        if let Some(old) = self.framebuffer.replace(fb) {
            destroy_framebuffer(card, old);
        }

        debug!("created {size} framebuffer");
        Ok(())
    }

    // =========================================================================
    // HDCP
    // =========================================================================

    fn query_hdcp(&self, handle: OutputHandle) -> anyhow::Result<HdcpState> {
        let connector = self.connector(handle)?;
        let (_, _, value) = find_drm_property(&*self.card, connector.handle, "Content Protection")
            .context("no Content Protection property")?;
        hdcp_from_raw(value)
    }

    fn request_hdcp(&mut self, handle: OutputHandle, state: HdcpState) -> anyhow::Result<()> {
        let connector = self.connector(handle)?;
        let (prop, _, _) = find_drm_property(&*self.card, connector.handle, "Content Protection")
            .context("no Content Protection property")?;
        self.card
            .set_property(connector.handle, prop, hdcp_request_to_raw(state))
            .context("error setting Content Protection")?;
        debug!("requested HDCP {state} on {}", connector.name);
        Ok(())
    }

    // =========================================================================
    // Color
    // =========================================================================

    fn apply_color(
        &mut self,
        handle: OutputHandle,
        correction: &ColorCorrection,
    ) -> anyhow::Result<()> {
        let crtc = self.connector(handle)?.crtc.context("no CRTC")?;
        let props = color_props(&mut self.color, &self.card, crtc)?;
        props.apply(&self.card, correction)
    }
}

impl Drop for DrmBackend {
    fn drop(&mut self) {
        self.alive.set(false);

        for props in self.color.values_mut().filter(|props| props.modified) {
            if let Err(err) = props.reset(&self.card) {
                warn!("error resetting color pipeline: {err:?}");
            }
        }

        if let Some(fb) = self.framebuffer.take() {
            destroy_framebuffer(&self.card, fb);
        }

        if self.is_master {
            if let Err(err) = self.card.release_master_lock() {
                warn!("error dropping DRM master: {err:?}");
            }
        }
    }
}

impl DisplayDelegate for DrmBackend {
    fn name(&self) -> &'static str {
        "drm"
    }

    fn initialize(&mut self) {
        if self.initialized {
            warn!("DRM backend initialized twice");
            return;
        }
        self.initialized = true;

        match self.card.get_driver() {
            Ok(driver) => debug!(
                "initialized DRM backend on {} ({})",
                driver.name().to_string_lossy(),
                driver.description().to_string_lossy(),
            ),
            Err(err) => warn!("error getting DRM driver: {err:?}"),
        }
    }

    fn grab_server(&mut self) {
        let _ = self.grab.acquire();
    }

    fn ungrab_server(&mut self) {
        let _ = self.grab.release();
    }

    fn sync_with_server(&mut self) {
        // Every DRM request is a blocking ioctl, nothing is ever in flight.
        trace!("sync with DRM device");
    }

    fn set_background_color(&mut self, argb: u32) {
        self.check_grabbed("set_background_color");
        self.background_color = argb;

        if let Some(fb) = &mut self.framebuffer {
            if let Err(err) = fill(&self.card, fb, argb) {
                warn!("error filling framebuffer: {err:?}");
            }
        }
    }

    fn force_dpms_on(&mut self) {
        let _span = tracy_client::span!("DrmBackend::force_dpms_on");

        let card = &*self.card;
        let resources = match card.resource_handles() {
            Ok(resources) => resources,
            Err(err) => {
                warn!("error getting DRM resources: {err:?}");
                return;
            }
        };

        for &connector in resources.connectors() {
            let Some((prop, _, value)) = find_drm_property(card, connector, "DPMS") else {
                continue;
            };
            if value == DRM_MODE_DPMS_ON {
                continue;
            }
            if let Err(err) = card.set_property(connector, prop, DRM_MODE_DPMS_ON) {
                warn!("error setting DPMS on: {err:?}");
            }
        }
    }

    fn create_frame_buffer(&mut self, size: Size) {
        self.check_grabbed("create_frame_buffer");
        if let Err(err) = self.replace_framebuffer(size) {
            warn!("error creating {size} framebuffer: {err:?}");
        }
    }

    fn take_display_control(&mut self, callback: DisplayControlCallback) {
        let completion = self.queue.completion(callback);
        match self.card.acquire_master_lock() {
            Ok(()) => {
                debug!("took DRM master");
                self.is_master = true;
                completion.complete(true);
            }
            Err(err) => {
                warn!("error taking DRM master: {err:?}");
                completion.complete(false);
            }
        }
    }

    fn relinquish_display_control(&mut self, callback: DisplayControlCallback) {
        let completion = self.queue.completion(callback);
        if !self.is_master {
            warn!("relinquishing display control we do not hold");
            completion.complete(false);
            return;
        }

        match self.card.release_master_lock() {
            Ok(()) => {
                debug!("dropped DRM master");
                self.is_master = false;
                completion.complete(true);
            }
            Err(err) => {
                warn!("error dropping DRM master: {err:?}");
                completion.complete(false);
            }
        }
    }

    fn get_displays(&mut self, callback: GetDisplaysCallback) {
        let completion = self.queue.completion(callback);

        let snapshots = match self.enumerate() {
            Ok(snapshots) => snapshots,
            Err(err) => {
                warn!("error enumerating outputs: {err:?}");
                completion.complete(Vec::new());
                return;
            }
        };

        let supersedes = self.arena.generation() > 0;
        let snapshots = self.arena.publish(snapshots);
        if supersedes {
            let observers = self.observers.clone();
            self.queue
                .defer(move || observers.dispatch(ServerEvent::SnapshotsInvalidated));
        }
        completion.complete(snapshots);
    }

    fn add_mode(&mut self, output: &DisplaySnapshot, mode: &DisplayMode) {
        if let Err(err) = self.register_mode(output.handle(), *mode) {
            warn!("error adding mode {mode} to {}: {err:?}", output.name);
        }
    }

    fn configure(
        &mut self,
        output: &DisplaySnapshot,
        mode: Option<&DisplayMode>,
        origin: Point,
        callback: ConfigureCallback,
    ) {
        let completion = self.queue.completion(callback);
        match self.apply_configuration(output.handle(), mode.copied(), origin) {
            Ok(()) => completion.complete(true),
            Err(err) => {
                warn!("error configuring {}: {err:?}", output.name);
                completion.complete(false);
            }
        }
    }

    fn get_hdcp_state(&mut self, output: &DisplaySnapshot, callback: GetHdcpStateCallback) {
        let completion = self.queue.completion(callback);
        match self.query_hdcp(output.handle()) {
            Ok(state) => completion.complete(Some(state)),
            Err(err) => {
                warn!("error getting HDCP state of {}: {err:?}", output.name);
                completion.complete(None);
            }
        }
    }

    fn set_hdcp_state(
        &mut self,
        output: &DisplaySnapshot,
        hdcp: HdcpState,
        callback: SetHdcpStateCallback,
    ) {
        let completion = self.queue.completion(callback);
        match self.request_hdcp(output.handle(), hdcp) {
            Ok(()) => completion.complete(true),
            Err(err) => {
                warn!("error setting HDCP state of {}: {err:?}", output.name);
                completion.complete(false);
            }
        }
    }

    fn available_color_calibration_profiles(
        &self,
        _output: &DisplaySnapshot,
    ) -> Vec<ColorCalibrationProfile> {
        Vec::new()
    }

    fn set_color_calibration_profile(
        &mut self,
        output: &DisplaySnapshot,
        profile: ColorCalibrationProfile,
    ) -> bool {
        warn!(
            "{}: color calibration profile {profile} is not supported",
            output.name
        );
        false
    }

    fn set_color_correction(
        &mut self,
        output: &DisplaySnapshot,
        degamma: &[GammaRampRgbEntry],
        gamma: &[GammaRampRgbEntry],
        correction_matrix: &[f32],
    ) -> bool {
        let res = ColorCorrection::from_tables(degamma, gamma, correction_matrix)
            .and_then(|correction| self.apply_color(output.handle(), &correction));
        match res {
            Ok(()) => true,
            Err(err) => {
                warn!("error setting color correction of {}: {err:?}", output.name);
                false
            }
        }
    }

    fn add_observer(&mut self, observer: &Rc<dyn DisplayObserver>) -> ObserverToken {
        self.observers.add(observer)
    }

    fn remove_observer(&mut self, token: ObserverToken) {
        if !self.observers.remove(token) {
            debug!("removing unknown observer {token:?}");
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn color_props<'a>(
    color: &'a mut HashMap<crtc::Handle, ColorProps>,
    card: &Card,
    crtc: crtc::Handle,
) -> anyhow::Result<&'a mut ColorProps> {
    Ok(match color.entry(crtc) {
        Entry::Occupied(entry) => entry.into_mut(),
        Entry::Vacant(entry) => entry.insert(ColorProps::new(card, crtc)?),
    })
}

fn fill(card: &Card, fb: &mut FrameBuffer, argb: u32) -> anyhow::Result<()> {
    let _span = tracy_client::span!("fill framebuffer");

    let mut mapping = card
        .map_dumb_buffer(&mut fb.buffer)
        .context("error mapping dumb buffer")?;
    let pixel = argb.to_le_bytes();
    for chunk in mapping.chunks_exact_mut(4) {
        chunk.copy_from_slice(&pixel);
    }
    Ok(())
}

fn destroy_framebuffer(card: &Card, fb: FrameBuffer) {
    if let Err(err) = card.destroy_framebuffer(fb.handle) {
        warn!("error destroying framebuffer: {err:?}");
    }
    if let Err(err) = card.destroy_dumb_buffer(fb.buffer) {
        warn!("error destroying dumb buffer: {err:?}");
    }
}

/// Whether an area of `size` at `origin` lies inside a framebuffer of `bounds`.
fn fits(bounds: Size, origin: Point, size: Size) -> bool {
    origin.x >= 0
        && origin.y >= 0
        && i64::from(origin.x) + i64::from(size.width) <= i64::from(bounds.width)
        && i64::from(origin.y) + i64::from(size.height) <= i64::from(bounds.height)
}

fn same_timings(a: &Mode, b: &Mode) -> bool {
    a.clock() == b.clock()
        && a.size() == b.size()
        && a.hsync() == b.hsync()
        && a.vsync() == b.vsync()
}

fn hdcp_from_raw(value: u64) -> anyhow::Result<HdcpState> {
    Ok(match value {
        CONTENT_PROTECTION_UNDESIRED => HdcpState::Undesired,
        CONTENT_PROTECTION_DESIRED => HdcpState::Desired,
        CONTENT_PROTECTION_ENABLED => HdcpState::Enabled,
        _ => bail!("unknown Content Protection value {value}"),
    })
}

/// Only the kernel moves a link to Enabled, so requesting it asks for Desired.
fn hdcp_request_to_raw(state: HdcpState) -> u64 {
    match state {
        HdcpState::Undesired => CONTENT_PROTECTION_UNDESIRED,
        HdcpState::Desired | HdcpState::Enabled => CONTENT_PROTECTION_DESIRED,
    }
}
