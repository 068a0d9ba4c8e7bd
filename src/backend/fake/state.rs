//! Simulated display server state shared by the fake backend and its controller.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::rc::Rc;

use display_delegate_config::{
    ColorProfileKind, ConnectionKind, DisplayControl, FakeConfig, FakeOutput, HdcpNegotiation,
};
use tracing::{debug, warn};

use crate::color::ColorCorrection;
use crate::grab::ServerGrab;
use crate::observer::ServerEvent;
use crate::snapshot::{DisplayId, DisplayMode, DisplaySnapshot, OutputHandle, SnapshotArena};
use crate::types::{ColorCalibrationProfile, ConnectionType, HdcpState, Point, Size};

/// Which process currently owns display control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlHolder {
    #[default]
    Nobody,
    Us,
    /// Another simulated process.
    Other,
}

/// The asynchronous delegate operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Operation {
    TakeDisplayControl,
    RelinquishDisplayControl,
    GetDisplays,
    Configure,
    GetHdcpState,
    SetHdcpState,
}

impl Operation {
    pub const ALL: [Operation; 6] = [
        Operation::TakeDisplayControl,
        Operation::RelinquishDisplayControl,
        Operation::GetDisplays,
        Operation::Configure,
        Operation::GetHdcpState,
        Operation::SetHdcpState,
    ];
}

/// Issued and completed counts per operation.
#[derive(Debug, Default)]
pub struct OperationStats {
    issued: BTreeMap<Operation, u32>,
    completed: BTreeMap<Operation, u32>,
}

impl OperationStats {
    pub fn record_issued(&mut self, op: Operation) {
        *self.issued.entry(op).or_default() += 1;
    }

    pub fn record_completed(&mut self, op: Operation) {
        *self.completed.entry(op).or_default() += 1;
    }

    pub fn issued(&self, op: Operation) -> u32 {
        self.issued.get(&op).copied().unwrap_or(0)
    }

    pub fn completed(&self, op: Operation) -> u32 {
        self.completed.get(&op).copied().unwrap_or(0)
    }

    /// Callbacks issued but not yet delivered, over all operations.
    pub fn outstanding(&self) -> u32 {
        Operation::ALL
            .iter()
            .map(|&op| self.issued(op) - self.completed(op))
            .sum()
    }
}

/// One simulated output.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedOutput {
    pub id: DisplayId,
    pub name: String,
    pub display_name: String,
    pub connection_type: ConnectionType,
    pub product_id: u32,
    pub physical_size: Size,
    pub modes: Vec<DisplayMode>,
    pub current_mode: Option<DisplayMode>,
    pub native_mode: Option<DisplayMode>,
    pub origin: Point,
    pub hdcp_capable: bool,
    pub hdcp_state: HdcpState,
    pub has_color_correction_matrix: bool,
    pub color_profiles: Vec<ColorCalibrationProfile>,
    pub active_profile: Option<ColorCalibrationProfile>,
    pub color_correction: ColorCorrection,
}

impl SimulatedOutput {
    /// An enabled output driven at its first mode, which is also its native mode.
    ///
    /// The id is assigned when the output is added to the state.
    pub fn new(
        name: impl Into<String>,
        connection_type: ConnectionType,
        modes: Vec<DisplayMode>,
    ) -> Self {
        let name = name.into();
        let first = modes.first().copied();
        Self {
            id: DisplayId(0),
            display_name: name.clone(),
            name,
            connection_type,
            product_id: 0,
            physical_size: Size::default(),
            modes,
            current_mode: first,
            native_mode: first,
            origin: Point::default(),
            hdcp_capable: false,
            hdcp_state: HdcpState::Undesired,
            has_color_correction_matrix: false,
            color_profiles: Vec::new(),
            active_profile: None,
            color_correction: ColorCorrection::identity(),
        }
    }

    pub fn disabled(mut self) -> Self {
        self.current_mode = None;
        self
    }

    pub fn with_hdcp(mut self) -> Self {
        self.hdcp_capable = true;
        self
    }

    pub fn with_color_correction_matrix(mut self) -> Self {
        self.has_color_correction_matrix = true;
        self
    }

    pub fn with_color_profiles(mut self, profiles: Vec<ColorCalibrationProfile>) -> Self {
        self.color_profiles = profiles;
        self
    }

    pub fn from_config(config: &FakeOutput) -> Self {
        let modes: Vec<DisplayMode> = config
            .modes
            .iter()
            .map(|m| {
                let mode = DisplayMode::new(m.width, m.height, m.refresh as f32);
                if m.interlaced {
                    mode.interlaced()
                } else {
                    mode
                }
            })
            .collect();

        let connection_type = match config.connection {
            ConnectionKind::Unknown => ConnectionType::UNKNOWN,
            ConnectionKind::Internal => ConnectionType::INTERNAL,
            ConnectionKind::Vga => ConnectionType::VGA,
            ConnectionKind::Hdmi => ConnectionType::HDMI,
            ConnectionKind::Dvi => ConnectionType::DVI,
            ConnectionKind::DisplayPort => ConnectionType::DISPLAYPORT,
            ConnectionKind::Network => ConnectionType::NETWORK,
        };

        let color_profiles = config
            .color_profiles
            .profiles
            .iter()
            .map(|profile| match profile {
                ColorProfileKind::Standard => ColorCalibrationProfile::Standard,
                ColorProfileKind::Dynamic => ColorCalibrationProfile::Dynamic,
                ColorProfileKind::Movie => ColorCalibrationProfile::Movie,
                ColorProfileKind::Reading => ColorCalibrationProfile::Reading,
            })
            .collect();

        let mut output = Self::new(config.name.0.clone(), connection_type, modes);
        output.current_mode = config.current_mode().map(|idx| output.modes[idx]);
        output.native_mode = config.native_mode().map(|idx| output.modes[idx]);
        output.product_id = config.product_id;
        if let Some(size) = config.physical_size {
            output.physical_size = Size::new(size.width_mm, size.height_mm);
        }
        if let Some(origin) = config.origin {
            output.origin = Point::new(origin.x, origin.y);
        }
        output.hdcp_capable = config.hdcp;
        output.has_color_correction_matrix = config.color_correction_matrix;
        output.color_profiles = color_profiles;
        output
    }
}

/// An asynchronous operation whose effect and completion are deferred until released.
///
/// Running it applies the effect and returns the delivery of its callback, which must be called
/// once the state is no longer borrowed.
pub type HeldOperation = Box<dyn FnOnce(&mut FakeState) -> Box<dyn FnOnce()>>;

pub struct FakeState {
    pub outputs: Vec<SimulatedOutput>,
    /// Modes registered with `add_mode`, kept across enumerations until the output is unplugged.
    pub custom_modes: HashMap<DisplayId, Vec<DisplayMode>>,
    pub arena: SnapshotArena,
    next_id: u64,

    pub initialized: bool,
    pub control: ControlHolder,
    pub hdcp_negotiation: HdcpNegotiation,

    pub grab: ServerGrab,
    pub ungrabbed_protocol_calls: u32,
    pub sync_count: u32,
    pub framebuffer: Option<Size>,
    pub background_color: Option<u32>,
    pub dpms_forced_on: u32,

    pub stats: Rc<RefCell<OperationStats>>,
    /// Remaining configure requests to reject regardless of their arguments.
    pub reject_configures: u32,
    pub hold_completions: bool,
    pub held: VecDeque<HeldOperation>,
    /// Observer notifications produced while the state was borrowed.
    pub pending_events: Vec<ServerEvent>,
}

impl FakeState {
    pub fn new(config: &FakeConfig) -> Self {
        let mut state = Self {
            outputs: Vec::new(),
            custom_modes: HashMap::new(),
            arena: SnapshotArena::new(),
            next_id: 1,
            initialized: false,
            control: match config.display_control {
                DisplayControl::Available => ControlHolder::Nobody,
                DisplayControl::HeldElsewhere => ControlHolder::Other,
            },
            hdcp_negotiation: config.hdcp_negotiation,
            grab: ServerGrab::new(),
            ungrabbed_protocol_calls: 0,
            sync_count: 0,
            framebuffer: None,
            background_color: None,
            dpms_forced_on: 0,
            stats: Rc::new(RefCell::new(OperationStats::default())),
            reject_configures: 0,
            hold_completions: false,
            held: VecDeque::new(),
            pending_events: Vec::new(),
        };

        for output in &config.outputs {
            state.insert_output(SimulatedOutput::from_config(output));
        }

        state
    }

    /// Adds an output, assigning it a fresh id.
    pub fn insert_output(&mut self, mut output: SimulatedOutput) -> DisplayId {
        output.id = DisplayId(self.next_id);
        self.next_id += 1;
        debug!("adding simulated output {} as {}", output.name, output.id);
        let id = output.id;
        self.outputs.push(output);
        id
    }

    pub fn output(&self, id: DisplayId) -> Option<&SimulatedOutput> {
        self.outputs.iter().find(|o| o.id == id)
    }

    pub fn output_mut(&mut self, id: DisplayId) -> Option<&mut SimulatedOutput> {
        self.outputs.iter_mut().find(|o| o.id == id)
    }

    /// Resolves a snapshot handle to the live output it refers to.
    pub fn resolve(&mut self, handle: OutputHandle) -> Option<&mut SimulatedOutput> {
        if let Err(err) = self.arena.get(handle) {
            warn!("rejecting request for {}: {err}", handle.id);
            return None;
        }
        let output = self.output_mut(handle.id);
        if output.is_none() {
            warn!("rejecting request for {}: output was unplugged", handle.id);
        }
        output
    }

    /// Counts raw protocol calls made without holding the grab.
    pub fn check_grabbed(&mut self, what: &str) {
        if !self.grab.is_held() {
            warn!("{what} called without the server grab");
            self.ungrabbed_protocol_calls += 1;
        }
    }

    pub fn snapshot(&self, output: &SimulatedOutput) -> DisplaySnapshot {
        let mut modes = output.modes.clone();
        if let Some(custom) = self.custom_modes.get(&output.id) {
            modes.extend(custom.iter().filter(|m| !output.modes.contains(m)));
        }

        let mut snapshot = DisplaySnapshot::new(output.id, output.name.clone());
        snapshot.display_name = output.display_name.clone();
        snapshot.connection_type = output.connection_type;
        snapshot.product_id = output.product_id;
        snapshot.physical_size = output.physical_size;
        snapshot.origin = output.origin;
        snapshot.modes = modes;
        snapshot.current_mode = output.current_mode;
        snapshot.native_mode = output.native_mode;
        snapshot.hdcp_capable = output.hdcp_capable;
        snapshot.has_color_correction_matrix = output.has_color_correction_matrix;
        snapshot.color_profiles = output.color_profiles.clone();
        snapshot
    }

    // =========================================================================
    // Operation effects
    // =========================================================================

    pub fn take_display_control(&mut self) -> bool {
        match self.control {
            ControlHolder::Other => {
                debug!("display control is held by another process");
                false
            }
            ControlHolder::Nobody | ControlHolder::Us => {
                self.control = ControlHolder::Us;
                true
            }
        }
    }

    pub fn relinquish_display_control(&mut self) -> bool {
        if self.control != ControlHolder::Us {
            debug!("cannot relinquish display control we do not hold");
            return false;
        }
        self.control = ControlHolder::Nobody;
        true
    }

    pub fn get_displays(&mut self) -> Vec<DisplaySnapshot> {
        let snapshots: Vec<_> = self.outputs.iter().map(|o| self.snapshot(o)).collect();
        if self.arena.generation() > 0 {
            self.pending_events.push(ServerEvent::SnapshotsInvalidated);
        }
        let snapshots = self.arena.publish(snapshots);
        debug!(
            "enumerated {} outputs, generation {}",
            snapshots.len(),
            self.arena.generation()
        );
        snapshots
    }

    pub fn add_mode(&mut self, handle: OutputHandle, mode: DisplayMode) {
        let Some(output) = self.resolve(handle) else {
            return;
        };
        if output.modes.contains(&mode) {
            return;
        }

        let custom = self.custom_modes.entry(handle.id).or_default();
        if !custom.contains(&mode) {
            debug!("registering custom mode {mode} on {}", handle.id);
            custom.push(mode);
        }
        if let Ok(record) = self.arena.get_mut(handle) {
            if !record.modes.contains(&mode) {
                record.modes.push(mode);
            }
        }
    }

    pub fn configure(
        &mut self,
        handle: OutputHandle,
        mode: Option<DisplayMode>,
        origin: Point,
    ) -> bool {
        if self.control == ControlHolder::Other {
            debug!("configure refused: display control is held by another process");
            return false;
        }
        if self.reject_configures > 0 {
            self.reject_configures -= 1;
            debug!("configure of {} rejected by injection", handle.id);
            return false;
        }

        let framebuffer = self.framebuffer;
        let custom = self.custom_modes.get(&handle.id).cloned().unwrap_or_default();
        let Some(output) = self.resolve(handle) else {
            return false;
        };

        if let Some(mode) = mode {
            if !output.modes.contains(&mode) && !custom.contains(&mode) {
                warn!("configure refused: {mode} is not a mode of {}", output.name);
                return false;
            }
            if origin.x < 0 || origin.y < 0 {
                warn!("configure refused: negative origin {origin}");
                return false;
            }
            if let Some(fb) = framebuffer {
                let right = i64::from(origin.x) + i64::from(mode.size.width);
                let bottom = i64::from(origin.y) + i64::from(mode.size.height);
                if right > i64::from(fb.width) || bottom > i64::from(fb.height) {
                    warn!("configure refused: {mode} at {origin} exceeds framebuffer {fb}");
                    return false;
                }
            }
            output.origin = origin;
        }

        output.current_mode = mode;
        let origin = output.origin;
        debug!(
            "configured {}: {}",
            output.name,
            mode.map_or_else(|| String::from("disabled"), |m| format!("{m} at {origin}"))
        );

        if let Ok(record) = self.arena.get_mut(handle) {
            record.current_mode = mode;
            record.origin = origin;
        }
        true
    }

    pub fn get_hdcp_state(&mut self, handle: OutputHandle) -> Option<HdcpState> {
        let output = self.resolve(handle)?;
        if !output.hdcp_capable {
            debug!("{} does not support HDCP", output.name);
            return None;
        }
        Some(output.hdcp_state)
    }

    pub fn set_hdcp_state(&mut self, handle: OutputHandle, state: HdcpState) -> bool {
        if self.control == ControlHolder::Other {
            debug!("HDCP change refused: display control is held by another process");
            return false;
        }

        let negotiation = self.hdcp_negotiation;
        let Some(output) = self.resolve(handle) else {
            return false;
        };
        if !output.hdcp_capable {
            debug!("{} does not support HDCP", output.name);
            return false;
        }

        output.hdcp_state = match (state, output.hdcp_state) {
            (HdcpState::Undesired, _) => HdcpState::Undesired,
            (HdcpState::Desired | HdcpState::Enabled, HdcpState::Enabled) => HdcpState::Enabled,
            // Only the link can confirm protection; Enabled is a request for Desired.
            (HdcpState::Desired | HdcpState::Enabled, _) => match negotiation {
                HdcpNegotiation::Succeed => HdcpState::Enabled,
                HdcpNegotiation::Fail | HdcpNegotiation::Manual => HdcpState::Desired,
            },
        };
        debug!("HDCP on {} is now {}", output.name, output.hdcp_state);
        true
    }

    pub fn set_color_calibration_profile(
        &mut self,
        handle: OutputHandle,
        profile: ColorCalibrationProfile,
    ) -> bool {
        let Some(output) = self.resolve(handle) else {
            return false;
        };
        if !output.color_profiles.contains(&profile) {
            debug!("{} does not support the {profile} profile", output.name);
            return false;
        }
        output.active_profile = Some(profile);
        true
    }

    pub fn set_color_correction(
        &mut self,
        handle: OutputHandle,
        correction: ColorCorrection,
    ) -> bool {
        let Some(output) = self.resolve(handle) else {
            return false;
        };
        if correction.matrix.is_some() && !output.has_color_correction_matrix {
            debug!("{} has no color correction matrix", output.name);
            return false;
        }
        output.color_correction = correction;
        true
    }
}
