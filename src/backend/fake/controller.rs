use std::cell::RefCell;
use std::fmt;
use std::mem;
use std::rc::Rc;

use display_delegate_config::HdcpNegotiation;
use tracing::debug;

use super::state::{ControlHolder, FakeState, Operation, SimulatedOutput};
use crate::color::ColorCorrection;
use crate::observer::{ObserverRegistry, ServerEvent};
use crate::snapshot::{DisplayId, DisplayMode};
use crate::types::{ColorCalibrationProfile, HdcpState, Point, Size};

/// Handle to the simulated display server behind a fake backend.
///
/// Mutations that a real server would report (hotplug, link loss) notify observers
/// synchronously. The controller stays usable after the backend is dropped.
#[derive(Clone)]
pub struct FakeDisplayController {
    state: Rc<RefCell<FakeState>>,
    observers: ObserverRegistry,
}

impl fmt::Debug for FakeDisplayController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FakeDisplayController")
            .field("outputs", &self.state.borrow().outputs.len())
            .finish()
    }
}

impl FakeDisplayController {
    pub(super) fn new(state: Rc<RefCell<FakeState>>, observers: ObserverRegistry) -> Self {
        Self { state, observers }
    }

    fn notify(&self, event: ServerEvent) {
        self.observers.dispatch(event);
    }

    fn with_output<T>(
        &self,
        id: DisplayId,
        f: impl FnOnce(&mut SimulatedOutput) -> T,
    ) -> Option<T> {
        self.state.borrow_mut().output_mut(id).map(f)
    }

    // =========================================================================
    // Outputs
    // =========================================================================

    /// Plugs in an output.
    pub fn add_output(&self, output: SimulatedOutput) -> DisplayId {
        let id = self.state.borrow_mut().insert_output(output);
        self.notify(ServerEvent::ConfigurationChanged);
        id
    }

    /// Unplugs an output. Returns `false` if there was no such output.
    pub fn remove_output(&self, id: DisplayId) -> bool {
        let removed = {
            let mut state = self.state.borrow_mut();
            let before = state.outputs.len();
            state.outputs.retain(|o| o.id != id);
            state.custom_modes.remove(&id);
            state.outputs.len() != before
        };

        if removed {
            debug!("unplugged simulated output {id}");
            self.notify(ServerEvent::ConfigurationChanged);
        }
        removed
    }

    /// Changes an output's current mode as if another client had done it.
    pub fn set_current_mode(&self, id: DisplayId, mode: Option<DisplayMode>) -> bool {
        let changed = self.with_output(id, |o| o.current_mode = mode).is_some();
        if changed {
            self.notify(ServerEvent::ConfigurationChanged);
        }
        changed
    }

    /// Fires a configuration change without touching any state.
    pub fn trigger_configuration_changed(&self) {
        self.notify(ServerEvent::ConfigurationChanged);
    }

    pub fn output_ids(&self) -> Vec<DisplayId> {
        self.state.borrow().outputs.iter().map(|o| o.id).collect()
    }

    pub fn output(&self, id: DisplayId) -> Option<SimulatedOutput> {
        self.state.borrow().output(id).cloned()
    }

    pub fn current_mode(&self, id: DisplayId) -> Option<DisplayMode> {
        self.state.borrow().output(id)?.current_mode
    }

    pub fn origin(&self, id: DisplayId) -> Option<Point> {
        Some(self.state.borrow().output(id)?.origin)
    }

    pub fn custom_modes(&self, id: DisplayId) -> Vec<DisplayMode> {
        self.state
            .borrow()
            .custom_modes
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }

    // =========================================================================
    // Display control
    // =========================================================================

    pub fn display_control_holder(&self) -> ControlHolder {
        self.state.borrow().control
    }

    /// Simulates another process taking or dropping display control.
    pub fn set_display_control_holder(&self, holder: ControlHolder) {
        debug!("display control now held by {holder:?}");
        self.state.borrow_mut().control = holder;
    }

    // =========================================================================
    // HDCP
    // =========================================================================

    pub fn hdcp_state(&self, id: DisplayId) -> Option<HdcpState> {
        Some(self.state.borrow().output(id)?.hdcp_state)
    }

    /// Overwrites the link state directly.
    pub fn set_hdcp_state(&self, id: DisplayId, hdcp: HdcpState) -> bool {
        self.with_output(id, |o| o.hdcp_state = hdcp).is_some()
    }

    pub fn set_hdcp_negotiation(&self, negotiation: HdcpNegotiation) {
        self.state.borrow_mut().hdcp_negotiation = negotiation;
    }

    /// Resolves a pending negotiation. Returns `false` if nothing was negotiating.
    pub fn finish_hdcp_negotiation(&self, id: DisplayId, authenticated: bool) -> bool {
        let finished = self
            .with_output(id, |o| {
                if o.hdcp_state != HdcpState::Desired {
                    return false;
                }
                if authenticated {
                    o.hdcp_state = HdcpState::Enabled;
                }
                true
            })
            .unwrap_or(false);

        if finished && authenticated {
            self.notify(ServerEvent::ConfigurationChanged);
        }
        finished
    }

    /// Simulates the link dropping protection: Enabled falls back to Desired.
    pub fn drop_hdcp_link(&self, id: DisplayId) -> bool {
        let dropped = self
            .with_output(id, |o| {
                if o.hdcp_state != HdcpState::Enabled {
                    return false;
                }
                o.hdcp_state = HdcpState::Desired;
                true
            })
            .unwrap_or(false);

        if dropped {
            debug!("HDCP link lost on {id}");
            self.notify(ServerEvent::ConfigurationChanged);
        }
        dropped
    }

    // =========================================================================
    // Failure injection and scheduling
    // =========================================================================

    /// Makes the next `count` configure requests fail.
    pub fn reject_next_configures(&self, count: u32) {
        self.state.borrow_mut().reject_configures = count;
    }

    /// While holding, asynchronous operations are queued instead of taking effect.
    pub fn set_hold_completions(&self, hold: bool) {
        self.state.borrow_mut().hold_completions = hold;
    }

    pub fn held_count(&self) -> usize {
        self.state.borrow().held.len()
    }

    /// Applies queued operations in issue order and queues their callbacks.
    ///
    /// Returns the number of operations released.
    pub fn release_held(&self) -> usize {
        let mut released = 0;
        loop {
            let Some(op) = self.state.borrow_mut().held.pop_front() else {
                break;
            };
            let deliver = op(&mut *self.state.borrow_mut());

            let events = mem::take(&mut self.state.borrow_mut().pending_events);
            for event in events {
                self.notify(event);
            }
            deliver();
            released += 1;
        }
        released
    }

    // =========================================================================
    // Instrumentation
    // =========================================================================

    pub fn issued(&self, op: Operation) -> u32 {
        self.state.borrow().stats.borrow().issued(op)
    }

    pub fn completed(&self, op: Operation) -> u32 {
        self.state.borrow().stats.borrow().completed(op)
    }

    /// Callbacks issued but not yet delivered.
    pub fn outstanding(&self) -> u32 {
        self.state.borrow().stats.borrow().outstanding()
    }

    pub fn is_initialized(&self) -> bool {
        self.state.borrow().initialized
    }

    pub fn is_grabbed(&self) -> bool {
        self.state.borrow().grab.is_held()
    }

    pub fn grab_violations(&self) -> u32 {
        self.state.borrow().grab.violations()
    }

    pub fn ungrabbed_protocol_calls(&self) -> u32 {
        self.state.borrow().ungrabbed_protocol_calls
    }

    pub fn sync_count(&self) -> u32 {
        self.state.borrow().sync_count
    }

    pub fn background_color(&self) -> Option<u32> {
        self.state.borrow().background_color
    }

    pub fn framebuffer_size(&self) -> Option<Size> {
        self.state.borrow().framebuffer
    }

    pub fn dpms_forced_on(&self) -> u32 {
        self.state.borrow().dpms_forced_on
    }

    pub fn color_correction(&self, id: DisplayId) -> Option<ColorCorrection> {
        Some(self.state.borrow().output(id)?.color_correction.clone())
    }

    pub fn active_color_profile(&self, id: DisplayId) -> Option<ColorCalibrationProfile> {
        self.state.borrow().output(id)?.active_profile
    }
}
