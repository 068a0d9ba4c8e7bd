//! Deterministic in-memory display backend.
//!
//! Every operation acts on a simulated display server held in [`FakeState`]. Tests and the CLI
//! drive the simulation through a [`FakeDisplayController`]. Effects are applied when an
//! operation is issued, unless the controller holds completions, in which case both the effect
//! and the callback wait for [`FakeDisplayController::release_held`].

use std::cell::RefCell;
use std::mem;
use std::rc::Rc;

use calloop::LoopHandle;
use display_delegate_config::FakeConfig;
use tracing::{debug, warn};

use crate::color::ColorCorrection;
use crate::completion::{CompletionQueue, Outcome};
use crate::delegate::{
    ConfigureCallback, DisplayControlCallback, DisplayDelegate, GetDisplaysCallback,
    GetHdcpStateCallback, SetHdcpStateCallback,
};
use crate::observer::{DisplayObserver, ObserverRegistry, ObserverToken};
use crate::snapshot::{DisplayMode, DisplaySnapshot};
use crate::types::{ColorCalibrationProfile, GammaRampRgbEntry, HdcpState, Point, Size};

mod controller;
mod state;

pub use controller::FakeDisplayController;
pub use state::{ControlHolder, Operation, OperationStats, SimulatedOutput};

use state::FakeState;

#[cfg(test)]
mod tests;

pub struct FakeBackend {
    state: Rc<RefCell<FakeState>>,
    observers: ObserverRegistry,
    queue: CompletionQueue,
}

impl FakeBackend {
    pub fn new<D: 'static>(
        config: &FakeConfig,
        event_loop: &LoopHandle<'static, D>,
    ) -> anyhow::Result<Self> {
        let queue = CompletionQueue::new(event_loop)?;
        Ok(Self {
            state: Rc::new(RefCell::new(FakeState::new(config))),
            observers: ObserverRegistry::new(),
            queue,
        })
    }

    /// Issues an asynchronous operation.
    ///
    /// `run` applies the effect and produces the result, now or when held operations are
    /// released. Observer notifications it produces are delivered before the callback.
    fn submit<T: Outcome>(
        &mut self,
        op: Operation,
        callback: impl FnOnce(T) + 'static,
        run: impl FnOnce(&mut FakeState) -> T + 'static,
    ) {
        let stats = self.state.borrow().stats.clone();
        stats.borrow_mut().record_issued(op);

        let completion = self.queue.completion(move |value: T| {
            stats.borrow_mut().record_completed(op);
            callback(value);
        });

        let mut state = self.state.borrow_mut();
        if state.hold_completions {
            debug!("holding {op:?}");
            state
                .held
                .push_back(Box::new(move |state: &mut FakeState| {
                    let value = run(state);
                    Box::new(move || completion.complete(value)) as Box<dyn FnOnce()>
                }));
            return;
        }

        let value = run(&mut *state);
        let events = mem::take(&mut state.pending_events);
        drop(state);

        for event in events {
            let observers = self.observers.clone();
            self.queue.defer(move || observers.dispatch(event));
        }
        completion.complete(value);
    }
}

impl Drop for FakeBackend {
    fn drop(&mut self) {
        let held = mem::take(&mut self.state.borrow_mut().held);
        if !held.is_empty() {
            debug!("dropping {} held operations", held.len());
        }
        // Each held operation owns its completion, which reports failure when dropped.
        drop(held);
    }
}

impl DisplayDelegate for FakeBackend {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn initialize(&mut self) {
        let mut state = self.state.borrow_mut();
        if state.initialized {
            warn!("fake backend initialized twice");
        }
        state.initialized = true;
        debug!("fake backend initialized with {} outputs", state.outputs.len());
    }

    fn grab_server(&mut self) {
        // Violations are logged and counted by the tracker.
        let _ = self.state.borrow_mut().grab.acquire();
    }

    fn ungrab_server(&mut self) {
        let _ = self.state.borrow_mut().grab.release();
    }

    fn sync_with_server(&mut self) {
        self.state.borrow_mut().sync_count += 1;
    }

    fn set_background_color(&mut self, argb: u32) {
        let mut state = self.state.borrow_mut();
        state.check_grabbed("set_background_color");
        state.background_color = Some(argb);
    }

    fn force_dpms_on(&mut self) {
        self.state.borrow_mut().dpms_forced_on += 1;
    }

    fn create_frame_buffer(&mut self, size: Size) {
        let mut state = self.state.borrow_mut();
        state.check_grabbed("create_frame_buffer");
        if size.is_empty() {
            warn!("creating an empty framebuffer: {size}");
        }
        state.framebuffer = Some(size);
    }

    fn take_display_control(&mut self, callback: DisplayControlCallback) {
        self.submit(Operation::TakeDisplayControl, callback, |state| {
            state.take_display_control()
        });
    }

    fn relinquish_display_control(&mut self, callback: DisplayControlCallback) {
        self.submit(Operation::RelinquishDisplayControl, callback, |state| {
            state.relinquish_display_control()
        });
    }

    fn get_displays(&mut self, callback: GetDisplaysCallback) {
        self.submit(Operation::GetDisplays, callback, FakeState::get_displays);
    }

    fn add_mode(&mut self, output: &DisplaySnapshot, mode: &DisplayMode) {
        self.state.borrow_mut().add_mode(output.handle(), *mode);
    }

    fn configure(
        &mut self,
        output: &DisplaySnapshot,
        mode: Option<&DisplayMode>,
        origin: Point,
        callback: ConfigureCallback,
    ) {
        let handle = output.handle();
        let mode = mode.copied();
        self.submit(Operation::Configure, callback, move |state| {
            state.configure(handle, mode, origin)
        });
    }

    fn get_hdcp_state(&mut self, output: &DisplaySnapshot, callback: GetHdcpStateCallback) {
        let handle = output.handle();
        self.submit(Operation::GetHdcpState, callback, move |state| {
            state.get_hdcp_state(handle)
        });
    }

    fn set_hdcp_state(
        &mut self,
        output: &DisplaySnapshot,
        hdcp: HdcpState,
        callback: SetHdcpStateCallback,
    ) {
        let handle = output.handle();
        self.submit(Operation::SetHdcpState, callback, move |state| {
            state.set_hdcp_state(handle, hdcp)
        });
    }

    fn available_color_calibration_profiles(
        &self,
        output: &DisplaySnapshot,
    ) -> Vec<ColorCalibrationProfile> {
        let mut state = self.state.borrow_mut();
        state
            .resolve(output.handle())
            .map(|o| o.color_profiles.clone())
            .unwrap_or_default()
    }

    fn set_color_calibration_profile(
        &mut self,
        output: &DisplaySnapshot,
        profile: ColorCalibrationProfile,
    ) -> bool {
        self.state
            .borrow_mut()
            .set_color_calibration_profile(output.handle(), profile)
    }

    fn set_color_correction(
        &mut self,
        output: &DisplaySnapshot,
        degamma: &[GammaRampRgbEntry],
        gamma: &[GammaRampRgbEntry],
        correction_matrix: &[f32],
    ) -> bool {
        let correction = match ColorCorrection::from_tables(degamma, gamma, correction_matrix) {
            Ok(correction) => correction,
            Err(err) => {
                warn!("rejecting color correction for {}: {err:?}", output.name);
                return false;
            }
        };

        self.state
            .borrow_mut()
            .set_color_correction(output.handle(), correction)
    }

    fn add_observer(&mut self, observer: &Rc<dyn DisplayObserver>) -> ObserverToken {
        self.observers.add(observer)
    }

    fn remove_observer(&mut self, token: ObserverToken) {
        if !self.observers.remove(token) {
            debug!("removing unknown observer {token:?}");
        }
    }

    fn fake_display_controller(&self) -> Option<FakeDisplayController> {
        Some(FakeDisplayController::new(
            self.state.clone(),
            self.observers.clone(),
        ))
    }
}
