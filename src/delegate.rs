//! The contract between a display configuration orchestrator and a display-control backend.
//!
//! All methods are called on the display thread. Asynchronous operations take a callback that
//! is invoked exactly once, always from the event loop and never from inside the call that
//! issued it. Dropping a backend completes every callback still outstanding with its failure
//! value.

use std::ops::{Deref, DerefMut};
use std::rc::Rc;

use crate::backend::fake::FakeDisplayController;
use crate::observer::{DisplayObserver, ObserverToken};
use crate::snapshot::{DisplayMode, DisplaySnapshot};
use crate::types::{ColorCalibrationProfile, GammaRampRgbEntry, HdcpState, Point, Size};

pub type DisplayControlCallback = Box<dyn FnOnce(bool)>;
pub type GetDisplaysCallback = Box<dyn FnOnce(Vec<DisplaySnapshot>)>;
pub type ConfigureCallback = Box<dyn FnOnce(bool)>;
/// `None` means the state could not be queried, which is not the same as `Undesired`.
pub type GetHdcpStateCallback = Box<dyn FnOnce(Option<HdcpState>)>;
pub type SetHdcpStateCallback = Box<dyn FnOnce(bool)>;

pub trait DisplayDelegate {
    /// Human-readable backend name for logs.
    fn name(&self) -> &'static str;

    /// Connects to the display server. Called once before anything else.
    fn initialize(&mut self);

    // =========================================================================
    // Resource guard
    // =========================================================================

    /// Takes exclusive access for raw protocol operations. Does not nest.
    fn grab_server(&mut self);
    fn ungrab_server(&mut self);

    /// Flushes outstanding protocol requests and blocks until the server has replied.
    fn sync_with_server(&mut self);

    /// Fills the shared framebuffer with `argb`. Raw protocol operation.
    fn set_background_color(&mut self, argb: u32);

    /// Wakes every output from power saving.
    fn force_dpms_on(&mut self);

    /// Resizes the shared framebuffer that outputs scan out of. Raw protocol operation.
    fn create_frame_buffer(&mut self, size: Size);

    // =========================================================================
    // Display control handoff
    // =========================================================================

    fn take_display_control(&mut self, callback: DisplayControlCallback);
    fn relinquish_display_control(&mut self, callback: DisplayControlCallback);

    // =========================================================================
    // Enumeration and modes
    // =========================================================================

    /// Queries the connected outputs. Snapshots from earlier calls become stale once this
    /// completes.
    fn get_displays(&mut self, callback: GetDisplaysCallback);

    /// Registers a mode the output does not advertise, so it can be passed to `configure`.
    fn add_mode(&mut self, output: &DisplaySnapshot, mode: &DisplayMode);

    /// Drives `output` with `mode` at `origin`, or disables it when `mode` is `None`.
    ///
    /// On failure the output keeps its previous state.
    fn configure(
        &mut self,
        output: &DisplaySnapshot,
        mode: Option<&DisplayMode>,
        origin: Point,
        callback: ConfigureCallback,
    );

    // =========================================================================
    // HDCP
    // =========================================================================

    fn get_hdcp_state(&mut self, output: &DisplaySnapshot, callback: GetHdcpStateCallback);

    /// Requests a transition. The callback reports whether the request was accepted, not
    /// whether the link finished negotiating.
    fn set_hdcp_state(
        &mut self,
        output: &DisplaySnapshot,
        state: HdcpState,
        callback: SetHdcpStateCallback,
    );

    // =========================================================================
    // Color
    // =========================================================================

    fn available_color_calibration_profiles(
        &self,
        output: &DisplaySnapshot,
    ) -> Vec<ColorCalibrationProfile>;

    fn set_color_calibration_profile(
        &mut self,
        output: &DisplaySnapshot,
        profile: ColorCalibrationProfile,
    ) -> bool;

    /// Empty tables or an empty matrix reset that stage to identity.
    fn set_color_correction(
        &mut self,
        output: &DisplaySnapshot,
        degamma: &[GammaRampRgbEntry],
        gamma: &[GammaRampRgbEntry],
        correction_matrix: &[f32],
    ) -> bool;

    // =========================================================================
    // Observers
    // =========================================================================

    /// The delegate keeps a weak reference; the caller owns the observer.
    fn add_observer(&mut self, observer: &Rc<dyn DisplayObserver>) -> ObserverToken;
    fn remove_observer(&mut self, token: ObserverToken);

    /// Handle to the simulated display state, for backends that have one.
    fn fake_display_controller(&self) -> Option<FakeDisplayController> {
        None
    }
}

/// Holds the server grab until dropped.
pub struct ServerGrabGuard<'a> {
    delegate: &'a mut dyn DisplayDelegate,
}

/// Grabs the server for the lifetime of the returned guard.
pub fn grab(delegate: &mut dyn DisplayDelegate) -> ServerGrabGuard<'_> {
    delegate.grab_server();
    ServerGrabGuard { delegate }
}

impl<'a> Deref for ServerGrabGuard<'a> {
    type Target = dyn DisplayDelegate + 'a;

    fn deref(&self) -> &Self::Target {
        self.delegate
    }
}

impl<'a> DerefMut for ServerGrabGuard<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.delegate
    }
}

impl Drop for ServerGrabGuard<'_> {
    fn drop(&mut self) {
        self.delegate.ungrab_server();
    }
}
