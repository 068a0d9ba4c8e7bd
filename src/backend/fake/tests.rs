use std::cell::RefCell;
use std::rc::Rc;

use calloop::EventLoop;
use display_delegate_config::{FakeConfig, HdcpNegotiation};
use proptest::prelude::*;
use proptest_derive::Arbitrary;

use super::*;
use crate::color::{linear_ramp, IDENTITY_MATRIX};
use crate::completion::tests::flush;
use crate::delegate::grab;
use crate::snapshot::DisplayId;
use crate::types::ConnectionType;

const FHD: DisplayMode = DisplayMode::new(1920, 1080, 60.);
const HD: DisplayMode = DisplayMode::new(1280, 720, 60.);
const UHD: DisplayMode = DisplayMode::new(3840, 2160, 60.);

struct Fixture {
    event_loop: EventLoop<'static, ()>,
    backend: Option<FakeBackend>,
    controller: FakeDisplayController,
}

impl Fixture {
    fn new(outputs: Vec<SimulatedOutput>) -> Self {
        Self::with_config(&FakeConfig::default(), outputs)
    }

    fn with_config(config: &FakeConfig, outputs: Vec<SimulatedOutput>) -> Self {
        let event_loop = EventLoop::try_new().unwrap();
        let mut backend = FakeBackend::new(config, &event_loop.handle()).unwrap();
        backend.initialize();
        let controller = backend.fake_display_controller().unwrap();
        for output in outputs {
            controller.add_output(output);
        }

        Self {
            event_loop,
            backend: Some(backend),
            controller,
        }
    }

    fn backend(&mut self) -> &mut FakeBackend {
        self.backend.as_mut().unwrap()
    }

    /// Issues an operation and returns its single callback value.
    #[track_caller]
    fn call<T: 'static>(
        &mut self,
        issue: impl FnOnce(&mut FakeBackend, Box<dyn FnOnce(T)>),
    ) -> T {
        let results = Rc::new(RefCell::new(Vec::new()));
        let results_ = results.clone();
        issue(
            self.backend(),
            Box::new(move |value: T| results_.borrow_mut().push(value)),
        );
        assert!(results.borrow().is_empty(), "callback ran inline");

        flush(&mut self.event_loop);
        let mut results = results.take();
        assert_eq!(results.len(), 1, "callback must run exactly once");
        results.pop().unwrap()
    }

    fn enumerate(&mut self) -> Vec<DisplaySnapshot> {
        self.call(|b, cb| b.get_displays(cb))
    }

    fn configure(
        &mut self,
        output: &DisplaySnapshot,
        mode: Option<DisplayMode>,
        origin: Point,
    ) -> bool {
        self.call(|b, cb| b.configure(output, mode.as_ref(), origin, cb))
    }

    fn take_control(&mut self) -> bool {
        self.call(|b, cb| b.take_display_control(cb))
    }

    fn relinquish_control(&mut self) -> bool {
        self.call(|b, cb| b.relinquish_display_control(cb))
    }

    fn get_hdcp(&mut self, output: &DisplaySnapshot) -> Option<HdcpState> {
        self.call(|b, cb| b.get_hdcp_state(output, cb))
    }

    fn set_hdcp(&mut self, output: &DisplaySnapshot, state: HdcpState) -> bool {
        self.call(|b, cb| b.set_hdcp_state(output, state, cb))
    }
}

fn panel() -> SimulatedOutput {
    SimulatedOutput::new("eDP-1", ConnectionType::INTERNAL, vec![FHD, HD])
        .with_color_correction_matrix()
        .with_color_profiles(vec![
            ColorCalibrationProfile::Standard,
            ColorCalibrationProfile::Movie,
        ])
}

fn monitor() -> SimulatedOutput {
    SimulatedOutput::new("HDMI-A-1", ConnectionType::HDMI, vec![UHD, FHD]).with_hdcp()
}

/// Records observer notifications into a shared log.
struct Recorder {
    log: Rc<RefCell<Vec<&'static str>>>,
}

impl DisplayObserver for Recorder {
    fn on_configuration_changed(&self) {
        self.log.borrow_mut().push("changed");
    }

    fn on_display_snapshots_invalidated(&self) {
        self.log.borrow_mut().push("invalidated");
    }
}

fn recorder() -> (Rc<dyn DisplayObserver>, Rc<RefCell<Vec<&'static str>>>) {
    let log = Rc::new(RefCell::new(Vec::new()));
    let observer: Rc<dyn DisplayObserver> = Rc::new(Recorder { log: log.clone() });
    (observer, log)
}

// =============================================================================
// Enumeration and configuration
// =============================================================================

#[test]
fn configure_panel_at_native_mode() {
    let mut f = Fixture::new(vec![panel()]);

    let displays = f.enumerate();
    let [a] = &displays[..] else {
        panic!("expected one output");
    };
    assert_eq!(a.modes, [FHD, HD]);

    assert!(f.configure(a, Some(FHD), Point::new(0, 0)));

    let displays = f.enumerate();
    assert_eq!(displays[0].current_mode, Some(FHD));
    assert_eq!(displays[0].origin, Point::new(0, 0));
}

#[test]
fn configure_round_trips_mode_and_origin() {
    let mut f = Fixture::new(vec![panel(), monitor()]);
    let displays = f.enumerate();

    assert!(f.configure(&displays[1], Some(FHD), Point::new(1920, 0)));

    let displays = f.enumerate();
    assert_eq!(displays[1].current_mode, Some(FHD));
    assert_eq!(displays[1].origin, Point::new(1920, 0));
    assert_eq!(displays[0].current_mode, Some(FHD));
}

#[test]
fn disabled_output_is_reported_disabled() {
    let mut f = Fixture::new(vec![panel()]);
    let displays = f.enumerate();
    assert!(displays[0].is_enabled());

    assert!(f.configure(&displays[0], None, Point::new(0, 0)));

    let displays = f.enumerate();
    assert!(!displays[0].is_enabled());
    assert_eq!(displays[0].current_mode, None);
}

#[test]
fn unsupported_mode_fails_and_keeps_state() {
    let mut f = Fixture::new(vec![panel()]);
    let displays = f.enumerate();

    assert!(!f.configure(&displays[0], Some(UHD), Point::new(0, 0)));
    assert!(!f.configure(&displays[0], Some(HD), Point::new(-1, 0)));

    let displays = f.enumerate();
    assert_eq!(displays[0].current_mode, Some(FHD));
}

#[test]
fn added_mode_can_be_configured_and_persists() {
    let mut f = Fixture::new(vec![panel()]);
    let displays = f.enumerate();
    let custom = DisplayMode::new(1600, 900, 60.);

    assert!(!f.configure(&displays[0], Some(custom), Point::new(0, 0)));

    f.backend().add_mode(&displays[0], &custom);
    // Adding an advertised mode is a no-op.
    f.backend().add_mode(&displays[0], &HD);
    assert!(f.configure(&displays[0], Some(custom), Point::new(0, 0)));

    let displays = f.enumerate();
    assert_eq!(displays[0].modes, [FHD, HD, custom]);
    assert_eq!(displays[0].current_mode, Some(custom));
    assert_eq!(f.controller.custom_modes(displays[0].id()), [custom]);
}

#[test]
fn unplugging_forgets_added_modes() {
    let mut f = Fixture::new(vec![panel()]);
    let displays = f.enumerate();
    let custom = DisplayMode::new(1600, 900, 60.);
    f.backend().add_mode(&displays[0], &custom);
    let old = displays[0].id();
    assert_eq!(f.controller.custom_modes(old), [custom]);

    assert!(f.controller.remove_output(old));
    assert!(f.controller.custom_modes(old).is_empty());

    // A replugged output is a new output.
    let new = f.controller.add_output(panel());
    assert_ne!(new, old);
    let displays = f.enumerate();
    assert_eq!(displays[0].id(), new);
    assert_eq!(displays[0].modes, [FHD, HD]);
    assert!(f.controller.custom_modes(new).is_empty());
}

#[test]
fn framebuffer_bounds_configure() {
    let mut f = Fixture::new(vec![panel(), monitor()]);
    let displays = f.enumerate();

    {
        let mut guard = grab(f.backend());
        guard.create_frame_buffer(Size::new(3840, 1080));
        guard.set_background_color(0xff000000);
    }
    assert!(!f.controller.is_grabbed());
    assert_eq!(f.controller.framebuffer_size(), Some(Size::new(3840, 1080)));

    assert!(f.configure(&displays[1], Some(FHD), Point::new(1920, 0)));
    assert!(!f.configure(&displays[1], Some(FHD), Point::new(1921, 0)));
    assert!(!f.configure(&displays[1], Some(UHD), Point::new(0, 0)));
    assert_eq!(f.controller.origin(displays[1].id()), Some(Point::new(1920, 0)));
}

#[test]
fn injected_rejection_keeps_previous_state() {
    let mut f = Fixture::new(vec![panel()]);
    let displays = f.enumerate();

    f.controller.reject_next_configures(1);
    assert!(!f.configure(&displays[0], Some(HD), Point::new(0, 0)));
    assert_eq!(f.controller.current_mode(displays[0].id()), Some(FHD));

    assert!(f.configure(&displays[0], Some(HD), Point::new(0, 0)));
    assert_eq!(f.controller.current_mode(displays[0].id()), Some(HD));
}

#[test]
fn stale_snapshots_are_rejected() {
    let mut f = Fixture::new(vec![monitor()]);
    let old = f.enumerate();
    let new = f.enumerate();

    assert!(!f.configure(&old[0], Some(FHD), Point::new(0, 0)));
    assert_eq!(f.get_hdcp(&old[0]), None);
    assert!(!f.set_hdcp(&old[0], HdcpState::Desired));
    assert!(f.configure(&new[0], Some(FHD), Point::new(0, 0)));
}

#[test]
fn unplugged_output_is_rejected_in_same_generation() {
    let mut f = Fixture::new(vec![panel(), monitor()]);
    let displays = f.enumerate();

    assert!(f.controller.remove_output(displays[1].id()));
    assert!(!f.configure(&displays[1], Some(FHD), Point::new(0, 0)));
    assert_eq!(f.enumerate().len(), 1);
}

#[test]
fn unenumerated_snapshot_is_rejected() {
    let mut f = Fixture::new(vec![panel()]);
    let forged = DisplaySnapshot::new(DisplayId(1), "eDP-1");
    assert!(!f.configure(&forged, Some(FHD), Point::new(0, 0)));
}

// =============================================================================
// Display control
// =============================================================================

#[test]
fn take_control_fails_while_held_elsewhere() {
    let mut f = Fixture::new(vec![panel()]);
    f.controller.set_display_control_holder(ControlHolder::Other);
    let displays = f.enumerate();

    assert!(!f.take_control());
    assert_eq!(f.controller.display_control_holder(), ControlHolder::Other);

    // Configuring anyway must not change anything.
    assert!(!f.configure(&displays[0], Some(HD), Point::new(0, 0)));
    assert_eq!(f.controller.current_mode(displays[0].id()), Some(FHD));
}

#[test]
fn held_elsewhere_from_config() {
    let config = FakeConfig {
        display_control: display_delegate_config::DisplayControl::HeldElsewhere,
        ..Default::default()
    };
    let mut f = Fixture::with_config(&config, vec![panel()]);
    assert!(!f.take_control());

    f.controller.set_display_control_holder(ControlHolder::Nobody);
    assert!(f.take_control());
}

#[test]
fn relinquish_requires_holding_control() {
    let mut f = Fixture::new(vec![]);
    assert!(!f.relinquish_control());

    assert!(f.take_control());
    assert!(f.take_control());
    assert_eq!(f.controller.display_control_holder(), ControlHolder::Us);

    assert!(f.relinquish_control());
    assert_eq!(f.controller.display_control_holder(), ControlHolder::Nobody);
    assert!(!f.relinquish_control());
}

// =============================================================================
// HDCP
// =============================================================================

#[test]
fn hdcp_requires_capable_output() {
    let mut f = Fixture::new(vec![panel()]);
    let displays = f.enumerate();

    assert_eq!(f.get_hdcp(&displays[0]), None);
    assert!(!f.set_hdcp(&displays[0], HdcpState::Desired));
}

#[test]
fn hdcp_negotiation_succeeds() {
    let mut f = Fixture::new(vec![monitor()]);
    let displays = f.enumerate();

    assert_eq!(f.get_hdcp(&displays[0]), Some(HdcpState::Undesired));
    assert!(f.set_hdcp(&displays[0], HdcpState::Desired));
    assert_eq!(f.get_hdcp(&displays[0]), Some(HdcpState::Enabled));

    assert!(f.set_hdcp(&displays[0], HdcpState::Undesired));
    assert_eq!(f.get_hdcp(&displays[0]), Some(HdcpState::Undesired));
}

#[test]
fn hdcp_manual_negotiation_and_link_loss() {
    let mut f = Fixture::new(vec![monitor()]);
    f.controller.set_hdcp_negotiation(HdcpNegotiation::Manual);
    let displays = f.enumerate();
    let id = displays[0].id();

    // Enabled can only be confirmed by the link.
    assert!(f.set_hdcp(&displays[0], HdcpState::Enabled));
    assert_eq!(f.get_hdcp(&displays[0]), Some(HdcpState::Desired));

    assert!(f.controller.finish_hdcp_negotiation(id, true));
    assert_eq!(f.get_hdcp(&displays[0]), Some(HdcpState::Enabled));
    assert!(!f.controller.finish_hdcp_negotiation(id, true));

    let (observer, log) = recorder();
    f.backend().add_observer(&observer);
    assert!(f.controller.drop_hdcp_link(id));
    assert_eq!(*log.borrow(), ["changed"]);
    assert_eq!(f.get_hdcp(&displays[0]), Some(HdcpState::Desired));
}

#[test]
fn hdcp_failed_negotiation_stays_desired() {
    let mut f = Fixture::new(vec![monitor()]);
    f.controller.set_hdcp_negotiation(HdcpNegotiation::Fail);
    let displays = f.enumerate();

    assert!(f.set_hdcp(&displays[0], HdcpState::Desired));
    assert_eq!(f.get_hdcp(&displays[0]), Some(HdcpState::Desired));
}

#[test]
fn hdcp_refused_while_control_held_elsewhere() {
    let mut f = Fixture::new(vec![monitor()]);
    let displays = f.enumerate();
    f.controller.set_display_control_holder(ControlHolder::Other);

    assert!(!f.set_hdcp(&displays[0], HdcpState::Desired));
    assert_eq!(f.get_hdcp(&displays[0]), Some(HdcpState::Undesired));
}

#[derive(Debug, Clone, Copy, Arbitrary)]
enum HdcpOp {
    Request(#[proptest(strategy = "hdcp_state()")] HdcpState),
    Query,
    DropLink,
    Finish(bool),
    Policy(#[proptest(strategy = "negotiation()")] HdcpNegotiation),
}

fn hdcp_state() -> impl Strategy<Value = HdcpState> {
    prop_oneof![
        Just(HdcpState::Undesired),
        Just(HdcpState::Desired),
        Just(HdcpState::Enabled),
    ]
}

fn negotiation() -> impl Strategy<Value = HdcpNegotiation> {
    prop_oneof![
        Just(HdcpNegotiation::Succeed),
        Just(HdcpNegotiation::Fail),
        Just(HdcpNegotiation::Manual),
    ]
}

proptest! {
    #[test]
    fn hdcp_never_undesired_after_desired(ops: Vec<HdcpOp>) {
        let mut f = Fixture::new(vec![monitor()]);
        let displays = f.enumerate();
        let output = &displays[0];
        let id = output.id();

        let mut requested_protection = false;
        for op in ops {
            match op {
                HdcpOp::Request(state) => {
                    prop_assert!(f.set_hdcp(output, state));
                    requested_protection = state != HdcpState::Undesired;
                }
                HdcpOp::Query => {
                    let state = f.get_hdcp(output);
                    prop_assert!(state.is_some());
                    if requested_protection {
                        prop_assert_ne!(state, Some(HdcpState::Undesired));
                    }
                }
                HdcpOp::DropLink => {
                    f.controller.drop_hdcp_link(id);
                }
                HdcpOp::Finish(authenticated) => {
                    f.controller.finish_hdcp_negotiation(id, authenticated);
                }
                HdcpOp::Policy(policy) => f.controller.set_hdcp_negotiation(policy),
            }
        }
    }
}

// =============================================================================
// Color
// =============================================================================

#[test]
fn calibration_profiles() {
    let mut f = Fixture::new(vec![panel(), monitor()]);
    let displays = f.enumerate();

    assert_eq!(
        f.backend().available_color_calibration_profiles(&displays[0]),
        [ColorCalibrationProfile::Standard, ColorCalibrationProfile::Movie]
    );
    assert!(f
        .backend()
        .available_color_calibration_profiles(&displays[1])
        .is_empty());

    assert!(f
        .backend()
        .set_color_calibration_profile(&displays[0], ColorCalibrationProfile::Movie));
    assert!(!f
        .backend()
        .set_color_calibration_profile(&displays[0], ColorCalibrationProfile::Reading));
    assert_eq!(
        f.controller.active_color_profile(displays[0].id()),
        Some(ColorCalibrationProfile::Movie)
    );
}

#[test]
fn color_correction_reset_is_idempotent() {
    let mut f = Fixture::new(vec![panel()]);
    let displays = f.enumerate();
    let id = displays[0].id();

    let dim = [GammaRampRgbEntry::gray(0), GammaRampRgbEntry::gray(30000)];
    assert!(f.backend().set_color_correction(&displays[0], &[], &dim, &[]));
    assert!(!f.controller.color_correction(id).unwrap().is_identity());

    assert!(f
        .backend()
        .set_color_correction(&displays[0], &[], &[], &IDENTITY_MATRIX));
    let once = f.controller.color_correction(id);
    assert!(f
        .backend()
        .set_color_correction(&displays[0], &[], &[], &IDENTITY_MATRIX));
    let twice = f.controller.color_correction(id);

    assert_eq!(once, twice);
    assert_eq!(once, Some(ColorCorrection::identity()));
}

#[test]
fn color_correction_validation() {
    let mut f = Fixture::new(vec![panel(), monitor()]);
    let displays = f.enumerate();
    let sepia = [0.39, 0.77, 0.19, 0.35, 0.69, 0.17, 0.27, 0.53, 0.13];

    assert!(!f.backend().set_color_correction(&displays[0], &[], &[], &[1.; 4]));
    // No color transform matrix on the external monitor.
    assert!(!f.backend().set_color_correction(&displays[1], &[], &[], &sepia));
    // Tables alone are fine everywhere.
    assert!(f
        .backend()
        .set_color_correction(&displays[1], &linear_ramp(16), &[], &[]));

    assert!(f.backend().set_color_correction(&displays[0], &[], &[], &sepia));
    assert_eq!(
        f.controller.color_correction(displays[0].id()).unwrap().matrix,
        Some(sepia)
    );
}

// =============================================================================
// Observers
// =============================================================================

#[test]
fn hotplug_notifies_observers() {
    let mut f = Fixture::new(vec![panel()]);
    let (observer, log) = recorder();
    let token = f.backend().add_observer(&observer);

    let id = f.controller.add_output(monitor());
    assert_eq!(*log.borrow(), ["changed"]);

    f.backend().remove_observer(token);
    assert!(f.controller.remove_output(id));
    f.controller.trigger_configuration_changed();
    assert_eq!(*log.borrow(), ["changed"]);
}

#[test]
fn external_mode_change_notifies_and_shows_in_next_enumeration() {
    let mut f = Fixture::new(vec![panel()]);
    let displays = f.enumerate();
    let (observer, log) = recorder();
    f.backend().add_observer(&observer);

    assert!(f.controller.set_current_mode(displays[0].id(), Some(HD)));
    assert_eq!(*log.borrow(), ["changed"]);

    let displays = f.enumerate();
    assert_eq!(displays[0].current_mode, Some(HD));
    assert_eq!(*log.borrow(), ["changed", "invalidated"]);

    assert!(f.controller.set_current_mode(displays[0].id(), None));
    assert_eq!(f.enumerate()[0].current_mode, None);

    assert!(!f.controller.set_current_mode(DisplayId(99), Some(HD)));
    assert_eq!(log.borrow().len(), 4);
}

#[test]
fn reenumeration_invalidates_before_delivering() {
    let mut f = Fixture::new(vec![panel()]);
    let (observer, log) = recorder();
    f.backend().add_observer(&observer);

    let log_ = log.clone();
    f.backend()
        .get_displays(Box::new(move |_| log_.borrow_mut().push("displays")));
    flush(&mut f.event_loop);
    assert_eq!(*log.borrow(), ["displays"]);

    let log_ = log.clone();
    f.backend()
        .get_displays(Box::new(move |_| log_.borrow_mut().push("displays")));
    flush(&mut f.event_loop);
    assert_eq!(*log.borrow(), ["displays", "invalidated", "displays"]);
}

#[test]
fn dropped_observer_is_ignored() {
    let mut f = Fixture::new(vec![]);
    let (observer, log) = recorder();
    f.backend().add_observer(&observer);
    drop(observer);

    f.controller.add_output(panel());
    assert!(log.borrow().is_empty());
}

// =============================================================================
// Resource guard and raw protocol calls
// =============================================================================

#[test]
fn grab_imbalance_is_counted_not_fatal() {
    let mut f = Fixture::new(vec![]);

    f.backend().ungrab_server();
    f.backend().grab_server();
    f.backend().grab_server();
    assert!(f.controller.is_grabbed());
    f.backend().ungrab_server();
    assert!(!f.controller.is_grabbed());

    assert_eq!(f.controller.grab_violations(), 2);
}

#[test]
fn raw_calls_outside_grab_are_counted() {
    let mut f = Fixture::new(vec![]);

    f.backend().set_background_color(0xff102030);
    f.backend().create_frame_buffer(Size::new(1920, 1080));
    f.backend().force_dpms_on();
    f.backend().sync_with_server();

    assert_eq!(f.controller.ungrabbed_protocol_calls(), 2);
    assert_eq!(f.controller.background_color(), Some(0xff102030));
    assert_eq!(f.controller.framebuffer_size(), Some(Size::new(1920, 1080)));
    assert_eq!(f.controller.dpms_forced_on(), 1);
    assert_eq!(f.controller.sync_count(), 1);
    assert!(f.controller.is_initialized());
}

// =============================================================================
// Completion accounting
// =============================================================================

#[test]
fn every_issued_callback_completes_once() {
    let mut f = Fixture::new(vec![panel(), monitor()]);
    f.controller.set_display_control_holder(ControlHolder::Other);

    let stale = f.enumerate();
    let displays = f.enumerate();
    f.take_control();
    f.relinquish_control();
    f.configure(&displays[0], Some(HD), Point::new(0, 0));
    f.configure(&stale[0], Some(HD), Point::new(0, 0));
    f.get_hdcp(&displays[0]);
    f.get_hdcp(&displays[1]);
    f.set_hdcp(&displays[1], HdcpState::Desired);

    for op in Operation::ALL {
        assert_eq!(f.controller.issued(op), f.controller.completed(op), "{op:?}");
    }
    assert_eq!(f.controller.issued(Operation::GetDisplays), 2);
    assert_eq!(f.controller.issued(Operation::Configure), 2);
    assert_eq!(f.controller.outstanding(), 0);
}

#[test]
fn held_operations_apply_in_order_on_release() {
    let mut f = Fixture::new(vec![panel()]);
    let displays = f.enumerate();

    f.controller.set_hold_completions(true);
    let results = Rc::new(RefCell::new(Vec::new()));
    for (mode, tag) in [(HD, "hd"), (FHD, "fhd")] {
        let results_ = results.clone();
        f.backend().configure(
            &displays[0],
            Some(&mode),
            Point::new(0, 0),
            Box::new(move |ok| results_.borrow_mut().push((tag, ok))),
        );
    }
    flush(&mut f.event_loop);

    assert!(results.borrow().is_empty());
    assert_eq!(f.controller.held_count(), 2);
    assert_eq!(f.controller.current_mode(displays[0].id()), Some(FHD));
    assert_eq!(f.controller.outstanding(), 2);

    f.controller.set_hold_completions(false);
    assert_eq!(f.controller.release_held(), 2);
    flush(&mut f.event_loop);

    assert_eq!(*results.borrow(), [("hd", true), ("fhd", true)]);
    assert_eq!(f.controller.current_mode(displays[0].id()), Some(FHD));
    assert_eq!(f.controller.outstanding(), 0);
}

#[test]
fn released_callback_may_use_backend_after_loop_is_gone() {
    let event_loop = EventLoop::<()>::try_new().unwrap();
    let mut backend = FakeBackend::new(&FakeConfig::default(), &event_loop.handle()).unwrap();
    backend.initialize();
    let controller = backend.fake_display_controller().unwrap();
    controller.add_output(panel());
    controller.set_hold_completions(true);

    let seen = Rc::new(RefCell::new(None));
    let seen_ = seen.clone();
    let controller_ = controller.clone();
    backend.take_display_control(Box::new(move |ok| {
        *seen_.borrow_mut() = Some((ok, controller_.display_control_holder()));
    }));
    drop(event_loop);

    // Callbacks now run inline from `release_held`.
    controller.set_hold_completions(false);
    assert_eq!(controller.release_held(), 1);
    assert_eq!(*seen.borrow(), Some((true, ControlHolder::Us)));
    assert_eq!(controller.outstanding(), 0);
}

#[test]
fn destroying_backend_fails_outstanding_callbacks() {
    let mut f = Fixture::new(vec![monitor()]);
    let displays = f.enumerate();
    f.controller.set_hold_completions(true);

    let log = Rc::new(RefCell::new(Vec::new()));
    let log_ = log.clone();
    f.backend().configure(
        &displays[0],
        Some(&FHD),
        Point::new(0, 0),
        Box::new(move |ok| log_.borrow_mut().push(format!("configure {ok}"))),
    );
    let log_ = log.clone();
    f.backend().get_hdcp_state(
        &displays[0],
        Box::new(move |state| log_.borrow_mut().push(format!("hdcp {state:?}"))),
    );
    let log_ = log.clone();
    f.backend().get_displays(Box::new(move |displays| {
        log_.borrow_mut().push(format!("displays {}", displays.len()))
    }));

    drop(f.backend.take());
    assert!(log.borrow().is_empty());
    flush(&mut f.event_loop);

    assert_eq!(*log.borrow(), ["configure false", "hdcp None", "displays 0"]);
    assert_eq!(f.controller.outstanding(), 0);
    // Nothing was applied.
    assert_eq!(f.controller.current_mode(displays[0].id()), Some(UHD));
    assert_eq!(f.controller.held_count(), 0);
}

#[test]
fn already_completed_callbacks_survive_destruction() {
    let mut f = Fixture::new(vec![panel()]);

    let result = Rc::new(RefCell::new(None));
    let result_ = result.clone();
    f.backend()
        .take_display_control(Box::new(move |ok| *result_.borrow_mut() = Some(ok)));
    drop(f.backend.take());

    flush(&mut f.event_loop);
    assert_eq!(*result.borrow(), Some(true));
}
