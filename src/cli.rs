//! Command-line front end: a minimal orchestrator driving a [`DisplayDelegate`].

use std::cell::RefCell;
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, ensure, Context};
use calloop::EventLoop;
use clap::{Parser, Subcommand, ValueEnum};
use directories::ProjectDirs;
use display_delegate_config::Config;
use tracing::debug;

use crate::backend;
use crate::delegate::{grab, DisplayDelegate};
use crate::observer::{DisplayObserver, ObserverToken};
use crate::snapshot::{DisplayId, DisplayMode, DisplaySnapshot};
use crate::types::{ColorCalibrationProfile, HdcpState, Point, Size};

/// How long to wait for a callback before giving up.
const TIMEOUT: Duration = Duration::from_secs(5);

const DEFAULT_BACKGROUND_COLOR: u32 = 0xff000000;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (default: `$XDG_CONFIG_HOME/display-delegate/config.kdl`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// List connected outputs.
    List {
        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },
    /// Change the mode and position of an output.
    Configure {
        /// Connector or monitor name.
        output: String,
        /// Mode as WIDTHxHEIGHT or WIDTHxHEIGHT@REFRESH.
        #[arg(long, required_unless_present = "off", conflicts_with = "off")]
        mode: Option<String>,
        /// Turn the output off.
        #[arg(long)]
        off: bool,
        /// Position in the shared framebuffer as X,Y.
        #[arg(long, default_value = "0,0", allow_hyphen_values = true)]
        position: Point,
    },
    /// Show or request the HDCP state of an output.
    Hdcp {
        /// Connector or monitor name.
        output: String,
        /// One of undesired, desired, enabled.
        state: Option<HdcpState>,
    },
    /// Show or change the color calibration of an output.
    Color {
        /// Connector or monitor name.
        output: String,
        /// One of standard, dynamic, movie, reading.
        #[arg(long)]
        profile: Option<ColorCalibrationProfile>,
        /// Reset degamma, gamma and the correction matrix.
        #[arg(long)]
        reset: bool,
    },
    /// Take display control, or take it and hand it back.
    Control {
        #[arg(value_enum)]
        action: ControlAction,
    },
    /// Validate the config file.
    Validate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ControlAction {
    Take,
    Relinquish,
}

pub fn default_config_path() -> Option<PathBuf> {
    let dirs = ProjectDirs::from("", "", "display-delegate")?;
    Some(dirs.config_dir().join("config.kdl"))
}

/// Loads `path`, or the default config file if it exists, or the built-in default config.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let path = match path {
        Some(path) => path.to_owned(),
        None => match default_config_path() {
            Some(path) if path.exists() => path,
            _ => {
                debug!("no config file, using the default config");
                return Ok(Config::default());
            }
        },
    };

    // The miette report renders the source snippet, keep it in the message.
    Config::load(&path).map_err(|err| anyhow!("{err:?}"))
}

pub fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Validate => {
            println!("config is valid");
            Ok(())
        }
        Command::List { json } => list(&mut Session::new(&config)?, json),
        Command::Configure {
            output,
            mode,
            off,
            position,
        } => {
            let mode = if off { None } else { mode };
            configure(&mut Session::new(&config)?, &config, &output, mode, position)
        }
        Command::Hdcp { output, state } => hdcp(&mut Session::new(&config)?, &output, state),
        Command::Color {
            output,
            profile,
            reset,
        } => color(&mut Session::new(&config)?, &output, profile, reset),
        Command::Control { action } => control(&mut Session::new(&config)?, action),
    }
}

// =============================================================================
// Session
// =============================================================================

struct LogObserver;

impl DisplayObserver for LogObserver {
    fn on_configuration_changed(&self) {
        debug!("display configuration changed");
    }

    fn on_display_snapshots_invalidated(&self) {
        debug!("display snapshots invalidated");
    }
}

/// A delegate together with the event loop its callbacks run on.
pub struct Session {
    delegate: Box<dyn DisplayDelegate>,
    event_loop: EventLoop<'static, ()>,
    observer_token: ObserverToken,
    _observer: Rc<dyn DisplayObserver>,
}

impl Session {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let event_loop = EventLoop::try_new().context("error creating event loop")?;
        let mut delegate = backend::create(config, &event_loop.handle())?;
        delegate.initialize();

        let observer: Rc<dyn DisplayObserver> = Rc::new(LogObserver);
        let observer_token = delegate.add_observer(&observer);

        Ok(Self {
            delegate,
            event_loop,
            observer_token,
            _observer: observer,
        })
    }

    pub fn delegate(&mut self) -> &mut dyn DisplayDelegate {
        &mut *self.delegate
    }

    /// Issues an asynchronous operation and runs the event loop until its callback fires.
    pub fn wait<T: 'static>(
        &mut self,
        issue: impl FnOnce(&mut dyn DisplayDelegate, Box<dyn FnOnce(T)>),
    ) -> anyhow::Result<T> {
        let result = Rc::new(RefCell::new(None));
        let result_ = result.clone();
        issue(
            &mut *self.delegate,
            Box::new(move |value: T| *result_.borrow_mut() = Some(value)),
        );

        let deadline = Instant::now() + TIMEOUT;
        loop {
            if let Some(value) = result.borrow_mut().take() {
                return Ok(value);
            }

            let now = Instant::now();
            ensure!(now < deadline, "timed out waiting for the display backend");
            self.event_loop
                .dispatch(Some(deadline - now), &mut ())
                .context("error dispatching the event loop")?;
        }
    }

    pub fn displays(&mut self) -> anyhow::Result<Vec<DisplaySnapshot>> {
        self.wait(|delegate, callback| delegate.get_displays(callback))
    }

    pub fn take_control(&mut self) -> anyhow::Result<()> {
        let taken = self.wait(|delegate, callback| delegate.take_display_control(callback))?;
        ensure!(taken, "another process holds display control");
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.delegate.remove_observer(self.observer_token);
    }
}

// =============================================================================
// Commands
// =============================================================================

fn list(session: &mut Session, json: bool) -> anyhow::Result<()> {
    let displays = session.displays()?;

    if json {
        let text = serde_json::to_string_pretty(&displays).context("error formatting JSON")?;
        println!("{text}");
        return Ok(());
    }

    if displays.is_empty() {
        println!("No outputs connected.");
    }

    for (idx, snapshot) in displays.iter().enumerate() {
        if idx != 0 {
            println!();
        }
        let profiles = session
            .delegate()
            .available_color_calibration_profiles(snapshot);
        print!(
            "{}",
            OutputReport {
                snapshot,
                profiles: &profiles,
            }
        );
    }

    Ok(())
}

fn configure(
    session: &mut Session,
    config: &Config,
    output: &str,
    mode: Option<String>,
    position: Point,
) -> anyhow::Result<()> {
    session.take_control()?;

    let displays = session.displays()?;
    let target = find_output(&displays, output)?;
    let mode = mode.map(|mode| resolve_mode(target, &mode)).transpose()?;

    if let Some(mode) = &mode {
        if !target.has_mode(mode) {
            debug!("{} does not advertise {mode}, adding it", target.name);
            session.delegate().add_mode(target, mode);
        }
    }

    let size = framebuffer_size(&displays, target.id(), mode.map(|mode| (mode, position)));
    if !size.is_empty() {
        let background = config
            .background_color
            .map_or(DEFAULT_BACKGROUND_COLOR, |color| color.0);

        let mut delegate = grab(session.delegate());
        delegate.create_frame_buffer(size);
        delegate.set_background_color(background);
        delegate.sync_with_server();
    }

    let applied = session.wait(|delegate, callback| {
        delegate.configure(target, mode.as_ref(), position, callback)
    })?;
    ensure!(applied, "the backend rejected the configuration of {}", target.name);

    if mode.is_some() {
        session.delegate().force_dpms_on();
    }

    let displays = session.displays()?;
    let snapshot = find_output(&displays, output)?;
    let profiles = session
        .delegate()
        .available_color_calibration_profiles(snapshot);
    print!(
        "{}",
        OutputReport {
            snapshot,
            profiles: &profiles,
        }
    );
    Ok(())
}

fn hdcp(session: &mut Session, output: &str, state: Option<HdcpState>) -> anyhow::Result<()> {
    let displays = session.displays()?;
    let target = find_output(&displays, output)?;

    if let Some(state) = state {
        session.take_control()?;
        let accepted =
            session.wait(|delegate, callback| delegate.set_hdcp_state(target, state, callback))?;
        ensure!(accepted, "{} rejected the HDCP request", target.name);
    }

    let state = session.wait(|delegate, callback| delegate.get_hdcp_state(target, callback))?;
    match state {
        Some(state) => println!("{}: HDCP {state}", target.name),
        None => bail!("could not query the HDCP state of {}", target.name),
    }
    Ok(())
}

fn color(
    session: &mut Session,
    output: &str,
    profile: Option<ColorCalibrationProfile>,
    reset: bool,
) -> anyhow::Result<()> {
    let displays = session.displays()?;
    let target = find_output(&displays, output)?;
    let delegate = session.delegate();

    if reset {
        ensure!(
            delegate.set_color_correction(target, &[], &[], &[]),
            "error resetting color correction of {}",
            target.name
        );
        println!("{}: color correction reset", target.name);
    }

    if let Some(profile) = profile {
        ensure!(
            delegate.set_color_calibration_profile(target, profile),
            "{} does not support the {profile} profile",
            target.name
        );
        println!("{}: color profile {profile}", target.name);
    }

    if !reset && profile.is_none() {
        let profiles = delegate.available_color_calibration_profiles(target);
        if profiles.is_empty() {
            println!("{}: no color calibration profiles", target.name);
        } else {
            println!("{}: {}", target.name, join(&profiles));
        }
    }

    Ok(())
}

fn control(session: &mut Session, action: ControlAction) -> anyhow::Result<()> {
    session.take_control()?;
    if action == ControlAction::Take {
        println!("Took display control");
        return Ok(());
    }

    let released =
        session.wait(|delegate, callback| delegate.relinquish_display_control(callback))?;
    ensure!(released, "error relinquishing display control");
    println!("Took and relinquished display control");
    Ok(())
}

// =============================================================================
// Helpers
// =============================================================================

fn find_output<'a>(displays: &'a [DisplaySnapshot], name: &str) -> anyhow::Result<&'a DisplaySnapshot> {
    displays
        .iter()
        .find(|d| d.name == name || d.display_name == name)
        .with_context(|| format!("no output named {name:?}"))
}

/// Parses `WIDTHxHEIGHT@REFRESH`, or picks the best advertised mode for `WIDTHxHEIGHT`.
fn resolve_mode(output: &DisplaySnapshot, arg: &str) -> anyhow::Result<DisplayMode> {
    if arg.contains('@') {
        return arg.parse();
    }

    let (width, height) = arg.split_once('x').context("expected WIDTHxHEIGHT")?;
    let size = Size::new(
        width.parse().context("error parsing width")?,
        height.parse().context("error parsing height")?,
    );

    output
        .modes
        .iter()
        .filter(|mode| mode.size == size)
        .max_by(|a, b| {
            (!a.is_interlaced)
                .cmp(&!b.is_interlaced)
                .then(a.refresh_rate.total_cmp(&b.refresh_rate))
        })
        .copied()
        .with_context(|| format!("{} has no {size} mode", output.name))
}

/// Smallest framebuffer covering every output that is on after the change.
fn framebuffer_size(
    displays: &[DisplaySnapshot],
    target: DisplayId,
    new: Option<(DisplayMode, Point)>,
) -> Size {
    let areas = displays.iter().filter_map(|d| {
        if d.id() == target {
            new
        } else {
            d.current_mode.map(|mode| (mode, d.origin))
        }
    });

    let mut size = Size::default();
    for (mode, origin) in areas {
        let x = origin.x.max(0) as u32;
        let y = origin.y.max(0) as u32;
        size.width = size.width.max(x.saturating_add(mode.size.width));
        size.height = size.height.max(y.saturating_add(mode.size.height));
    }
    size
}

fn join(profiles: &[ColorCalibrationProfile]) -> String {
    profiles
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Human-readable description of one output.
pub struct OutputReport<'a> {
    pub snapshot: &'a DisplaySnapshot,
    pub profiles: &'a [ColorCalibrationProfile],
}

impl fmt::Display for OutputReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.snapshot;

        writeln!(f, "Output \"{}\" ({})", s.display_name, s.name)?;
        writeln!(f, "  Connection: {}", s.connection_type.name())?;

        match &s.current_mode {
            Some(mode) => {
                write!(f, "  Current mode: {mode}")?;
                if s.native_mode.as_ref() == Some(mode) {
                    write!(f, " (native)")?;
                }
                writeln!(f)?;
                writeln!(f, "  Position: {}", s.origin)?;
            }
            None => writeln!(f, "  Disabled")?,
        }

        if !s.physical_size.is_empty() {
            writeln!(f, "  Physical size: {} mm", s.physical_size)?;
        }
        if s.product_id != 0 {
            writeln!(f, "  Product id: {:#x}", s.product_id)?;
        }

        let hdcp = if s.hdcp_capable { "capable" } else { "not supported" };
        writeln!(f, "  HDCP: {hdcp}")?;
        let ctm = if s.has_color_correction_matrix { "yes" } else { "no" };
        writeln!(f, "  Color correction matrix: {ctm}")?;
        if !self.profiles.is_empty() {
            writeln!(f, "  Color profiles: {}", join(self.profiles))?;
        }

        writeln!(f, "  Available modes:")?;
        for mode in &s.modes {
            write!(f, "    {mode}")?;
            let native = s.native_mode.as_ref() == Some(mode);
            let current = s.current_mode.as_ref() == Some(mode);
            match (native, current) {
                (true, true) => write!(f, " (native, current)")?,
                (true, false) => write!(f, " (native)")?,
                (false, true) => write!(f, " (current)")?,
                (false, false) => (),
            }
            writeln!(f)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use insta::assert_snapshot;

    use super::*;
    use crate::backend::fake::Operation;

    fn session() -> Session {
        let config = Config::parse(
            "test.kdl",
            r#"
            backend "fake"
            fake {
                output "eDP-1" {
                    connection "internal"
                    physical-size 309 174
                    product-id 4660
                    mode 1920 1080 refresh=60.0 current=true native=true
                    mode 1280 720 refresh=60.0
                    color-correction-matrix
                    color-profiles "standard" "movie"
                }
                output "HDMI-A-1" {
                    connection "hdmi"
                    mode 3840 2160 refresh=60.0 native=true
                    mode 1920 1080 refresh=60.0
                    mode 1920 1080 refresh=50.0 interlaced=true
                    hdcp
                }
            }
            "#,
        )
        .unwrap();
        Session::new(&config).unwrap()
    }

    fn report(session: &mut Session, snapshot: &DisplaySnapshot) -> String {
        let profiles = session
            .delegate()
            .available_color_calibration_profiles(snapshot);
        OutputReport {
            snapshot,
            profiles: &profiles,
        }
        .to_string()
    }

    #[test]
    fn list_fake_outputs() {
        let mut session = session();
        let displays = session.displays().unwrap();
        assert_eq!(displays.len(), 2);

        assert_snapshot!(report(&mut session, &displays[0]).trim_end(), @r#"Output "eDP-1" (eDP-1)
  Connection: internal
  Current mode: 1920x1080@60 (native)
  Position: 0,0
  Physical size: 309x174 mm
  Product id: 0x1234
  HDCP: not supported
  Color correction matrix: yes
  Color profiles: standard, movie
  Available modes:
    1920x1080@60 (native, current)
    1280x720@60"#);
        assert_snapshot!(report(&mut session, &displays[1]).trim_end(), @r#"Output "HDMI-A-1" (HDMI-A-1)
  Connection: hdmi
  Disabled
  HDCP: capable
  Color correction matrix: no
  Available modes:
    3840x2160@60 (native)
    1920x1080@60
    1920x1080@50i"#);
    }

    #[test]
    fn resolve_mode_prefers_progressive_and_fastest() {
        let mut output = DisplaySnapshot::new(DisplayId(1), "HDMI-A-1");
        output.modes = vec![
            DisplayMode::new(1920, 1080, 50.).interlaced(),
            DisplayMode::new(1920, 1080, 30.),
            DisplayMode::new(1920, 1080, 60.),
            DisplayMode::new(1280, 720, 60.),
        ];

        assert_eq!(
            resolve_mode(&output, "1920x1080").unwrap(),
            DisplayMode::new(1920, 1080, 60.)
        );
        assert_eq!(
            resolve_mode(&output, "1920x1080@30").unwrap(),
            DisplayMode::new(1920, 1080, 30.)
        );
        // Unadvertised modes parse fine, the caller registers them.
        assert_eq!(
            resolve_mode(&output, "1600x900@75").unwrap(),
            DisplayMode::new(1600, 900, 75.)
        );
        assert!(resolve_mode(&output, "1600x900").is_err());
        assert!(resolve_mode(&output, "wide").is_err());
    }

    #[test]
    fn framebuffer_covers_enabled_outputs() {
        let mut left = DisplaySnapshot::new(DisplayId(1), "eDP-1");
        left.current_mode = Some(DisplayMode::new(1920, 1080, 60.));
        let mut right = DisplaySnapshot::new(DisplayId(2), "HDMI-A-1");
        right.current_mode = Some(DisplayMode::new(3840, 2160, 60.));
        right.origin = Point::new(1920, 0);
        let displays = [left, right];

        assert_eq!(
            framebuffer_size(&displays, DisplayId(3), None),
            Size::new(5760, 2160)
        );
        // Turning the big one off shrinks the framebuffer.
        assert_eq!(
            framebuffer_size(&displays, DisplayId(2), None),
            Size::new(1920, 1080)
        );
        // Moving it below.
        let moved = Some((DisplayMode::new(1920, 1080, 60.), Point::new(0, 1080)));
        assert_eq!(
            framebuffer_size(&displays, DisplayId(2), moved),
            Size::new(1920, 2160)
        );
    }

    #[test]
    fn configure_through_session() {
        let config = Config::parse(
            "test.kdl",
            r#"
            backend "fake"
            fake {
                output "HDMI-A-1" {
                    connection "hdmi"
                    mode 3840 2160 refresh=60.0 native=true
                    mode 1920 1080 refresh=60.0
                }
            }
            "#,
        )
        .unwrap();
        let mut session = Session::new(&config).unwrap();

        configure(
            &mut session,
            &config,
            "HDMI-A-1",
            Some("1920x1080".to_owned()),
            Point::new(0, 0),
        )
        .unwrap();

        let controller = session.delegate().fake_display_controller().unwrap();
        let id = controller.output_ids()[0];
        assert_eq!(
            controller.current_mode(id),
            Some(DisplayMode::new(1920, 1080, 60.))
        );
        assert_eq!(controller.framebuffer_size(), Some(Size::new(1920, 1080)));
        assert_eq!(controller.background_color(), Some(DEFAULT_BACKGROUND_COLOR));
        assert_eq!(controller.grab_violations(), 0);
        assert!(!controller.is_grabbed());
        assert_eq!(controller.ungrabbed_protocol_calls(), 0);
        assert_eq!(controller.dpms_forced_on(), 1);

        // A custom mode is registered before use.
        configure(
            &mut session,
            &config,
            "HDMI-A-1",
            Some("1600x900@75".to_owned()),
            Point::new(0, 0),
        )
        .unwrap();
        assert_eq!(
            controller.custom_modes(id),
            vec![DisplayMode::new(1600, 900, 75.)]
        );

        assert!(configure(&mut session, &config, "DP-9", None, Point::new(0, 0)).is_err());
    }

    #[test]
    fn configure_stops_when_control_is_held_elsewhere() {
        let config = Config::parse(
            "test.kdl",
            r#"
            backend "fake"
            fake {
                display-control "held-elsewhere"
                output "HDMI-A-1" {
                    connection "hdmi"
                    mode 3840 2160 refresh=60.0 current=true native=true
                    mode 1920 1080 refresh=60.0
                }
            }
            "#,
        )
        .unwrap();
        let mut session = Session::new(&config).unwrap();

        let err = configure(
            &mut session,
            &config,
            "HDMI-A-1",
            Some("1920x1080".to_owned()),
            Point::new(0, 0),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "another process holds display control");

        let controller = session.delegate().fake_display_controller().unwrap();
        let id = controller.output_ids()[0];
        assert_eq!(
            controller.current_mode(id),
            Some(DisplayMode::new(3840, 2160, 60.))
        );
        assert_eq!(controller.issued(Operation::Configure), 0);
        assert_eq!(controller.framebuffer_size(), None);
    }

    #[test]
    fn control_fails_when_held_elsewhere() {
        let config = Config::parse(
            "test.kdl",
            r#"
            backend "fake"
            fake {
                display-control "held-elsewhere"
            }
            "#,
        )
        .unwrap();
        let mut session = Session::new(&config).unwrap();

        assert!(control(&mut session, ControlAction::Take).is_err());
    }
}
