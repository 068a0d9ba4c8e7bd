use calloop::LoopHandle;
use display_delegate_config::{BackendKind, Config};
use tracing::{debug, warn};

use crate::delegate::DisplayDelegate;

pub mod drm;
pub mod fake;

pub use self::drm::DrmBackend;
pub use self::fake::FakeBackend;

/// Creates the backend selected by `config`.
///
/// `auto` picks DRM when the configured device node exists and falls back to the fake backend
/// otherwise, including when opening the device fails.
pub fn create<D: 'static>(
    config: &Config,
    event_loop: &LoopHandle<'static, D>,
) -> anyhow::Result<Box<dyn DisplayDelegate>> {
    let backend: Box<dyn DisplayDelegate> = match config.backend {
        BackendKind::Drm => Box::new(DrmBackend::new(&config.drm, event_loop)?),
        BackendKind::Fake => Box::new(FakeBackend::new(&config.fake, event_loop)?),
        BackendKind::Auto => {
            let device = &config.drm.device;
            let drm = if device.exists() {
                DrmBackend::new(&config.drm, event_loop)
                    .inspect_err(|err| warn!("error opening {device:?}, using fake: {err:?}"))
                    .ok()
            } else {
                debug!("{device:?} does not exist, using fake");
                None
            };

            match drm {
                Some(drm) => Box::new(drm),
                None => Box::new(FakeBackend::new(&config.fake, event_loop)?),
            }
        }
    };

    debug!("using {} backend", backend.name());
    Ok(backend)
}
