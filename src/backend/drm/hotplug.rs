//! Connector polling.
//!
//! Legacy KMS reports hotplug through a uevent, which needs udev. We poll the connectors on a
//! timer instead and notify observers when the set of connected outputs or their modes change.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use anyhow::anyhow;
use calloop::timer::{TimeoutAction, Timer};
use calloop::LoopHandle;
use drm::control::{connector, Device as ControlDevice};
use tracing::{debug, trace, warn};

use super::types::Card;
use crate::observer::{ObserverRegistry, ServerEvent};

/// What we compare between polls.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ConnectorKey {
    handle: connector::Handle,
    state: connector::State,
    modes: usize,
}

fn poll(card: &Card) -> anyhow::Result<Vec<ConnectorKey>> {
    let resources = card.resource_handles()?;
    resources
        .connectors()
        .iter()
        .map(|&handle| -> anyhow::Result<ConnectorKey> {
            // Without forcing a probe the kernel answers from its cache.
            let info = card.get_connector(handle, false)?;
            Ok(ConnectorKey {
                handle,
                state: info.state(),
                modes: info.modes().len(),
            })
        })
        .collect()
}

/// Starts polling `card` every `interval`. Polling stops once `alive` is cleared.
pub(super) fn watch<D: 'static>(
    event_loop: &LoopHandle<'static, D>,
    card: Rc<Card>,
    observers: ObserverRegistry,
    interval: Duration,
    alive: Rc<Cell<bool>>,
) -> anyhow::Result<()> {
    let mut last = poll(&card).unwrap_or_else(|err| {
        warn!("error polling connectors: {err:?}");
        Vec::new()
    });

    event_loop
        .insert_source(Timer::from_duration(interval), move |_, _, _| {
            if !alive.get() {
                trace!("backend gone, stopping connector polling");
                return TimeoutAction::Drop;
            }

            let _span = tracy_client::span!("poll connectors");

            match poll(&card) {
                Ok(current) => {
                    if current != last {
                        debug!("connector state changed");
                        last = current;
                        observers.dispatch(ServerEvent::ConfigurationChanged);
                    }
                }
                Err(err) => warn!("error polling connectors: {err:?}"),
            }

            TimeoutAction::ToDuration(interval)
        })
        .map_err(|err| anyhow!("error inserting hotplug timer: {:?}", err.error))?;

    Ok(())
}
