//! Subscribers for server-originated display changes.
//!
//! Observers are held weakly and keyed by an [`ObserverToken`]. Dispatch walks a snapshot of the
//! tokens registered when the event fires and re-checks each one right before calling it, so an
//! observer removed by an earlier observer of the same event is skipped.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

use tracing::trace;

/// Receives change notifications from a display delegate.
///
/// Called synchronously on the display thread.
pub trait DisplayObserver {
    /// The set of outputs or their configuration changed outside of our requests.
    fn on_configuration_changed(&self);

    /// Snapshots from the previous enumeration are no longer valid.
    fn on_display_snapshots_invalidated(&self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverToken(u64);

/// Which notification to deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerEvent {
    ConfigurationChanged,
    SnapshotsInvalidated,
}

#[derive(Default)]
struct Inner {
    next_token: u64,
    observers: BTreeMap<ObserverToken, Weak<dyn DisplayObserver>>,
}

/// Registry of observers, cheap to clone and shared with whoever needs to dispatch.
#[derive(Clone, Default)]
pub struct ObserverRegistry {
    inner: Rc<RefCell<Inner>>,
}

impl std::fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("len", &self.inner.borrow().observers.len())
            .finish()
    }
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, observer: &Rc<dyn DisplayObserver>) -> ObserverToken {
        let mut inner = self.inner.borrow_mut();
        let token = ObserverToken(inner.next_token);
        inner.next_token += 1;
        inner.observers.insert(token, Rc::downgrade(observer));
        token
    }

    /// Removes an observer; it will not be called again, even by a dispatch in progress.
    ///
    /// Returns `false` when the token was not registered.
    pub fn remove(&self, token: ObserverToken) -> bool {
        self.inner.borrow_mut().observers.remove(&token).is_some()
    }

    pub fn contains(&self, token: ObserverToken) -> bool {
        self.inner.borrow().observers.contains_key(&token)
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dispatch(&self, event: ServerEvent) {
        let _span = tracy_client::span!("ObserverRegistry::dispatch");

        let tokens: Vec<ObserverToken> = self.inner.borrow().observers.keys().copied().collect();
        trace!("dispatching {event:?} to {} observers", tokens.len());

        for token in tokens {
            // The borrow must end before the call: observers may add or remove registrations.
            let observer = self.inner.borrow().observers.get(&token).map(Weak::upgrade);
            match observer {
                Some(Some(observer)) => match event {
                    ServerEvent::ConfigurationChanged => observer.on_configuration_changed(),
                    ServerEvent::SnapshotsInvalidated => {
                        observer.on_display_snapshots_invalidated()
                    }
                },
                Some(None) => {
                    trace!("pruning dropped observer {token:?}");
                    self.inner.borrow_mut().observers.remove(&token);
                }
                None => (),
            }
        }
    }
}
