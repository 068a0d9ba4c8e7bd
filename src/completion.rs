//! Single-shot completions marshaled onto the display thread.
//!
//! Every asynchronous delegate operation turns its callback into a [`Completion`]. Completing it
//! posts the callback to a [`CompletionQueue`], a `calloop` channel registered on the display
//! thread's event loop, so callbacks only ever run from that loop and never re-entrantly inside
//! the delegate call that issued them.
//!
//! A completion that is dropped without being completed posts its [`Outcome::failed`] value
//! instead. Backends rely on this for their destruction policy: dropping the backend drops its
//! outstanding completions, and each of them still fires exactly once.

use std::fmt;
use std::sync::mpsc;

use anyhow::anyhow;
use calloop::channel::{self, Sender};
use calloop::LoopHandle;
use tracing::{debug, trace};

use crate::snapshot::DisplaySnapshot;
use crate::types::HdcpState;

type Task = Box<dyn FnOnce()>;

/// Result types that have a well-defined failure value.
pub trait Outcome: 'static {
    fn failed() -> Self;
}

impl Outcome for bool {
    fn failed() -> Self {
        false
    }
}

impl Outcome for Option<HdcpState> {
    fn failed() -> Self {
        None
    }
}

impl Outcome for Vec<DisplaySnapshot> {
    fn failed() -> Self {
        Vec::new()
    }
}

/// Sending half of the display thread's completion channel.
#[derive(Clone)]
pub struct CompletionQueue {
    tx: Sender<Task>,
}

impl fmt::Debug for CompletionQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionQueue").finish_non_exhaustive()
    }
}

impl CompletionQueue {
    /// Creates a queue whose callbacks run from `event_loop`.
    pub fn new<D: 'static>(event_loop: &LoopHandle<'static, D>) -> anyhow::Result<Self> {
        let (tx, rx) = channel::channel::<Task>();
        event_loop
            .insert_source(rx, |event, _, _| match event {
                channel::Event::Msg(task) => task(),
                channel::Event::Closed => trace!("completion queue closed"),
            })
            .map_err(|err| anyhow!("error inserting completion source: {:?}", err.error))?;

        Ok(Self { tx })
    }

    /// Wraps `callback` into a completion delivered through this queue.
    pub fn completion<T: Outcome>(&self, callback: impl FnOnce(T) + 'static) -> Completion<T> {
        Completion {
            callback: Some(Box::new(callback)),
            queue: self.clone(),
        }
    }

    /// Runs `f` on the next dispatch, after everything already queued.
    pub fn defer(&self, f: impl FnOnce() + 'static) {
        self.post(Box::new(f));
    }

    fn post(&self, task: Task) {
        if let Err(mpsc::SendError(task)) = self.tx.send(task) {
            // The event loop is gone; this is the last chance to honor the callback.
            debug!("completion queue disconnected, running callback inline");
            task();
        }
    }
}

/// A callback that fires exactly once.
#[must_use = "dropping a completion fires it with a failure result"]
pub struct Completion<T: Outcome> {
    callback: Option<Box<dyn FnOnce(T)>>,
    queue: CompletionQueue,
}

impl<T: Outcome> Completion<T> {
    /// Delivers `value` on the next dispatch of the event loop.
    pub fn complete(mut self, value: T) {
        if let Some(callback) = self.callback.take() {
            self.queue.post(Box::new(move || callback(value)));
        }
    }
}

impl<T: Outcome> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("pending", &self.callback.is_some())
            .finish()
    }
}

impl<T: Outcome> Drop for Completion<T> {
    fn drop(&mut self) {
        if let Some(callback) = self.callback.take() {
            debug!("completion dropped before finishing, reporting failure");
            self.queue.post(Box::new(move || callback(T::failed())));
        }
    }
}
