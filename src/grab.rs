//! Bookkeeping for the server grab.
//!
//! The grab does not nest and is not reference counted. A second grab or an ungrab without a
//! grab is a caller bug; the tracker reports it and leaves its state alone so that the next
//! balanced pair still works.

use std::fmt;

use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrabError {
    AlreadyGrabbed,
    NotGrabbed,
}

impl fmt::Display for GrabError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GrabError::AlreadyGrabbed => "server is already grabbed",
            GrabError::NotGrabbed => "server is not grabbed",
        })
    }
}

impl std::error::Error for GrabError {}

#[derive(Debug, Default)]
pub struct ServerGrab {
    held: bool,
    violations: u32,
}

impl ServerGrab {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&mut self) -> Result<(), GrabError> {
        if self.held {
            return Err(self.violation(GrabError::AlreadyGrabbed));
        }
        self.held = true;
        Ok(())
    }

    pub fn release(&mut self) -> Result<(), GrabError> {
        if !self.held {
            return Err(self.violation(GrabError::NotGrabbed));
        }
        self.held = false;
        Ok(())
    }

    pub fn is_held(&self) -> bool {
        self.held
    }

    /// Number of unbalanced grab or ungrab calls seen so far.
    pub fn violations(&self) -> u32 {
        self.violations
    }

    fn violation(&mut self, err: GrabError) -> GrabError {
        self.violations += 1;
        error!("server grab contract violated: {err}");
        err
    }
}
