//! The host abstraction: time, one-shot timers, abort-controller creation,
//! and the uncaught-failure sink.
//!
//! A [`Host`] is injected per context tree and is the only way the tree
//! touches the outside world. Two implementations are provided:
//!
//! - [`ManualHost`]: virtual time for deterministic tests; time moves only
//!   when [`ManualHost::advance`] is called
//! - [`StdHost`]: process time with a cooperatively pumped timer queue
//!
//! Everything a host hands back that must be revocable is a [`Disposal`],
//! an idempotent one-shot disposer.

pub mod manual;
pub mod system;

mod timer;

pub use manual::ManualHost;
pub use system::StdHost;

use crate::abort::AbortController;
use crate::error::NotifyError;
use crate::types::Time;
use core::fmt;
use std::cell::Cell;
use std::time::Duration;

/// A one-shot timer callback.
pub type TimerCallback = Box<dyn FnOnce()>;

/// Capabilities a context tree requires from its environment.
///
/// A host is selected per tree when the root is created with
/// [`Context::background`](crate::Context::background); every context
/// derived from that root shares it.
pub trait Host {
    /// Returns the current time in this host's time domain.
    ///
    /// Time is assumed not to run backward during the life of one timer; a
    /// strictly increasing clock is not required.
    fn now(&self) -> Time;

    /// Schedules `callback` to run once after `delay`.
    ///
    /// Disposing the returned handle cancels the timer if it has not fired
    /// yet; disposing after the fire is a no-op.
    fn schedule_timeout(&self, delay: Duration, callback: TimerCallback) -> Disposal;

    /// Creates a fresh abort controller whose signal starts unaborted.
    fn new_abort_controller(&self) -> AbortController {
        AbortController::new()
    }

    /// Sink for failures raised by cancellation listeners.
    ///
    /// The default re-raises the failure as a panic from whatever call
    /// triggered the notify cycle. Hosts that want to survive listener
    /// faults override this.
    fn on_uncaught(&self, failure: NotifyError) {
        panic!("uncaught cancellation listener failure: {failure}");
    }
}

/// An idempotent one-shot disposer.
///
/// `Disposal` wraps a single cleanup action. The first [`dispose`] call
/// runs it; later calls do nothing. Dropping a `Disposal` does **not**
/// dispose it; disposal is always explicit.
///
/// [`dispose`]: Disposal::dispose
pub struct Disposal {
    action: Cell<Option<Box<dyn FnOnce()>>>,
}

impl Disposal {
    /// Wraps a cleanup action.
    #[must_use]
    pub fn new(action: impl FnOnce() + 'static) -> Self {
        Self {
            action: Cell::new(Some(Box::new(action))),
        }
    }

    /// A disposal with nothing to do, already in the disposed state.
    #[must_use]
    pub const fn noop() -> Self {
        Self {
            action: Cell::new(None),
        }
    }

    /// Runs the cleanup action if it has not run yet.
    pub fn dispose(&self) {
        if let Some(action) = self.action.take() {
            action();
        }
    }

    /// Returns true once the action has run (or never existed).
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        let action = self.action.take();
        let disposed = action.is_none();
        self.action.set(action);
        disposed
    }
}

impl fmt::Debug for Disposal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disposal")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn disposal_runs_once() {
        let count = Rc::new(Cell::new(0));
        let counted = Rc::clone(&count);
        let disposal = Disposal::new(move || counted.set(counted.get() + 1));

        assert!(!disposal.is_disposed());
        disposal.dispose();
        disposal.dispose();
        assert_eq!(count.get(), 1);
        assert!(disposal.is_disposed());
    }

    #[test]
    fn noop_is_born_disposed() {
        let disposal = Disposal::noop();
        assert!(disposal.is_disposed());
        disposal.dispose();
    }
}
