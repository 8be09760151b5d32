//! Abort-controller interop.
//!
//! [`AbortController`] / [`AbortSignal`] mirror the platform abort
//! abstraction: a controller owns the one-shot abort transition, a signal
//! is the read side that cancellation-aware code observes. Contexts bridge
//! both ways — [`Context::signal`](crate::Context::signal) lazily produces
//! a signal that aborts when the context cancels, and
//! [`Context::with_abort_signal`](crate::Context::with_abort_signal)
//! derives a context cancelled by an external signal.

use crate::error::Reason;
use crate::host::Disposal;
use core::fmt;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

struct AbortListener {
    id: u64,
    notify: Box<dyn FnOnce(&Reason)>,
}

struct SignalState {
    reason: RefCell<Option<Reason>>,
    listeners: RefCell<Vec<AbortListener>>,
    next_id: Cell<u64>,
}

impl SignalState {
    fn new() -> Rc<Self> {
        Rc::new(Self {
            reason: RefCell::new(None),
            listeners: RefCell::new(Vec::new()),
            next_id: Cell::new(0),
        })
    }
}

/// Owner of the abort transition.
///
/// Cloning a controller yields another handle to the same signal.
#[derive(Clone)]
pub struct AbortController {
    state: Rc<SignalState>,
}

impl AbortController {
    /// Creates a controller whose signal starts unaborted.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: SignalState::new(),
        }
    }

    /// Returns the signal side of this controller.
    #[must_use]
    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            state: Rc::clone(&self.state),
        }
    }

    /// Aborts with a generic cancelled reason.
    ///
    /// Aborting twice is a no-op; the first reason wins.
    pub fn abort(&self) {
        self.abort_with(Reason::cancelled_with_message("aborted"));
    }

    /// Aborts with the given reason.
    ///
    /// Listeners run synchronously in registration order before this call
    /// returns. A panicking listener propagates to the aborting caller.
    pub fn abort_with(&self, reason: Reason) {
        {
            let mut slot = self.state.reason.borrow_mut();
            if slot.is_some() {
                return;
            }
            *slot = Some(reason.clone());
        }
        loop {
            let listener = {
                let mut listeners = self.state.listeners.borrow_mut();
                if listeners.is_empty() {
                    None
                } else {
                    Some(listeners.remove(0))
                }
            };
            let Some(listener) = listener else { break };
            (listener.notify)(&reason);
        }
    }
}

impl Default for AbortController {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AbortController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortController")
            .field("aborted", &self.signal().is_aborted())
            .finish()
    }
}

/// The read side of an [`AbortController`].
#[derive(Clone)]
pub struct AbortSignal {
    state: Rc<SignalState>,
}

impl AbortSignal {
    /// Returns true once the controller has aborted.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.state.reason.borrow().is_some()
    }

    /// Returns the abort reason, if the controller has aborted.
    #[must_use]
    pub fn reason(&self) -> Option<Reason> {
        self.state.reason.borrow().clone()
    }

    /// Registers a one-shot abort listener.
    ///
    /// If the signal is already aborted the listener runs synchronously
    /// before this call returns and a no-op disposal is handed back.
    /// Otherwise the returned disposal unregisters the listener; disposing
    /// after the abort finds it already removed.
    pub fn on_abort(&self, listener: impl FnOnce(&Reason) + 'static) -> Disposal {
        let existing = self.state.reason.borrow().clone();
        if let Some(reason) = existing {
            listener(&reason);
            return Disposal::noop();
        }

        let id = self.state.next_id.get();
        self.state.next_id.set(id + 1);
        self.state.listeners.borrow_mut().push(AbortListener {
            id,
            notify: Box::new(listener),
        });

        let weak: Weak<SignalState> = Rc::downgrade(&self.state);
        Disposal::new(move || {
            if let Some(state) = weak.upgrade() {
                state.listeners.borrow_mut().retain(|l| l.id != id);
            }
        })
    }
}

impl fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortSignal")
            .field("aborted", &self.is_aborted())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abort_is_idempotent() {
        let controller = AbortController::new();
        let signal = controller.signal();
        assert!(!signal.is_aborted());

        controller.abort_with(Reason::cancelled_with_message("first"));
        let first = signal.reason().expect("reason set");
        controller.abort();
        assert!(signal.reason().expect("reason kept").same(&first));
    }

    #[test]
    fn listeners_fire_in_registration_order() {
        let controller = AbortController::new();
        let signal = controller.signal();
        let order = Rc::new(RefCell::new(Vec::new()));

        for label in ["a", "b"] {
            let order = Rc::clone(&order);
            let _ = signal.on_abort(move |_| order.borrow_mut().push(label));
        }

        controller.abort();
        assert_eq!(*order.borrow(), vec!["a", "b"]);
    }

    #[test]
    fn late_listener_fires_synchronously() {
        let controller = AbortController::new();
        controller.abort();

        let fired = Rc::new(Cell::new(false));
        let flag = Rc::clone(&fired);
        let disposal = controller.signal().on_abort(move |reason| {
            assert!(reason.is_cancelled());
            flag.set(true);
        });

        assert!(fired.get());
        assert!(disposal.is_disposed());
    }

    #[test]
    fn disposed_listener_is_not_invoked() {
        let controller = AbortController::new();
        let fired = Rc::new(Cell::new(false));
        let flag = Rc::clone(&fired);
        let disposal = controller.signal().on_abort(move |_| flag.set(true));

        disposal.dispose();
        controller.abort();
        assert!(!fired.get());
    }
}
