//! The context node engine.
//!
//! A [`Context`] is a cheaply clonable handle over a shared node. Nodes
//! link child → parent only; a parent reaches its children exclusively
//! through the listener closures they register, which capture weak
//! references. Neither side owns the other, so subtrees drop naturally
//! when unreferenced.
//!
//! Cancellation is a synchronous protocol: setting the reason, draining
//! listeners in registration order, reporting faults, and releasing the
//! parent subscription all happen before the triggering call returns.
//! Drains never hold an interior borrow across a listener call, so
//! listeners may re-enter the tree freely.

use crate::abort::{AbortController, AbortSignal};
use crate::error::{AggregateFault, Fault, NotifyError, Reason};
use crate::host::{Disposal, Host, StdHost};
use crate::tracing_compat::{debug, error, trace};
use crate::types::Time;
use smallvec::SmallVec;
use core::fmt;
use std::any::Any;
use std::cell::RefCell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;
use std::time::Duration;

use super::done::Done;
use super::key::Key;

/// A registered cancellation listener.
///
/// Each registration gets its own record so two registrations of the same
/// callback stay distinct and can be disposed independently.
struct Listener {
    id: u64,
    notify: Box<dyn FnOnce(&Reason)>,
}

struct Mutable {
    reason: Option<Reason>,
    listeners: SmallVec<[Listener; 2]>,
    next_listener_id: u64,
    parent_sub: Option<Disposal>,
    timer: Option<Disposal>,
    controller: Option<AbortController>,
}

impl Mutable {
    fn empty() -> Self {
        Self {
            reason: None,
            listeners: SmallVec::new(),
            next_listener_id: 0,
            parent_sub: None,
            timer: None,
            controller: None,
        }
    }
}

pub(crate) struct Core {
    host: Rc<dyn Host>,
    parent: Option<Context>,
    deadline: Option<Time>,
    binding: Option<(Key, Rc<dyn Any>)>,
    mutable: RefCell<Mutable>,
}

/// A node in a cancellation tree.
///
/// Contexts are immutable handles: deriving never mutates the parent, and
/// the only state transition a node undergoes is its one-shot
/// cancellation. Clones share the node.
///
/// Obtain a root with [`Context::background`] and derive from there:
///
/// ```
/// use std::rc::Rc;
/// use std::time::Duration;
/// use cxtree::{Context, ManualHost};
///
/// let host = Rc::new(ManualHost::new());
/// let root = Context::background(host.clone());
/// let (ctx, _cancel) = root.with_timeout(Duration::from_millis(100));
///
/// assert!(ctx.error().is_none());
/// host.advance(Duration::from_millis(100));
/// assert!(ctx.error().expect("expired").is_deadline_exceeded());
/// # cxtree::Context::release_root(&host);
/// ```
#[derive(Clone)]
pub struct Context {
    core: Rc<Core>,
}

/// Cancels the context it was created alongside.
///
/// Handles are `Clone`; every clone cancels the same context. Cancelling
/// twice is a no-op — the first reason wins.
#[derive(Clone)]
pub struct CancelHandle {
    ctx: Context,
}

struct RootEntry {
    host_addr: usize,
    root: Context,
}

thread_local! {
    static ROOTS: RefCell<Vec<RootEntry>> = const { RefCell::new(Vec::new()) };
    static DEFAULT_HOST: Rc<StdHost> = Rc::new(StdHost::new());
}

fn host_addr<H: Host + ?Sized>(host: &Rc<H>) -> usize {
    Rc::as_ptr(host).cast::<()>() as usize
}

impl Context {
    /// Returns the root context for `host`, creating it on first call.
    ///
    /// The root is memoized per host: every call with the same host hands
    /// back the same node. Roots have no parent and no deadline and cannot
    /// be cancelled — cancellation always enters the tree through
    /// derivation. The registry keeps the host alive until
    /// [`Context::release_root`] is called for it.
    #[must_use]
    pub fn background(host: Rc<dyn Host>) -> Self {
        let addr = host_addr(&host);
        ROOTS.with(|roots| {
            let mut roots = roots.borrow_mut();
            if let Some(entry) = roots.iter().find(|entry| entry.host_addr == addr) {
                return entry.root.clone();
            }
            debug!(host = addr, "creating background root");
            let root = Self {
                core: Rc::new(Core {
                    host,
                    parent: None,
                    deadline: None,
                    binding: None,
                    mutable: RefCell::new(Mutable::empty()),
                }),
            };
            roots.push(RootEntry {
                host_addr: addr,
                root: root.clone(),
            });
            root
        })
    }

    /// Returns the root bound to this thread's default [`StdHost`].
    ///
    /// Convenience for callers that do not inject a host of their own.
    #[must_use]
    pub fn background_default() -> Self {
        DEFAULT_HOST.with(|host| {
            let host: Rc<dyn Host> = host.clone();
            Self::background(host)
        })
    }

    /// Removes the memoized root for `host`.
    ///
    /// Existing contexts derived from the released root keep working; a
    /// later [`Context::background`] call for the same host creates a
    /// fresh root.
    pub fn release_root<H: Host + ?Sized>(host: &Rc<H>) {
        let addr = host_addr(host);
        ROOTS.with(|roots| roots.borrow_mut().retain(|entry| entry.host_addr != addr));
    }

    /// Derives a child cancelled by the returned handle or by this
    /// context's own cancellation, whichever comes first.
    #[must_use]
    pub fn with_cancel(&self) -> (Self, CancelHandle) {
        let child = self.derive(None, None);
        let handle = CancelHandle { ctx: child.clone() };
        (child, handle)
    }

    /// Derives a child whose deadline is `min(self.deadline(), deadline)`.
    ///
    /// When the effective deadline is strictly sooner than the parent's, a
    /// host timer is scheduled to cancel the child with a
    /// deadline-exceeded reason at that instant; the timer is disposed
    /// when the child cancels for any reason. Equal deadlines cascade
    /// through the parent's own timer instead.
    #[must_use]
    pub fn with_deadline(&self, deadline: Time) -> (Self, CancelHandle) {
        let child = self.derive(Some(deadline), None);
        let handle = CancelHandle { ctx: child.clone() };
        (child, handle)
    }

    /// Derives a child whose deadline is `timeout` from now.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> (Self, CancelHandle) {
        self.with_deadline(self.core.host.now().saturating_add(timeout))
    }

    /// Derives a child carrying one additional key/value binding.
    ///
    /// The child shares this context's cancellation and deadline behavior.
    #[must_use]
    pub fn with_value<V: Any>(&self, key: &Key, value: V) -> Self {
        self.with_shared_value(key, Rc::new(value))
    }

    /// Like [`Context::with_value`] for a value that is already shared.
    #[must_use]
    pub fn with_shared_value(&self, key: &Key, value: Rc<dyn Any>) -> Self {
        self.derive(None, Some((key.clone(), value)))
    }

    fn derive(&self, requested_deadline: Option<Time>, binding: Option<(Key, Rc<dyn Any>)>) -> Self {
        let parent_deadline = self.core.deadline;
        let deadline = match (parent_deadline, requested_deadline) {
            (Some(parent), Some(requested)) => Some(parent.min(requested)),
            (parent, requested) => parent.or(requested),
        };
        let child = Self {
            core: Rc::new(Core {
                host: Rc::clone(&self.core.host),
                parent: Some(self.clone()),
                deadline,
                binding,
                mutable: RefCell::new(Mutable::empty()),
            }),
        };

        // An already-cancelled parent stamps its reason at construction;
        // no listener registration is needed.
        if let Some(reason) = self.error() {
            child.core.mutable.borrow_mut().reason = Some(reason);
            return child;
        }

        // The parent-side listener captures only the child's cancel entry
        // point, weakly: the parent never owns the child.
        let weak = Rc::downgrade(&child.core);
        let parent_sub = self.on_did_cancel(move |reason| {
            if let Some(core) = weak.upgrade() {
                Self { core }.cancel_with(reason.clone());
            }
        });
        child.core.mutable.borrow_mut().parent_sub = Some(parent_sub);

        if let Some(at) = deadline {
            let strictly_sooner = parent_deadline.map_or(true, |parent| at < parent);
            if strictly_sooner {
                let delay = at.duration_since(self.core.host.now());
                trace!(deadline_ms = at.as_millis(), "scheduling deadline timer");
                let weak = Rc::downgrade(&child.core);
                let timer = self.core.host.schedule_timeout(
                    delay,
                    Box::new(move || {
                        if let Some(core) = weak.upgrade() {
                            Self { core }.cancel_with(Reason::deadline_exceeded());
                        }
                    }),
                );
                child.core.mutable.borrow_mut().timer = Some(timer);
            }
        }

        child
    }

    /// Returns this context's cancellation reason, observing expired
    /// deadlines and ancestor cancellations on the way.
    ///
    /// The check is lazy so an expired deadline is seen even when the host
    /// timer has not fired yet, and an ancestor's cancellation is seen
    /// even before its notification cascade reaches this node. Once set,
    /// every call returns the same [`Reason`] handle. Never panics unless
    /// the observation triggers a notify cycle whose listeners fault with
    /// no uncaught handler installed.
    #[must_use]
    pub fn error(&self) -> Option<Reason> {
        let existing = self.core.mutable.borrow().reason.clone();
        if existing.is_some() {
            return existing;
        }
        if let Some(parent) = &self.core.parent {
            if let Some(reason) = parent.error() {
                // The parent's drain may already have cancelled this node
                // through the parent subscription; adoption is idempotent.
                self.cancel_with(reason);
                return self.core.mutable.borrow().reason.clone();
            }
        }
        if let Some(deadline) = self.core.deadline {
            if self.core.host.now() >= deadline {
                self.cancel_with(Reason::deadline_exceeded());
                return self.core.mutable.borrow().reason.clone();
            }
        }
        None
    }

    /// Returns true once this context is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.error().is_some()
    }

    /// Returns the effective deadline, if any ancestor imposed one.
    #[must_use]
    pub fn deadline(&self) -> Option<Time> {
        self.core.deadline
    }

    /// Registers a one-shot cancellation listener.
    ///
    /// If the context is already cancelled the listener runs synchronously
    /// before this call returns (faults go to the host's uncaught sink)
    /// and a no-op disposal is handed back. Otherwise the listener fires
    /// at most once, in registration order, during the cancel drain. The
    /// returned disposal unregisters it; disposing after cancellation
    /// finds the record already removed and does nothing.
    pub fn on_did_cancel(&self, listener: impl FnOnce(&Reason) + 'static) -> Disposal {
        let existing = self.core.mutable.borrow().reason.clone();
        if let Some(reason) = existing {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| listener(&reason))) {
                self.report_faults(vec![Fault::from_panic(payload)]);
            }
            return Disposal::noop();
        }

        let id = {
            let mut mutable = self.core.mutable.borrow_mut();
            let id = mutable.next_listener_id;
            mutable.next_listener_id += 1;
            mutable.listeners.push(Listener {
                id,
                notify: Box::new(listener),
            });
            id
        };

        let weak = Rc::downgrade(&self.core);
        Disposal::new(move || {
            if let Some(core) = weak.upgrade() {
                core.mutable.borrow_mut().listeners.retain(|l| l.id != id);
            }
        })
    }

    /// Returns the nearest ancestor value bound to `key`.
    #[must_use]
    pub fn value(&self, key: &Key) -> Option<Rc<dyn Any>> {
        let mut node = self;
        loop {
            if let Some((bound, value)) = &node.core.binding {
                if bound == key {
                    return Some(Rc::clone(value));
                }
            }
            match &node.core.parent {
                Some(parent) => node = parent,
                None => return None,
            }
        }
    }

    /// Returns true when this context or any ancestor binds `key`.
    #[must_use]
    pub fn has_value(&self, key: &Key) -> bool {
        let mut node = self;
        loop {
            if let Some((bound, _)) = &node.core.binding {
                if bound == key {
                    return true;
                }
            }
            match &node.core.parent {
                Some(parent) => node = parent,
                None => return false,
            }
        }
    }

    /// Returns a future resolving with the cancellation reason.
    #[must_use]
    pub fn done(&self) -> Done {
        Done::new(self.clone())
    }

    /// Returns an abort signal that aborts when this context cancels.
    ///
    /// The underlying controller is created lazily on first access and
    /// shared afterwards: every call returns the same signal. If the
    /// context is already cancelled the signal comes back aborted with
    /// the context's reason.
    #[must_use]
    pub fn signal(&self) -> AbortSignal {
        let existing = self
            .core
            .mutable
            .borrow()
            .controller
            .as_ref()
            .map(AbortController::signal);
        if let Some(signal) = existing {
            return signal;
        }

        let controller = self.core.host.new_abort_controller();
        let signal = controller.signal();
        self.core.mutable.borrow_mut().controller = Some(controller.clone());

        if let Some(reason) = self.error() {
            controller.abort_with(reason);
        } else {
            let _ = self.on_did_cancel(move |reason| controller.abort_with(reason.clone()));
        }
        signal
    }

    /// Derives a child cancelled by an external abort signal.
    ///
    /// An already-aborted signal cancels the child immediately, adopting
    /// the signal's reason when it carries one. Otherwise an abort
    /// listener is attached and detached again as soon as the child
    /// cancels for any other cause.
    #[must_use]
    pub fn with_abort_signal(&self, signal: &AbortSignal) -> Self {
        let (child, handle) = self.with_cancel();
        if child.is_cancelled() {
            return child;
        }
        if let Some(reason) = signal.reason() {
            child.cancel_with(reason);
            return child;
        }
        if signal.is_aborted() {
            handle.cancel();
            return child;
        }

        let weak = Rc::downgrade(&child.core);
        let abort_sub = signal.on_abort(move |reason| {
            if let Some(core) = weak.upgrade() {
                Self { core }.cancel_with(reason.clone());
            }
        });
        let _ = child.on_did_cancel(move |_| abort_sub.dispose());
        child
    }

    /// Runs the cancel protocol. Returns false when a reason was already
    /// set (idempotence).
    pub(crate) fn cancel_with(&self, reason: Reason) -> bool {
        {
            let mut mutable = self.core.mutable.borrow_mut();
            if mutable.reason.is_some() {
                return false;
            }
            mutable.reason = Some(reason.clone());
        }
        debug!(kind = ?reason.kind(), "context cancelled");

        let timer = self.core.mutable.borrow_mut().timer.take();
        if let Some(timer) = timer {
            timer.dispose();
        }

        self.drain(&reason);

        let parent_sub = self.core.mutable.borrow_mut().parent_sub.take();
        if let Some(parent_sub) = parent_sub {
            parent_sub.dispose();
        }
        true
    }

    /// Drains the listener list from the head, isolating panics per
    /// listener. Listeners registered by a firing listener hit the
    /// already-cancelled fast path of [`Context::on_did_cancel`] instead
    /// of re-entering this loop, which bounds re-entry.
    fn drain(&self, reason: &Reason) {
        let mut faults = Vec::new();
        loop {
            let listener = {
                let mut mutable = self.core.mutable.borrow_mut();
                if mutable.listeners.is_empty() {
                    None
                } else {
                    Some(mutable.listeners.remove(0))
                }
            };
            let Some(listener) = listener else { break };
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| (listener.notify)(reason))) {
                faults.push(Fault::from_panic(payload));
            }
        }
        self.report_faults(faults);
    }

    fn report_faults(&self, mut faults: Vec<Fault>) {
        if faults.is_empty() {
            return;
        }
        error!(count = faults.len(), "cancellation listeners faulted");
        let failure = if faults.len() == 1 {
            NotifyError::Fault(faults.remove(0))
        } else {
            NotifyError::Aggregate(AggregateFault::new(faults))
        };
        self.core.host.on_uncaught(failure);
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("cancelled", &self.core.mutable.borrow().reason.is_some())
            .field("deadline", &self.core.deadline)
            .finish_non_exhaustive()
    }
}

impl CancelHandle {
    /// Cancels with a bare cancelled reason.
    pub fn cancel(&self) {
        self.ctx.cancel_with(Reason::cancelled());
    }

    /// Cancels with a message on the reason.
    pub fn cancel_with_message(&self, message: impl Into<String>) {
        self.ctx.cancel_with(Reason::cancelled_with_message(message));
    }

    /// Cancels with an underlying cause, preserved by reference on the
    /// reason.
    pub fn cancel_with_cause(&self, cause: Rc<dyn std::error::Error>) {
        self.ctx.cancel_with(Reason::cancelled_with_cause(cause));
    }

    /// Returns the context this handle cancels.
    #[must_use]
    pub fn context(&self) -> &Context {
        &self.ctx
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("ctx", &self.ctx)
            .finish()
    }
}
