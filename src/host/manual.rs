//! Virtual-time host for deterministic tests.

use super::timer::TimerQueue;
use super::{Disposal, Host, TimerCallback};
use crate::error::NotifyError;
use crate::types::Time;
use core::fmt;
use std::cell::{Cell, RefCell};
use std::time::Duration;

/// A host whose clock only moves when told to.
///
/// `ManualHost` is the deterministic companion to [`StdHost`]: timers fire
/// from inside [`advance`] in deadline order, and listener failures are
/// collected instead of panicking so tests can assert on them.
///
/// # Example
///
/// ```
/// use std::rc::Rc;
/// use std::time::Duration;
/// use cxtree::{Context, ManualHost};
///
/// let host = Rc::new(ManualHost::new());
/// let root = Context::background(host.clone());
/// let (ctx, _cancel) = root.with_timeout(Duration::from_millis(5));
///
/// host.advance(Duration::from_millis(5));
/// assert!(ctx.error().expect("deadline").is_deadline_exceeded());
/// # cxtree::Context::release_root(&host);
/// ```
///
/// [`advance`]: ManualHost::advance
pub struct ManualHost {
    clock: Cell<Time>,
    timers: RefCell<TimerQueue>,
    uncaught: RefCell<Vec<NotifyError>>,
}

impl ManualHost {
    /// Creates a manual host with the clock at the epoch.
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(Time::ZERO)
    }

    /// Creates a manual host with the clock at `time`.
    #[must_use]
    pub fn starting_at(time: Time) -> Self {
        Self {
            clock: Cell::new(time),
            timers: RefCell::new(TimerQueue::new()),
            uncaught: RefCell::new(Vec::new()),
        }
    }

    /// Advances the clock by `delta`, firing due timers along the way.
    ///
    /// Timers fire in deadline order with the clock set to each timer's
    /// deadline, so callbacks observe `now >= deadline`. Timers scheduled
    /// by a firing callback are honored within the same advance when they
    /// fall inside the window.
    pub fn advance(&self, delta: Duration) {
        let target = self.clock.get().saturating_add(delta);
        self.run_until(target);
        self.clock.set(target);
    }

    /// Advances the clock by `delta` without firing any timer.
    ///
    /// This simulates a host whose timer callbacks are delayed past their
    /// deadline (for example by a long synchronous computation); the lazy
    /// deadline check in [`Context::error`](crate::Context::error) must
    /// still observe the expiry.
    pub fn advance_without_firing(&self, delta: Duration) {
        let target = self.clock.get().saturating_add(delta);
        self.clock.set(target);
    }

    /// Sets the clock without firing timers.
    pub fn set_time(&self, time: Time) {
        self.clock.set(time);
    }

    /// Fires every timer whose deadline has already passed.
    pub fn fire_due(&self) {
        self.run_until(self.clock.get());
    }

    /// Returns true while any live timer is scheduled.
    #[must_use]
    pub fn pending_timers(&self) -> bool {
        self.timers.borrow_mut().has_pending()
    }

    /// Drains the listener failures routed to this host.
    #[must_use]
    pub fn take_uncaught(&self) -> Vec<NotifyError> {
        std::mem::take(&mut *self.uncaught.borrow_mut())
    }

    fn run_until(&self, target: Time) {
        loop {
            let next = self.timers.borrow_mut().pop_earliest_until(target);
            let Some((at, callback)) = next else { break };
            if self.clock.get() < at {
                self.clock.set(at);
            }
            callback();
        }
    }
}

impl Default for ManualHost {
    fn default() -> Self {
        Self::new()
    }
}

impl Host for ManualHost {
    fn now(&self) -> Time {
        self.clock.get()
    }

    fn schedule_timeout(&self, delay: Duration, callback: TimerCallback) -> Disposal {
        let at = self.clock.get().saturating_add(delay);
        let cancelled = self.timers.borrow_mut().insert(at, callback);
        Disposal::new(move || cancelled.set(true))
    }

    fn on_uncaught(&self, failure: NotifyError) {
        self.uncaught.borrow_mut().push(failure);
    }
}

impl fmt::Debug for ManualHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualHost")
            .field("now", &self.clock.get())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn timers_fire_in_deadline_order() {
        let host = ManualHost::new();
        let fired = Rc::new(RefCell::new(Vec::new()));

        for (label, delay) in [("b", 20), ("a", 10), ("c", 30)] {
            let fired = Rc::clone(&fired);
            let _ = host.schedule_timeout(
                Duration::from_millis(delay),
                Box::new(move || fired.borrow_mut().push(label)),
            );
        }

        host.advance(Duration::from_millis(25));
        assert_eq!(*fired.borrow(), vec!["a", "b"]);

        host.advance(Duration::from_millis(5));
        assert_eq!(*fired.borrow(), vec!["a", "b", "c"]);
    }

    #[test]
    fn callbacks_observe_their_deadline() {
        let host = Rc::new(ManualHost::new());
        let seen = Rc::new(Cell::new(Time::ZERO));
        let observer = Rc::clone(&seen);
        let at_host = Rc::clone(&host);
        let _ = host.schedule_timeout(
            Duration::from_millis(10),
            Box::new(move || observer.set(at_host.now())),
        );

        host.advance(Duration::from_millis(50));
        assert_eq!(seen.get(), Time::from_millis(10));
        assert_eq!(host.now(), Time::from_millis(50));
    }

    #[test]
    fn disposed_timer_never_fires() {
        let host = ManualHost::new();
        let fired = Rc::new(Cell::new(false));
        let flag = Rc::clone(&fired);
        let timer = host.schedule_timeout(
            Duration::from_millis(5),
            Box::new(move || flag.set(true)),
        );

        timer.dispose();
        timer.dispose();
        host.advance(Duration::from_millis(10));
        assert!(!fired.get());
        assert!(!host.pending_timers());
    }

    #[test]
    fn advance_without_firing_leaves_timers_pending() {
        let host = ManualHost::new();
        let fired = Rc::new(Cell::new(false));
        let flag = Rc::clone(&fired);
        let _ = host.schedule_timeout(
            Duration::from_millis(5),
            Box::new(move || flag.set(true)),
        );

        host.advance_without_firing(Duration::from_millis(10));
        assert!(!fired.get());
        assert!(host.pending_timers());

        host.fire_due();
        assert!(fired.get());
    }

    #[test]
    fn nested_scheduling_fires_within_the_same_advance() {
        let host = Rc::new(ManualHost::new());
        let fired = Rc::new(RefCell::new(Vec::new()));

        let inner_host = Rc::clone(&host);
        let inner_fired = Rc::clone(&fired);
        let outer_fired = Rc::clone(&fired);
        let _ = host.schedule_timeout(
            Duration::from_millis(10),
            Box::new(move || {
                outer_fired.borrow_mut().push("outer");
                let fired = Rc::clone(&inner_fired);
                let _ = inner_host.schedule_timeout(
                    Duration::from_millis(5),
                    Box::new(move || fired.borrow_mut().push("inner")),
                );
            }),
        );

        host.advance(Duration::from_millis(20));
        assert_eq!(*fired.borrow(), vec!["outer", "inner"]);
    }

    #[test]
    fn collects_uncaught_failures() {
        use crate::error::{Fault, NotifyError};

        let host = ManualHost::new();
        host.on_uncaught(NotifyError::Fault(Fault::new("boom")));

        let drained = host.take_uncaught();
        assert_eq!(drained.len(), 1);
        assert!(host.take_uncaught().is_empty());
    }
}
