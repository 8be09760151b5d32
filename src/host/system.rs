//! Process-time host with a cooperatively pumped timer queue.

use super::timer::TimerQueue;
use super::{Disposal, Host, TimerCallback};
use crate::types::Time;
use core::fmt;
use std::cell::RefCell;
use std::time::{Duration, Instant};

/// The default host: process time and caller-pumped timers.
///
/// `StdHost` measures time from its own creation instant. There is no
/// background thread; the owning scheduler pumps timers by calling
/// [`poll`] from its loop (or [`run_until_idle`] when it has nothing else
/// to do). This matches the single-threaded cooperative model: timer
/// callbacks only ever run from inside a pump call.
///
/// [`poll`]: StdHost::poll
/// [`run_until_idle`]: StdHost::run_until_idle
pub struct StdHost {
    epoch: Instant,
    timers: RefCell<TimerQueue>,
}

impl StdHost {
    /// Creates a host whose epoch is now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            timers: RefCell::new(TimerQueue::new()),
        }
    }

    /// Fires every due timer, then reports the delay until the next one.
    ///
    /// Returns `None` when no timer is pending.
    pub fn poll(&self) -> Option<Duration> {
        loop {
            let now = self.clock_now();
            let next = self.timers.borrow_mut().pop_earliest_until(now);
            let Some((_, callback)) = next else { break };
            callback();
        }
        let next = self.timers.borrow_mut().next_deadline()?;
        Some(next.duration_since(self.clock_now()))
    }

    /// Pumps timers, sleeping between polls, until the queue is empty.
    pub fn run_until_idle(&self) {
        while let Some(delay) = self.poll() {
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
        }
    }

    fn clock_now(&self) -> Time {
        Time::from_millis(u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX))
    }
}

impl Default for StdHost {
    fn default() -> Self {
        Self::new()
    }
}

impl Host for StdHost {
    fn now(&self) -> Time {
        self.clock_now()
    }

    fn schedule_timeout(&self, delay: Duration, callback: TimerCallback) -> Disposal {
        let at = self.clock_now().saturating_add(delay);
        let cancelled = self.timers.borrow_mut().insert(at, callback);
        Disposal::new(move || cancelled.set(true))
    }
}

impl fmt::Debug for StdHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdHost")
            .field("now", &self.clock_now())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn zero_delay_timer_fires_on_poll() {
        let host = StdHost::new();
        let fired = Rc::new(Cell::new(false));
        let flag = Rc::clone(&fired);
        let _ = host.schedule_timeout(Duration::ZERO, Box::new(move || flag.set(true)));

        assert!(host.poll().is_none());
        assert!(fired.get());
    }

    #[test]
    fn poll_reports_remaining_delay() {
        let host = StdHost::new();
        let _timer = host.schedule_timeout(Duration::from_secs(60), Box::new(|| {}));

        let delay = host.poll().expect("timer pending");
        assert!(delay <= Duration::from_secs(60));
        assert!(delay > Duration::from_secs(50));
    }

    #[test]
    fn disposed_timer_is_dropped_from_the_queue() {
        let host = StdHost::new();
        let timer = host.schedule_timeout(Duration::from_secs(60), Box::new(|| {}));
        timer.dispose();
        assert!(host.poll().is_none());
    }

    #[test]
    fn clock_does_not_run_backward() {
        let host = StdHost::new();
        let first = host.now();
        let second = host.now();
        assert!(second >= first);
    }
}
