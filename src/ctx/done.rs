//! The awaitable view of a context.

use crate::error::Reason;
use crate::host::Disposal;
use std::cell::RefCell;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context as TaskContext, Poll, Waker};

use super::context::Context;

struct WakerSlot {
    waker: RefCell<Option<Waker>>,
}

/// A future resolving with the context's cancellation reason.
///
/// `Done` never fails: it stays pending while the context is live and
/// resolves with the [`Reason`] once it cancels. Every poll re-checks
/// [`Context::error`], so an expired deadline resolves the future even if
/// the host timer has not fired. The internal listener is registered on
/// first poll and disposed when the future resolves or is dropped.
pub struct Done {
    ctx: Context,
    slot: Rc<WakerSlot>,
    sub: Option<Disposal>,
    registered: bool,
}

impl Done {
    pub(crate) fn new(ctx: Context) -> Self {
        Self {
            ctx,
            slot: Rc::new(WakerSlot {
                waker: RefCell::new(None),
            }),
            sub: None,
            registered: false,
        }
    }
}

impl Future for Done {
    type Output = Reason;

    fn poll(self: Pin<&mut Self>, task: &mut TaskContext<'_>) -> Poll<Reason> {
        let this = self.get_mut();
        if let Some(reason) = this.ctx.error() {
            if let Some(sub) = this.sub.take() {
                sub.dispose();
            }
            return Poll::Ready(reason);
        }

        *this.slot.waker.borrow_mut() = Some(task.waker().clone());
        if !this.registered {
            this.registered = true;
            let slot = Rc::clone(&this.slot);
            this.sub = Some(this.ctx.on_did_cancel(move |_| {
                if let Some(waker) = slot.waker.borrow_mut().take() {
                    waker.wake();
                }
            }));
        }
        Poll::Pending
    }
}

impl Drop for Done {
    fn drop(&mut self) {
        if let Some(sub) = self.sub.take() {
            sub.dispose();
        }
    }
}

impl IntoFuture for &Context {
    type Output = Reason;
    type IntoFuture = Done;

    fn into_future(self) -> Done {
        self.done()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::ManualHost;
    use std::sync::Arc;
    use std::task::Wake;
    use std::time::Duration;

    struct NoopWaker;

    impl Wake for NoopWaker {
        fn wake(self: Arc<Self>) {}
    }

    fn poll_once(done: &mut Done) -> Poll<Reason> {
        let waker = Waker::from(Arc::new(NoopWaker));
        let mut task = TaskContext::from_waker(&waker);
        Pin::new(done).poll(&mut task)
    }

    #[test]
    fn pending_until_cancelled_then_resolves_with_the_reason() {
        let host = Rc::new(ManualHost::new());
        let root = Context::background(host.clone());
        let (ctx, cancel) = root.with_cancel();

        let mut done = ctx.done();
        assert!(poll_once(&mut done).is_pending());

        cancel.cancel();
        let resolved = match poll_once(&mut done) {
            Poll::Ready(reason) => reason,
            Poll::Pending => unreachable!("cancelled context must resolve"),
        };
        assert!(resolved.same(&ctx.error().expect("reason")));
        Context::release_root(&host);
    }

    #[test]
    fn resolves_on_expired_deadline_without_timer_fire() {
        let host = Rc::new(ManualHost::new());
        let root = Context::background(host.clone());
        let (ctx, _cancel) = root.with_timeout(Duration::from_millis(5));

        let mut done = ctx.done();
        assert!(poll_once(&mut done).is_pending());

        host.advance_without_firing(Duration::from_millis(5));
        match poll_once(&mut done) {
            Poll::Ready(reason) => assert!(reason.is_deadline_exceeded()),
            Poll::Pending => unreachable!("expired deadline must resolve"),
        }
        Context::release_root(&host);
    }

    #[test]
    fn already_cancelled_context_resolves_immediately() {
        let host = Rc::new(ManualHost::new());
        let root = Context::background(host.clone());
        let (ctx, cancel) = root.with_cancel();
        cancel.cancel();

        let mut done = (&ctx).into_future();
        assert!(poll_once(&mut done).is_ready());
        Context::release_root(&host);
    }
}
