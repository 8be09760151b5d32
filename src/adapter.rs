//! Thin adapters from external completion sources to contexts.
//!
//! Everything here consumes only the
//! [`with_cancel`](crate::Context::with_cancel) contract: an adapter
//! derives a child, cancels it when the external source settles, and
//! detaches from the source as soon as the child cancels for any other
//! cause.

use crate::ctx::Context;
use crate::host::Disposal;
use std::rc::Rc;

/// An event source supporting one-shot subscriptions.
///
/// `once` registers a callback invoked the next time `event` fires; the
/// returned disposal unregisters it if it has not fired yet.
pub trait EventSource {
    /// Subscribes to a single occurrence of `event`.
    fn once(&self, event: &str, callback: Box<dyn FnOnce()>) -> Disposal;
}

/// Derives a context cancelled when any of `events` fires on `source`.
///
/// `message` receives the name of the event that fired and produces the
/// cancellation message. All event subscriptions are released when the
/// context cancels, whichever side initiated it.
pub fn cancel_on_event<S, F>(parent: &Context, source: &S, events: &[&str], message: F) -> Context
where
    S: EventSource + ?Sized,
    F: Fn(&str) -> String + 'static,
{
    let (child, handle) = parent.with_cancel();
    let message = Rc::new(message);

    let mut subs = Vec::with_capacity(events.len());
    for &event in events {
        let handle = handle.clone();
        let message = Rc::clone(&message);
        let name = event.to_owned();
        subs.push(source.once(
            event,
            Box::new(move || handle.cancel_with_message(message(&name))),
        ));
    }

    let _ = child.on_did_cancel(move |_| {
        for sub in &subs {
            sub.dispose();
        }
    });
    child
}

/// A source that settles exactly once, successfully or with an error.
///
/// Streams and stream-like pipelines fit this shape: `on_settled` fires on
/// finish with `None` and on failure with the error.
pub trait SettleSource {
    /// Registers the settle callback; the disposal unregisters it.
    fn on_settled(&self, callback: Box<dyn FnOnce(Option<Rc<dyn std::error::Error>>)>)
        -> Disposal;
}

/// Derives a context cancelled when `source` settles.
///
/// A settle error becomes the cancellation cause, preserved by reference
/// on the reason.
pub fn cancel_when_settled<S>(parent: &Context, source: &S) -> Context
where
    S: SettleSource + ?Sized,
{
    let (child, handle) = parent.with_cancel();
    let sub = source.on_settled(Box::new(move |outcome| match outcome {
        Some(cause) => handle.cancel_with_cause(cause),
        None => handle.cancel_with_message("source settled"),
    }));
    let _ = child.on_did_cancel(move |_| sub.dispose());
    child
}
