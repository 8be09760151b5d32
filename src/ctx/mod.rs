//! The context tree engine.
//!
//! - [`Context`]: a node in a cancellation tree
//! - [`CancelHandle`]: cancels the context it was created alongside
//! - [`Key`]: identity-compared key for value bindings
//! - [`Done`]: the awaitable view of a context
//!
//! Derivation is the only way cancellation enters a tree: the root from
//! [`Context::background`] cannot be cancelled itself.

mod context;
mod done;
mod key;

pub use context::{CancelHandle, Context};
pub use done::Done;
pub use key::Key;
