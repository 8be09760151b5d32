//! Cxtree: cancellation-and-deadline propagation contexts for cooperative schedulers.
//!
//! # Overview
//!
//! A [`Context`] is an immutable handle representing a unit of ongoing work.
//! Contexts form a tree: cancelling a context cancels all of its transitive
//! descendants, deadlines tighten monotonically from parent to child, and
//! key/value bindings are resolved along the ancestor chain. The design
//! follows the Go `context` package, adapted to a single-threaded
//! cooperative scheduler: there are no locks, and mutual exclusion comes
//! from the run-to-completion property of the host.
//!
//! # Core Guarantees
//!
//! - **Stable reasons**: once a context is cancelled, every read returns the
//!   same [`Reason`] handle; a descendant observes its ancestor's reason by
//!   reference, not by copy
//! - **Idempotent cancellation**: cancelling twice is a no-op; the first
//!   reason wins
//! - **Prompt deadlines**: [`Context::error`] observes an expired deadline
//!   even when the host timer has not fired yet
//! - **At-most-once listeners**: each registered listener fires at most
//!   once and is removed on delivery or disposal
//! - **Bounded re-entry**: listeners may re-enter the tree freely; drains
//!   never hold interior borrows across a callback
//!
//! # Module Structure
//!
//! - [`ctx`]: the context tree engine and constructors
//! - [`error`]: cancellation reasons and listener fault types
//! - [`host`]: the injected time/timer abstraction and host implementations
//! - [`abort`]: abort-controller interop
//! - [`adapter`]: thin adapters over external event sources
//! - [`types`]: the host time domain
//!
//! # Example
//!
//! ```
//! use std::rc::Rc;
//! use cxtree::{Context, ManualHost};
//!
//! let host = Rc::new(ManualHost::new());
//! let root = Context::background(host.clone());
//! let (ctx, cancel) = root.with_cancel();
//!
//! assert!(ctx.error().is_none());
//! cancel.cancel();
//! assert!(ctx.error().is_some());
//! # cxtree::Context::release_root(&host);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]

pub mod abort;
pub mod adapter;
pub mod ctx;
pub mod error;
pub mod host;
pub mod tracing_compat;
pub mod types;

pub use abort::{AbortController, AbortSignal};
pub use ctx::{CancelHandle, Context, Done, Key};
pub use error::{AggregateFault, Fault, NotifyError, Reason, ReasonKind};
pub use host::{Disposal, Host, ManualHost, StdHost};
pub use types::Time;
