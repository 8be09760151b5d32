//! Core value types.
//!
//! - [`time`]: the host time domain ([`Time`])

pub mod time;

pub use time::Time;
