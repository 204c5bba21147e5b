//! Run progress event bus.
//!
//! This crate provides the in-process publish/subscribe channel between a
//! running pipeline and its observers (dashboard adapters, CLI progress
//! output, tests):
//!
//! - [`EventBus`] — broadcast hub backed by `tokio::sync::broadcast`.
//! - [`RunEvent`] — the progress event envelope emitted at stage
//!   boundaries.

pub mod bus;

pub use bus::{EventBus, RunEvent, RunEventKind};
