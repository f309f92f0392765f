//! Outward-facing ports
//!
//! Traits the engine calls across its boundary: the cooperative deadline
//! supplied per drain call, and host hooks for order-service refreshes,
//! comparison cleanup and cycle completion.

pub mod hooks;
pub mod timer;

pub use hooks::{NoopHooks, RuntimeHooks};
pub use timer::{CountdownTimer, DeadlineTimer, NeverExpires};
