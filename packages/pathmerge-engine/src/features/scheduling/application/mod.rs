//! Scheduling application layer

pub mod executor;

pub use executor::{execute_scheduled, UpdateScheduler};
