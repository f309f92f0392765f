//! Feature modules

pub mod merge;
pub mod scheduling;
