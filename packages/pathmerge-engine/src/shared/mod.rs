//! Shared module - ids, deltas, descriptors, outward ports
//!
//! Types shared across the scheduling and merge features. Depends only on
//! `pathmerge-store` model types.

pub mod models;
pub mod ports;
