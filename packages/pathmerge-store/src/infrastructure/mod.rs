//! Store backends
//!
//! Only the in-memory backend exists; the merged structure is derived state
//! and is never persisted (persistence is an external collaborator concern).

pub mod memory;
