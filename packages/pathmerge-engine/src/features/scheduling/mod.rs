//! Update scheduling feature
//!
//! Defers epilogue work on dirty structures to a controlled point in the
//! update cycle and executes it in strict priority order within a
//! resumable, bounded time budget:
//!
//! 1. identity-update requests (FIFO)
//! 2. dirty path nodes (heap, deeper paths first)
//! 3. comparison-function cleanup (FIFO)
//! 4. suspended order-service refreshes (FIFO)
//! 5. end-of-cycle completion tasks (FIFO)
//! 6. per-indexer data-element cleanup, processed once, last

pub mod application;
pub mod domain;
pub mod ports;
