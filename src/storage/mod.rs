//! Storage layer for reconcile.
//!
//! Traits define the collaborator contract; `memory` provides the reference
//! in-memory backend.

mod memory;
mod traits;

pub use memory::InMemoryRecordStore;
pub use traits::{MergeSwap, RecordStore, StorageError, SwapReceipt, MAX_RESOLVE_HOPS};
