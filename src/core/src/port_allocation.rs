//! Host port allocation.
//!
//! Hands out unique host ports from the configured range and keeps an
//! append-only ledger of every assignment in `port_allocations`.

pub mod port_allocator;
pub mod types;

pub use port_allocator::PortAllocator;
pub use types::{AllocationStatus, PortAllocation};
