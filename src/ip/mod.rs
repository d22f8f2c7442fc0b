//! IP address management for cluster subnets.
//!
//! This module hands out disjoint per-cluster subnets from a parent range,
//! splits each cluster subnet across availability zones, and keeps
//! concurrent allocations from ever overlapping.

pub mod allocator;
pub mod error;
pub mod lock;
pub mod splitter;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use allocator::{allocate, pool_usage, verify_claim, PoolUsage};
pub use error::{IpamError, StoreError};
pub use lock::{AllocationLock, ConfiguredLock, LeaseLock, LeaseSettings, MutexLock};
pub use splitter::split;
pub use store::{ClaimStore, JsonFileClaimStore, MemoryClaimStore};
pub use types::{AzSubnet, ClusterNetwork, NetworkRange, SubnetClaim, SubnetTiers, ZoneNetwork, ZoneSplit};
