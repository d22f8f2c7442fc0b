//! # cluster-ipam - Subnet allocation for per-cluster network infrastructure
//!
//! This library hands out disjoint subnets to clusters from a shared parent
//! range, splits each cluster subnet across availability zones, and keeps
//! allocations made by concurrently reconciled clusters from overlapping.
//!
//! ## Overview
//!
//! A cluster-lifecycle operator reconciles many clusters in parallel. Each new
//! cluster needs its own slice of the installation's address space, and that
//! slice must stay the same for the cluster's whole life. The allocator keeps
//! one claim per cluster in a claim store and decides new claims under an
//! allocation lock.
//!
//! ## Architecture
//!
//! - `ip::store`: `ClaimStore` trait with in-memory and JSON file backends
//! - `ip::allocator`: first-fit, lowest-address-first subnet selection
//! - `ip::splitter`: per-availability-zone split and public/private tiers
//! - `ip::lock`: allocation locks (in-process mutex or shared lease file)
//! - `reconcile`: idempotent `ensure_created` / `ensure_deleted` entry points
//! - `config`, `config_loader`: YAML configuration and adapter wiring
//! - `utils`: CIDR arithmetic and input validation
//!
//! ## Example Usage
//!
//! ```rust
//! use cluster_ipam::ip::{MemoryClaimStore, MutexLock, NetworkRange};
//! use cluster_ipam::reconcile::ReconciliationAdapter;
//!
//! let range = NetworkRange::new("10.1.0.0/16".parse()?, 24, None, None)?;
//! let adapter = ReconciliationAdapter::new(range, MemoryClaimStore::new(), MutexLock::new());
//!
//! let zones = vec!["eu-central-1a".to_string(), "eu-central-1b".to_string()];
//! let network = adapter.ensure_created("prod-eu-1", &zones)?;
//! assert_eq!(network.claim.cidr.to_string(), "10.1.0.0/24");
//! assert_eq!(network.zones[1].cidr.to_string(), "10.1.0.128/25");
//!
//! // Repeating the call returns the same claim.
//! assert_eq!(adapter.ensure_created("prod-eu-1", &zones)?, network);
//!
//! adapter.ensure_deleted("prod-eu-1")?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Configuration Format
//!
//! ```yaml
//! network:
//!   cidr: 10.1.0.0/16
//!   subnet_mask_bits: 24
//!   public_subnet_mask_bits: 26
//!   private_subnet_mask_bits: 26
//!   availability_zones: [eu-central-1a, eu-central-1b, eu-central-1c]
//! store:
//!   path: /var/lib/cluster-ipam/claims.json
//! lock:
//!   kind: lease
//!   path: /var/lib/cluster-ipam/allocation.lease
//!   ttl: 30s
//!   timeout: 10s
//! ```
//!
//! ## Error Handling
//!
//! Library operations return `Result<T, ip::IpamError>`; configuration loading
//! and the binary use `color_eyre` for reports with context.

pub mod config;
pub mod config_loader;
pub mod ip;
pub mod reconcile;
pub mod utils;
