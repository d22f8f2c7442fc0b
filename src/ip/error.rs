//! Error taxonomy for subnet allocation.
//!
//! Every failure carries enough context (parent range, prefix length, cluster
//! id) to be logged or retried by the caller. Nothing is swallowed here.

use ipnet::Ipv4Net;
use std::path::PathBuf;
use std::time::Duration;

/// Errors raised by a [`ClaimStore`](super::store::ClaimStore) implementation
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Claim store I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Claim store document at {path} is not valid: {source}")]
    Serialization {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Claim store holds more than one claim for cluster {cluster_id}")]
    Duplicate { cluster_id: String },
}

/// Errors raised by the allocator, the zone splitter, the allocation lock and
/// the reconciliation adapter
#[derive(Debug, thiserror::Error)]
pub enum IpamError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("No free /{prefix_len} subnet left in {parent}")]
    PoolExhausted { parent: Ipv4Net, prefix_len: u8 },

    #[error("Cannot split {cidr} into /{requested_prefix} blocks")]
    InsufficientAddressSpace { cidr: Ipv4Net, requested_prefix: u8 },

    #[error("Corrupt claim for cluster {cluster_id} ({cidr}): {reason}")]
    CorruptClaim {
        cluster_id: String,
        cidr: Ipv4Net,
        reason: String,
    },

    #[error("Invalid cluster id '{0}': expected a lowercase DNS label of at most 63 characters")]
    InvalidClusterId(String),

    #[error("Timed out after {waited:?} waiting for allocation lease {path}")]
    LockTimeout { path: PathBuf, waited: Duration },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Cluster {cluster_id}: {source}")]
    Cluster {
        cluster_id: String,
        #[source]
        source: Box<IpamError>,
    },
}

impl IpamError {
    /// Attach the cluster id being served to this error
    pub fn for_cluster(self, cluster_id: &str) -> Self {
        match self {
            already @ IpamError::Cluster { .. } => already,
            other => IpamError::Cluster {
                cluster_id: cluster_id.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// The underlying error with any cluster context stripped
    pub fn root(&self) -> &IpamError {
        match self {
            IpamError::Cluster { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether the controller should retry the reconcile that produced this
    /// error. Only transient store and lock failures qualify; exhaustion,
    /// configuration and corruption faults need an operator or a config change.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.root(),
            IpamError::Store(StoreError::Io { .. }) | IpamError::LockTimeout { .. }
        )
    }
}
