//! Controller-facing reconciliation entry points.
//!
//! The controller framework calls these on every reconcile pass, possibly
//! many times for the same cluster and from many worker threads at once.
//! Both operations converge: repeating them never changes the outcome.

use crate::ip::{
    allocate, pool_usage, split, verify_claim, AllocationLock, ClaimStore, ClusterNetwork, IpamError,
    NetworkRange, PoolUsage, SubnetClaim, ZoneNetwork,
};
use crate::utils::validation::{is_valid_cluster_id, validate_zone_names};
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// One cluster as handed over by the controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterRequest {
    pub cluster_id: String,
    pub zones: Vec<String>,
}

impl ClusterRequest {
    pub fn new(cluster_id: impl Into<String>, zones: &[String]) -> Self {
        ClusterRequest {
            cluster_id: cluster_id.into(),
            zones: zones.to_vec(),
        }
    }
}

/// The create/delete shape shared by every resource the operator reconciles.
///
/// Version-specific behavior is configured on the implementing type instead
/// of being copied into a new implementation per controller version.
pub trait LifecycleStep: Send + Sync {
    type Output;

    /// Make sure the resource exists for this cluster and return it
    fn ensure_created(&self, request: &ClusterRequest) -> Result<Self::Output, IpamError>;

    /// Make sure the resource is gone. Absent resources are not an error.
    fn ensure_deleted(&self, cluster_id: &str) -> Result<(), IpamError>;
}

/// Subnet allocation as a reconciliation step.
///
/// The claim decision runs under the injected lock; zone splitting of a
/// committed claim happens after the lock is released.
#[derive(Debug)]
pub struct ReconciliationAdapter<S, L> {
    range: NetworkRange,
    store: S,
    lock: L,
}

impl<S: ClaimStore, L: AllocationLock> ReconciliationAdapter<S, L> {
    pub fn new(range: NetworkRange, store: S, lock: L) -> Self {
        ReconciliationAdapter { range, store, lock }
    }

    pub fn range(&self) -> &NetworkRange {
        &self.range
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Return the cluster's network, allocating a subnet on first call
    pub fn ensure_created(&self, cluster_id: &str, zones: &[String]) -> Result<ClusterNetwork, IpamError> {
        self.create(cluster_id, zones)
            .map_err(|e| e.for_cluster(cluster_id))
    }

    /// Release the cluster's subnet if it holds one
    pub fn ensure_deleted(&self, cluster_id: &str) -> Result<(), IpamError> {
        self.delete(cluster_id).map_err(|e| e.for_cluster(cluster_id))
    }

    /// Reconcile many clusters on the rayon worker pool.
    ///
    /// Results come back in request order; one cluster failing does not stop
    /// the others.
    pub fn ensure_created_all(
        &self,
        requests: &[ClusterRequest],
    ) -> Vec<(String, Result<ClusterNetwork, IpamError>)> {
        requests
            .par_iter()
            .map(|request| {
                (
                    request.cluster_id.clone(),
                    self.ensure_created(&request.cluster_id, &request.zones),
                )
            })
            .collect()
    }

    /// Current claim of a cluster, without allocating
    pub fn claim_for(&self, cluster_id: &str) -> Result<Option<SubnetClaim>, IpamError> {
        Ok(self.store.get(cluster_id)?)
    }

    /// All claims, ordered by address
    pub fn claims(&self) -> Result<Vec<SubnetClaim>, IpamError> {
        let mut claims = self.store.list()?;
        claims.sort_by_key(|claim| u32::from(claim.cidr.network()));
        Ok(claims)
    }

    pub fn usage(&self) -> Result<PoolUsage, IpamError> {
        pool_usage(&self.store.list()?, &self.range)
    }

    fn create(&self, cluster_id: &str, zones: &[String]) -> Result<ClusterNetwork, IpamError> {
        if !is_valid_cluster_id(cluster_id) {
            return Err(IpamError::InvalidClusterId(cluster_id.to_string()));
        }
        self.preflight_split(zones)?;

        let claim = match self.store.get(cluster_id)? {
            Some(existing) => {
                debug!("Cluster {} already holds {}", cluster_id, existing.cidr);
                existing
            }
            None => self.lock.with_lock(|| self.claim_new_subnet(cluster_id))?,
        };
        verify_claim(&claim, &self.range)?;

        let split = split(claim.cidr, zones)?;
        let zones: Vec<ZoneNetwork> = split
            .subnets
            .into_iter()
            .map(|subnet| {
                let tiers = subnet.tiers(&self.range);
                ZoneNetwork::new(subnet, tiers)
            })
            .collect();

        Ok(ClusterNetwork {
            claim,
            zones,
            reserved: split.reserved,
        })
    }

    /// Runs under the allocation lock: read claims, pick a gap, persist.
    fn claim_new_subnet(&self, cluster_id: &str) -> Result<SubnetClaim, IpamError> {
        // Another worker may have claimed for this cluster while we waited.
        if let Some(existing) = self.store.get(cluster_id)? {
            debug!("Cluster {} was allocated {} concurrently", cluster_id, existing.cidr);
            return Ok(existing);
        }

        let claims = self.store.list()?;
        let cidr = allocate(&claims, &self.range)?;
        let claim = SubnetClaim::new(cluster_id, cidr);
        self.store.put(claim.clone())?;

        info!(
            "Allocated {} to cluster {} ({} of {} subnets in {} now claimed)",
            cidr,
            cluster_id,
            claims.len() + 1,
            1u64 << (self.range.subnet_mask_bits() - self.range.cidr().prefix_len()),
            self.range.cidr()
        );
        Ok(claim)
    }

    fn delete(&self, cluster_id: &str) -> Result<(), IpamError> {
        if !is_valid_cluster_id(cluster_id) {
            return Err(IpamError::InvalidClusterId(cluster_id.to_string()));
        }
        let removed = self.lock.with_lock(|| Ok(self.store.delete(cluster_id)?))?;
        if removed {
            info!("Released subnet of cluster {}", cluster_id);
        } else {
            debug!("Cluster {} holds no subnet; nothing to release", cluster_id);
        }
        Ok(())
    }

    /// Reject zone lists that could never be split before a claim is written.
    fn preflight_split(&self, zones: &[String]) -> Result<(), IpamError> {
        validate_zone_names(zones).map_err(IpamError::InvalidConfig)?;
        let sample = split(self.range.first_subnet()?, zones)?;
        if !sample.reserved.is_empty() {
            warn!(
                "{} zone(s) leave {} of {} zone blocks unused in every cluster subnet",
                zones.len(),
                sample.reserved.len(),
                zones.len().next_power_of_two()
            );
        }
        Ok(())
    }
}

impl<S: ClaimStore, L: AllocationLock> LifecycleStep for ReconciliationAdapter<S, L> {
    type Output = ClusterNetwork;

    fn ensure_created(&self, request: &ClusterRequest) -> Result<ClusterNetwork, IpamError> {
        ReconciliationAdapter::ensure_created(self, &request.cluster_id, &request.zones)
    }

    fn ensure_deleted(&self, cluster_id: &str) -> Result<(), IpamError> {
        ReconciliationAdapter::ensure_deleted(self, cluster_id)
    }
}
