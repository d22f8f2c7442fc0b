//! First-fit subnet allocation.
//!
//! This file holds the pure allocation algorithm: given the current claim set
//! and the parent range, find the lowest-addressed free subnet of the
//! configured size. Persisting the result is the caller's job, inside the
//! same locked section that read the claims.

use super::error::IpamError;
use super::types::{NetworkRange, SubnetClaim};
use crate::utils::ip_utils::{align_up, block_at, block_size, bounds, is_canonical, overlaps};
use ipnet::Ipv4Net;
use serde::Serialize;
use std::collections::HashSet;

/// Capacity figures for a parent range, as reported by `list`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolUsage {
    pub parent: Ipv4Net,
    pub prefix_len: u8,
    pub capacity: u64,
    pub used: u64,
    pub free: u64,
}

/// Pick the lowest free `/subnet_mask_bits` block in `range`.
///
/// Every existing claim is checked first; a claim outside the range, of the
/// wrong size, or overlapping another claim aborts with
/// [`IpamError::CorruptClaim`] rather than being worked around.
pub fn allocate(existing: &[SubnetClaim], range: &NetworkRange) -> Result<Ipv4Net, IpamError> {
    let claimed = checked_claims(existing, range)?;
    let prefix_len = range.subnet_mask_bits();
    let step = block_size(prefix_len);
    let (range_start, range_end) = bounds(&range.cidr());

    // Claims are sorted and disjoint, so a single sweep finds the first gap.
    let mut candidate = range_start;
    for net in &claimed {
        let (claim_start, claim_end) = bounds(net);
        if candidate + step <= claim_start {
            break;
        }
        candidate = candidate.max(align_up(claim_end, step));
    }

    if candidate + step > range_end {
        return Err(IpamError::PoolExhausted {
            parent: range.cidr(),
            prefix_len,
        });
    }

    let subnet = block_at(candidate, prefix_len).ok_or(IpamError::PoolExhausted {
        parent: range.cidr(),
        prefix_len,
    })?;
    log::debug!(
        "First free /{} in {} is {} ({} existing claims)",
        prefix_len,
        range.cidr(),
        subnet,
        claimed.len()
    );
    Ok(subnet)
}

/// Report how many subnets the range holds and how many are claimed
pub fn pool_usage(existing: &[SubnetClaim], range: &NetworkRange) -> Result<PoolUsage, IpamError> {
    let claimed = checked_claims(existing, range)?;
    let capacity = 1u64 << (range.subnet_mask_bits() - range.cidr().prefix_len());
    let used = claimed.len() as u64;
    Ok(PoolUsage {
        parent: range.cidr(),
        prefix_len: range.subnet_mask_bits(),
        capacity,
        used,
        free: capacity.saturating_sub(used),
    })
}

/// Check a single claim against the range it was allocated from
pub fn verify_claim(claim: &SubnetClaim, range: &NetworkRange) -> Result<(), IpamError> {
    match claim_fault(claim, range) {
        Some(reason) => Err(corrupt(claim, reason)),
        None => Ok(()),
    }
}

fn claim_fault(claim: &SubnetClaim, range: &NetworkRange) -> Option<String> {
    if !is_canonical(&claim.cidr) {
        Some("CIDR has host bits set".to_string())
    } else if claim.prefix_len != claim.cidr.prefix_len() {
        Some(format!(
            "recorded prefix length /{} does not match its CIDR",
            claim.prefix_len
        ))
    } else if !range.cidr().contains(&claim.cidr) {
        Some(format!("outside parent range {}", range.cidr()))
    } else if claim.prefix_len != range.subnet_mask_bits() {
        Some(format!(
            "prefix length /{} differs from configured /{}",
            claim.prefix_len,
            range.subnet_mask_bits()
        ))
    } else {
        None
    }
}

/// Validate the claim set against the range and return the claimed CIDRs
/// sorted by address
fn checked_claims(existing: &[SubnetClaim], range: &NetworkRange) -> Result<Vec<Ipv4Net>, IpamError> {
    let mut seen_clusters = HashSet::new();
    let mut sorted: Vec<&SubnetClaim> = Vec::with_capacity(existing.len());

    for claim in existing {
        if !seen_clusters.insert(claim.cluster_id.as_str()) {
            return Err(corrupt(claim, "cluster holds more than one claim".to_string()));
        }
        verify_claim(claim, range)?;
        sorted.push(claim);
    }

    sorted.sort_by_key(|claim| bounds(&claim.cidr).0);
    for pair in sorted.windows(2) {
        if overlaps(&pair[0].cidr, &pair[1].cidr) {
            return Err(corrupt(
                pair[1],
                format!("overlaps claim of cluster {} ({})", pair[0].cluster_id, pair[0].cidr),
            ));
        }
    }

    Ok(sorted.into_iter().map(|claim| claim.cidr).collect())
}

fn corrupt(claim: &SubnetClaim, reason: String) -> IpamError {
    log::error!(
        "Corrupt subnet claim for cluster {} ({}): {}",
        claim.cluster_id,
        claim.cidr,
        reason
    );
    IpamError::CorruptClaim {
        cluster_id: claim.cluster_id.clone(),
        cidr: claim.cidr,
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(s: &str) -> Ipv4Net {
        s.parse().unwrap()
    }

    fn range(cidr: &str, bits: u8) -> NetworkRange {
        NetworkRange::new(net(cidr), bits, None, None).unwrap()
    }

    fn claim(id: &str, cidr: &str) -> SubnetClaim {
        SubnetClaim::new(id, net(cidr))
    }

    #[test]
    fn test_first_allocation_is_lowest_block() {
        let subnet = allocate(&[], &range("10.1.0.0/16", 24)).unwrap();
        assert_eq!(subnet, net("10.1.0.0/24"));
    }

    #[test]
    fn test_skips_claimed_blocks() {
        let claims = vec![claim("a", "10.1.0.0/24"), claim("b", "10.1.1.0/24")];
        let subnet = allocate(&claims, &range("10.1.0.0/16", 24)).unwrap();
        assert_eq!(subnet, net("10.1.2.0/24"));
    }

    #[test]
    fn test_fills_lowest_gap_first() {
        // Claims listed out of order; gap at .1 must win over the tail.
        let claims = vec![
            claim("c", "10.1.2.0/24"),
            claim("a", "10.1.0.0/24"),
            claim("d", "10.1.3.0/24"),
        ];
        let subnet = allocate(&claims, &range("10.1.0.0/16", 24)).unwrap();
        assert_eq!(subnet, net("10.1.1.0/24"));
    }

    #[test]
    fn test_sequential_allocations_are_disjoint() {
        let range = range("10.0.0.0/20", 24);
        let mut claims = Vec::new();
        for i in 0..16 {
            let subnet = allocate(&claims, &range).unwrap();
            for existing in &claims {
                assert!(!overlaps(&existing.cidr, &subnet));
            }
            assert!(range.cidr().contains(&subnet));
            claims.push(SubnetClaim::new(&format!("cluster-{}", i), subnet));
        }
        assert!(matches!(
            allocate(&claims, &range),
            Err(IpamError::PoolExhausted { prefix_len: 24, .. })
        ));
    }

    #[test]
    fn test_exhaustion_reports_parent() {
        let range = range("192.168.0.0/23", 24);
        let claims = vec![claim("a", "192.168.0.0/24"), claim("b", "192.168.1.0/24")];
        let err = allocate(&claims, &range).unwrap_err();
        assert_eq!(err.to_string(), "No free /24 subnet left in 192.168.0.0/23");
    }

    #[test]
    fn test_subnet_equal_to_parent() {
        let range = range("10.9.0.0/24", 24);
        assert_eq!(allocate(&[], &range).unwrap(), net("10.9.0.0/24"));
        assert!(allocate(&[claim("a", "10.9.0.0/24")], &range).is_err());
    }

    #[test]
    fn test_top_of_address_space() {
        let range = range("255.255.255.0/24", 25);
        let claims = vec![claim("a", "255.255.255.0/25")];
        assert_eq!(allocate(&claims, &range).unwrap(), net("255.255.255.128/25"));
    }

    #[test]
    fn test_claim_outside_range_is_corrupt() {
        let claims = vec![claim("stray", "10.2.0.0/24")];
        let err = allocate(&claims, &range("10.1.0.0/16", 24)).unwrap_err();
        match err {
            IpamError::CorruptClaim { cluster_id, .. } => assert_eq!(cluster_id, "stray"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_overlapping_claims_are_corrupt() {
        let mut wide = claim("b", "10.1.0.0/24");
        wide.cidr = net("10.1.0.0/23");
        wide.prefix_len = 23;
        let claims = vec![claim("a", "10.1.0.0/24"), wide];
        assert!(matches!(
            allocate(&claims, &range("10.1.0.0/16", 24)),
            Err(IpamError::CorruptClaim { .. })
        ));

        let claims = vec![claim("a", "10.1.0.0/24"), claim("b", "10.1.0.0/24")];
        assert!(matches!(
            allocate(&claims, &range("10.1.0.0/16", 24)),
            Err(IpamError::CorruptClaim { .. })
        ));
    }

    #[test]
    fn test_mismatched_prefix_is_corrupt() {
        let mut bad = claim("a", "10.1.0.0/24");
        bad.prefix_len = 25;
        assert!(matches!(
            allocate(&[bad], &range("10.1.0.0/16", 24)),
            Err(IpamError::CorruptClaim { .. })
        ));
    }

    #[test]
    fn test_duplicate_cluster_is_corrupt() {
        let claims = vec![claim("a", "10.1.0.0/24"), claim("a", "10.1.1.0/24")];
        assert!(matches!(
            allocate(&claims, &range("10.1.0.0/16", 24)),
            Err(IpamError::CorruptClaim { .. })
        ));
    }

    #[test]
    fn test_verify_single_claim() {
        let range = range("10.1.0.0/16", 24);
        assert!(verify_claim(&claim("a", "10.1.9.0/24"), &range).is_ok());
        assert!(verify_claim(&claim("a", "10.1.9.0/25"), &range).is_err());
        assert!(verify_claim(&claim("a", "10.3.0.0/24"), &range).is_err());
    }

    #[test]
    fn test_pool_usage() {
        let claims = vec![claim("a", "10.1.0.0/24"), claim("b", "10.1.7.0/24")];
        let usage = pool_usage(&claims, &range("10.1.0.0/21", 24)).unwrap();
        assert_eq!(usage.capacity, 8);
        assert_eq!(usage.used, 2);
        assert_eq!(usage.free, 6);
    }
}
