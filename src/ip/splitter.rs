//! Availability zone splitting.
//!
//! A cluster subnet is cut into the smallest power-of-two number of equal
//! blocks that covers its zones. Zones, sorted by name, take the blocks in
//! ascending address order; any remainder stays reserved to the cluster.
//! Each zone block is then halved into a public and a private tier.

use super::error::IpamError;
use super::types::{AzSubnet, NetworkRange, SubnetTiers, ZoneSplit};
use crate::utils::ip_utils::IPV4_BITS;
use crate::utils::validation::validate_zone_names;
use ipnet::Ipv4Net;

/// Split `cluster_cidr` across `zones`.
///
/// The mapping depends only on the inputs: the same CIDR and zone set always
/// give the same zone-to-block assignment, whatever order the zones come in.
///
/// # Examples
/// ```
/// use cluster_ipam::ip::split;
///
/// let zones = vec!["b".to_string(), "a".to_string()];
/// let split = split("10.0.0.0/24".parse().unwrap(), &zones).unwrap();
/// assert_eq!(split.subnets[0].zone, "a");
/// assert_eq!(split.subnets[0].cidr.to_string(), "10.0.0.0/25");
/// assert!(split.reserved.is_empty());
/// ```
pub fn split(cluster_cidr: Ipv4Net, zones: &[String]) -> Result<ZoneSplit, IpamError> {
    validate_zone_names(zones).map_err(IpamError::InvalidConfig)?;

    let slots = zones.len().next_power_of_two();
    let extra_bits = slots.trailing_zeros() as u8;
    let requested_prefix = cluster_cidr.prefix_len() + extra_bits;
    let blocks: Vec<Ipv4Net> = cluster_cidr
        .subnets(requested_prefix)
        .map_err(|_| IpamError::InsufficientAddressSpace {
            cidr: cluster_cidr,
            requested_prefix,
        })?
        .collect();

    let mut sorted: Vec<&String> = zones.iter().collect();
    sorted.sort();

    let subnets: Vec<AzSubnet> = sorted
        .into_iter()
        .zip(blocks.iter())
        .map(|(zone, cidr)| AzSubnet {
            zone: zone.clone(),
            cidr: *cidr,
        })
        .collect();
    let reserved = blocks[subnets.len()..].to_vec();

    if !reserved.is_empty() {
        log::debug!(
            "Split {} into {} zone subnets, {} block(s) reserved",
            cluster_cidr,
            subnets.len(),
            reserved.len()
        );
    }

    Ok(ZoneSplit { subnets, reserved })
}

impl AzSubnet {
    /// Carve the public and private subnets out of this zone subnet.
    ///
    /// The lower half hosts the public tier and the upper half the private
    /// tier. A configured tier mask narrower than the half selects the first
    /// block of that size in the half; a wider one is clamped to the half.
    /// A single-address zone subnet has no halves and gets no tiers.
    pub fn tiers(&self, range: &NetworkRange) -> Option<SubnetTiers> {
        let half_prefix = self.cidr.prefix_len() + 1;
        if half_prefix > IPV4_BITS {
            return None;
        }
        let mut halves = self.cidr.subnets(half_prefix).ok()?;
        let public = halves.next()?;
        let private = halves.next()?;

        Some(SubnetTiers {
            public: first_block(public, range.public_subnet_mask_bits())?,
            private: first_block(private, range.private_subnet_mask_bits())?,
        })
    }
}

fn first_block(half: Ipv4Net, mask_bits: Option<u8>) -> Option<Ipv4Net> {
    let prefix = match mask_bits {
        Some(bits) if bits > half.prefix_len() => bits,
        Some(bits) => {
            log::debug!("Tier mask /{} is wider than {}, using the whole half", bits, half);
            half.prefix_len()
        }
        None => half.prefix_len(),
    };
    Ipv4Net::new(half.network(), prefix).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::ip_utils::overlaps;

    fn net(s: &str) -> Ipv4Net {
        s.parse().unwrap()
    }

    fn zones(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn test_two_zones_take_halves() {
        let split = split(net("10.0.0.0/24"), &zones(&["a", "b"])).unwrap();
        assert_eq!(
            split.subnets,
            vec![
                AzSubnet { zone: "a".into(), cidr: net("10.0.0.0/25") },
                AzSubnet { zone: "b".into(), cidr: net("10.0.0.128/25") },
            ]
        );
        assert!(split.reserved.is_empty());
    }

    #[test]
    fn test_three_zones_leave_one_block_reserved() {
        let split = split(net("10.0.0.0/24"), &zones(&["a", "b", "c"])).unwrap();
        let assigned: Vec<(&str, Ipv4Net)> = split
            .subnets
            .iter()
            .map(|subnet| (subnet.zone.as_str(), subnet.cidr))
            .collect();
        assert_eq!(
            assigned,
            vec![
                ("a", net("10.0.0.0/26")),
                ("b", net("10.0.0.64/26")),
                ("c", net("10.0.0.128/26")),
            ]
        );
        assert_eq!(split.reserved, vec![net("10.0.0.192/26")]);
    }

    #[test]
    fn test_zone_order_does_not_matter() {
        let forward = split(net("10.4.0.0/22"), &zones(&["eu-west-1a", "eu-west-1b", "eu-west-1c"])).unwrap();
        let shuffled = split(net("10.4.0.0/22"), &zones(&["eu-west-1c", "eu-west-1a", "eu-west-1b"])).unwrap();
        assert_eq!(forward, shuffled);
    }

    #[test]
    fn test_single_zone_gets_whole_subnet() {
        let split = split(net("10.0.5.0/24"), &zones(&["only"])).unwrap();
        assert_eq!(split.subnets[0].cidr, net("10.0.5.0/24"));
        assert!(split.reserved.is_empty());
    }

    #[test]
    fn test_split_results_are_disjoint_and_contained() {
        let cluster = net("10.8.16.0/20");
        let split = split(cluster, &zones(&["a", "b", "c", "d", "e"])).unwrap();
        assert_eq!(split.subnets.len(), 5);
        assert_eq!(split.reserved.len(), 3);
        let all: Vec<Ipv4Net> = split
            .subnets
            .iter()
            .map(|subnet| subnet.cidr)
            .chain(split.reserved.iter().copied())
            .collect();
        for (i, a) in all.iter().enumerate() {
            assert!(cluster.contains(a));
            assert_eq!(a.prefix_len(), 23);
            for b in &all[i + 1..] {
                assert!(!overlaps(a, b));
            }
        }
    }

    #[test]
    fn test_too_small_for_zones() {
        let err = split(net("10.0.0.0/31"), &zones(&["a", "b", "c"])).unwrap_err();
        assert!(matches!(
            err,
            IpamError::InsufficientAddressSpace { requested_prefix: 33, .. }
        ));
    }

    #[test]
    fn test_empty_and_duplicate_zones_rejected() {
        assert!(matches!(
            split(net("10.0.0.0/24"), &[]),
            Err(IpamError::InvalidConfig(_))
        ));
        assert!(matches!(
            split(net("10.0.0.0/24"), &zones(&["a", "a"])),
            Err(IpamError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_tiers_default_to_halves() {
        let range = NetworkRange::new(net("10.0.0.0/16"), 24, None, None).unwrap();
        let subnet = AzSubnet { zone: "a".into(), cidr: net("10.0.0.0/26") };
        let tiers = subnet.tiers(&range).unwrap();
        assert_eq!(tiers.public, net("10.0.0.0/27"));
        assert_eq!(tiers.private, net("10.0.0.32/27"));
    }

    #[test]
    fn test_tiers_use_configured_masks() {
        let range = NetworkRange::new(net("10.0.0.0/16"), 24, Some(28), Some(27)).unwrap();
        let subnet = AzSubnet { zone: "a".into(), cidr: net("10.0.0.64/26") };
        let tiers = subnet.tiers(&range).unwrap();
        assert_eq!(tiers.public, net("10.0.0.64/28"));
        assert_eq!(tiers.private, net("10.0.0.96/27"));
        assert!(!overlaps(&tiers.public, &tiers.private));
    }

    #[test]
    fn test_tiers_clamp_wide_masks() {
        let range = NetworkRange::new(net("10.0.0.0/16"), 24, Some(25), Some(25)).unwrap();
        let subnet = AzSubnet { zone: "a".into(), cidr: net("10.0.0.0/26") };
        let tiers = subnet.tiers(&range).unwrap();
        assert_eq!(tiers.public, net("10.0.0.0/27"));
        assert_eq!(tiers.private, net("10.0.0.32/27"));
    }

    #[test]
    fn test_single_address_zone_has_no_tiers() {
        let range = NetworkRange::new(net("10.0.0.0/24"), 30, Some(31), None).unwrap();
        let subnet = AzSubnet { zone: "a".into(), cidr: net("10.0.0.1/32") };
        assert_eq!(subnet.tiers(&range), None);

        let subnet = AzSubnet { zone: "a".into(), cidr: net("10.0.0.2/31") };
        let tiers = subnet.tiers(&range).unwrap();
        assert_eq!(tiers.public, net("10.0.0.2/32"));
        assert_eq!(tiers.private, net("10.0.0.3/32"));
    }
}
