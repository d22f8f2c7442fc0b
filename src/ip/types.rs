//! Core IPAM data types: the parent network range, per-cluster claims and the
//! per-zone subnets derived from them.

use super::error::IpamError;
use crate::utils::ip_utils::{is_canonical, IPV4_BITS};
use chrono::{DateTime, Utc};
use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};

/// The parent address block all cluster subnets are carved from.
///
/// Built once from configuration and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkRange {
    cidr: Ipv4Net,
    subnet_mask_bits: u8,
    public_subnet_mask_bits: Option<u8>,
    private_subnet_mask_bits: Option<u8>,
}

impl NetworkRange {
    /// Validate and build a network range.
    ///
    /// Fails with [`IpamError::InvalidConfig`] when the parent CIDR has host
    /// bits set, when it cannot hold a single `/subnet_mask_bits` block, or
    /// when a tier mask is not strictly narrower than the cluster subnet.
    pub fn new(
        cidr: Ipv4Net,
        subnet_mask_bits: u8,
        public_subnet_mask_bits: Option<u8>,
        private_subnet_mask_bits: Option<u8>,
    ) -> Result<Self, IpamError> {
        if !is_canonical(&cidr) {
            return Err(IpamError::InvalidConfig(format!(
                "parent range {} has host bits set (did you mean {}?)",
                cidr,
                cidr.trunc()
            )));
        }
        if subnet_mask_bits > IPV4_BITS || subnet_mask_bits < cidr.prefix_len() {
            return Err(IpamError::InvalidConfig(format!(
                "parent range {} cannot hold a /{} subnet",
                cidr, subnet_mask_bits
            )));
        }
        for (name, bits) in [
            ("public_subnet_mask_bits", public_subnet_mask_bits),
            ("private_subnet_mask_bits", private_subnet_mask_bits),
        ] {
            if let Some(bits) = bits {
                if bits <= subnet_mask_bits || bits > IPV4_BITS {
                    return Err(IpamError::InvalidConfig(format!(
                        "{} must be between {} and {}, got {}",
                        name,
                        subnet_mask_bits + 1,
                        IPV4_BITS,
                        bits
                    )));
                }
            }
        }

        Ok(NetworkRange {
            cidr,
            subnet_mask_bits,
            public_subnet_mask_bits,
            private_subnet_mask_bits,
        })
    }

    pub fn cidr(&self) -> Ipv4Net {
        self.cidr
    }

    /// Prefix length of every per-cluster subnet
    pub fn subnet_mask_bits(&self) -> u8 {
        self.subnet_mask_bits
    }

    pub fn public_subnet_mask_bits(&self) -> Option<u8> {
        self.public_subnet_mask_bits
    }

    pub fn private_subnet_mask_bits(&self) -> Option<u8> {
        self.private_subnet_mask_bits
    }

    /// Lowest cluster subnet of the range. Every cluster subnet has its size.
    pub fn first_subnet(&self) -> Result<Ipv4Net, IpamError> {
        Ipv4Net::new(self.cidr.network(), self.subnet_mask_bits).map_err(|_| {
            IpamError::InvalidConfig(format!("/{} is not a valid prefix", self.subnet_mask_bits))
        })
    }
}

/// Record that a cluster owns a subnet. One per cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetClaim {
    pub cluster_id: String,
    pub cidr: Ipv4Net,
    pub prefix_len: u8,
    /// When the claim was first written; informational only
    pub allocated_at: DateTime<Utc>,
}

impl SubnetClaim {
    pub fn new(cluster_id: &str, cidr: Ipv4Net) -> Self {
        SubnetClaim {
            cluster_id: cluster_id.to_string(),
            cidr,
            prefix_len: cidr.prefix_len(),
            allocated_at: Utc::now(),
        }
    }
}

/// A slice of a cluster subnet pinned to one availability zone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AzSubnet {
    pub zone: String,
    pub cidr: Ipv4Net,
}

/// Result of splitting a cluster subnet across zones.
///
/// `reserved` holds the blocks left over when the zone count is not a power
/// of two. They remain part of the cluster's claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneSplit {
    pub subnets: Vec<AzSubnet>,
    pub reserved: Vec<Ipv4Net>,
}

/// Public and private subnets inside one zone subnet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetTiers {
    pub public: Ipv4Net,
    pub private: Ipv4Net,
}

/// Everything downstream consumers need to know about one zone.
///
/// `public` and `private` are absent when the zone subnet is a single
/// address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneNetwork {
    pub zone: String,
    pub cidr: Ipv4Net,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public: Option<Ipv4Net>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private: Option<Ipv4Net>,
}

impl ZoneNetwork {
    pub fn new(subnet: AzSubnet, tiers: Option<SubnetTiers>) -> Self {
        ZoneNetwork {
            zone: subnet.zone,
            cidr: subnet.cidr,
            public: tiers.map(|tiers| tiers.public),
            private: tiers.map(|tiers| tiers.private),
        }
    }
}

/// Output of a successful create reconcile for one cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterNetwork {
    pub claim: SubnetClaim,
    pub zones: Vec<ZoneNetwork>,
    pub reserved: Vec<Ipv4Net>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(s: &str) -> Ipv4Net {
        s.parse().unwrap()
    }

    #[test]
    fn test_valid_range() {
        let range = NetworkRange::new(net("10.1.0.0/16"), 24, Some(26), Some(26)).unwrap();
        assert_eq!(range.cidr(), net("10.1.0.0/16"));
        assert_eq!(range.subnet_mask_bits(), 24);
        assert_eq!(range.public_subnet_mask_bits(), Some(26));
    }

    #[test]
    fn test_range_smaller_than_subnet() {
        let err = NetworkRange::new(net("10.1.0.0/24"), 16, None, None).unwrap_err();
        assert!(matches!(err, IpamError::InvalidConfig(_)));
    }

    #[test]
    fn test_tier_mask_must_be_narrower() {
        assert!(NetworkRange::new(net("10.1.0.0/16"), 24, Some(24), None).is_err());
        assert!(NetworkRange::new(net("10.1.0.0/16"), 24, None, Some(20)).is_err());
        assert!(NetworkRange::new(net("10.1.0.0/16"), 24, None, Some(33)).is_err());
    }

    #[test]
    fn test_range_rejects_host_bits() {
        let err = NetworkRange::new(net("10.1.2.0/16"), 24, None, None).unwrap_err();
        assert!(err.to_string().contains("10.1.0.0/16"));
    }

    #[test]
    fn test_claim_records_prefix() {
        let claim = SubnetClaim::new("alpha", net("10.1.4.0/24"));
        assert_eq!(claim.prefix_len, 24);
        assert_eq!(claim.cluster_id, "alpha");
    }
}
