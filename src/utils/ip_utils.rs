//! CIDR helper functions shared by the allocator and the zone splitter.
//!
//! Address arithmetic is done in `u64` so that the end of `0.0.0.0/0`
//! (2^32) stays representable.

use ipnet::Ipv4Net;
use std::net::Ipv4Addr;

/// Width of an IPv4 address in bits
pub const IPV4_BITS: u8 = 32;

/// Parse a CIDR string, rejecting addresses with host bits set
///
/// # Examples
/// ```
/// use cluster_ipam::utils::ip_utils::parse_ipv4_cidr;
///
/// assert!(parse_ipv4_cidr("10.0.0.0/16").is_ok());
/// assert!(parse_ipv4_cidr("10.0.1.0/16").is_err());
/// assert!(parse_ipv4_cidr("not-a-cidr").is_err());
/// ```
pub fn parse_ipv4_cidr(value: &str) -> Result<Ipv4Net, String> {
    let net: Ipv4Net = value
        .trim()
        .parse()
        .map_err(|_| format!("'{}' is not an IPv4 CIDR", value))?;
    if !is_canonical(&net) {
        return Err(format!(
            "'{}' has host bits set (network address is {})",
            value,
            net.trunc()
        ));
    }
    Ok(net)
}

/// Check that the address of a CIDR is its network address
pub fn is_canonical(net: &Ipv4Net) -> bool {
    net.addr() == net.network()
}

/// Number of addresses in a block of the given prefix length
pub fn block_size(prefix_len: u8) -> u64 {
    1u64 << (IPV4_BITS - prefix_len)
}

/// Start (inclusive) and end (exclusive) of a CIDR as integers
pub fn bounds(net: &Ipv4Net) -> (u64, u64) {
    let start = u64::from(u32::from(net.network()));
    (start, start + block_size(net.prefix_len()))
}

/// Build the block of `prefix_len` bits starting at `start`.
///
/// Returns `None` when the prefix is longer than 32 bits or `start` lies
/// outside the IPv4 space. `start` must be aligned to the block size.
pub fn block_at(start: u64, prefix_len: u8) -> Option<Ipv4Net> {
    debug_assert!(prefix_len > IPV4_BITS || start % block_size(prefix_len) == 0);
    let addr = u32::try_from(start).ok()?;
    Ipv4Net::new(Ipv4Addr::from(addr), prefix_len).ok()
}

/// Whether two CIDRs share at least one address
pub fn overlaps(a: &Ipv4Net, b: &Ipv4Net) -> bool {
    a.contains(b) || b.contains(a)
}

/// Round `value` up to the next multiple of `alignment` (a power of two)
pub fn align_up(value: u64, alignment: u64) -> u64 {
    (value + alignment - 1) & !(alignment - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(s: &str) -> Ipv4Net {
        s.parse().unwrap()
    }

    #[test]
    fn test_bounds_of_whole_space() {
        assert_eq!(bounds(&net("0.0.0.0/0")), (0, 1u64 << 32));
        assert_eq!(bounds(&net("10.0.0.0/24")), (0x0a00_0000, 0x0a00_0100));
    }

    #[test]
    fn test_overlap_is_symmetric_and_nested() {
        assert!(overlaps(&net("10.0.0.0/16"), &net("10.0.3.0/24")));
        assert!(overlaps(&net("10.0.3.0/24"), &net("10.0.0.0/16")));
        assert!(!overlaps(&net("10.0.0.0/24"), &net("10.0.1.0/24")));
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 256), 0);
        assert_eq!(align_up(1, 256), 256);
        assert_eq!(align_up(512, 256), 512);
    }

    #[test]
    fn test_block_at() {
        assert_eq!(block_at(0x0a00_0100, 24), Some(net("10.0.1.0/24")));
        assert_eq!(block_at(0xffff_ffff, 32), Some(net("255.255.255.255/32")));
        assert_eq!(block_at(1u64 << 32, 24), None);
        assert_eq!(block_at(0, 33), None);
    }
}
