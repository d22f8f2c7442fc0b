//! Input validation utilities.
//!
//! Checks applied to values that arrive from configuration or from the
//! controller before they reach the allocator or the claim store.

use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

/// Maximum length of a cluster id (a Kubernetes/DNS label)
pub const MAX_CLUSTER_ID_LEN: usize = 63;

fn cluster_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("cluster id pattern is a valid regex")
    })
}

/// Check that a cluster id is a lowercase DNS label
///
/// Cluster ids key claims in the store and end up in resource names
/// downstream, so they are held to the DNS label rules.
///
/// # Examples
/// ```
/// use cluster_ipam::utils::validation::is_valid_cluster_id;
///
/// assert!(is_valid_cluster_id("prod-eu-1"));
/// assert!(!is_valid_cluster_id("Prod_EU"));
/// assert!(!is_valid_cluster_id("-leading-dash"));
/// assert!(!is_valid_cluster_id(""));
/// ```
pub fn is_valid_cluster_id(cluster_id: &str) -> bool {
    cluster_id.len() <= MAX_CLUSTER_ID_LEN && cluster_id_pattern().is_match(cluster_id)
}

/// Validate a list of availability zone names
///
/// Checks for:
/// - At least one zone
/// - No blank names
/// - No duplicate names
///
/// # Returns
/// * `Ok(())` if validation succeeds
/// * `Err(String)` with an error message if validation fails
pub fn validate_zone_names(zones: &[String]) -> Result<(), String> {
    if zones.is_empty() {
        return Err("at least one availability zone is required".to_string());
    }

    let mut seen = HashSet::new();
    for zone in zones {
        if zone.trim().is_empty() {
            return Err("availability zone names cannot be blank".to_string());
        }
        if !seen.insert(zone.as_str()) {
            return Err(format!("availability zone '{}' is listed more than once", zone));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_id_length_limit() {
        let max = "a".repeat(MAX_CLUSTER_ID_LEN);
        assert!(is_valid_cluster_id(&max));
        assert!(!is_valid_cluster_id(&format!("{}a", max)));
    }

    #[test]
    fn test_cluster_id_characters() {
        assert!(is_valid_cluster_id("x7k2p"));
        assert!(is_valid_cluster_id("a"));
        assert!(!is_valid_cluster_id("trailing-"));
        assert!(!is_valid_cluster_id("has.dot"));
        assert!(!is_valid_cluster_id("has space"));
    }

    #[test]
    fn test_zone_names() {
        let zones = |names: &[&str]| names.iter().map(|n| n.to_string()).collect::<Vec<_>>();
        assert!(validate_zone_names(&zones(&["eu-central-1a", "eu-central-1b"])).is_ok());
        assert!(validate_zone_names(&[]).is_err());
        assert!(validate_zone_names(&zones(&["a", " "])).is_err());
        let err = validate_zone_names(&zones(&["a", "b", "a"])).unwrap_err();
        assert!(err.contains("'a'"));
    }
}
