//! Shared utilities: CIDR arithmetic and input validation.

pub mod ip_utils;
pub mod validation;

pub use ip_utils::{overlaps, parse_ipv4_cidr};
pub use validation::{is_valid_cluster_id, validate_zone_names};
