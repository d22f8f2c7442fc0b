use crate::ip::{split, ConfiguredLock, IpamError, LeaseLock, LeaseSettings, MutexLock, NetworkRange};
use crate::utils::ip_utils::parse_ipv4_cidr;
use crate::utils::validation::validate_zone_names;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration structure that mirrors the YAML configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Parent range, subnet sizes and availability zones
    pub network: NetworkConfig,
    /// Where claims are persisted
    #[serde(default)]
    pub store: StoreConfig,
    /// How concurrent allocations are serialized
    #[serde(default)]
    pub lock: LockConfig,
}

/// Network range configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Parent CIDR all cluster subnets are carved from (e.g. "10.1.0.0/16")
    pub cidr: String,
    /// Prefix length of each cluster subnet
    pub subnet_mask_bits: u8,
    /// (Optional) Prefix length of the public subnet in each zone
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_subnet_mask_bits: Option<u8>,
    /// (Optional) Prefix length of the private subnet in each zone
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_subnet_mask_bits: Option<u8>,
    /// Default availability zones for new clusters
    pub availability_zones: Vec<String>,
}

/// Claim store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path of the JSON claim document (default: "claims.json")
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            path: PathBuf::from("claims.json"),
        }
    }
}

/// Lock implementations selectable from configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LockKind {
    /// In-process mutex; only one operator instance may run
    #[default]
    Memory,
    /// Lease file on storage shared by all operator instances
    Lease,
}

/// Allocation lock configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    #[serde(default)]
    pub kind: LockKind,
    /// Lease file path (required for the lease lock)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// (Optional) Holder name written into the lease (default: host and pid)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub holder: Option<String>,
    #[serde(default = "default_ttl", with = "humantime_serde")]
    pub ttl: Duration,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(default = "default_retry_interval", with = "humantime_serde")]
    pub retry_interval: Duration,
}

fn default_ttl() -> Duration {
    LeaseSettings::default().ttl
}

fn default_timeout() -> Duration {
    LeaseSettings::default().timeout
}

fn default_retry_interval() -> Duration {
    LeaseSettings::default().retry_interval
}

impl Default for LockConfig {
    fn default() -> Self {
        LockConfig {
            kind: LockKind::Memory,
            path: None,
            holder: None,
            ttl: default_ttl(),
            timeout: default_timeout(),
            retry_interval: default_retry_interval(),
        }
    }
}

impl LockConfig {
    pub fn settings(&self) -> LeaseSettings {
        LeaseSettings {
            ttl: self.ttl,
            timeout: self.timeout,
            retry_interval: self.retry_interval,
        }
    }

    /// Build the configured lock
    pub fn build(&self) -> Result<ConfiguredLock, ValidationError> {
        match self.kind {
            LockKind::Memory => Ok(ConfiguredLock::Local(MutexLock::new())),
            LockKind::Lease => {
                let path = self.path.clone().ok_or_else(|| {
                    ValidationError::InvalidLock("lease lock requires a path".to_string())
                })?;
                let holder = self.holder.clone().unwrap_or_else(default_holder);
                Ok(ConfiguredLock::Lease(LeaseLock::new(path, holder, self.settings())))
            }
        }
    }
}

fn default_holder() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
    format!("{}-{}", host, std::process::id())
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        let range = self.network_range()?;
        validate_zone_names(&self.network.availability_zones).map_err(ValidationError::InvalidNetwork)?;
        range
            .first_subnet()
            .and_then(|subnet| split(subnet, &self.network.availability_zones))
            .map_err(|e| ValidationError::InvalidNetwork(e.to_string()))?;

        if self.store.path.as_os_str().is_empty() {
            return Err(ValidationError::InvalidStore(
                "store path cannot be empty".to_string(),
            ));
        }

        if self.lock.kind == LockKind::Lease {
            match &self.lock.path {
                None => {
                    return Err(ValidationError::InvalidLock(
                        "lease lock requires a path".to_string(),
                    ))
                }
                Some(path) if *path == self.store.path => {
                    return Err(ValidationError::InvalidLock(
                        "lease path must differ from the store path".to_string(),
                    ))
                }
                Some(_) => {}
            }
            for (name, value) in [
                ("ttl", self.lock.ttl),
                ("timeout", self.lock.timeout),
                ("retry_interval", self.lock.retry_interval),
            ] {
                if value.is_zero() {
                    return Err(ValidationError::InvalidLock(format!("{} must be non-zero", name)));
                }
            }
        }

        Ok(())
    }

    /// Parse the network section into a validated range
    pub fn network_range(&self) -> Result<NetworkRange, ValidationError> {
        let cidr = parse_ipv4_cidr(&self.network.cidr).map_err(ValidationError::InvalidNetwork)?;
        NetworkRange::new(
            cidr,
            self.network.subnet_mask_bits,
            self.network.public_subnet_mask_bits,
            self.network.private_subnet_mask_bits,
        )
        .map_err(|e| match e {
            IpamError::InvalidConfig(message) => ValidationError::InvalidNetwork(message),
            other => ValidationError::InvalidNetwork(other.to_string()),
        })
    }
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid network configuration: {0}")]
    InvalidNetwork(String),
    #[error("Invalid store configuration: {0}")]
    InvalidStore(String),
    #[error("Invalid lock configuration: {0}")]
    InvalidLock(String),
}
