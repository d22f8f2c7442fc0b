use crate::config::Config;
use crate::ip::{ConfiguredLock, JsonFileClaimStore};
use crate::reconcile::ReconciliationAdapter;
use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use log::info;
use std::fs::File;
use std::path::Path;

/// Adapter wired up from configuration
pub type ConfiguredAdapter = ReconciliationAdapter<JsonFileClaimStore, ConfiguredLock>;

/// Load and parse configuration from a YAML file
pub fn load_config(config_path: &Path) -> Result<Config> {
    info!("Loading configuration from: {:?}", config_path);

    let file = File::open(config_path)
        .wrap_err_with(|| format!("Failed to open configuration '{}'", config_path.display()))?;

    let config: Config = serde_yaml::from_reader(file)
        .wrap_err_with(|| format!("Failed to parse configuration '{}'", config_path.display()))?;

    config.validate()?;

    info!(
        "Network {} split into /{} cluster subnets across {} zone(s)",
        config.network.cidr,
        config.network.subnet_mask_bits,
        config.network.availability_zones.len()
    );

    Ok(config)
}

/// Open the claim store and lock named by the configuration and wire them
/// into a reconciliation adapter
pub fn build_adapter(config: &Config) -> Result<ConfiguredAdapter> {
    let range = config.network_range()?;
    let store = JsonFileClaimStore::open(&config.store.path)
        .wrap_err_with(|| format!("Failed to open claim store '{}'", config.store.path.display()))?;
    let lock = config.lock.build()?;
    info!("Using {:?} allocation lock", config.lock.kind);

    Ok(ReconciliationAdapter::new(range, store, lock))
}
