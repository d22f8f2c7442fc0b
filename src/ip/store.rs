//! Claim storage.
//!
//! The allocator only needs four operations from whatever durably records
//! subnet claims. Two implementations live here: an in-memory map for tests
//! and single-shot runs, and a JSON document on disk that is replaced
//! atomically on every write.

use super::error::StoreError;
use super::types::SubnetClaim;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Durable record of which cluster owns which subnet
pub trait ClaimStore: Send + Sync {
    /// Every claim currently recorded
    fn list(&self) -> Result<Vec<SubnetClaim>, StoreError>;

    /// The claim of one cluster, if any
    fn get(&self, cluster_id: &str) -> Result<Option<SubnetClaim>, StoreError>;

    /// Record a claim, replacing any previous claim of the same cluster
    fn put(&self, claim: SubnetClaim) -> Result<(), StoreError>;

    /// Remove the claim of a cluster. Returns whether a claim was removed.
    fn delete(&self, cluster_id: &str) -> Result<bool, StoreError>;
}

/// Claims kept in process memory
#[derive(Debug, Default)]
pub struct MemoryClaimStore {
    claims: Mutex<BTreeMap<String, SubnetClaim>>,
}

impl MemoryClaimStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with pre-existing claims
    pub fn with_claims(claims: impl IntoIterator<Item = SubnetClaim>) -> Result<Self, StoreError> {
        let mut map = BTreeMap::new();
        for claim in claims {
            if map.contains_key(&claim.cluster_id) {
                return Err(StoreError::Duplicate {
                    cluster_id: claim.cluster_id,
                });
            }
            map.insert(claim.cluster_id.clone(), claim);
        }
        Ok(MemoryClaimStore {
            claims: Mutex::new(map),
        })
    }
}

impl ClaimStore for MemoryClaimStore {
    fn list(&self) -> Result<Vec<SubnetClaim>, StoreError> {
        let claims = self.claims.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(claims.values().cloned().collect())
    }

    fn get(&self, cluster_id: &str) -> Result<Option<SubnetClaim>, StoreError> {
        let claims = self.claims.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(claims.get(cluster_id).cloned())
    }

    fn put(&self, claim: SubnetClaim) -> Result<(), StoreError> {
        let mut claims = self.claims.lock().unwrap_or_else(PoisonError::into_inner);
        claims.insert(claim.cluster_id.clone(), claim);
        Ok(())
    }

    fn delete(&self, cluster_id: &str) -> Result<bool, StoreError> {
        let mut claims = self.claims.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(claims.remove(cluster_id).is_some())
    }
}

/// On-disk layout of the JSON claim store
#[derive(Debug, Default, Serialize, Deserialize)]
struct ClaimDocument {
    claims: Vec<SubnetClaim>,
}

/// Claims kept in a JSON file.
///
/// Each write goes to a sibling temporary file which is then renamed over the
/// document, so a crash leaves either the old or the new claim set on disk.
#[derive(Debug)]
pub struct JsonFileClaimStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process.
    write_guard: Mutex<()>,
}

impl JsonFileClaimStore {
    /// Open a store at `path`. The file is created on first write.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = JsonFileClaimStore {
            path: path.into(),
            write_guard: Mutex::new(()),
        };
        // Fail early on an unreadable or malformed document.
        let claims = store.load()?;
        log::info!("Opened claim store {:?} with {} claim(s)", store.path, claims.len());
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, SubnetClaim>, StoreError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(source) => return Err(self.io_error(source)),
        };
        let document: ClaimDocument =
            serde_json::from_reader(BufReader::new(file)).map_err(|source| StoreError::Serialization {
                path: self.path.clone(),
                source,
            })?;

        let mut claims = BTreeMap::new();
        for claim in document.claims {
            if claims.contains_key(&claim.cluster_id) {
                return Err(StoreError::Duplicate {
                    cluster_id: claim.cluster_id,
                });
            }
            claims.insert(claim.cluster_id.clone(), claim);
        }
        Ok(claims)
    }

    fn save(&self, claims: &BTreeMap<String, SubnetClaim>) -> Result<(), StoreError> {
        let document = ClaimDocument {
            claims: claims.values().cloned().collect(),
        };
        let tmp_path = self.path.with_extension("json.tmp");

        let file = File::create(&tmp_path).map_err(|source| self.io_error(source))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &document).map_err(|source| {
            StoreError::Serialization {
                path: tmp_path.clone(),
                source,
            }
        })?;
        writer.flush().map_err(|source| self.io_error(source))?;
        writer
            .get_ref()
            .sync_all()
            .map_err(|source| self.io_error(source))?;

        fs::rename(&tmp_path, &self.path).map_err(|source| self.io_error(source))
    }

    fn modify<T>(
        &self,
        change: impl FnOnce(&mut BTreeMap<String, SubnetClaim>) -> T,
    ) -> Result<T, StoreError> {
        let _guard = self.write_guard.lock().unwrap_or_else(PoisonError::into_inner);
        let mut claims = self.load()?;
        let result = change(&mut claims);
        self.save(&claims)?;
        Ok(result)
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl ClaimStore for JsonFileClaimStore {
    fn list(&self) -> Result<Vec<SubnetClaim>, StoreError> {
        Ok(self.load()?.into_values().collect())
    }

    fn get(&self, cluster_id: &str) -> Result<Option<SubnetClaim>, StoreError> {
        Ok(self.load()?.remove(cluster_id))
    }

    fn put(&self, claim: SubnetClaim) -> Result<(), StoreError> {
        self.modify(|claims| {
            claims.insert(claim.cluster_id.clone(), claim);
        })
    }

    fn delete(&self, cluster_id: &str) -> Result<bool, StoreError> {
        self.modify(|claims| claims.remove(cluster_id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn claim(id: &str, cidr: &str) -> SubnetClaim {
        SubnetClaim::new(id, cidr.parse().unwrap())
    }

    fn exercise(store: &dyn ClaimStore) {
        assert!(store.list().unwrap().is_empty());
        assert_eq!(store.get("alpha").unwrap(), None);

        let alpha = claim("alpha", "10.0.0.0/24");
        store.put(alpha.clone()).unwrap();
        store.put(claim("beta", "10.0.1.0/24")).unwrap();

        assert_eq!(store.get("alpha").unwrap(), Some(alpha));
        assert_eq!(store.list().unwrap().len(), 2);

        assert!(store.delete("alpha").unwrap());
        assert!(!store.delete("alpha").unwrap());
        assert_eq!(store.get("alpha").unwrap(), None);
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn test_memory_store_operations() {
        exercise(&MemoryClaimStore::new());
    }

    #[test]
    fn test_memory_store_rejects_duplicate_seed() {
        let result = MemoryClaimStore::with_claims(vec![
            claim("alpha", "10.0.0.0/24"),
            claim("alpha", "10.0.1.0/24"),
        ]);
        assert!(matches!(result, Err(StoreError::Duplicate { .. })));
    }

    #[test]
    fn test_file_store_operations() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileClaimStore::open(dir.path().join("claims.json")).unwrap();
        exercise(&store);
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("claims.json");

        let gamma = claim("gamma", "10.0.7.0/24");
        {
            let store = JsonFileClaimStore::open(&path).unwrap();
            store.put(gamma.clone()).unwrap();
        }

        let reopened = JsonFileClaimStore::open(&path).unwrap();
        assert_eq!(reopened.get("gamma").unwrap(), Some(gamma));
        assert!(!dir.path().join("claims.json.tmp").exists());
    }

    #[test]
    fn test_file_store_rejects_malformed_document() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("claims.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = JsonFileClaimStore::open(&path).unwrap_err();
        assert!(matches!(err, StoreError::Serialization { .. }));
    }
}
