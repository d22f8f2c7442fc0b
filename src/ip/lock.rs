//! Allocation locks.
//!
//! Allocation is read-all-claims, pick a gap, write one claim. Two callers
//! interleaving those steps could pick the same gap, so the whole sequence
//! runs inside [`AllocationLock::with_lock`]. The lock is released on every
//! exit path, panics included, because release happens in a guard's `Drop`.

use super::error::{IpamError, StoreError};
use chrono::{DateTime, Utc};
use fs2::{lock_contended_error, FileExt};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// Exclusive section around the claim decision
pub trait AllocationLock: Send + Sync {
    /// Run `critical` while holding the lock and return its result
    fn with_lock<T, F>(&self, critical: F) -> Result<T, IpamError>
    where
        F: FnOnce() -> Result<T, IpamError>;
}

/// In-process lock for single-instance deployments
#[derive(Debug, Default)]
pub struct MutexLock {
    inner: Mutex<()>,
}

impl MutexLock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AllocationLock for MutexLock {
    fn with_lock<T, F>(&self, critical: F) -> Result<T, IpamError>
    where
        F: FnOnce() -> Result<T, IpamError>,
    {
        // A panic in a previous holder leaves no partial state behind (the
        // claim store is the only state), so poisoning is ignored.
        let _guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        critical()
    }
}

/// Timing parameters for a [`LeaseLock`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseSettings {
    /// How long a holder expects to keep the lease. Holding it longer is
    /// reported, by the holder on release and by waiters while they wait.
    pub ttl: Duration,
    /// How long to wait for a contended lease before giving up
    pub timeout: Duration,
    /// Base delay between acquisition attempts
    pub retry_interval: Duration,
}

impl Default for LeaseSettings {
    fn default() -> Self {
        LeaseSettings {
            ttl: Duration::from_secs(30),
            timeout: Duration::from_secs(10),
            retry_interval: Duration::from_millis(100),
        }
    }
}

/// Contents of the lease file while it is held
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct LeaseRecord {
    holder: String,
    token: u64,
    acquired_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

/// Lease on a file shared by every operator instance.
///
/// Exclusion is an OS advisory lock on the lease file, held for as long as
/// the holder keeps the file open. A holder that dies loses its lock with its
/// process, so there is no stale lease to break: the next contender locks the
/// file and overwrites whatever record was left behind. The file itself is
/// never removed because a waiter may already have it open.
#[derive(Debug)]
pub struct LeaseLock {
    path: PathBuf,
    holder: String,
    settings: LeaseSettings,
    // Threads of this process queue here instead of polling the file.
    local: Mutex<()>,
}

impl LeaseLock {
    pub fn new(path: impl Into<PathBuf>, holder: impl Into<String>, settings: LeaseSettings) -> Self {
        LeaseLock {
            path: path.into(),
            holder: holder.into(),
            settings,
            local: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn acquire(&self) -> Result<LeaseGuard<'_>, IpamError> {
        let started = Instant::now();
        let mut attempts = 0u32;
        let mut overdue_reported = false;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|source| self.io_error(source))?;

        loop {
            attempts += 1;
            match file.try_lock_exclusive() {
                Ok(()) => {
                    let mut guard = LeaseGuard {
                        lock: self,
                        file,
                        acquired: Instant::now(),
                    };
                    guard.write_record()?;
                    if attempts > 1 {
                        log::debug!(
                            "Acquired allocation lease {:?} after {} attempts",
                            self.path,
                            attempts
                        );
                    }
                    return Ok(guard);
                }
                Err(e) if is_contended(&e) => {
                    if !overdue_reported {
                        overdue_reported = self.report_overdue_holder();
                    }
                    let waited = started.elapsed();
                    if waited >= self.settings.timeout {
                        return Err(IpamError::LockTimeout {
                            path: self.path.clone(),
                            waited,
                        });
                    }
                    thread::sleep(self.backoff());
                }
                Err(source) => return Err(self.io_error(source)),
            }
        }
    }

    /// Warn about a holder that has kept the lease past its expiry. Returns
    /// whether a warning was logged.
    fn report_overdue_holder(&self) -> bool {
        // The holder may be mid-write; an unreadable record says nothing.
        match read_record_at(&self.path) {
            Ok(record) if record.expires_at < Utc::now() => {
                log::warn!(
                    "Allocation lease {:?} held by {} since {} is past its expiry {}",
                    self.path,
                    record.holder,
                    record.acquired_at,
                    record.expires_at
                );
                true
            }
            _ => false,
        }
    }

    fn backoff(&self) -> Duration {
        let base = self.settings.retry_interval;
        let jitter_ms = (base.as_millis() as u64 / 2).max(1);
        base + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }

    fn expiry_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        chrono::Duration::from_std(self.settings.ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    fn io_error(&self, source: std::io::Error) -> IpamError {
        IpamError::Store(StoreError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

fn is_contended(e: &std::io::Error) -> bool {
    e.kind() == ErrorKind::WouldBlock || e.raw_os_error() == lock_contended_error().raw_os_error()
}

fn read_record_at(path: &Path) -> std::io::Result<LeaseRecord> {
    let body = fs::read(path)?;
    serde_json::from_slice(&body).map_err(|e| std::io::Error::new(ErrorKind::InvalidData, e))
}

impl AllocationLock for LeaseLock {
    fn with_lock<T, F>(&self, critical: F) -> Result<T, IpamError>
    where
        F: FnOnce() -> Result<T, IpamError>,
    {
        let _local = self.local.lock().unwrap_or_else(PoisonError::into_inner);
        let _lease = self.acquire()?;
        critical()
    }
}

/// Lock chosen at startup from configuration
#[derive(Debug)]
pub enum ConfiguredLock {
    Local(MutexLock),
    Lease(LeaseLock),
}

impl AllocationLock for ConfiguredLock {
    fn with_lock<T, F>(&self, critical: F) -> Result<T, IpamError>
    where
        F: FnOnce() -> Result<T, IpamError>,
    {
        match self {
            ConfiguredLock::Local(lock) => lock.with_lock(critical),
            ConfiguredLock::Lease(lock) => lock.with_lock(critical),
        }
    }
}

/// A locked lease file. Clears the record and unlocks on drop.
struct LeaseGuard<'a> {
    lock: &'a LeaseLock,
    file: File,
    acquired: Instant,
}

impl LeaseGuard<'_> {
    fn write_record(&mut self) -> Result<(), IpamError> {
        let lock = self.lock;
        let mut previous = Vec::new();
        self.file
            .read_to_end(&mut previous)
            .map_err(|source| lock.io_error(source))?;
        if !previous.is_empty() {
            match serde_json::from_slice::<LeaseRecord>(&previous) {
                Ok(record) => log::warn!(
                    "Taking over allocation lease {:?} left behind by {} (acquired {})",
                    lock.path,
                    record.holder,
                    record.acquired_at
                ),
                Err(_) => log::warn!("Overwriting unreadable allocation lease {:?}", lock.path),
            }
        }

        let now = Utc::now();
        let record = LeaseRecord {
            holder: lock.holder.clone(),
            token: rand::random(),
            acquired_at: now,
            expires_at: lock.expiry_from(now),
        };
        let body = serde_json::to_vec(&record).map_err(|source| {
            IpamError::Store(StoreError::Serialization {
                path: lock.path.clone(),
                source,
            })
        })?;
        self.file
            .set_len(0)
            .and_then(|_| self.file.seek(SeekFrom::Start(0)))
            .and_then(|_| self.file.write_all(&body))
            .and_then(|_| self.file.sync_all())
            .map_err(|source| lock.io_error(source))
    }
}

impl Drop for LeaseGuard<'_> {
    fn drop(&mut self) {
        let held = self.acquired.elapsed();
        if held > self.lock.settings.ttl {
            log::warn!(
                "Allocation lease {:?} was held for {:?}, longer than its {:?} ttl",
                self.lock.path,
                held,
                self.lock.settings.ttl
            );
        }
        // Clear before unlocking so the next holder never sees our record.
        if let Err(e) = self.file.set_len(0) {
            log::warn!("Failed to clear allocation lease {:?}: {}", self.lock.path, e);
        }
        // Closing the file releases the lock as well.
        if let Err(e) = FileExt::unlock(&self.file) {
            log::warn!("Failed to unlock allocation lease {:?}: {}", self.lock.path, e);
        }
    }
}
