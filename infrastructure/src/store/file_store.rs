//! File-backed workflow store
//!
//! Layout under the state directory:
//!
//! ```text
//! instances/<instance_id>.json   one pretty-printed WorkflowInstance
//! leases/<instance_id>.json      current Lease, removed on release
//! locks/<instance_id>.lock       short-lived mutex for read-modify-write
//! ```
//!
//! Writes go to a temporary sibling and are renamed into place, so a reader
//! never sees a torn instance. Every compare-and-swap runs under the
//! per-instance lock file, which works across processes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use civic_application::ports::workflow_store::{Lease, StoreError, WorkflowStore, lease_expiry};
use civic_domain::{InstanceId, WorkflowInstance};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, warn};

/// Give up waiting for a lock after this long
const LOCK_TIMEOUT: Duration = Duration::from_secs(5);
/// A lock file older than this was left by a crashed process
const LOCK_STALE_AFTER: Duration = Duration::from_secs(30);
const LOCK_POLL: Duration = Duration::from_millis(5);

#[derive(Debug, Clone)]
pub struct FileWorkflowStore {
    root: PathBuf,
}

fn io_error(path: &Path, e: std::io::Error) -> StoreError {
    StoreError::Io(format!("{}: {}", path.display(), e))
}

/// Instance ids become file names; anything else cannot have been stored.
fn file_stem(id: &InstanceId) -> Result<&str, StoreError> {
    let s = id.as_str();
    let valid = !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(s)
    } else {
        Err(StoreError::NotFound(id.clone()))
    }
}

fn atomic_write(path: &Path, content: &[u8]) -> Result<(), StoreError> {
    let parent = path
        .parent()
        .ok_or_else(|| StoreError::Io(format!("{}: path has no parent", path.display())))?;
    let tmp_path = parent.join(format!(
        ".{}.tmp-{}-{}",
        path.file_name().and_then(|v| v.to_str()).unwrap_or("state"),
        std::process::id(),
        uuid::Uuid::new_v4().simple()
    ));

    let written = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&tmp_path)
        .and_then(|mut file| {
            file.write_all(content)?;
            file.sync_all()
        })
        .and_then(|()| fs::rename(&tmp_path, path));
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp_path);
        return Err(io_error(path, e));
    }
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    match fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StoreError::Serialization(format!("{}: {}", path.display(), e))),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(io_error(path, e)),
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let bytes =
        serde_json::to_vec_pretty(value).map_err(|e| StoreError::Serialization(e.to_string()))?;
    atomic_write(path, &bytes)
}

/// Removes the lock file on drop.
struct LockGuard {
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Could not remove lock {}: {}", self.path.display(), e);
        }
    }
}

fn is_stale(path: &Path) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age > LOCK_STALE_AFTER)
}

/// Move a stale lock aside under a unique name before deleting it. Two
/// processes that both judged the lock stale cannot then delete the fresh
/// lock one of them just created: whoever renames second finds a fresh file
/// and puts it back.
fn break_stale_lock(path: &Path) -> Result<bool, StoreError> {
    let aside = path.with_extension(format!("lock.stale-{}", uuid::Uuid::new_v4().simple()));
    match fs::rename(path, &aside) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(io_error(path, e)),
    }
    if is_stale(&aside) {
        warn!("Broke stale lock {}", path.display());
        let _ = fs::remove_file(&aside);
        return Ok(true);
    }
    // hard_link never replaces a lock taken since
    if let Err(e) = fs::hard_link(&aside, path) {
        debug!("Lock {} was re-taken: {}", path.display(), e);
    }
    let _ = fs::remove_file(&aside);
    Ok(false)
}

impl FileWorkflowStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        for dir in ["instances", "leases", "locks"] {
            let path = root.join(dir);
            fs::create_dir_all(&path).map_err(|e| io_error(&path, e))?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn instance_path(&self, stem: &str) -> PathBuf {
        self.root.join("instances").join(format!("{}.json", stem))
    }

    fn lease_path(&self, stem: &str) -> PathBuf {
        self.root.join("leases").join(format!("{}.json", stem))
    }

    fn lock(&self, stem: &str) -> Result<LockGuard, StoreError> {
        let path = self.root.join("locks").join(format!("{}.lock", stem));
        let started = Instant::now();
        loop {
            match fs::OpenOptions::new().create_new(true).write(true).open(&path) {
                Ok(mut file) => {
                    let _ = file.write_all(std::process::id().to_string().as_bytes());
                    return Ok(LockGuard { path });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if is_stale(&path) {
                        break_stale_lock(&path)?;
                        continue;
                    }
                    if started.elapsed() > LOCK_TIMEOUT {
                        return Err(StoreError::Io(format!(
                            "{}: timed out waiting for lock",
                            path.display()
                        )));
                    }
                    std::thread::sleep(LOCK_POLL);
                }
                Err(e) => return Err(io_error(&path, e)),
            }
        }
    }

    fn load_sync(&self, id: &InstanceId) -> Result<WorkflowInstance, StoreError> {
        let stem = file_stem(id)?;
        read_json(&self.instance_path(stem))?.ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    fn create_sync(&self, instance: &WorkflowInstance) -> Result<u64, StoreError> {
        let stem = file_stem(&instance.instance_id).map_err(|_| {
            StoreError::Io(format!("invalid instance id: {}", instance.instance_id))
        })?;
        let _lock = self.lock(stem)?;
        let path = self.instance_path(stem);
        if let Some(existing) = read_json::<WorkflowInstance>(&path)? {
            return Err(StoreError::Conflict {
                instance_id: instance.instance_id.clone(),
                expected: 0,
                actual: existing.revision,
            });
        }
        let mut stored = instance.clone();
        stored.revision = 1;
        write_json(&path, &stored)?;
        Ok(1)
    }

    fn save_sync(&self, instance: &WorkflowInstance) -> Result<u64, StoreError> {
        let stem = file_stem(&instance.instance_id)?;
        let _lock = self.lock(stem)?;
        let path = self.instance_path(stem);
        let current = read_json::<WorkflowInstance>(&path)?
            .ok_or_else(|| StoreError::NotFound(instance.instance_id.clone()))?;
        if current.revision != instance.revision {
            return Err(StoreError::Conflict {
                instance_id: instance.instance_id.clone(),
                expected: instance.revision,
                actual: current.revision,
            });
        }
        let mut next = instance.clone();
        next.revision = instance.revision + 1;
        write_json(&path, &next)?;
        Ok(next.revision)
    }

    fn list_sync(&self) -> Result<Vec<WorkflowInstance>, StoreError> {
        let dir = self.root.join("instances");
        let entries = fs::read_dir(&dir).map_err(|e| io_error(&dir, e))?;
        let mut all = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_json::<WorkflowInstance>(&path) {
                Ok(Some(instance)) => all.push(instance),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Skipping unreadable workflow instance"),
            }
        }
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(all)
    }

    fn acquire_lease_sync(
        &self,
        id: &InstanceId,
        owner: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Lease, StoreError> {
        let stem = file_stem(id)?;
        let _lock = self.lock(stem)?;
        if !self.instance_path(stem).exists() {
            return Err(StoreError::NotFound(id.clone()));
        }
        let path = self.lease_path(stem);
        if let Some(current) = read_json::<Lease>(&path)? {
            current.check_acquire(owner, now)?;
        }
        let lease = Lease {
            instance_id: id.clone(),
            owner: owner.to_string(),
            expires_at: lease_expiry(now, ttl),
        };
        write_json(&path, &lease)?;
        debug!(instance_id = %id, owner = %owner, expires_at = %lease.expires_at, "Lease acquired");
        Ok(lease)
    }

    fn release_lease_sync(&self, id: &InstanceId, owner: &str) -> Result<(), StoreError> {
        let stem = file_stem(id)?;
        let _lock = self.lock(stem)?;
        let path = self.lease_path(stem);
        if let Some(current) = read_json::<Lease>(&path)? {
            if current.owner == owner {
                fs::remove_file(&path).map_err(|e| io_error(&path, e))?;
            }
        }
        Ok(())
    }

    /// Current lease on an instance, if any.
    pub fn lease(&self, id: &InstanceId) -> Result<Option<Lease>, StoreError> {
        read_json(&self.lease_path(file_stem(id)?))
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(FileWorkflowStore) -> Result<T, StoreError> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || f(store))
            .await
            .map_err(|e| StoreError::Io(format!("store task failed: {}", e)))?
    }
}

#[async_trait]
impl WorkflowStore for FileWorkflowStore {
    async fn create(&self, instance: &WorkflowInstance) -> Result<u64, StoreError> {
        let instance = instance.clone();
        self.blocking(move |store| store.create_sync(&instance)).await
    }

    async fn load(&self, instance_id: &InstanceId) -> Result<WorkflowInstance, StoreError> {
        let id = instance_id.clone();
        self.blocking(move |store| store.load_sync(&id)).await
    }

    async fn save(&self, instance: &WorkflowInstance) -> Result<u64, StoreError> {
        let instance = instance.clone();
        self.blocking(move |store| store.save_sync(&instance)).await
    }

    async fn list(&self) -> Result<Vec<WorkflowInstance>, StoreError> {
        self.blocking(|store| store.list_sync()).await
    }

    async fn acquire_lease(
        &self,
        instance_id: &InstanceId,
        owner: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Lease, StoreError> {
        let id = instance_id.clone();
        let owner = owner.to_string();
        self.blocking(move |store| store.acquire_lease_sync(&id, &owner, ttl, now))
            .await
    }

    async fn release_lease(&self, instance_id: &InstanceId, owner: &str) -> Result<(), StoreError> {
        let id = instance_id.clone();
        let owner = owner.to_string();
        self.blocking(move |store| store.release_lease_sync(&id, &owner))
            .await
    }
}
