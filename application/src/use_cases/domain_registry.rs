//! Domain Registry
//!
//! Holds the set of known domain handlers as a copy-on-write snapshot.
//! Snapshots are published through an `ArcSwap`, so readers never take a
//! lock and never wait on a writer; writers are serialized among themselves.

use arc_swap::ArcSwap;
use civic_domain::{DomainDescriptor, DomainError, DomainId, RegistrySnapshot, Signature};
use std::sync::{Arc, Mutex};
use tracing::info;

pub struct DomainRegistry {
    current: ArcSwap<RegistrySnapshot>,
    writer: Mutex<()>,
}

impl Default for DomainRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DomainRegistry {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(RegistrySnapshot::empty()),
            writer: Mutex::new(()),
        }
    }

    /// Registry pre-loaded with `descriptors`, in order.
    pub fn with_domains(
        descriptors: impl IntoIterator<Item = DomainDescriptor>,
    ) -> Result<Self, DomainError> {
        let snapshot = RegistrySnapshot::from_descriptors(descriptors)?;
        Ok(Self {
            current: ArcSwap::from_pointee(snapshot),
            writer: Mutex::new(()),
        })
    }

    /// The current snapshot. Holding it pins that version for as long as
    /// the caller needs it.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.current.load_full()
    }

    /// Build the next snapshot from the current one and publish it.
    fn update(
        &self,
        change: impl FnOnce(&RegistrySnapshot) -> Result<RegistrySnapshot, DomainError>,
    ) -> Result<Arc<RegistrySnapshot>, DomainError> {
        let _writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let current = self.current.load_full();
        let next = Arc::new(change(&current)?);
        self.current.store(Arc::clone(&next));
        Ok(next)
    }

    pub fn register(&self, descriptor: DomainDescriptor) -> Result<(), DomainError> {
        let id = descriptor.id.clone();
        let snapshot = self.update(|current| current.with_registered(descriptor))?;
        info!(domain = %id, version = snapshot.version(), "Registered domain");
        Ok(())
    }

    pub fn deregister(&self, id: &DomainId) -> Result<(), DomainError> {
        let snapshot = self.update(|current| current.without(id))?;
        info!(domain = %id, version = snapshot.version(), "Deregistered domain");
        Ok(())
    }

    /// Replace a domain's signature (explicit re-registration).
    pub fn update_signature(&self, id: &DomainId, signature: Signature) -> Result<(), DomainError> {
        let snapshot = self.update(|current| current.with_signature(id, signature))?;
        info!(domain = %id, version = snapshot.version(), "Updated domain signature");
        Ok(())
    }

    pub fn lookup(&self, id: &DomainId) -> Result<DomainDescriptor, DomainError> {
        self.snapshot().lookup(id).cloned()
    }

    /// A stable copy of every descriptor in registration order.
    pub fn all(&self) -> Vec<DomainDescriptor> {
        self.snapshot().all().to_vec()
    }
}
