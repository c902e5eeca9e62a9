//! Workflow store port
//!
//! The store is the single source of truth for workflow instances. Two
//! guarantees make crash recovery possible:
//!
//! - `save` is atomic per instance and rejects stale writes: the caller
//!   passes the revision it loaded, and the save fails with
//!   [`StoreError::Conflict`] if someone else saved in between.
//! - leases give one worker at a time the right to drive an instance; an
//!   expired lease can be taken over.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use civic_domain::{InstanceId, WorkflowInstance};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Workflow instance not found: {0}")]
    NotFound(InstanceId),

    #[error("Revision conflict on {instance_id}: expected {expected}, found {actual}")]
    Conflict {
        instance_id: InstanceId,
        expected: u64,
        actual: u64,
    },

    #[error("Lease on {instance_id} held by {owner} until {expires_at}")]
    LeaseHeld {
        instance_id: InstanceId,
        owner: String,
        expires_at: DateTime<Utc>,
    },

    #[error("Store I/O error: {0}")]
    Io(String),

    #[error("Store serialization error: {0}")]
    Serialization(String),
}

/// Time-bounded ownership of an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub instance_id: InstanceId,
    pub owner: String,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Decide whether `owner` may take this lease at `now`.
    pub fn check_acquire(&self, owner: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        if self.owner == owner || self.is_expired(now) {
            Ok(())
        } else {
            Err(StoreError::LeaseHeld {
                instance_id: self.instance_id.clone(),
                owner: self.owner.clone(),
                expires_at: self.expires_at,
            })
        }
    }
}

pub fn lease_expiry(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    now + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(60))
}

#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Persist a new instance; returns the stored revision (1).
    async fn create(&self, instance: &WorkflowInstance) -> Result<u64, StoreError>;

    async fn load(&self, instance_id: &InstanceId) -> Result<WorkflowInstance, StoreError>;

    /// Atomically replace the stored instance if its revision still equals
    /// `instance.revision`. Returns the new revision.
    async fn save(&self, instance: &WorkflowInstance) -> Result<u64, StoreError>;

    /// Every stored instance, terminal or not.
    async fn list(&self) -> Result<Vec<WorkflowInstance>, StoreError>;

    /// Take or extend the lease. The same owner always succeeds; another
    /// owner only once the current lease has expired.
    async fn acquire_lease(
        &self,
        instance_id: &InstanceId,
        owner: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Lease, StoreError>;

    /// Release a lease held by `owner`. Releasing someone else's lease is a no-op.
    async fn release_lease(&self, instance_id: &InstanceId, owner: &str) -> Result<(), StoreError>;
}

/// Process-local store for tests and `--dry-run`.
#[derive(Default)]
pub struct InMemoryWorkflowStore {
    instances: DashMap<InstanceId, WorkflowInstance>,
    leases: DashMap<InstanceId, Lease>,
}

impl InMemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lease(&self, instance_id: &InstanceId) -> Option<Lease> {
        self.leases.get(instance_id).map(|l| l.clone())
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn create(&self, instance: &WorkflowInstance) -> Result<u64, StoreError> {
        match self.instances.entry(instance.instance_id.clone()) {
            Entry::Occupied(existing) => Err(StoreError::Conflict {
                instance_id: instance.instance_id.clone(),
                expected: 0,
                actual: existing.get().revision,
            }),
            Entry::Vacant(slot) => {
                let mut stored = instance.clone();
                stored.revision = 1;
                slot.insert(stored);
                Ok(1)
            }
        }
    }

    async fn load(&self, instance_id: &InstanceId) -> Result<WorkflowInstance, StoreError> {
        self.instances
            .get(instance_id)
            .map(|i| i.clone())
            .ok_or_else(|| StoreError::NotFound(instance_id.clone()))
    }

    async fn save(&self, instance: &WorkflowInstance) -> Result<u64, StoreError> {
        let mut stored = self
            .instances
            .get_mut(&instance.instance_id)
            .ok_or_else(|| StoreError::NotFound(instance.instance_id.clone()))?;
        if stored.revision != instance.revision {
            return Err(StoreError::Conflict {
                instance_id: instance.instance_id.clone(),
                expected: instance.revision,
                actual: stored.revision,
            });
        }
        let mut next = instance.clone();
        next.revision = instance.revision + 1;
        *stored = next;
        Ok(instance.revision + 1)
    }

    async fn list(&self) -> Result<Vec<WorkflowInstance>, StoreError> {
        let mut all: Vec<WorkflowInstance> = self.instances.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(all)
    }

    async fn acquire_lease(
        &self,
        instance_id: &InstanceId,
        owner: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Lease, StoreError> {
        if !self.instances.contains_key(instance_id) {
            return Err(StoreError::NotFound(instance_id.clone()));
        }
        let lease = Lease {
            instance_id: instance_id.clone(),
            owner: owner.to_string(),
            expires_at: lease_expiry(now, ttl),
        };
        match self.leases.entry(instance_id.clone()) {
            Entry::Occupied(mut current) => {
                current.get().check_acquire(owner, now)?;
                current.insert(lease.clone());
            }
            Entry::Vacant(slot) => {
                slot.insert(lease.clone());
            }
        }
        Ok(lease)
    }

    async fn release_lease(&self, instance_id: &InstanceId, owner: &str) -> Result<(), StoreError> {
        self.leases.remove_if(instance_id, |_, lease| lease.owner == owner);
        Ok(())
    }
}
