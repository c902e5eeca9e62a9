//! Immutable registry snapshot
//!
//! Every registry write produces a new snapshot; readers hold an `Arc` to
//! whichever snapshot was current when they started and never observe a
//! partial update.

use super::descriptor::{DomainDescriptor, DomainId};
use super::signature::Signature;
use crate::classification::scoring::SignatureCorpus;
use crate::core::error::DomainError;
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    /// Descriptors in registration order
    domains: Vec<DomainDescriptor>,
    index: HashMap<DomainId, usize>,
    corpus: SignatureCorpus,
    version: u64,
}

impl RegistrySnapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a snapshot by registering each descriptor in order.
    pub fn from_descriptors(
        descriptors: impl IntoIterator<Item = DomainDescriptor>,
    ) -> Result<Self, DomainError> {
        let mut snapshot = Self::empty();
        for descriptor in descriptors {
            snapshot = snapshot.with_registered(descriptor)?;
        }
        Ok(snapshot)
    }

    /// A copy of this snapshot with `descriptor` appended.
    pub fn with_registered(&self, descriptor: DomainDescriptor) -> Result<Self, DomainError> {
        descriptor.validate()?;
        if self.index.contains_key(&descriptor.id) {
            return Err(DomainError::DuplicateDomain(descriptor.id.to_string()));
        }
        let mut domains = self.domains.clone();
        domains.push(descriptor);
        Ok(Self::rebuild(domains, self.version + 1))
    }

    /// A copy with the signature of `id` replaced; registration order is kept.
    pub fn with_signature(&self, id: &DomainId, signature: Signature) -> Result<Self, DomainError> {
        let position = self.position(id)?;
        let mut domains = self.domains.clone();
        domains[position].signature = signature;
        domains[position].validate()?;
        Ok(Self::rebuild(domains, self.version + 1))
    }

    /// A copy with `id` removed.
    pub fn without(&self, id: &DomainId) -> Result<Self, DomainError> {
        let position = self.position(id)?;
        let mut domains = self.domains.clone();
        domains.remove(position);
        Ok(Self::rebuild(domains, self.version + 1))
    }

    fn rebuild(domains: Vec<DomainDescriptor>, version: u64) -> Self {
        let index = domains
            .iter()
            .enumerate()
            .map(|(i, d)| (d.id.clone(), i))
            .collect();
        let corpus = SignatureCorpus::from_descriptors(&domains);
        Self {
            domains,
            index,
            corpus,
            version,
        }
    }

    fn position(&self, id: &DomainId) -> Result<usize, DomainError> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| DomainError::NotFound(id.to_string()))
    }

    pub fn lookup(&self, id: &DomainId) -> Result<&DomainDescriptor, DomainError> {
        self.position(id).map(|i| &self.domains[i])
    }

    pub fn get(&self, id: &DomainId) -> Option<&DomainDescriptor> {
        self.index.get(id).map(|&i| &self.domains[i])
    }

    pub fn contains(&self, id: &DomainId) -> bool {
        self.index.contains_key(id)
    }

    /// Registration position, used to break classification ties.
    pub fn registration_order(&self, id: &DomainId) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn all(&self) -> &[DomainDescriptor] {
        &self.domains
    }

    pub fn ids(&self) -> impl Iterator<Item = &DomainId> {
        self.domains.iter().map(|d| &d.id)
    }

    pub fn corpus(&self) -> &SignatureCorpus {
        &self.corpus
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}
