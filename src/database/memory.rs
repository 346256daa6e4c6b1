use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::models::{AttemptRecord, AuditLog, IdentityRecord, TwoFactorBinding};
use super::{AttemptStore, CommitOutcome, IdentityStore, StoreError};
use crate::biometric::EnrolledDescriptor;

#[derive(Default)]
struct Tables {
    identities: HashMap<String, IdentityRecord>,
    two_factor: HashMap<String, TwoFactorBinding>,
    attempts: HashMap<String, AttemptRecord>,
    audit: Vec<AuditLog>,
}

/// In-process store. One mutex guards every table, so `commit_identity`
/// checks and writes under the same guard.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }
}

fn descriptors(tables: &Tables) -> Vec<EnrolledDescriptor> {
    tables
        .identities
        .values()
        .filter(|record| record.active)
        .filter_map(|record| {
            record.descriptor.as_ref().map(|descriptor| EnrolledDescriptor {
                identity_id: record.id.clone(),
                descriptor: descriptor.clone(),
            })
        })
        .collect()
}

fn hydrate(tables: &Tables, record: &IdentityRecord) -> IdentityRecord {
    let mut record = record.clone();
    record.two_factor = tables.two_factor.get(&record.id).cloned();
    record
}

impl IdentityStore for MemoryStore {
    fn get_identity(&self, id: &str) -> Result<Option<IdentityRecord>, StoreError> {
        let tables = self.lock()?;
        Ok(tables.identities.get(id).map(|r| hydrate(&tables, r)))
    }

    fn find_by_email(&self, email: &str) -> Result<Option<IdentityRecord>, StoreError> {
        let tables = self.lock()?;
        Ok(tables
            .identities
            .values()
            .find(|r| r.email == email)
            .map(|r| hydrate(&tables, r)))
    }

    fn find_by_national_id(&self, national_id: &str) -> Result<Option<IdentityRecord>, StoreError> {
        let tables = self.lock()?;
        Ok(tables
            .identities
            .values()
            .find(|r| r.national_id == national_id)
            .map(|r| hydrate(&tables, r)))
    }

    fn list_identities(&self) -> Result<Vec<IdentityRecord>, StoreError> {
        let tables = self.lock()?;
        let mut records: Vec<_> = tables.identities.values().map(|r| hydrate(&tables, r)).collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }

    fn enrolled_descriptors(&self) -> Result<Vec<EnrolledDescriptor>, StoreError> {
        Ok(descriptors(&*self.lock()?))
    }

    fn commit_identity(
        &self,
        record: &IdentityRecord,
        conflicts: &dyn Fn(&[EnrolledDescriptor]) -> bool,
    ) -> Result<CommitOutcome, StoreError> {
        let mut tables = self.lock()?;

        if conflicts(&descriptors(&tables)) {
            return Ok(CommitOutcome::Conflict);
        }

        let clash = tables.identities.values().any(|other| {
            other.id != record.id && (other.email == record.email || other.national_id == record.national_id)
        });
        if clash {
            return Err(StoreError::Constraint("email or national id already registered".to_string()));
        }

        let mut stored = record.clone();
        if let Some(binding) = stored.two_factor.take() {
            tables.two_factor.insert(binding.identity_id.clone(), binding);
        }
        if let Some(existing) = tables.identities.get(&record.id) {
            stored.created_at = existing.created_at;
        }
        tables.identities.insert(stored.id.clone(), stored);
        Ok(CommitOutcome::Written)
    }

    fn set_active(&self, id: &str, active: bool) -> Result<bool, StoreError> {
        let mut tables = self.lock()?;
        match tables.identities.get_mut(id) {
            Some(record) => {
                record.active = active;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn delete_identity(&self, id: &str) -> Result<bool, StoreError> {
        let mut tables = self.lock()?;
        tables.two_factor.remove(id);
        Ok(tables.identities.remove(id).is_some())
    }

    fn get_two_factor(&self, identity_id: &str) -> Result<Option<TwoFactorBinding>, StoreError> {
        Ok(self.lock()?.two_factor.get(identity_id).cloned())
    }

    fn put_two_factor(&self, binding: &TwoFactorBinding) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        if !tables.identities.contains_key(&binding.identity_id) {
            return Err(StoreError::Constraint(format!(
                "no identity {} for two-factor binding",
                binding.identity_id
            )));
        }
        tables.two_factor.insert(binding.identity_id.clone(), binding.clone());
        Ok(())
    }

    fn append_audit(&self, entry: &AuditLog) -> Result<(), StoreError> {
        self.lock()?.audit.push(entry.clone());
        Ok(())
    }

    fn audit_entries(&self, identity_id: Option<&str>) -> Result<Vec<AuditLog>, StoreError> {
        let tables = self.lock()?;
        Ok(tables
            .audit
            .iter()
            .filter(|entry| identity_id.is_none() || entry.identity_id.as_deref() == identity_id)
            .cloned()
            .collect())
    }
}

impl AttemptStore for MemoryStore {
    fn get_attempt(&self, key: &str) -> Result<Option<AttemptRecord>, StoreError> {
        Ok(self.lock()?.attempts.get(key).cloned())
    }

    fn put_attempt(&self, record: &AttemptRecord) -> Result<(), StoreError> {
        self.lock()?.attempts.insert(record.key.clone(), record.clone());
        Ok(())
    }

    fn delete_attempt(&self, key: &str) -> Result<(), StoreError> {
        self.lock()?.attempts.remove(key);
        Ok(())
    }
}
