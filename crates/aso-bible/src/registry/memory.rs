use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use super::domain::{EntityId, EntryFilter, OverrideId, OverrideRecord, RegistryEntry};
use super::repository::{OverrideRepository, RegistryRepository, RepositoryError};
use super::scope::OverrideScope;

fn lock<'a, T>(mutex: &'a Mutex<T>, name: &str) -> Result<MutexGuard<'a, T>, RepositoryError> {
    mutex
        .lock()
        .map_err(|_| RepositoryError::Unavailable(format!("{name} mutex poisoned")))
}

/// Process-local registry keyed by entity id.
#[derive(Default, Clone)]
pub struct InMemoryRegistryRepository {
    entries: Arc<Mutex<BTreeMap<EntityId, RegistryEntry>>>,
}

impl RegistryRepository for InMemoryRegistryRepository {
    fn insert(&self, entry: RegistryEntry) -> Result<RegistryEntry, RepositoryError> {
        let mut guard = lock(&self.entries, "registry")?;
        if guard.contains_key(&entry.id) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(entry.id.clone(), entry.clone());
        Ok(entry)
    }

    fn replace(&self, entry: RegistryEntry) -> Result<(), RepositoryError> {
        let mut guard = lock(&self.entries, "registry")?;
        match guard.get_mut(&entry.id) {
            Some(slot) => {
                *slot = entry;
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }

    fn fetch(&self, id: &EntityId) -> Result<Option<RegistryEntry>, RepositoryError> {
        let guard = lock(&self.entries, "registry")?;
        Ok(guard.get(id).cloned())
    }

    fn list(&self, filter: &EntryFilter) -> Result<Vec<RegistryEntry>, RepositoryError> {
        let guard = lock(&self.entries, "registry")?;
        Ok(guard
            .values()
            .filter(|entry| filter.matches(entry))
            .cloned()
            .collect())
    }
}

type OverrideKey = (EntityId, OverrideScope);

#[derive(Default)]
struct OverrideTable {
    rows: HashMap<OverrideKey, OverrideRecord>,
    by_id: HashMap<OverrideId, OverrideKey>,
}

/// Process-local override store enforcing one row per `(entity, scope)`.
#[derive(Default, Clone)]
pub struct InMemoryOverrideRepository {
    table: Arc<Mutex<OverrideTable>>,
}

impl InMemoryOverrideRepository {
    pub fn len(&self) -> usize {
        self.table
            .lock()
            .map(|table| table.rows.len())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl OverrideRepository for InMemoryOverrideRepository {
    fn find(
        &self,
        entity_id: &EntityId,
        scope: &OverrideScope,
    ) -> Result<Option<OverrideRecord>, RepositoryError> {
        let guard = lock(&self.table, "override")?;
        Ok(guard
            .rows
            .get(&(entity_id.clone(), scope.clone()))
            .cloned())
    }

    fn save(&self, record: OverrideRecord) -> Result<(), RepositoryError> {
        let mut guard = lock(&self.table, "override")?;
        let key = (record.entity_id.clone(), record.scope.clone());
        let stale = guard
            .rows
            .get(&key)
            .filter(|previous| previous.id != record.id)
            .map(|previous| previous.id.clone());
        if let Some(stale) = stale {
            guard.by_id.remove(&stale);
        }
        guard.by_id.insert(record.id.clone(), key.clone());
        guard.rows.insert(key, record);
        Ok(())
    }

    fn remove(&self, id: &OverrideId) -> Result<Option<OverrideRecord>, RepositoryError> {
        let mut guard = lock(&self.table, "override")?;
        let Some(key) = guard.by_id.remove(id) else {
            return Ok(None);
        };
        Ok(guard.rows.remove(&key))
    }

    fn for_entity(&self, entity_id: &EntityId) -> Result<Vec<OverrideRecord>, RepositoryError> {
        let guard = lock(&self.table, "override")?;
        Ok(guard
            .rows
            .values()
            .filter(|record| &record.entity_id == entity_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::domain::EntityKind;
    use chrono::Utc;

    fn record(id: &str, scope: OverrideScope, version: u32) -> OverrideRecord {
        let now = Utc::now();
        OverrideRecord {
            id: OverrideId(id.to_string()),
            entity_id: EntityId::new("kpi.cvr"),
            scope,
            multiplier: 1.2,
            version,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn saving_same_key_replaces_row() {
        let store = InMemoryOverrideRepository::default();
        store
            .save(record("ovr-1", OverrideScope::vertical("fitness"), 1))
            .expect("save");
        store
            .save(record("ovr-1", OverrideScope::vertical("fitness"), 2))
            .expect("save");

        let rows = store
            .for_entity(&EntityId::new("kpi.cvr"))
            .expect("list");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].version, 2);
    }

    #[test]
    fn remove_is_idempotent() {
        let store = InMemoryOverrideRepository::default();
        store
            .save(record("ovr-9", OverrideScope::app("com.example.app"), 1))
            .expect("save");

        let id = OverrideId("ovr-9".to_string());
        assert!(store.remove(&id).expect("remove").is_some());
        assert!(store.remove(&id).expect("remove").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn registry_rejects_duplicate_ids() {
        let registry = InMemoryRegistryRepository::default();
        let entry = RegistryEntry {
            id: EntityId::new("kpi.installs"),
            kind: EntityKind::Kpi,
            family: "ranking".to_string(),
            base_weight: 1.0,
            base_severity: None,
            threshold_low: None,
            threshold_high: None,
            description: None,
            tags: Vec::new(),
            version: 1,
            updated_at: Utc::now(),
        };
        registry.insert(entry.clone()).expect("first insert");
        assert!(matches!(
            registry.insert(entry),
            Err(RepositoryError::Conflict)
        ));
    }
}
