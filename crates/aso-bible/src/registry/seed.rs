use std::collections::HashSet;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::domain::{EntityId, RegistryEntry};
use super::repository::{OverrideRepository, RegistryRepository};
use super::service::{
    validate_entry, validate_override_shape, OverrideRequest, OverrideService,
    OverrideServiceError,
};

const BUILTIN_SEED: &str = include_str!("../../seeds/default.json");

#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    #[error("failed to read registry seed: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid registry seed JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("registry seed lists '{0}' more than once")]
    DuplicateEntry(EntityId),
    #[error("seed entry '{entity_id}' rejected: {source}")]
    Entry {
        entity_id: EntityId,
        source: OverrideServiceError,
    },
    #[error("seed override #{index} rejected: {source}")]
    Override {
        index: usize,
        source: OverrideServiceError,
    },
}

/// Registry bootstrap document: base entries plus initial overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistrySeed {
    pub entries: Vec<RegistryEntry>,
    #[serde(default)]
    pub overrides: Vec<OverrideRequest>,
}

/// Counts of what a seed load wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SeedSummary {
    pub entries: usize,
    pub overrides: usize,
}

impl RegistrySeed {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, SeedError> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, SeedError> {
        let seed: RegistrySeed = serde_json::from_reader(reader)?;
        seed.check_unique()?;
        Ok(seed)
    }

    /// Small ASO KPI set shipped with the crate.
    pub fn builtin() -> Result<Self, SeedError> {
        Self::from_reader(BUILTIN_SEED.as_bytes())
    }

    fn check_against<R, O>(&self, service: &OverrideService<R, O>) -> Result<(), SeedError>
    where
        R: RegistryRepository + 'static,
        O: OverrideRepository + 'static,
    {
        for entry in &self.entries {
            if service.get_entry(&entry.id).is_ok() {
                return Err(SeedError::DuplicateEntry(entry.id.clone()));
            }
            validate_entry(entry).map_err(|source| SeedError::Entry {
                entity_id: entry.id.clone(),
                source: source.into(),
            })?;
        }

        let seeded: HashSet<&EntityId> = self.entries.iter().map(|entry| &entry.id).collect();
        for (index, request) in self.overrides.iter().enumerate() {
            validate_override_shape(request)
                .map_err(|source| SeedError::Override { index, source })?;
            if !seeded.contains(&request.entity_id) {
                service
                    .get_entry(&request.entity_id)
                    .map_err(|source| SeedError::Override { index, source })?;
            }
        }
        Ok(())
    }

    fn check_unique(&self) -> Result<(), SeedError> {
        let mut seen = HashSet::new();
        for entry in &self.entries {
            if !seen.insert(&entry.id) {
                return Err(SeedError::DuplicateEntry(entry.id.clone()));
            }
        }
        Ok(())
    }

    /// Register every entry, then apply overrides through the regular upsert validation.
    ///
    /// Entries and override shapes are checked before the first write, so a rejected seed
    /// leaves the service as it was.
    pub fn load_into<R, O>(self, service: &OverrideService<R, O>) -> Result<SeedSummary, SeedError>
    where
        R: RegistryRepository + 'static,
        O: OverrideRepository + 'static,
    {
        self.check_unique()?;
        self.check_against(service)?;
        let entries = self.entries.len();
        for entry in self.entries {
            let entity_id = entry.id.clone();
            service
                .register_entry(entry)
                .map_err(|source| SeedError::Entry { entity_id, source })?;
        }

        let overrides = self.overrides.len();
        for (index, request) in self.overrides.into_iter().enumerate() {
            service
                .upsert_override(request)
                .map_err(|source| SeedError::Override { index, source })?;
        }

        Ok(SeedSummary { entries, overrides })
    }
}
