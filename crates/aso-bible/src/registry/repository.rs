use super::domain::{EntityId, EntryFilter, OverrideId, OverrideRecord, RegistryEntry};
use super::scope::OverrideScope;

/// Storage abstraction for base registry definitions.
pub trait RegistryRepository: Send + Sync {
    fn insert(&self, entry: RegistryEntry) -> Result<RegistryEntry, RepositoryError>;
    fn replace(&self, entry: RegistryEntry) -> Result<(), RepositoryError>;
    fn fetch(&self, id: &EntityId) -> Result<Option<RegistryEntry>, RepositoryError>;
    /// Entries accepted by `filter`, ordered by id.
    fn list(&self, filter: &EntryFilter) -> Result<Vec<RegistryEntry>, RepositoryError>;
}

/// Storage abstraction for override rows.
///
/// Implementations key rows on `(entity_id, scope)`: saving a record whose key already exists
/// replaces the stored row, so at most one active record exists per key.
pub trait OverrideRepository: Send + Sync {
    fn find(
        &self,
        entity_id: &EntityId,
        scope: &OverrideScope,
    ) -> Result<Option<OverrideRecord>, RepositoryError>;
    fn save(&self, record: OverrideRecord) -> Result<(), RepositoryError>;
    fn remove(&self, id: &OverrideId) -> Result<Option<OverrideRecord>, RepositoryError>;
    fn for_entity(&self, entity_id: &EntityId) -> Result<Vec<OverrideRecord>, RepositoryError>;
}

/// Error enumeration for repository failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}
