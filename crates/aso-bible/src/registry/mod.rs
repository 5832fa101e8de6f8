//! Scoped override resolution for the ASO Bible registries.
//!
//! Base definitions (KPIs, intent patterns, rule evaluators, formula components) carry a
//! default weight. Overrides scoped to a vertical, market, client or app scale that weight;
//! the most specific matching override wins and the product is clamped to the kind's range.

pub(crate) mod calculator;
pub mod domain;
pub mod import;
pub mod memory;
pub mod repository;
pub(crate) mod resolver;
pub mod router;
pub mod scope;
pub mod seed;
pub mod service;

#[cfg(test)]
mod tests;

pub use calculator::compute_effective;
pub use domain::{
    BaseUpdate, ClampBound, ClampDiagnostic, EffectiveValue, EffectiveValueView, EntityId,
    EntityKind, EntryFilter, EvaluationContext, OverrideId, OverrideRecord, RegistryEntry,
    Severity, WeightRange,
};
pub use import::{ImportError, OverrideCsvImporter};
pub use memory::{InMemoryOverrideRepository, InMemoryRegistryRepository};
pub use repository::{OverrideRepository, RegistryRepository, RepositoryError};
pub use resolver::{resolve, AmbiguousOverride, ResolutionMode};
pub use router::registry_router;
pub use scope::{OverrideScope, Qualifier, ScopeError, ScopeQualifiers, ScopeTier};
pub use seed::{RegistrySeed, SeedError, SeedSummary};
pub use service::{OverrideRequest, OverrideService, OverrideServiceError, ValidationError};
