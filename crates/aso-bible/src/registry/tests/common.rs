use std::sync::{Arc, Mutex};

use axum::response::Response;
use chrono::Utc;
use serde_json::Value;

use crate::registry::domain::{
    EntityId, EntityKind, OverrideId, OverrideRecord, RegistryEntry, Severity,
};
use crate::registry::memory::{InMemoryOverrideRepository, InMemoryRegistryRepository};
use crate::registry::repository::{OverrideRepository, RepositoryError};
use crate::registry::resolver::ResolutionMode;
use crate::registry::scope::{OverrideScope, ScopeQualifiers, ScopeTier};
use crate::registry::service::{OverrideRequest, OverrideService};

pub(super) type MemoryService =
    OverrideService<InMemoryRegistryRepository, InMemoryOverrideRepository>;

pub(super) fn cvr_entry() -> RegistryEntry {
    RegistryEntry {
        id: EntityId::new("kpi.cvr"),
        kind: EntityKind::Kpi,
        family: "conversion".to_string(),
        base_weight: 1.0,
        base_severity: Some(Severity::High),
        threshold_low: Some(0.5),
        threshold_high: Some(2.0),
        description: Some("Product page conversion rate".to_string()),
        tags: vec!["store-listing".to_string()],
        version: 1,
        updated_at: Utc::now(),
    }
}

pub(super) fn rule_entry() -> RegistryEntry {
    RegistryEntry {
        id: EntityId::new("rule.title_length"),
        kind: EntityKind::RuleEvaluator,
        family: "metadata".to_string(),
        base_weight: 1.5,
        base_severity: Some(Severity::Medium),
        threshold_low: None,
        threshold_high: None,
        description: None,
        tags: vec!["metadata".to_string()],
        version: 1,
        updated_at: Utc::now(),
    }
}

pub(super) fn cvr() -> EntityId {
    EntityId::new("kpi.cvr")
}

pub(super) fn build_service() -> (
    MemoryService,
    Arc<InMemoryRegistryRepository>,
    Arc<InMemoryOverrideRepository>,
) {
    build_service_with_mode(ResolutionMode::Lenient)
}

pub(super) fn build_service_with_mode(
    mode: ResolutionMode,
) -> (
    MemoryService,
    Arc<InMemoryRegistryRepository>,
    Arc<InMemoryOverrideRepository>,
) {
    let registry = Arc::new(InMemoryRegistryRepository::default());
    let overrides = Arc::new(InMemoryOverrideRepository::default());
    let service = OverrideService::with_mode(registry.clone(), overrides.clone(), mode);
    service
        .register_entry(cvr_entry())
        .expect("register conversion KPI");
    service
        .register_entry(rule_entry())
        .expect("register title rule");
    (service, registry, overrides)
}

pub(super) fn request(
    entity_id: &EntityId,
    tier: ScopeTier,
    qualifiers: ScopeQualifiers,
    multiplier: f64,
) -> OverrideRequest {
    OverrideRequest {
        entity_id: entity_id.clone(),
        tier,
        qualifiers,
        multiplier,
        expected_version: None,
    }
}

pub(super) fn vertical(value: &str) -> ScopeQualifiers {
    ScopeQualifiers {
        vertical: Some(value.to_string()),
        ..ScopeQualifiers::default()
    }
}

pub(super) fn market(vertical: &str, market: &str) -> ScopeQualifiers {
    ScopeQualifiers {
        vertical: Some(vertical.to_string()),
        market: Some(market.to_string()),
        ..ScopeQualifiers::default()
    }
}

pub(super) fn client(organization_id: &str) -> ScopeQualifiers {
    ScopeQualifiers {
        organization_id: Some(organization_id.to_string()),
        ..ScopeQualifiers::default()
    }
}

pub(super) fn app(app_id: &str) -> ScopeQualifiers {
    ScopeQualifiers {
        app_id: Some(app_id.to_string()),
        ..ScopeQualifiers::default()
    }
}

/// Append-only override table without key enforcement, used to simulate a corrupted store.
#[derive(Default)]
pub(super) struct CorruptedOverrides {
    rows: Mutex<Vec<OverrideRecord>>,
}

impl CorruptedOverrides {
    pub(super) fn push(&self, id: &str, scope: OverrideScope, multiplier: f64, version: u32) {
        let now = Utc::now();
        self.rows.lock().expect("rows mutex").push(OverrideRecord {
            id: OverrideId(id.to_string()),
            entity_id: cvr(),
            scope,
            multiplier,
            version,
            created_at: now,
            updated_at: now,
        });
    }
}

impl OverrideRepository for CorruptedOverrides {
    fn find(
        &self,
        entity_id: &EntityId,
        scope: &OverrideScope,
    ) -> Result<Option<OverrideRecord>, RepositoryError> {
        let rows = self.rows.lock().expect("rows mutex");
        Ok(rows
            .iter()
            .find(|record| &record.entity_id == entity_id && &record.scope == scope)
            .cloned())
    }

    fn save(&self, record: OverrideRecord) -> Result<(), RepositoryError> {
        self.rows.lock().expect("rows mutex").push(record);
        Ok(())
    }

    fn remove(&self, id: &OverrideId) -> Result<Option<OverrideRecord>, RepositoryError> {
        let mut rows = self.rows.lock().expect("rows mutex");
        let position = rows.iter().position(|record| &record.id == id);
        Ok(position.map(|index| rows.remove(index)))
    }

    fn for_entity(&self, entity_id: &EntityId) -> Result<Vec<OverrideRecord>, RepositoryError> {
        let rows = self.rows.lock().expect("rows mutex");
        Ok(rows
            .iter()
            .filter(|record| &record.entity_id == entity_id)
            .cloned()
            .collect())
    }
}

/// Override store whose backend is down.
#[derive(Default)]
pub(super) struct UnavailableOverrides;

impl OverrideRepository for UnavailableOverrides {
    fn find(
        &self,
        _entity_id: &EntityId,
        _scope: &OverrideScope,
    ) -> Result<Option<OverrideRecord>, RepositoryError> {
        Err(RepositoryError::Unavailable("override table offline".to_string()))
    }

    fn save(&self, _record: OverrideRecord) -> Result<(), RepositoryError> {
        Err(RepositoryError::Unavailable("override table offline".to_string()))
    }

    fn remove(&self, _id: &OverrideId) -> Result<Option<OverrideRecord>, RepositoryError> {
        Err(RepositoryError::Unavailable("override table offline".to_string()))
    }

    fn for_entity(&self, _entity_id: &EntityId) -> Result<Vec<OverrideRecord>, RepositoryError> {
        Err(RepositoryError::Unavailable("override table offline".to_string()))
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
