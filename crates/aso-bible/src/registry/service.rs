use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::calculator::compute_effective;
use super::domain::{
    BaseUpdate, EffectiveValue, EntityId, EntityKind, EntryFilter, EvaluationContext, OverrideId,
    OverrideRecord, RegistryEntry, WeightRange,
};
use super::repository::{OverrideRepository, RegistryRepository, RepositoryError};
use super::resolver::{resolve, sort_by_specificity, AmbiguousOverride, ResolutionMode};
use super::scope::{OverrideScope, ScopeError, ScopeQualifiers, ScopeTier};

/// Write request for an override, as sent by editors, seeds and CSV imports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverrideRequest {
    pub entity_id: EntityId,
    pub tier: ScopeTier,
    #[serde(default)]
    pub qualifiers: ScopeQualifiers,
    pub multiplier: f64,
    /// Reject the write unless the stored version (0 when absent) equals this value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_version: Option<u32>,
}

/// Service composing registry storage, override storage, scope resolution and the calculator.
///
/// Effective values are memoised per `(entity, context)`. The memo assumes every write goes
/// through this service; each write drops the memo for the entity it touched. An entity's
/// memo is also dropped once it holds [`MEMO_CONTEXTS_PER_ENTITY`] contexts.
pub struct OverrideService<R, O> {
    registry: Arc<R>,
    overrides: Arc<O>,
    mode: ResolutionMode,
    writes: Mutex<()>,
    memo: Mutex<HashMap<EntityId, HashMap<EvaluationContext, EffectiveValue>>>,
}

static OVERRIDE_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Contexts remembered per entity before that entity's memo is dropped.
pub(crate) const MEMO_CONTEXTS_PER_ENTITY: usize = 256;

fn next_override_id() -> OverrideId {
    let id = OVERRIDE_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    OverrideId(format!("ovr-{id:06}"))
}

impl<R, O> OverrideService<R, O>
where
    R: RegistryRepository + 'static,
    O: OverrideRepository + 'static,
{
    pub fn new(registry: Arc<R>, overrides: Arc<O>) -> Self {
        Self::with_mode(registry, overrides, ResolutionMode::Lenient)
    }

    pub fn with_mode(registry: Arc<R>, overrides: Arc<O>, mode: ResolutionMode) -> Self {
        Self {
            registry,
            overrides,
            mode,
            writes: Mutex::new(()),
            memo: Mutex::new(HashMap::new()),
        }
    }

    pub fn mode(&self) -> ResolutionMode {
        self.mode
    }

    /// Fetch a base definition.
    pub fn get_entry(&self, entity_id: &EntityId) -> Result<RegistryEntry, OverrideServiceError> {
        self.registry
            .fetch(entity_id)?
            .ok_or_else(|| OverrideServiceError::NotFound(entity_id.clone()))
    }

    pub fn list_entries(
        &self,
        filter: &EntryFilter,
    ) -> Result<Vec<RegistryEntry>, OverrideServiceError> {
        Ok(self.registry.list(filter)?)
    }

    /// Add a new base definition after validating it against its kind.
    pub fn register_entry(
        &self,
        mut entry: RegistryEntry,
    ) -> Result<RegistryEntry, OverrideServiceError> {
        validate_entry(&entry)?;
        if entry.version == 0 {
            entry.version = 1;
        }

        let _write = self.write_guard()?;
        let stored = self.registry.insert(entry)?;
        self.invalidate(&stored.id);
        debug!(entity_id = %stored.id, kind = stored.kind.label(), "registry entry added");
        Ok(stored)
    }

    /// Admin edit of base values. Validation failures leave the stored entry untouched.
    pub fn update_base(
        &self,
        entity_id: &EntityId,
        update: BaseUpdate,
    ) -> Result<RegistryEntry, OverrideServiceError> {
        let _write = self.write_guard()?;
        let mut entry = self.get_entry(entity_id)?;

        if let Some(weight) = update.base_weight {
            validate_weight(entity_id, entry.kind, weight)?;
        }
        let threshold_low = update.threshold_low.unwrap_or(entry.threshold_low);
        let threshold_high = update.threshold_high.unwrap_or(entry.threshold_high);
        validate_thresholds(threshold_low, threshold_high)?;

        if let Some(weight) = update.base_weight {
            entry.base_weight = weight;
        }
        if let Some(severity) = update.base_severity {
            entry.base_severity = Some(severity);
        }
        entry.threshold_low = threshold_low;
        entry.threshold_high = threshold_high;
        entry.version += 1;
        entry.updated_at = Utc::now();

        self.registry.replace(entry.clone())?;
        self.invalidate(entity_id);

        info!(
            entity_id = %entity_id,
            base_weight = entry.base_weight,
            version = entry.version,
            "registry base updated"
        );
        Ok(entry)
    }

    /// Effective value of one entity under `context`.
    pub fn compute_effective(
        &self,
        entity_id: &EntityId,
        context: &EvaluationContext,
    ) -> Result<EffectiveValue, OverrideServiceError> {
        if let Some(hit) = self.memoised(entity_id, context) {
            return Ok(hit);
        }

        // Misses evaluate under the write lock so a concurrent write cannot be memoised over.
        let _write = self.write_guard()?;
        let entry = self.get_entry(entity_id)?;
        let value = self.evaluate(&entry, context)?;
        self.remember(context, &value);
        Ok(value)
    }

    /// Effective values for every entry accepted by `filter`, ordered by id.
    pub fn compute_effective_batch(
        &self,
        filter: &EntryFilter,
        context: &EvaluationContext,
    ) -> Result<Vec<EffectiveValue>, OverrideServiceError> {
        let _write = self.write_guard()?;
        let entries = self.registry.list(filter)?;
        let mut values = Vec::with_capacity(entries.len());
        for entry in entries {
            let value = match self.memoised(&entry.id, context) {
                Some(hit) => hit,
                None => {
                    let value = self.evaluate(&entry, context)?;
                    self.remember(context, &value);
                    value
                }
            };
            values.push(value);
        }
        Ok(values)
    }

    /// Create or bump the override for `(entity, scope)`.
    pub fn upsert_override(
        &self,
        request: OverrideRequest,
    ) -> Result<OverrideRecord, OverrideServiceError> {
        let scope = self.validate_request(&request)?;

        let _write = self.write_guard()?;
        let record = self.apply(&request.entity_id, scope, &request)?;
        info!(
            entity_id = %record.entity_id,
            scope = %record.scope,
            multiplier = record.multiplier,
            version = record.version,
            "override upserted"
        );
        Ok(record)
    }

    /// Remove an override by id. Returns `false` when nothing was stored under `id`.
    pub fn remove_override(&self, id: &OverrideId) -> Result<bool, OverrideServiceError> {
        let _write = self.write_guard()?;
        match self.overrides.remove(id)? {
            Some(removed) => {
                self.invalidate(&removed.entity_id);
                info!(override_id = %id, entity_id = %removed.entity_id, "override removed");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Overrides of an entity, most specific tier first.
    pub fn list_overrides(
        &self,
        entity_id: &EntityId,
    ) -> Result<Vec<OverrideRecord>, OverrideServiceError> {
        self.get_entry(entity_id)?;
        let mut records = self.overrides.for_entity(entity_id)?;
        sort_by_specificity(&mut records);
        Ok(records)
    }

    /// Apply a batch of override writes. Every request is validated before the first write.
    pub fn import_overrides(
        &self,
        requests: Vec<OverrideRequest>,
    ) -> Result<Vec<OverrideRecord>, OverrideServiceError> {
        let mut validated = Vec::with_capacity(requests.len());
        for request in requests {
            let scope = self.validate_request(&request)?;
            validated.push((scope, request));
        }

        let _write = self.write_guard()?;
        self.check_versions(&validated)?;
        let mut applied = Vec::with_capacity(validated.len());
        for (scope, request) in validated {
            applied.push(self.apply(&request.entity_id, scope, &request)?);
        }
        info!(count = applied.len(), "override import applied");
        Ok(applied)
    }

    fn validate_request(
        &self,
        request: &OverrideRequest,
    ) -> Result<OverrideScope, OverrideServiceError> {
        let scope = validate_override_shape(request)?;
        self.get_entry(&request.entity_id)?;
        Ok(scope)
    }

    /// Replay the version each row would see so a conflict on any row aborts before any write.
    /// Callers hold the write lock.
    fn check_versions(
        &self,
        batch: &[(OverrideScope, OverrideRequest)],
    ) -> Result<(), OverrideServiceError> {
        let mut versions: HashMap<(EntityId, OverrideScope), u32> = HashMap::new();
        for (scope, request) in batch {
            let key = (request.entity_id.clone(), scope.clone());
            let current = match versions.get(&key) {
                Some(version) => *version,
                None => self
                    .overrides
                    .find(&request.entity_id, scope)?
                    .map(|record| record.version)
                    .unwrap_or(0),
            };
            if let Some(expected) = request.expected_version {
                if expected != current {
                    return Err(OverrideServiceError::Conflict {
                        entity_id: request.entity_id.clone(),
                        scope: scope.clone(),
                        expected,
                        actual: current,
                    });
                }
            }
            versions.insert(key, current + 1);
        }
        Ok(())
    }

    fn apply(
        &self,
        entity_id: &EntityId,
        scope: OverrideScope,
        request: &OverrideRequest,
    ) -> Result<OverrideRecord, OverrideServiceError> {
        let existing = self.overrides.find(entity_id, &scope)?;
        let current = existing.as_ref().map(|record| record.version).unwrap_or(0);
        if let Some(expected) = request.expected_version {
            if expected != current {
                return Err(OverrideServiceError::Conflict {
                    entity_id: entity_id.clone(),
                    scope,
                    expected,
                    actual: current,
                });
            }
        }

        let now = Utc::now();
        let record = match existing {
            Some(mut record) => {
                record.multiplier = request.multiplier;
                record.version += 1;
                record.updated_at = now;
                record
            }
            None => OverrideRecord {
                id: next_override_id(),
                entity_id: entity_id.clone(),
                scope,
                multiplier: request.multiplier,
                version: 1,
                created_at: now,
                updated_at: now,
            },
        };

        self.overrides.save(record.clone())?;
        self.invalidate(entity_id);
        Ok(record)
    }

    fn evaluate(
        &self,
        entry: &RegistryEntry,
        context: &EvaluationContext,
    ) -> Result<EffectiveValue, OverrideServiceError> {
        let overrides = self.overrides.for_entity(&entry.id)?;
        let applied = resolve(&entry.id, &overrides, context, self.mode)?;
        let value = compute_effective(entry, applied);
        if let Some(clamp) = &value.clamp {
            debug!(
                entity_id = %entry.id,
                unclamped = clamp.unclamped,
                effective = value.effective_value,
                "effective value clamped"
            );
        }
        Ok(value)
    }

    fn memoised(
        &self,
        entity_id: &EntityId,
        context: &EvaluationContext,
    ) -> Option<EffectiveValue> {
        let memo = self.memo.lock().ok()?;
        memo.get(entity_id)?.get(context).cloned()
    }

    fn remember(&self, context: &EvaluationContext, value: &EffectiveValue) {
        if let Ok(mut memo) = self.memo.lock() {
            let contexts = memo.entry(value.entity_id.clone()).or_default();
            if contexts.len() >= MEMO_CONTEXTS_PER_ENTITY {
                contexts.clear();
            }
            contexts.insert(context.clone(), value.clone());
        }
    }

    fn invalidate(&self, entity_id: &EntityId) {
        if let Ok(mut memo) = self.memo.lock() {
            memo.remove(entity_id);
        }
    }

    fn write_guard(&self) -> Result<MutexGuard<'_, ()>, OverrideServiceError> {
        self.writes.lock().map_err(|_| {
            RepositoryError::Unavailable("override write lock poisoned".to_string()).into()
        })
    }

    #[cfg(test)]
    pub(crate) fn memoised_contexts(&self, entity_id: &EntityId) -> usize {
        self.memo
            .lock()
            .map(|memo| memo.get(entity_id).map(HashMap::len).unwrap_or(0))
            .unwrap_or(0)
    }
}

/// Scope shape and multiplier checks that need no storage access.
pub(crate) fn validate_override_shape(
    request: &OverrideRequest,
) -> Result<OverrideScope, OverrideServiceError> {
    let scope = OverrideScope::new(request.tier, &request.qualifiers)?;
    if !request.multiplier.is_finite() || request.multiplier <= 0.0 {
        return Err(ValidationError::Multiplier {
            entity_id: request.entity_id.clone(),
            value: request.multiplier,
        }
        .into());
    }
    Ok(scope)
}

pub(crate) fn validate_entry(entry: &RegistryEntry) -> Result<(), ValidationError> {
    validate_weight(&entry.id, entry.kind, entry.base_weight)?;
    validate_thresholds(entry.threshold_low, entry.threshold_high)
}

fn validate_weight(
    entity_id: &EntityId,
    kind: EntityKind,
    value: f64,
) -> Result<(), ValidationError> {
    let range = kind.weight_range();
    if value.is_finite() && range.contains(value) {
        Ok(())
    } else {
        Err(ValidationError::WeightOutOfRange {
            entity_id: entity_id.clone(),
            value,
            range,
        })
    }
}

fn validate_thresholds(low: Option<f64>, high: Option<f64>) -> Result<(), ValidationError> {
    for value in [low, high].into_iter().flatten() {
        if !value.is_finite() {
            return Err(ValidationError::Threshold { low, high });
        }
    }
    match (low, high) {
        (Some(low), Some(high)) if low > high => Err(ValidationError::Threshold {
            low: Some(low),
            high: Some(high),
        }),
        _ => Ok(()),
    }
}

/// Rejected base or override values.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("weight {value} for '{entity_id}' outside [{}, {}]", .range.min, .range.max)]
    WeightOutOfRange {
        entity_id: EntityId,
        value: f64,
        range: WeightRange,
    },
    #[error("multiplier {value} for '{entity_id}' must be a positive finite number")]
    Multiplier { entity_id: EntityId, value: f64 },
    #[error("thresholds {low:?}..{high:?} must be finite with low <= high")]
    Threshold {
        low: Option<f64>,
        high: Option<f64>,
    },
}

/// Error raised by the override service.
#[derive(Debug, thiserror::Error)]
pub enum OverrideServiceError {
    #[error("registry entry '{0}' not found")]
    NotFound(EntityId),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    InvalidScope(#[from] ScopeError),
    #[error(transparent)]
    Ambiguous(#[from] AmbiguousOverride),
    #[error("override {scope} for '{entity_id}' is at version {actual}, expected {expected}")]
    Conflict {
        entity_id: EntityId,
        scope: OverrideScope,
        expected: u32,
        actual: u32,
    },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}
