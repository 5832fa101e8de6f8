use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use super::scope::{OverrideScope, ScopeTier};

/// Identifier wrapper for registry entities (KPIs, intent patterns, rules, formula parts).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier wrapper for stored override rows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OverrideId(pub String);

impl fmt::Display for OverrideId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Registry families; each kind owns the valid range for its weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Kpi,
    IntentPattern,
    RuleEvaluator,
    FormulaComponent,
}

impl EntityKind {
    pub fn weight_range(self) -> WeightRange {
        match self {
            EntityKind::Kpi | EntityKind::IntentPattern => WeightRange::new(0.1, 3.0),
            EntityKind::RuleEvaluator | EntityKind::FormulaComponent => WeightRange::new(0.1, 2.0),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            EntityKind::Kpi => "kpi",
            EntityKind::IntentPattern => "intent_pattern",
            EntityKind::RuleEvaluator => "rule_evaluator",
            EntityKind::FormulaComponent => "formula_component",
        }
    }
}

/// Inclusive bounds for a weight.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightRange {
    pub min: f64,
    pub max: f64,
}

impl WeightRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

/// Base definition of a scoring entity as edited by registry admins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub id: EntityId,
    pub kind: EntityKind,
    pub family: String,
    pub base_weight: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_severity: Option<Severity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold_low: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold_high: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "initial_version")]
    pub version: u32,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn initial_version() -> u32 {
    1
}

impl RegistryEntry {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|candidate| candidate.eq_ignore_ascii_case(tag))
    }
}

/// Admin edit of an entry's base values. `None` leaves the field untouched.
///
/// Thresholds distinguish a missing field (untouched) from an explicit JSON `null`, which
/// clears the stored threshold.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BaseUpdate {
    #[serde(default)]
    pub base_weight: Option<f64>,
    #[serde(default)]
    pub base_severity: Option<Severity>,
    #[serde(
        default,
        deserialize_with = "present_field",
        skip_serializing_if = "Option::is_none"
    )]
    pub threshold_low: Option<Option<f64>>,
    #[serde(
        default,
        deserialize_with = "present_field",
        skip_serializing_if = "Option::is_none"
    )]
    pub threshold_high: Option<Option<f64>>,
}

fn present_field<'de, D>(deserializer: D) -> Result<Option<Option<f64>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<f64>::deserialize(deserializer).map(Some)
}

/// Conjunctive filter for registry listings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryFilter {
    #[serde(default)]
    pub kind: Option<EntityKind>,
    #[serde(default)]
    pub family: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
}

impl EntryFilter {
    pub fn matches(&self, entry: &RegistryEntry) -> bool {
        if let Some(kind) = self.kind {
            if entry.kind != kind {
                return false;
            }
        }
        if let Some(family) = &self.family {
            if !entry.family.eq_ignore_ascii_case(family) {
                return false;
            }
        }
        if let Some(tag) = &self.tag {
            if !entry.has_tag(tag) {
                return false;
            }
        }
        true
    }
}

/// Stored override row for one (entity, scope) key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverrideRecord {
    pub id: OverrideId,
    pub entity_id: EntityId,
    pub scope: OverrideScope,
    pub multiplier: f64,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OverrideRecord {
    pub fn tier(&self) -> ScopeTier {
        self.scope.tier()
    }
}

/// Caller-supplied selection of vertical/market/organization/app filters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EvaluationContext {
    #[serde(default)]
    pub vertical: Option<String>,
    #[serde(default)]
    pub market: Option<String>,
    #[serde(default)]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub app_id: Option<String>,
}

impl EvaluationContext {
    pub fn for_vertical(vertical: impl Into<String>) -> Self {
        Self {
            vertical: Some(vertical.into()),
            ..Self::default()
        }
    }

    pub fn with_market(mut self, market: impl Into<String>) -> Self {
        self.market = Some(market.into());
        self
    }

    pub fn with_organization(mut self, organization_id: impl Into<String>) -> Self {
        self.organization_id = Some(organization_id.into());
        self
    }

    pub fn with_app(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = Some(app_id.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.vertical.is_none()
            && self.market.is_none()
            && self.organization_id.is_none()
            && self.app_id.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClampBound {
    Min,
    Max,
}

/// Reports that `base * multiplier` fell outside the kind range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClampDiagnostic {
    pub unclamped: f64,
    pub bound: ClampBound,
    pub range: WeightRange,
}

/// Derived value for one entity under one context. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectiveValue {
    pub entity_id: EntityId,
    pub kind: EntityKind,
    pub base_value: f64,
    pub applied_override: Option<OverrideRecord>,
    pub effective_value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clamp: Option<ClampDiagnostic>,
}

impl EffectiveValue {
    pub fn has_override(&self) -> bool {
        self.applied_override.is_some()
    }

    pub fn was_clamped(&self) -> bool {
        self.clamp.is_some()
    }

    pub fn view(&self) -> EffectiveValueView {
        EffectiveValueView {
            entity_id: self.entity_id.clone(),
            kind: self.kind.label(),
            base_value: self.base_value,
            effective_value: self.effective_value,
            has_override: self.has_override(),
            applied_tier: self.applied_override.as_ref().map(|record| record.tier()),
            applied_override: self.applied_override.clone(),
            clamp: self.clamp,
        }
    }
}

/// Shape consumed by detail panels.
#[derive(Debug, Clone, Serialize)]
pub struct EffectiveValueView {
    pub entity_id: EntityId,
    pub kind: &'static str,
    pub base_value: f64,
    pub effective_value: f64,
    pub has_override: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applied_tier: Option<ScopeTier>,
    pub applied_override: Option<OverrideRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clamp: Option<ClampDiagnostic>,
}
