use tracing::warn;

use super::domain::{EntityId, EvaluationContext, OverrideRecord};
use super::scope::ScopeTier;

/// How duplicate same-tier matches are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolutionMode {
    /// Pick the highest version and log the integrity problem.
    #[default]
    Lenient,
    /// Surface duplicates as [`AmbiguousOverride`].
    Strict,
}

/// More than one active override matched within a single tier.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{count} {tier} overrides match '{entity_id}' for the same context")]
pub struct AmbiguousOverride {
    pub entity_id: EntityId,
    pub tier: ScopeTier,
    pub count: usize,
}

/// Select the most specific override of `entity_id` that applies to `context`.
///
/// Tiers are tried app, client, market, vertical; the first tier with any match wins.
pub fn resolve<'a>(
    entity_id: &EntityId,
    overrides: &'a [OverrideRecord],
    context: &EvaluationContext,
    mode: ResolutionMode,
) -> Result<Option<&'a OverrideRecord>, AmbiguousOverride> {
    if context.is_empty() {
        return Ok(None);
    }

    for tier in ScopeTier::PRIORITY {
        let mut matches = overrides.iter().filter(|record| {
            &record.entity_id == entity_id
                && record.tier() == tier
                && record.scope.matches(context)
        });

        let Some(first) = matches.next() else {
            continue;
        };

        let mut count = 1;
        let mut newest = first;
        for candidate in matches {
            count += 1;
            if candidate.version > newest.version {
                newest = candidate;
            }
        }

        if count > 1 {
            let ambiguity = AmbiguousOverride {
                entity_id: entity_id.clone(),
                tier,
                count,
            };
            if mode == ResolutionMode::Strict {
                return Err(ambiguity);
            }
            warn!(
                entity_id = %entity_id,
                %tier,
                count,
                chosen = %newest.id,
                "duplicate overrides in one tier; using highest version"
            );
        }

        return Ok(Some(newest));
    }

    Ok(None)
}

/// Order overrides most specific first, then by scope qualifiers for a stable listing.
pub fn sort_by_specificity(overrides: &mut [OverrideRecord]) {
    overrides.sort_by(|left, right| {
        right
            .tier()
            .cmp(&left.tier())
            .then_with(|| left.scope.cmp(&right.scope))
            .then_with(|| right.version.cmp(&left.version))
    });
}
