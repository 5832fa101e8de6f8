use super::domain::{ClampBound, ClampDiagnostic, EffectiveValue, OverrideRecord, RegistryEntry};

/// Combine a base entry with its resolved override: multiply, then clamp to the kind range.
pub fn compute_effective(
    entry: &RegistryEntry,
    applied: Option<&OverrideRecord>,
) -> EffectiveValue {
    let multiplier = applied.map(|record| record.multiplier).unwrap_or(1.0);
    let unclamped = entry.base_weight * multiplier;
    let range = entry.kind.weight_range();

    let (effective_value, clamp) = if unclamped > range.max {
        (
            range.max,
            Some(ClampDiagnostic {
                unclamped,
                bound: ClampBound::Max,
                range,
            }),
        )
    } else if unclamped < range.min {
        (
            range.min,
            Some(ClampDiagnostic {
                unclamped,
                bound: ClampBound::Min,
                range,
            }),
        )
    } else {
        (unclamped, None)
    };

    EffectiveValue {
        entity_id: entry.id.clone(),
        kind: entry.kind,
        base_value: entry.base_weight,
        applied_override: applied.cloned(),
        effective_value,
        clamp,
    }
}
