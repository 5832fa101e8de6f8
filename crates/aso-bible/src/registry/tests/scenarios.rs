use super::common::*;
use crate::registry::domain::{ClampBound, EvaluationContext};
use crate::registry::scope::{Qualifier, ScopeError, ScopeTier};
use crate::registry::service::OverrideServiceError;

#[test]
fn base_value_applies_when_no_tier_matches() {
    let (service, _, _) = build_service();
    service
        .upsert_override(request(&cvr(), ScopeTier::Vertical, vertical("games"), 1.4))
        .expect("upsert");

    let contexts = [
        EvaluationContext::default(),
        EvaluationContext::for_vertical("fitness"),
        EvaluationContext::for_vertical("fitness")
            .with_market("us")
            .with_organization("org-1")
            .with_app("com.example.app"),
    ];
    for context in contexts {
        let value = service
            .compute_effective(&cvr(), &context)
            .expect("effective value");
        assert_eq!(value.effective_value, value.base_value, "{context:?}");
        assert!(value.applied_override.is_none(), "{context:?}");
    }
}

#[test]
fn fitness_vertical_override_scales_conversion_kpi() {
    let (service, _, _) = build_service();
    service
        .upsert_override(request(&cvr(), ScopeTier::Vertical, vertical("fitness"), 1.8))
        .expect("upsert");

    let fitness = service
        .compute_effective(&cvr(), &EvaluationContext::for_vertical("fitness"))
        .expect("fitness value");
    assert_eq!(fitness.effective_value, 1.8);
    assert!(fitness.has_override());

    let finance = service
        .compute_effective(&cvr(), &EvaluationContext::for_vertical("finance"))
        .expect("finance value");
    assert_eq!(finance.effective_value, 1.0);
    assert!(!finance.has_override());
}

#[test]
fn app_override_wins_over_vertical_and_market() {
    let (service, _, _) = build_service();
    service
        .upsert_override(request(&cvr(), ScopeTier::Vertical, vertical("fitness"), 1.8))
        .expect("vertical upsert");
    service
        .upsert_override(request(&cvr(), ScopeTier::Market, market("fitness", "us"), 1.3))
        .expect("market upsert");
    service
        .upsert_override(request(&cvr(), ScopeTier::App, app("com.example.app"), 2.5))
        .expect("app upsert");

    let value = service
        .compute_effective(
            &cvr(),
            &EvaluationContext::for_vertical("fitness").with_app("com.example.app"),
        )
        .expect("effective value");
    assert_eq!(value.effective_value, 2.5);
    let applied = value.applied_override.expect("app override applied");
    assert_eq!(applied.tier(), ScopeTier::App);

    let with_market = service
        .compute_effective(
            &cvr(),
            &EvaluationContext::for_vertical("fitness")
                .with_market("us")
                .with_app("com.example.app"),
        )
        .expect("effective value");
    assert_eq!(with_market.effective_value, 2.5);
}

#[test]
fn client_override_beats_market_override() {
    let (service, _, _) = build_service();
    service
        .upsert_override(request(&cvr(), ScopeTier::Market, market("fitness", "us"), 1.3))
        .expect("market upsert");
    service
        .upsert_override(request(&cvr(), ScopeTier::Client, client("org-7"), 0.8))
        .expect("client upsert");

    let value = service
        .compute_effective(
            &cvr(),
            &EvaluationContext::for_vertical("fitness")
                .with_market("us")
                .with_organization("org-7"),
        )
        .expect("effective value");
    assert_eq!(value.effective_value, 0.8);
}

#[test]
fn repeated_upsert_keeps_one_record_and_bumps_version() {
    let (service, _, overrides) = build_service();
    let first = service
        .upsert_override(request(&cvr(), ScopeTier::Vertical, vertical("fitness"), 1.8))
        .expect("first upsert");
    let second = service
        .upsert_override(request(&cvr(), ScopeTier::Vertical, vertical("fitness"), 1.8))
        .expect("second upsert");
    let third = service
        .upsert_override(request(&cvr(), ScopeTier::Vertical, vertical("fitness"), 1.8))
        .expect("third upsert");

    assert_eq!(first.version, 1);
    assert_eq!(second.version, 2);
    assert_eq!(third.version, 3);
    assert_eq!(first.id, third.id);
    assert_eq!(overrides.len(), 1);
}

#[test]
fn upsert_then_compute_multiplies_base() {
    let (service, _, _) = build_service();
    service
        .upsert_override(request(&cvr(), ScopeTier::Client, client("org-1"), 1.25))
        .expect("upsert");

    let value = service
        .compute_effective(
            &cvr(),
            &EvaluationContext {
                organization_id: Some("org-1".to_string()),
                ..EvaluationContext::default()
            },
        )
        .expect("effective value");
    assert_eq!(value.effective_value, value.base_value * 1.25);
    assert!(value.clamp.is_none());
}

#[test]
fn product_above_kind_maximum_is_clamped() {
    let (service, _, _) = build_service();
    let rule = rule_entry().id;
    service
        .upsert_override(request(&rule, ScopeTier::Vertical, vertical("fitness"), 1.6))
        .expect("upsert");

    let value = service
        .compute_effective(&rule, &EvaluationContext::for_vertical("fitness"))
        .expect("effective value");
    assert_eq!(value.effective_value, 2.0);
    let clamp = value.clamp.expect("clamp diagnostic");
    assert_eq!(clamp.bound, ClampBound::Max);
    assert!(clamp.unclamped > 2.0);
}

#[test]
fn market_tier_without_market_qualifier_is_rejected() {
    let (service, _, overrides) = build_service();
    let result =
        service.upsert_override(request(&cvr(), ScopeTier::Market, vertical("fitness"), 1.2));

    match result {
        Err(OverrideServiceError::InvalidScope(ScopeError::MissingQualifier {
            tier: ScopeTier::Market,
            missing: Qualifier::Market,
        })) => {}
        other => panic!("expected invalid scope, got {other:?}"),
    }
    assert!(overrides.is_empty());
}
