use aso_bible::config::EngineConfig;
use aso_bible::error::AppError;
use aso_bible::registry::{
    InMemoryOverrideRepository, InMemoryRegistryRepository, OverrideService, RegistrySeed,
    ResolutionMode, SeedSummary,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

pub(crate) type RegistryService =
    OverrideService<InMemoryRegistryRepository, InMemoryOverrideRepository>;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

pub(crate) fn resolution_mode(strict: bool) -> ResolutionMode {
    if strict {
        ResolutionMode::Strict
    } else {
        ResolutionMode::Lenient
    }
}

/// Build an in-memory registry from the configured seed, or the built-in one.
pub(crate) fn build_registry(
    engine: &EngineConfig,
) -> Result<(RegistryService, SeedSummary), AppError> {
    let seed = load_seed(engine.registry_seed.as_deref())?;
    let service = OverrideService::with_mode(
        Arc::new(InMemoryRegistryRepository::default()),
        Arc::new(InMemoryOverrideRepository::default()),
        resolution_mode(engine.strict_overrides),
    );
    let summary = seed.load_into(&service)?;
    Ok((service, summary))
}

fn load_seed(path: Option<&Path>) -> Result<RegistrySeed, AppError> {
    let seed = match path {
        Some(path) => RegistrySeed::from_path(path)?,
        None => RegistrySeed::builtin()?,
    };
    Ok(seed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aso_bible::registry::{EntityId, EvaluationContext};

    #[test]
    fn builtin_registry_builds_in_strict_mode() {
        let engine = EngineConfig {
            strict_overrides: true,
            registry_seed: None,
        };
        let (service, summary) = build_registry(&engine).expect("registry builds");
        assert_eq!(service.mode(), ResolutionMode::Strict);
        assert!(summary.entries >= 1);

        let value = service
            .compute_effective(
                &EntityId::new("kpi.cvr"),
                &EvaluationContext::for_vertical("fitness"),
            )
            .expect("effective value");
        assert_eq!(value.effective_value, 1.8);
    }

    #[test]
    fn missing_seed_file_is_an_error() {
        let engine = EngineConfig {
            strict_overrides: false,
            registry_seed: Some("/nonexistent/aso-seed.json".into()),
        };
        assert!(matches!(build_registry(&engine), Err(AppError::Seed(_))));
    }
}
