use crate::infra::{build_registry, RegistryService};
use aso_bible::config::EngineConfig;
use aso_bible::error::AppError;
use aso_bible::registry::{EntityId, EvaluationContext, OverrideCsvImporter, OverrideRecord};
use clap::Args;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub(crate) struct EffectiveArgs {
    /// Registry entity to resolve (e.g. kpi.cvr)
    #[arg(long)]
    pub(crate) entity: String,
    /// Registry seed JSON (defaults to the built-in ASO KPI set)
    #[arg(long)]
    pub(crate) seed: Option<PathBuf>,
    /// Vertical code of the evaluation context
    #[arg(long)]
    pub(crate) vertical: Option<String>,
    /// Market code of the evaluation context
    #[arg(long)]
    pub(crate) market: Option<String>,
    /// Organization id of the evaluation context
    #[arg(long)]
    pub(crate) organization_id: Option<String>,
    /// App id of the evaluation context
    #[arg(long)]
    pub(crate) app_id: Option<String>,
    /// Fail on duplicate same-tier overrides instead of picking the newest
    #[arg(long)]
    pub(crate) strict: bool,
}

#[derive(Args, Debug)]
pub(crate) struct ImportArgs {
    /// Registry seed JSON (defaults to the built-in ASO KPI set)
    #[arg(long)]
    pub(crate) seed: Option<PathBuf>,
    /// Override CSV with entity_id,tier,vertical,market,organization_id,app_id,multiplier
    #[arg(long)]
    pub(crate) csv: PathBuf,
    /// Only print overrides of this entity
    #[arg(long)]
    pub(crate) entity: Option<String>,
}

#[derive(Debug, Serialize)]
struct ImportReport {
    applied: usize,
    overrides: Vec<OverrideRecord>,
}

pub(crate) fn run_effective(args: EffectiveArgs) -> Result<(), AppError> {
    let engine = EngineConfig {
        strict_overrides: args.strict,
        registry_seed: args.seed.clone(),
    };
    let (service, _) = build_registry(&engine)?;
    let context = EvaluationContext {
        vertical: args.vertical,
        market: args.market,
        organization_id: args.organization_id,
        app_id: args.app_id,
    };

    let value = service.compute_effective(&EntityId(args.entity), &context)?;
    println!("{}", serde_json::to_string_pretty(&value.view())?);
    Ok(())
}

pub(crate) fn run_import(args: ImportArgs) -> Result<(), AppError> {
    let engine = EngineConfig {
        strict_overrides: false,
        registry_seed: args.seed.clone(),
    };
    let (service, _) = build_registry(&engine)?;
    let requests = OverrideCsvImporter::from_path(&args.csv)?;
    let report = import_report(&service, requests, args.entity.map(EntityId))?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn import_report(
    service: &RegistryService,
    requests: Vec<aso_bible::registry::OverrideRequest>,
    entity: Option<EntityId>,
) -> Result<ImportReport, AppError> {
    let applied = service.import_overrides(requests)?.len();

    let entity_ids = match entity {
        Some(entity_id) => vec![entity_id],
        None => service
            .list_entries(&Default::default())?
            .into_iter()
            .map(|entry| entry.id)
            .collect(),
    };

    let mut overrides = Vec::new();
    for entity_id in &entity_ids {
        overrides.extend(service.list_overrides(entity_id)?);
    }

    Ok(ImportReport { applied, overrides })
}
