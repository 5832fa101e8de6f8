use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Deserializer};

use super::domain::EntityId;
use super::scope::{ScopeQualifiers, ScopeTier};
use super::service::OverrideRequest;

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("failed to read override CSV: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid override CSV data on row {row}: {source}")]
    Csv { row: usize, source: csv::Error },
    #[error("unknown scope tier '{value}' on row {row}")]
    UnknownTier { row: usize, value: String },
}

/// Parses admin CSV exports of overrides into write requests.
///
/// Expected headers: `entity_id,tier,vertical,market,organization_id,app_id,multiplier`.
/// Rows are only parsed here; scope shape and entity checks happen when the requests are
/// applied through the service.
pub struct OverrideCsvImporter;

impl OverrideCsvImporter {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Vec<OverrideRequest>, ImportError> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Vec<OverrideRequest>, ImportError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);
        let mut requests = Vec::new();

        for (index, record) in csv_reader.deserialize::<OverrideRow>().enumerate() {
            let row = index + 1;
            let parsed = record.map_err(|source| ImportError::Csv { row, source })?;
            let tier = ScopeTier::parse(&parsed.tier).ok_or_else(|| ImportError::UnknownTier {
                row,
                value: parsed.tier.clone(),
            })?;

            requests.push(OverrideRequest {
                entity_id: EntityId(parsed.entity_id),
                tier,
                qualifiers: ScopeQualifiers {
                    vertical: parsed.vertical,
                    market: parsed.market,
                    organization_id: parsed.organization_id,
                    app_id: parsed.app_id,
                },
                multiplier: parsed.multiplier,
                expected_version: None,
            });
        }

        Ok(requests)
    }
}

#[derive(Debug, Deserialize)]
struct OverrideRow {
    entity_id: String,
    tier: String,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    vertical: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    market: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    organization_id: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    app_id: Option<String>,
    multiplier: f64,
}

fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    Ok(opt.filter(|value| !value.trim().is_empty()))
}
