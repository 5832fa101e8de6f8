use std::fmt;

use serde::{Deserialize, Serialize};

use super::domain::EvaluationContext;

/// Override specificity level. Declared least to most specific so `Ord` follows specificity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeTier {
    Vertical,
    Market,
    Client,
    App,
}

impl ScopeTier {
    /// Resolution order, most specific first.
    pub const PRIORITY: [ScopeTier; 4] = [
        ScopeTier::App,
        ScopeTier::Client,
        ScopeTier::Market,
        ScopeTier::Vertical,
    ];

    pub fn label(self) -> &'static str {
        match self {
            ScopeTier::Vertical => "vertical",
            ScopeTier::Market => "market",
            ScopeTier::Client => "client",
            ScopeTier::App => "app",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "vertical" => Some(ScopeTier::Vertical),
            "market" => Some(ScopeTier::Market),
            "client" | "organization" => Some(ScopeTier::Client),
            "app" => Some(ScopeTier::App),
            _ => None,
        }
    }

    fn required(self) -> &'static [Qualifier] {
        match self {
            ScopeTier::Vertical => &[Qualifier::Vertical],
            ScopeTier::Market => &[Qualifier::Vertical, Qualifier::Market],
            ScopeTier::Client => &[Qualifier::OrganizationId],
            ScopeTier::App => &[Qualifier::AppId],
        }
    }
}

impl fmt::Display for ScopeTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Names of the qualifier fields, used in scope validation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Qualifier {
    Vertical,
    Market,
    OrganizationId,
    AppId,
}

impl Qualifier {
    const ALL: [Qualifier; 4] = [
        Qualifier::Vertical,
        Qualifier::Market,
        Qualifier::OrganizationId,
        Qualifier::AppId,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Qualifier::Vertical => "vertical",
            Qualifier::Market => "market",
            Qualifier::OrganizationId => "organization_id",
            Qualifier::AppId => "app_id",
        }
    }
}

/// Loosely shaped qualifiers as they arrive from editors and CSV files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeQualifiers {
    #[serde(default)]
    pub vertical: Option<String>,
    #[serde(default)]
    pub market: Option<String>,
    #[serde(default)]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub app_id: Option<String>,
}

impl ScopeQualifiers {
    fn value(&self, qualifier: Qualifier) -> Option<&str> {
        let raw = match qualifier {
            Qualifier::Vertical => self.vertical.as_deref(),
            Qualifier::Market => self.market.as_deref(),
            Qualifier::OrganizationId => self.organization_id.as_deref(),
            Qualifier::AppId => self.app_id.as_deref(),
        };
        raw.map(str::trim).filter(|value| !value.is_empty())
    }
}

/// Qualifier set did not match the claimed tier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScopeError {
    #[error("{tier} scope requires qualifier '{}'", .missing.label())]
    MissingQualifier { tier: ScopeTier, missing: Qualifier },
    #[error("{tier} scope does not accept qualifier '{}'", .unexpected.label())]
    UnexpectedQualifier {
        tier: ScopeTier,
        unexpected: Qualifier,
    },
    #[error("unknown scope tier '{0}'")]
    UnknownTier(String),
}

/// Validated override scope with a fixed qualifier shape per tier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "tier", rename_all = "snake_case")]
pub enum OverrideScope {
    Vertical { vertical: String },
    Market { vertical: String, market: String },
    Client { organization_id: String },
    App { app_id: String },
}

impl OverrideScope {
    /// Validate a loose qualifier set against `tier`, rejecting missing and surplus fields.
    pub fn new(tier: ScopeTier, qualifiers: &ScopeQualifiers) -> Result<Self, ScopeError> {
        let required = tier.required();
        for qualifier in Qualifier::ALL {
            let present = qualifiers.value(qualifier).is_some();
            let expected = required.contains(&qualifier);
            if expected && !present {
                return Err(ScopeError::MissingQualifier {
                    tier,
                    missing: qualifier,
                });
            }
            if present && !expected {
                return Err(ScopeError::UnexpectedQualifier {
                    tier,
                    unexpected: qualifier,
                });
            }
        }

        let owned =
            |qualifier: Qualifier| qualifiers.value(qualifier).unwrap_or_default().to_string();
        Ok(match tier {
            ScopeTier::Vertical => OverrideScope::Vertical {
                vertical: owned(Qualifier::Vertical),
            },
            ScopeTier::Market => OverrideScope::Market {
                vertical: owned(Qualifier::Vertical),
                market: owned(Qualifier::Market),
            },
            ScopeTier::Client => OverrideScope::Client {
                organization_id: owned(Qualifier::OrganizationId),
            },
            ScopeTier::App => OverrideScope::App {
                app_id: owned(Qualifier::AppId),
            },
        })
    }

    pub fn vertical(vertical: impl Into<String>) -> Self {
        OverrideScope::Vertical {
            vertical: vertical.into(),
        }
    }

    pub fn market(vertical: impl Into<String>, market: impl Into<String>) -> Self {
        OverrideScope::Market {
            vertical: vertical.into(),
            market: market.into(),
        }
    }

    pub fn client(organization_id: impl Into<String>) -> Self {
        OverrideScope::Client {
            organization_id: organization_id.into(),
        }
    }

    pub fn app(app_id: impl Into<String>) -> Self {
        OverrideScope::App {
            app_id: app_id.into(),
        }
    }

    pub fn tier(&self) -> ScopeTier {
        match self {
            OverrideScope::Vertical { .. } => ScopeTier::Vertical,
            OverrideScope::Market { .. } => ScopeTier::Market,
            OverrideScope::Client { .. } => ScopeTier::Client,
            OverrideScope::App { .. } => ScopeTier::App,
        }
    }

    pub fn qualifiers(&self) -> ScopeQualifiers {
        match self {
            OverrideScope::Vertical { vertical } => ScopeQualifiers {
                vertical: Some(vertical.clone()),
                ..ScopeQualifiers::default()
            },
            OverrideScope::Market { vertical, market } => ScopeQualifiers {
                vertical: Some(vertical.clone()),
                market: Some(market.clone()),
                ..ScopeQualifiers::default()
            },
            OverrideScope::Client { organization_id } => ScopeQualifiers {
                organization_id: Some(organization_id.clone()),
                ..ScopeQualifiers::default()
            },
            OverrideScope::App { app_id } => ScopeQualifiers {
                app_id: Some(app_id.clone()),
                ..ScopeQualifiers::default()
            },
        }
    }

    /// Whether this scope applies to `context`. Absent context fields never match.
    pub fn matches(&self, context: &EvaluationContext) -> bool {
        match self {
            OverrideScope::Vertical { vertical } => same(vertical, &context.vertical),
            OverrideScope::Market { vertical, market } => {
                same(vertical, &context.vertical) && same(market, &context.market)
            }
            OverrideScope::Client { organization_id } => {
                same(organization_id, &context.organization_id)
            }
            OverrideScope::App { app_id } => same(app_id, &context.app_id),
        }
    }
}

fn same(wanted: &str, actual: &Option<String>) -> bool {
    actual.as_deref().map(str::trim) == Some(wanted)
}

impl fmt::Display for OverrideScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverrideScope::Vertical { vertical } => write!(f, "vertical:{vertical}"),
            OverrideScope::Market { vertical, market } => {
                write!(f, "market:{vertical}/{market}")
            }
            OverrideScope::Client { organization_id } => write!(f, "client:{organization_id}"),
            OverrideScope::App { app_id } => write!(f, "app:{app_id}"),
        }
    }
}
