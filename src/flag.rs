use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::rule::RuleNode;

/// The deployment environment a flag is configured for.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Environment {
    Dev,
    Staging,
    Prod,
}

impl Environment {
    pub const ALL: [Environment; 3] = [Environment::Dev, Environment::Staging, Environment::Prod];

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Dev => "DEV",
            Environment::Staging => "STAGING",
            Environment::Prod => "PROD",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string does not name one of the known [Environment]s.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("unknown environment {0:?}, expected one of DEV, STAGING, PROD")]
pub struct ParseEnvironmentError(pub String);

impl FromStr for Environment {
    type Err = ParseEnvironmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Environment::ALL
            .into_iter()
            .find(|env| env.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseEnvironmentError(s.to_string()))
    }
}

/// A feature flag as configured for one tenant in one environment.
///
/// Records are produced by the management surface and handed to [crate::evaluate] as an
/// immutable snapshot. The evaluator trusts that the record belongs to the tenant and
/// environment the caller is serving.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagRecord {
    pub key: String,
    pub tenant_id: String,
    pub environment: Environment,

    /// Master switch; when false the flag is off for everyone and `rule` is ignored.
    pub enabled: bool,

    // stored rows call this column "rules"
    #[serde(alias = "rules")]
    pub rule: RuleNode,
}

impl FlagRecord {
    pub fn new(
        key: impl Into<String>,
        tenant_id: impl Into<String>,
        environment: Environment,
        enabled: bool,
        rule: RuleNode,
    ) -> Self {
        Self {
            key: key.into(),
            tenant_id: tenant_id.into(),
            environment,
            enabled,
            rule,
        }
    }
}
