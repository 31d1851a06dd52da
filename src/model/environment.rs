use std::fmt;

use serde::{Deserialize, Serialize};

/// Deployment environments, in promotion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Stage,
    Prod,
}

impl Environment {
    pub const CHAIN: [Environment; 3] = [Self::Development, Self::Stage, Self::Prod];

    /// Next environment in the promotion chain.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Development => Some(Self::Stage),
            Self::Stage => Some(Self::Prod),
            Self::Prod => None,
        }
    }

    /// Environment a promotion into `self` takes its image from.
    pub fn previous(self) -> Option<Self> {
        match self {
            Self::Development => None,
            Self::Stage => Some(Self::Development),
            Self::Prod => Some(Self::Stage),
        }
    }

    /// Name used in GitOps paths and CD application names.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Stage => "stage",
            Self::Prod => "prod",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "stage" | "staging" => Ok(Self::Stage),
            "prod" | "production" => Ok(Self::Prod),
            other => Err(format!("unknown environment: {other}")),
        }
    }
}
