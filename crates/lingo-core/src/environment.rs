//! Deployment environments and the reconciliation policy attached to them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// The environment a Lingo process runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    /// A developer machine.
    #[default]
    Local,
    /// Automated test runs.
    Testing,
    /// Shared development environment.
    Dev,
    /// Pre-production. Bundles are promoted manually.
    Staging,
    /// Production.
    Production,
}

impl Environment {
    /// Returns the wire name of this environment.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Testing => "testing",
            Self::Dev => "dev",
            Self::Staging => "staging",
            Self::Production => "production",
        }
    }

    /// Returns true if automatic reconciliation may run here at all.
    ///
    /// Local environments never reconcile. Staging is skipped so bundles are
    /// promoted by an operator rather than applied automatically.
    #[must_use]
    pub const fn allows_auto_sync(&self) -> bool {
        !matches!(self, Self::Local | Self::Staging)
    }

    /// Returns true if discovered bundles must be on the approved manifest
    /// before they are applied automatically.
    #[must_use]
    pub const fn requires_manifest(&self) -> bool {
        matches!(self, Self::Staging | Self::Production)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "testing" | "test" => Ok(Self::Testing),
            "dev" | "development" => Ok(Self::Dev),
            "staging" => Ok(Self::Staging),
            "production" | "prod" => Ok(Self::Production),
            other => Err(Error::InvalidInput(format!("unknown environment '{other}'"))),
        }
    }
}
