//! Client surfaces that translation bundles target.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// The client surface a translation bundle is built for.
///
/// Each interface has its own bundle directory, live content object, manifest
/// and backup namespace in the object store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterfaceOrigin {
    /// Mobile application.
    Mobile,
    /// Web portal for financers.
    WebFinancer,
    /// Web portal for beneficiaries.
    WebBeneficiary,
}

impl InterfaceOrigin {
    /// Every known interface, in a stable order.
    pub const ALL: [Self; 3] = [Self::Mobile, Self::WebFinancer, Self::WebBeneficiary];

    /// Returns the wire name of this interface.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Mobile => "mobile",
            Self::WebFinancer => "web_financer",
            Self::WebBeneficiary => "web_beneficiary",
        }
    }
}

impl fmt::Display for InterfaceOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InterfaceOrigin {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|iface| iface.as_str() == s)
            .ok_or_else(|| Error::InvalidInput(format!("unknown interface '{s}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_wire_name() {
        for iface in InterfaceOrigin::ALL {
            let parsed: InterfaceOrigin = iface.as_str().parse().unwrap();
            assert_eq!(parsed, iface);
        }
    }

    #[test]
    fn rejects_unknown_names() {
        assert!("desktop".parse::<InterfaceOrigin>().is_err());
        assert!("Mobile".parse::<InterfaceOrigin>().is_err());
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&InterfaceOrigin::WebFinancer).unwrap();
        assert_eq!(json, "\"web_financer\"");
    }
}
