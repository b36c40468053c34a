use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque identifier scoping all change-collection state for one tenant.
///
/// Tenant ids are compared and ordered as plain strings. The only validation
/// is that the id is non-empty and contains no whitespace, since ids appear
/// verbatim in log fields and metric labels.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for TenantId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err("Tenant id cannot be empty".to_string());
        }
        if s.chars().any(char::is_whitespace) {
            return Err(format!("Invalid tenant id '{}': contains whitespace", s));
        }
        Ok(TenantId(s.to_string()))
    }
}

impl TryFrom<String> for TenantId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TenantId> for String {
    fn from(id: TenantId) -> Self {
        id.0
    }
}
