use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Kind of operation captured in a change collection entry.
///
/// Serialized with the single-letter codes used by replicated log entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationType {
    #[serde(rename = "i")]
    Insert,
    #[serde(rename = "u")]
    Update,
    #[serde(rename = "d")]
    Delete,
    #[serde(rename = "c")]
    Command,
    #[serde(rename = "n")]
    Noop,
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationType::Insert => write!(f, "i"),
            OperationType::Update => write!(f, "u"),
            OperationType::Delete => write!(f, "d"),
            OperationType::Command => write!(f, "c"),
            OperationType::Noop => write!(f, "n"),
        }
    }
}

impl std::str::FromStr for OperationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "i" => Ok(OperationType::Insert),
            "u" => Ok(OperationType::Update),
            "d" => Ok(OperationType::Delete),
            "c" => Ok(OperationType::Command),
            "n" => Ok(OperationType::Noop),
            _ => Err(format!("Invalid operation type: {}", s)),
        }
    }
}

/// A logged operation stored in a tenant's change collection.
///
/// Documents are immutable once written: the capture pipeline appends them
/// and the expired-change remover deletes them. Nothing ever updates one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeDocument {
    /// Operation type
    #[serde(rename = "op")]
    pub operation: OperationType,
    /// Namespace (`db.collection`) the operation applied to
    #[serde(rename = "ns")]
    pub namespace: String,
    /// Operand of the operation (the inserted document for inserts)
    #[serde(rename = "o")]
    pub payload: JsonValue,
    /// Wall-clock time at which the originating operation was applied
    #[serde(rename = "wall")]
    pub wall_time: DateTime<Utc>,
}

impl ChangeDocument {
    /// Build an insert entry for `namespace` applied at `wall_time`.
    pub fn insert(namespace: impl Into<String>, payload: JsonValue, wall_time: DateTime<Utc>) -> Self {
        Self {
            operation: OperationType::Insert,
            namespace: namespace.into(),
            payload,
            wall_time,
        }
    }
}
