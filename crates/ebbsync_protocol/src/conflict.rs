//! Conflict detection and resolution policy.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Policy applied when a pulled snapshot meets locally queued writes for
/// the same resource.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    /// The snapshot always overwrites the local copy.
    #[default]
    ServerWins,
    /// Pending local writes keep the local copy until they drain.
    ClientWins,
    /// The conflict is reported and the local copy left untouched.
    Manual,
}

impl ConflictPolicy {
    /// Returns true if this policy settles conflicts without the application.
    pub fn auto_resolves(&self) -> bool {
        !matches!(self, ConflictPolicy::Manual)
    }

    /// Returns true if a snapshot may overwrite a resource with pending writes.
    pub fn server_overwrites_pending(&self) -> bool {
        matches!(self, ConflictPolicy::ServerWins)
    }

    /// Returns the configuration name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictPolicy::ServerWins => "server-wins",
            ConflictPolicy::ClientWins => "client-wins",
            ConflictPolicy::Manual => "manual",
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "server-wins" => Ok(ConflictPolicy::ServerWins),
            "client-wins" => Ok(ConflictPolicy::ClientWins),
            "manual" => Ok(ConflictPolicy::Manual),
            other => Err(format!("unknown conflict policy: {other}")),
        }
    }
}

/// How the application settles a reported conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictResolution {
    /// Keep the local copy; pending writes replay as queued.
    KeepLocal,
    /// Overwrite the local copy with the server snapshot and discard the
    /// pending writes.
    TakeServer,
}

/// A pulled snapshot that disagrees with pending local writes.
#[derive(Debug, Clone, PartialEq)]
pub struct Conflict {
    /// Remote table.
    pub table: String,
    /// Local cache key of the resource.
    pub cache_key: String,
    /// Ids of the queue items that target the table.
    pub pending_items: Vec<String>,
    /// The snapshot the server returned (object or array).
    pub server: Value,
    /// The local copy at the time of the pull.
    pub local: Option<Value>,
}
