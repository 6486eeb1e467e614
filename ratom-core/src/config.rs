//! Runtime Configuration
//!
//! Tunables for a [`Runtime`](crate::Runtime). The defaults suit almost every
//! application; they exist mostly so hosts can bound runaway reactions.

use serde::{Deserialize, Serialize};

/// Settings shared by every node created from one runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// How many follow-up cycles a single outermost write may trigger.
    ///
    /// Writes made by reactions while a cycle is running are replayed as
    /// separate cycles once it finishes. A reaction that keeps writing to its
    /// own input would replay forever; past this limit the remaining batches
    /// are dropped and the write returns
    /// [`Error::CascadeLimit`](crate::Error::CascadeLimit).
    pub max_cascade: usize,

    /// Log a warning when an atom is written while a derivation is being
    /// evaluated.
    pub warn_impure_writes: bool,
}

impl RuntimeConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_cascade: 100,
            warn_impure_writes: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_use_defaults() {
        let config = RuntimeConfig::from_json(r#"{"max_cascade": 7}"#).unwrap();
        assert_eq!(config.max_cascade, 7);
        assert!(config.warn_impure_writes);
    }

    #[test]
    fn json_round_trip() {
        let config = RuntimeConfig {
            max_cascade: 3,
            warn_impure_writes: false,
        };
        let parsed = RuntimeConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn rejects_wrong_types() {
        assert!(RuntimeConfig::from_json(r#"{"max_cascade": "lots"}"#).is_err());
    }
}
