//! Runtime Configuration
//!
//! Configuration is per thread, like the runtime itself. Hosts usually load
//! it once at startup:
//!
//! ```rust,ignore
//! let config = RuntimeConfig::from_json(r#"{ "max_flush_passes": 50 }"#)?;
//! ripple_core::configure(config);
//! ```

use serde::{Deserialize, Serialize};

/// Default bound on the number of passes a single flush may take.
pub const DEFAULT_MAX_FLUSH_PASSES: u32 = 100;

/// Tunables for the reactive runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// How many passes a flush may take before it fails with an update-loop
    /// error.
    pub max_flush_passes: u32,

    /// Whether `inspect` hooks are installed. Ignored in release builds,
    /// where inspection is always off.
    pub inspect: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_flush_passes: DEFAULT_MAX_FLUSH_PASSES,
            inspect: true,
        }
    }
}

impl RuntimeConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Whether inspect hooks should be installed in this build.
    pub fn inspect_enabled(&self) -> bool {
        cfg!(debug_assertions) && self.inspect
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.max_flush_passes, 100);
        assert!(config.inspect);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config = RuntimeConfig::from_json(r#"{ "max_flush_passes": 7 }"#).unwrap();
        assert_eq!(config.max_flush_passes, 7);
        assert!(config.inspect);
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(RuntimeConfig::from_json("{ max_flush_passes: }").is_err());
    }

    #[test]
    fn serializes_to_json() {
        let json = serde_json::to_value(RuntimeConfig::default()).unwrap();
        assert_eq!(json["max_flush_passes"], 100);
        assert_eq!(json["inspect"], true);
    }
}
