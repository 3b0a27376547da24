//! Bridge configuration

use crate::error::BridgeError;
use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Bridge settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InteropConfig {
    /// Name of the library table exposed to embedded code.
    pub library_name: String,
    /// Install the library table as a global.
    pub register_global: bool,
    /// Expose the host global object as `<library>.global`.
    pub expose_global: bool,
    /// Facade insertions between forced collections of dead cache entries.
    pub cache_sweep_threshold: usize,
    pub runtime: RuntimeOptions,
}

/// Limits applied to both runtimes when a session creates them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeOptions {
    /// Heap limit in bytes, applied to each runtime.
    pub memory_limit: Option<usize>,
    /// Native stack budget of the host runtime in bytes.
    pub max_stack_size: Option<usize>,
}

impl Default for InteropConfig {
    fn default() -> Self {
        Self {
            library_name: "js".to_string(),
            register_global: true,
            expose_global: true,
            cache_sweep_threshold: 256,
            runtime: RuntimeOptions::default(),
        }
    }
}

impl InteropConfig {
    pub fn from_json_str(json: &str) -> Result<Self, BridgeError> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        if !value.is_object() {
            return Err(serde_json::Error::custom("configuration must be a JSON object").into());
        }
        Ok(serde_json::from_value(value)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, BridgeError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}
