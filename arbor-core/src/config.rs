//! Runtime configuration.
//!
//! A root store is built with a [`RuntimeConfig`]; every store connected
//! beneath it shares the same configuration.

use serde::{Deserialize, Serialize};

use crate::error::{Result, RuntimeError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Name attached to log events from this tree.
    pub label: Option<String>,
    /// Catch panics in model handlers and report them as
    /// [`RuntimeError::HandlerPanicked`] instead of unwinding into the caller.
    pub catch_panics: bool,
    /// Emit a `warn` event when a destroyed store is used.
    pub warn_on_stale: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            label: None,
            catch_panics: true,
            warn_on_stale: true,
        }
    }
}

impl RuntimeConfig {
    /// Parse a configuration from JSON. Missing keys take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| RuntimeError::Config(e.to_string()))
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub(crate) fn label(&self) -> &str {
        self.label.as_deref().unwrap_or("arbor")
    }
}
