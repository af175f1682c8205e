use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_inline_default::serde_inline_default;

use crate::Result;

const DEFAULT_MAX_BODY_SIZE: usize = 16 << 20;
const DEFAULT_OUTBOUND_QUEUE_SIZE: usize = 1024;
const DEFAULT_PREFLIGHT_MAX_AGE: u64 = 24 * 60 * 60;

/// Server settings. Every field has a default, so `{}` is a valid config.
#[serde_inline_default]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Largest accepted batch body in bytes.
    #[serde_inline_default(DEFAULT_MAX_BODY_SIZE)]
    pub max_body_size: usize,
    /// Frames buffered per subscription connection before deliveries are dropped.
    #[serde_inline_default(DEFAULT_OUTBOUND_QUEUE_SIZE)]
    pub outbound_queue_size: usize,
    #[serde_inline_default("*".to_string())]
    pub allow_origin: String,
    /// Seconds a browser may cache the preflight answer.
    #[serde_inline_default(DEFAULT_PREFLIGHT_MAX_AGE)]
    pub preflight_max_age: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            outbound_queue_size: DEFAULT_OUTBOUND_QUEUE_SIZE,
            allow_origin: "*".to_string(),
            preflight_max_age: DEFAULT_PREFLIGHT_MAX_AGE,
        }
    }
}

impl ServerConfig {
    /// Loads a JSON config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}
