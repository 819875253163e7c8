//! Reasoner configuration.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasonerConfig {
    /// Apply rules during resolution. When off, only stored facts answer.
    pub inference: bool,
    /// Attach a derivation trace to every answer.
    pub explain: bool,
    pub cache: CacheConfig,
    /// Fixed-point rounds one recursive cycle may run in a single pass. A
    /// cycle that needs more hands out what it has and resumes next pass.
    pub cycle_rounds: usize,
}

impl Default for ReasonerConfig {
    fn default() -> Self {
        Self {
            inference: true,
            explain: false,
            cache: CacheConfig::default(),
            cycle_rounds: 64,
        }
    }
}

impl ReasonerConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read reasoner config {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("failed to parse reasoner config {}", path.display()))
    }

    pub fn with_inference(mut self, inference: bool) -> Self {
        self.inference = inference;
        self
    }

    pub fn with_explain(mut self, explain: bool) -> Self {
        self.explain = explain;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum live entries per cache
    pub capacity: usize,
    /// Entries not read for this long are evicted
    pub idle_timeout_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            idle_timeout_ms: 60_000,
        }
    }
}

impl CacheConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}
