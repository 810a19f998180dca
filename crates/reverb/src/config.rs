//! Verifier configuration loading.

use crate::error::VerifyError;
use crate::tolerance::{ComparisonMode, ToleranceConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// File-supplied configuration; every field has a default so partial
/// files are fine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VerifierConfig {
    pub tolerances: ToleranceConfig,
    pub mode: ComparisonMode,
    /// Base URL of the service under verification for live replay.
    pub target_base_url: Option<String>,
    pub request_timeout_secs: u64,
    pub treat_added_headers_as_breaking: bool,
    /// Effective-compatibility score gate for `--fail-on-threshold`.
    pub threshold: f64,
    /// When set, contract import prefers this 2xx status over the first
    /// one seen.
    pub prefer_status: Option<u16>,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        VerifierConfig {
            tolerances: ToleranceConfig::default(),
            mode: ComparisonMode::Default,
            target_base_url: None,
            request_timeout_secs: 30,
            treat_added_headers_as_breaking: true,
            threshold: 100.0,
            prefer_status: None,
        }
    }
}

impl VerifierConfig {
    /// Load from a JSON or YAML file, dispatching on extension.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, VerifyError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let config: VerifierConfig = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&contents)
                .map_err(|e| VerifyError::input(format!("malformed config {path:?}: {e}")))?,
            Some("yaml") | Some("yml") => serde_yaml::from_str(&contents)
                .map_err(|e| VerifyError::input(format!("malformed config {path:?}: {e}")))?,
            other => {
                return Err(VerifyError::input(format!(
                    "unsupported config file extension '{}'",
                    other.unwrap_or("")
                )))
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), VerifyError> {
        if !(0.0..=100.0).contains(&self.threshold) {
            return Err(VerifyError::input(format!(
                "threshold must be within 0-100, got {}",
                self.threshold
            )));
        }
        if self.request_timeout_secs == 0 {
            return Err(VerifyError::input("requestTimeoutSecs must be positive"));
        }
        Ok(())
    }
}
