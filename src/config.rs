use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::error::Result;

const CONFIG_FILE: &str = "access-wizard/config.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub general: GeneralConfig,
    pub features: FeatureToggles,
    pub api: ApiConfig,
    pub validation: ValidationConfig,
    pub submission: SubmissionConfig,
}

impl ConsoleConfig {
    /// Default location: `$XDG_CONFIG_HOME/access-wizard/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_FILE))
    }

    pub fn load() -> Result<Self> {
        match Self::default_path() {
            Some(path) => Self::load_from(path),
            None => {
                info!("No config directory available, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: ConsoleConfig = toml::from_str(&content)?;
        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    pub fn timings(&self) -> WizardTimings {
        WizardTimings {
            debounce: Duration::from_millis(self.validation.debounce_ms),
            lookup_timeout: Duration::from_millis(self.validation.timeout_ms),
            stage_timeout: Duration::from_millis(self.submission.stage_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Use the in-memory backend instead of the remote API
    pub dryrun: bool,
}

/// Toggles that shape the step graph. Captured once per wizard session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FeatureToggles {
    /// Simplified access model; role assignment is managed elsewhere
    pub workspaces: bool,
    pub service_accounts: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    /// Name of the environment variable holding a bearer token
    pub token_env: Option<String>,
    pub request_timeout_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api/rbac/v1".to_string(),
            token_env: Some("RBAC_TOKEN".to_string()),
            request_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub debounce_ms: u64,
    pub timeout_ms: u64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 300,
            timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SubmissionConfig {
    pub stage_timeout_ms: u64,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            stage_timeout_ms: 10_000,
        }
    }
}

/// Durations the wizard applies to validation and submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WizardTimings {
    pub debounce: Duration,
    pub lookup_timeout: Duration,
    pub stage_timeout: Duration,
}

impl Default for WizardTimings {
    fn default() -> Self {
        ConsoleConfig::default().timings()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConsoleConfig::load_from(dir.path().join("absent.toml")).unwrap();
        assert!(!config.general.dryrun);
        assert_eq!(config.features, FeatureToggles::default());
        assert_eq!(config.validation.debounce_ms, 300);
    }

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[features]\nworkspaces = true\n\n[validation]\ndebounce_ms = 50\n"
        )
        .unwrap();

        let config = ConsoleConfig::load_from(file.path()).unwrap();
        assert!(config.features.workspaces);
        assert!(!config.features.service_accounts);
        assert_eq!(config.validation.debounce_ms, 50);
        assert_eq!(config.validation.timeout_ms, 5_000);
        assert_eq!(config.submission.stage_timeout_ms, 10_000);
        assert_eq!(config.timings().debounce, Duration::from_millis(50));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[features\nworkspaces = ").unwrap();
        assert!(ConsoleConfig::load_from(file.path()).is_err());
    }
}
