//! TOML-based settings for the report engine.
//!
//! Supports a config file (`relato.toml`) with environment variable
//! expansion for secrets.
//!
//! Example configuration:
//! ```toml
//! [crm]
//! base_url = "https://crm.example.com/api"
//! token = "${CRM_TOKEN}"
//! timeout_secs = 30
//!
//! [cache]
//! enabled = true
//! default_ttl_secs = 600
//!
//! [harvest]
//! page_cap = 10
//! ```

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Upstream CRM API.
    pub crm: CrmSettings,

    /// Result cache defaults.
    pub cache: CacheSettings,

    /// Pagination harvester.
    pub harvest: HarvestSettings,
}

impl Settings {
    /// Load settings from a TOML file, expanding `${ENV_VAR}` references
    /// in the CRM token and base URL.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse settings from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, SettingsError> {
        let mut settings: Settings = toml::from_str(content)?;
        settings.crm.base_url = expand_env_vars(&settings.crm.base_url)?;
        settings.crm.token = expand_env_vars(&settings.crm.token)?;
        Ok(settings)
    }
}

/// Upstream CRM connection settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CrmSettings {
    /// Base URL of the CRM API.
    pub base_url: String,

    /// Authorization token (supports `${ENV_VAR}` expansion).
    pub token: String,

    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for CrmSettings {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            token: String::new(),
            timeout_secs: 30,
        }
    }
}

/// Result-cache settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Master switch; when off, every report run recomputes.
    pub enabled: bool,

    /// TTL applied when a report does not declare its own.
    pub default_ttl_secs: i64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl_secs: 600,
        }
    }
}

/// Pagination harvester settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HarvestSettings {
    /// Hard bound on pages fetched per harvest, cyclic `next` links
    /// included.
    pub page_cap: usize,
}

impl Default for HarvestSettings {
    fn default() -> Self {
        Self { page_cap: 10 }
    }
}

/// Expand `${VAR}` and `$VAR` references from the environment.
pub fn expand_env_vars(s: &str) -> Result<String, SettingsError> {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            result.push(c);
            continue;
        }

        if chars.peek() == Some(&'{') {
            chars.next();
            let mut var_name = String::new();
            while let Some(&ch) = chars.peek() {
                if ch == '}' {
                    chars.next();
                    break;
                }
                var_name.push(ch);
                chars.next();
            }
            let value =
                env::var(&var_name).map_err(|_| SettingsError::MissingEnvVar(var_name.clone()))?;
            result.push_str(&value);
        } else {
            let mut var_name = String::new();
            while let Some(&ch) = chars.peek() {
                if ch.is_alphanumeric() || ch == '_' {
                    var_name.push(ch);
                    chars.next();
                } else {
                    break;
                }
            }
            if var_name.is_empty() {
                result.push('$');
            } else {
                let value = env::var(&var_name)
                    .map_err(|_| SettingsError::MissingEnvVar(var_name.clone()))?;
                result.push_str(&value);
            }
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let settings = Settings::default();
        assert_eq!(settings.crm.timeout_secs, 30);
        assert_eq!(settings.harvest.page_cap, 10);
        assert!(settings.cache.enabled);
    }

    #[test]
    fn parses_partial_toml() {
        let settings = Settings::from_toml(
            r#"
            [crm]
            base_url = "https://crm.example.com"
            token = "abc"

            [harvest]
            page_cap = 3
            "#,
        )
        .unwrap();

        assert_eq!(settings.crm.base_url, "https://crm.example.com");
        assert_eq!(settings.harvest.page_cap, 3);
        assert_eq!(settings.cache.default_ttl_secs, 600);
    }

    #[test]
    fn expands_env_vars_in_token() {
        env::set_var("RELATO_TEST_TOKEN", "secret");
        let settings = Settings::from_toml(
            r#"
            [crm]
            base_url = "https://crm.example.com"
            token = "${RELATO_TEST_TOKEN}"
            "#,
        )
        .unwrap();
        assert_eq!(settings.crm.token, "secret");
    }

    #[test]
    fn loads_from_a_file_and_reports_missing_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relato.toml");
        fs::write(&path, "[crm]\nbase_url = \"https://crm.example\"\ntoken = \"abc\"\n").unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.crm.token, "abc");

        let missing = Settings::load(dir.path().join("absent.toml"));
        assert!(matches!(missing, Err(SettingsError::FileNotFound(_))));
    }

    #[test]
    fn missing_env_var_is_an_error() {
        let result = Settings::from_toml(
            r#"
            [crm]
            token = "${RELATO_DEFINITELY_MISSING_VAR}"
            "#,
        );
        assert!(matches!(result, Err(SettingsError::MissingEnvVar(_))));
    }
}
