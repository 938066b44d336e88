use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::http::{AuthPolicy, HeaderScheme};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

fn default_timeout_ms() -> u64 {
    15_000
}

fn default_staleness_secs() -> u64 {
    5 * 60
}

fn default_inactivity_secs() -> u64 {
    15 * 60
}

fn default_header_schemes() -> Vec<String> {
    vec!["bearer".to_string(), "token".to_string()]
}

/// A validation error in the configuration
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]: {}", self.field, self.message)
    }
}

/// HTTP wrapper settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct HttpConfig {
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Authorization header formats to try, in order
    #[serde(default)]
    pub header_schemes: Option<Vec<String>>,
}

/// Reference-data cache settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct CacheConfig {
    #[serde(default)]
    pub staleness_secs: Option<u64>,
}

/// Session store settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct SessionConfig {
    #[serde(default)]
    pub inactivity_secs: Option<u64>,
    /// Where the persisted session keys live
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

impl Config {
    /// Load configuration from default paths
    /// Priority: local (.atelier/config.local.toml) > project (.atelier/config.toml) > user (~/.atelier/config.toml)
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".atelier").join("config.toml");
            if user_config.exists() {
                config.merge(Self::load_from(&user_config)?);
            }
        }

        let project_config = Path::new(".atelier").join("config.toml");
        if project_config.exists() {
            config.merge(Self::load_from(&project_config)?);
        }

        // Should be gitignored
        let local_config = Path::new(".atelier").join("config.local.toml");
        if local_config.exists() {
            config.merge(Self::load_from(&local_config)?);
        }

        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        Ok(config)
    }

    /// Merge another config into this one (other takes priority for every value it sets)
    pub fn merge(&mut self, other: Config) {
        if other.base_url.is_some() {
            self.base_url = other.base_url;
        }
        if other.http.timeout_ms.is_some() {
            self.http.timeout_ms = other.http.timeout_ms;
        }
        if other.http.header_schemes.is_some() {
            self.http.header_schemes = other.http.header_schemes;
        }
        if other.cache.staleness_secs.is_some() {
            self.cache.staleness_secs = other.cache.staleness_secs;
        }
        if other.session.inactivity_secs.is_some() {
            self.session.inactivity_secs = other.session.inactivity_secs;
        }
        if other.session.path.is_some() {
            self.session.path = other.session.path;
        }
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.http.timeout_ms.unwrap_or_else(default_timeout_ms))
    }

    pub fn staleness_window(&self) -> Duration {
        Duration::from_secs(self.cache.staleness_secs.unwrap_or_else(default_staleness_secs))
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(
            self.session
                .inactivity_secs
                .unwrap_or_else(default_inactivity_secs),
        )
    }

    /// Session file path, defaulting to ~/.atelier/session.json
    pub fn session_path(&self) -> PathBuf {
        if let Some(path) = &self.session.path {
            return path.clone();
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".atelier")
            .join("session.json")
    }

    /// Build the header-scheme policy; unknown names are skipped (validate() reports them)
    pub fn auth_policy(&self) -> AuthPolicy {
        let names = self
            .http
            .header_schemes
            .clone()
            .unwrap_or_else(default_header_schemes);
        let schemes: Vec<HeaderScheme> = names
            .iter()
            .filter_map(|name| HeaderScheme::from_str(name))
            .collect();
        if schemes.is_empty() {
            AuthPolicy::default()
        } else {
            AuthPolicy::new(schemes)
        }
    }

    /// Validate configuration and return any errors found
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        let base_url = self.base_url();
        if base_url.trim().is_empty() {
            errors.push(ValidationError {
                field: "base_url".to_string(),
                message: "Must not be empty".to_string(),
            });
        } else if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            errors.push(ValidationError {
                field: "base_url".to_string(),
                message: format!("Expected an http(s) URL, got '{}'", base_url),
            });
        }

        if self.http.timeout_ms == Some(0) {
            errors.push(ValidationError {
                field: "http.timeout_ms".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if let Some(schemes) = &self.http.header_schemes {
            if schemes.is_empty() {
                errors.push(ValidationError {
                    field: "http.header_schemes".to_string(),
                    message: "At least one header scheme is required".to_string(),
                });
            }
            for (i, name) in schemes.iter().enumerate() {
                if HeaderScheme::from_str(name).is_none() {
                    errors.push(ValidationError {
                        field: format!("http.header_schemes[{}]", i),
                        message: format!("Unknown header scheme '{}', use bearer or token", name),
                    });
                }
            }
        }

        if self.cache.staleness_secs == Some(0) {
            errors.push(ValidationError {
                field: "cache.staleness_secs".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if self.session.inactivity_secs == Some(0) {
            errors.push(ValidationError {
                field: "session.inactivity_secs".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.base_url(), DEFAULT_BASE_URL);
        assert_eq!(config.timeout(), Duration::from_secs(15));
        assert_eq!(config.staleness_window(), Duration::from_secs(300));
        assert_eq!(config.inactivity_timeout(), Duration::from_secs(900));
        assert_eq!(
            config.auth_policy().schemes(),
            &[HeaderScheme::Bearer, HeaderScheme::Token]
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_toml() {
        let config: Config = toml::from_str(
            r#"
            base_url = "https://api.example.com"

            [http]
            timeout_ms = 5000
            header_schemes = ["token"]

            [cache]
            staleness_secs = 60

            [session]
            inactivity_secs = 120
            path = "/tmp/atelier-session.json"
            "#,
        )
        .unwrap();

        assert_eq!(config.base_url(), "https://api.example.com");
        assert_eq!(config.timeout(), Duration::from_millis(5000));
        assert_eq!(config.auth_policy().schemes(), &[HeaderScheme::Token]);
        assert_eq!(config.staleness_window(), Duration::from_secs(60));
        assert_eq!(config.inactivity_timeout(), Duration::from_secs(120));
        assert_eq!(
            config.session_path(),
            PathBuf::from("/tmp/atelier-session.json")
        );
    }

    #[test]
    fn test_merge_overrides_only_set_values() {
        let mut base: Config = toml::from_str(
            r#"
            base_url = "https://user.example.com"
            [cache]
            staleness_secs = 60
            "#,
        )
        .unwrap();
        let project: Config = toml::from_str(
            r#"
            [cache]
            staleness_secs = 30
            "#,
        )
        .unwrap();

        base.merge(project);
        assert_eq!(base.base_url(), "https://user.example.com");
        assert_eq!(base.staleness_window(), Duration::from_secs(30));
    }

    #[test]
    fn test_validate_collects_all_errors() {
        let mut config = Config::default();
        config.base_url = Some("ftp://nope".to_string());
        config.http.timeout_ms = Some(0);
        config.http.header_schemes = Some(vec!["bearer".to_string(), "basic".to_string()]);
        config.cache.staleness_secs = Some(0);

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors[0].field.contains("base_url"));
        assert!(errors[1].field.contains("timeout_ms"));
        assert!(errors[2].field.contains("header_schemes[1]"));
        assert!(errors[2].message.contains("basic"));
        assert!(errors[3].field.contains("staleness_secs"));
    }

    #[test]
    fn test_validate_empty_scheme_list() {
        let mut config = Config::default();
        config.http.header_schemes = Some(vec![]);
        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("At least one"));
        // Falls back to the built-in order rather than an empty policy
        assert_eq!(config.auth_policy().schemes().len(), 2);
    }
}
