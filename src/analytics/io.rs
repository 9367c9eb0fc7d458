use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::analytics::backoff::BackoffPolicy;
use crate::analytics::discovery::MAX_PAGE_SIZE;

#[derive(Error, Debug)]
pub(crate) enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub(crate) type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub(crate) struct Paths {
    pub(crate) database_file: String,
    pub(crate) credentials_file: String,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            database_file: "video_analytics.db".to_string(),
            credentials_file: "credentials.json".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub(crate) struct Pools {
    pub(crate) report_threads: usize,
}

impl Default for Pools {
    fn default() -> Self {
        Self { report_threads: 5 }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub(crate) struct Backoff {
    pub(crate) initial_exponent: u32,
    pub(crate) max_exponent: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        let policy = BackoffPolicy::default();
        Self {
            initial_exponent: policy.initial_exponent,
            max_exponent: policy.max_exponent,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub(crate) struct Api {
    pub(crate) page_size: u32,
    pub(crate) request_timeout_secs: u64,
    pub(crate) connect_timeout_secs: u64,
    pub(crate) data_api_url: String,
    pub(crate) analytics_api_url: String,
    pub(crate) token_url: String,
}

impl Default for Api {
    fn default() -> Self {
        Self {
            page_size: MAX_PAGE_SIZE,
            request_timeout_secs: 60,
            connect_timeout_secs: 30,
            data_api_url: "https://www.googleapis.com/youtube/v3".to_string(),
            analytics_api_url: "https://youtubeanalytics.googleapis.com/v2".to_string(),
            token_url: "https://oauth2.googleapis.com/token".to_string(),
        }
    }
}

/// Contents of `config.toml`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(default)]
pub(crate) struct AppConfig {
    pub(crate) paths: Paths,
    pub(crate) pools: Pools,
    pub(crate) backoff: Backoff,
    pub(crate) api: Api,
}

impl AppConfig {
    /// Loads the config file, writing one with default values if it does not exist.
    ///
    /// A file that fails to parse is moved aside to `<name>.backup` and replaced by defaults.
    pub(crate) fn load_or_create(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            info!("Creating config file {}...", path.display());
            let config = AppConfig::default();
            fs::write(path, toml::to_string_pretty(&config)?)?;
            return Ok(config);
        }

        let content = fs::read_to_string(path)?;
        let config = match toml::from_str::<AppConfig>(&content) {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to parse {}: {}", path.display(), e);
                info!("Backing up the old config and writing one with default values");
                let backup = path.with_extension("toml.backup");
                if let Err(backup_err) = fs::rename(path, &backup) {
                    warn!("Failed to back up old config: {}", backup_err);
                }
                let config = AppConfig::default();
                fs::write(path, toml::to_string_pretty(&config)?)?;
                config
            }
        };

        config.validate()?;
        Ok(config)
    }

    pub(crate) fn validate(&self) -> ConfigResult<()> {
        if self.pools.report_threads == 0 {
            return Err(ConfigError::Invalid(
                "pools.report_threads must be at least 1".to_string(),
            ));
        }
        if !(1..=MAX_PAGE_SIZE).contains(&self.api.page_size) {
            return Err(ConfigError::Invalid(format!(
                "api.page_size must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }
        if self.backoff.max_exponent < self.backoff.initial_exponent {
            return Err(ConfigError::Invalid(
                "backoff.max_exponent must not be lower than backoff.initial_exponent".to_string(),
            ));
        }
        // 2^63 seconds no longer fits a Duration.
        if self.backoff.max_exponent > 62 {
            return Err(ConfigError::Invalid(
                "backoff.max_exponent must be at most 62".to_string(),
            ));
        }
        Ok(())
    }

    pub(crate) fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            initial_exponent: self.backoff.initial_exponent,
            max_exponent: self.backoff.max_exponent,
        }
    }
}

/// OAuth client and refresh token used to obtain access tokens.
#[derive(Serialize, Deserialize, Clone, Default, PartialEq)]
pub(crate) struct Credentials {
    pub(crate) client_id: String,
    pub(crate) client_secret: String,
    pub(crate) refresh_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) access_token: Option<String>,
}

impl Credentials {
    /// Loads the credential file. When it does not exist a blank template is
    /// written in its place and `None` is returned.
    pub(crate) fn load_or_template(path: &Path) -> ConfigResult<Option<Self>> {
        if !path.exists() {
            fs::write(path, serde_json::to_string_pretty(&Credentials::default())?)?;
            info!("The credentials file {} was created.", path.display());
            info!("Fill in client_id, client_secret and refresh_token from an authorized OAuth client, then run again.");
            return Ok(None);
        }

        let credentials: Credentials = serde_json::from_str(&fs::read_to_string(path)?)?;
        Ok(Some(credentials))
    }

    /// Whether any of the fields needed for a token refresh is blank.
    pub(crate) fn is_incomplete(&self) -> bool {
        self.client_id.is_empty() || self.client_secret.is_empty() || self.refresh_token.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"*".repeat(self.client_secret.len()))
            .field("refresh_token", &"*".repeat(self.refresh_token.len()))
            .field("access_token", &self.access_token.as_ref().map(|_| "***"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let config = AppConfig::load_or_create(&path).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.pools.report_threads, 5);
        assert_eq!(config.backoff_policy(), BackoffPolicy::default());
        assert!(path.exists());

        let reloaded = AppConfig::load_or_create(&path).unwrap();
        assert_eq!(reloaded, config);
    }

    #[test]
    fn partial_config_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[pools]\nreport_threads = 2\n\n[backoff]\nmax_exponent = 9\n").unwrap();

        let config = AppConfig::load_or_create(&path).unwrap();
        assert_eq!(config.pools.report_threads, 2);
        assert_eq!(config.backoff.initial_exponent, 6);
        assert_eq!(config.backoff.max_exponent, 9);
        assert_eq!(config.paths.database_file, "video_analytics.db");
    }

    #[test]
    fn unparsable_config_is_backed_up_and_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "pools = [not toml").unwrap();

        let config = AppConfig::load_or_create(&path).unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(dir.path().join("config.toml.backup").exists());
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut config = AppConfig::default();
        config.pools.report_threads = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.api.page_size = 51;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.backoff.max_exponent = 3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_credentials_write_a_template() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        assert!(Credentials::load_or_template(&path).unwrap().is_none());
        let template = Credentials::load_or_template(&path).unwrap().unwrap();
        assert!(template.is_incomplete());
        assert_eq!(template.access_token, None);
    }

    #[test]
    fn credentials_debug_output_masks_secrets() {
        let credentials = Credentials {
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            refresh_token: "refresh".to_string(),
            access_token: Some("token".to_string()),
        };
        let debug = format!("{credentials:?}");
        assert!(debug.contains("\"client\""));
        assert!(!debug.contains("secret\""));
        assert!(!debug.contains("refresh\""));
        assert!(!debug.contains("token\""));
    }
}
