//! TOML configuration for the tandem daemon, loaded from `TANDEM_CONFIG` or
//! `~/.config/tandem/config.toml`, with environment overrides for secrets.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

pub const ENV_TANDEM_CONFIG: &str = "TANDEM_CONFIG";
pub const ENV_REDMINE_API_KEY: &str = "TANDEM_REDMINE_API_KEY";
pub const ENV_GITLAB_TOKEN: &str = "TANDEM_GITLAB_TOKEN";

const DEFAULT_CUSTOM_FIELD_NAME: &str = "Gitlab Repo";
const DEFAULT_POLLING_ENABLED: bool = true;
const DEFAULT_POLLING_INTERVAL_SECS: u64 = 60;
const DEFAULT_POLLING_JITTER_SECS: u64 = 5;
const MIN_POLLING_INTERVAL_SECS: u64 = 5;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0}")]
    Message(String),
}

impl ConfigError {
    fn configuration(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

#[derive(Clone, Deserialize)]
pub struct RedmineSection {
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub public_url: Option<String>,
    #[serde(default = "default_custom_field_name")]
    pub custom_field_name: String,
}

impl fmt::Debug for RedmineSection {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("RedmineSection")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("public_url", &self.public_url)
            .field("custom_field_name", &self.custom_field_name)
            .finish()
    }
}

#[derive(Clone, Deserialize)]
pub struct GitlabSection {
    pub base_url: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub public_url: Option<String>,
}

impl fmt::Debug for GitlabSection {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("GitlabSection")
            .field("base_url", &self.base_url)
            .field("token", &"<redacted>")
            .field("public_url", &self.public_url)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncSection {
    pub category_keys: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollingSection {
    #[serde(default = "default_polling_enabled")]
    pub enabled: bool,
    #[serde(default = "default_polling_interval_secs")]
    pub interval_seconds: u64,
    #[serde(default = "default_polling_jitter_secs")]
    pub jitter_seconds: u64,
}

impl Default for PollingSection {
    fn default() -> Self {
        Self {
            enabled: DEFAULT_POLLING_ENABLED,
            interval_seconds: DEFAULT_POLLING_INTERVAL_SECS,
            jitter_seconds: DEFAULT_POLLING_JITTER_SECS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageSection {
    /// Path of the SQLite database file.
    pub connection_string: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HealthSection {
    /// Socket address for `/health` and `/poll/status`; absent disables the
    /// HTTP surface.
    #[serde(default)]
    pub bind_address: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TandemConfig {
    pub redmine: RedmineSection,
    pub gitlab: GitlabSection,
    pub sync: SyncSection,
    #[serde(default)]
    pub polling: PollingSection,
    pub storage: StorageSection,
    #[serde(default)]
    pub health: HealthSection,
}

fn default_custom_field_name() -> String {
    DEFAULT_CUSTOM_FIELD_NAME.to_owned()
}

fn default_polling_enabled() -> bool {
    DEFAULT_POLLING_ENABLED
}

fn default_polling_interval_secs() -> u64 {
    DEFAULT_POLLING_INTERVAL_SECS
}

fn default_polling_jitter_secs() -> u64 {
    DEFAULT_POLLING_JITTER_SECS
}

pub fn load_from_env() -> Result<TandemConfig, ConfigError> {
    let path = config_path_from_env()?;
    load_from_path(path)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<TandemConfig, ConfigError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|err| {
        ConfigError::configuration(format!(
            "cannot read config file {}: {err}",
            path.display()
        ))
    })?;
    let mut config: TandemConfig = toml::from_str(&raw).map_err(|err| {
        ConfigError::configuration(format!(
            "cannot parse config file {}: {err}",
            path.display()
        ))
    })?;

    apply_env_overrides(&mut config);
    validate(&config)?;
    Ok(config)
}

pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    let home = resolve_home_dir().ok_or_else(|| {
        ConfigError::configuration("Unable to resolve home directory from HOME or USERPROFILE")
    })?;

    Ok(home.join(".config").join("tandem").join("config.toml"))
}

fn config_path_from_env() -> Result<PathBuf, ConfigError> {
    match std::env::var(ENV_TANDEM_CONFIG) {
        Ok(raw) if !raw.trim().is_empty() => Ok(PathBuf::from(raw.trim())),
        _ => default_config_path(),
    }
}

fn resolve_home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}

fn apply_env_overrides(config: &mut TandemConfig) {
    if let Ok(api_key) = std::env::var(ENV_REDMINE_API_KEY) {
        if !api_key.trim().is_empty() {
            config.redmine.api_key = api_key.trim().to_owned();
        }
    }
    if let Ok(token) = std::env::var(ENV_GITLAB_TOKEN) {
        if !token.trim().is_empty() {
            config.gitlab.token = token.trim().to_owned();
        }
    }
}

fn validate(config: &TandemConfig) -> Result<(), ConfigError> {
    require_url("redmine.base_url", &config.redmine.base_url)?;
    require_url("gitlab.base_url", &config.gitlab.base_url)?;
    if let Some(url) = &config.redmine.public_url {
        require_url("redmine.public_url", url)?;
    }
    if let Some(url) = &config.gitlab.public_url {
        require_url("gitlab.public_url", url)?;
    }

    if config.redmine.api_key.trim().is_empty() {
        return Err(ConfigError::configuration(format!(
            "redmine.api_key is required (set it in the config file or via {ENV_REDMINE_API_KEY})"
        )));
    }
    if config.gitlab.token.trim().is_empty() {
        return Err(ConfigError::configuration(format!(
            "gitlab.token is required (set it in the config file or via {ENV_GITLAB_TOKEN})"
        )));
    }
    if config.redmine.custom_field_name.trim().is_empty() {
        return Err(ConfigError::configuration(
            "redmine.custom_field_name cannot be empty",
        ));
    }

    if config.sync.category_keys.is_empty()
        || config
            .sync
            .category_keys
            .iter()
            .any(|key| key.trim().is_empty())
    {
        return Err(ConfigError::configuration(
            "sync.category_keys must list at least one non-empty category",
        ));
    }

    if config.polling.interval_seconds < MIN_POLLING_INTERVAL_SECS {
        return Err(ConfigError::configuration(format!(
            "polling.interval_seconds must be at least {MIN_POLLING_INTERVAL_SECS}"
        )));
    }

    if config.storage.connection_string.trim().is_empty() {
        return Err(ConfigError::configuration(
            "storage.connection_string is required",
        ));
    }

    Ok(())
}

fn require_url(field: &str, value: &str) -> Result<(), ConfigError> {
    let value = value.trim();
    let lowered = value.to_ascii_lowercase();
    if value.is_empty() || !(lowered.starts_with("http://") || lowered.starts_with("https://")) {
        return Err(ConfigError::configuration(format!(
            "{field} must be an absolute http(s) URL"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
        [redmine]
        base_url = "https://redmine.example.com"
        api_key = "redmine-key"

        [gitlab]
        base_url = "https://gitlab.example.com"
        token = "gitlab-token"

        [sync]
        category_keys = ["Feature", "Bug", "Task"]

        [storage]
        connection_string = "./tandem.db"
    "#;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(contents.as_bytes()).expect("write");
        file
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let file = write_config(MINIMAL);
        let config = load_from_path(file.path()).expect("load");

        assert_eq!(config.redmine.custom_field_name, "Gitlab Repo");
        assert!(config.polling.enabled);
        assert_eq!(config.polling.interval_seconds, 60);
        assert_eq!(config.polling.jitter_seconds, 5);
        assert!(config.health.bind_address.is_none());
    }

    #[test]
    fn short_intervals_are_rejected() {
        let contents = MINIMAL.replace(
            "[storage]",
            "[polling]\ninterval_seconds = 2\n\n[storage]",
        );
        let file = write_config(&contents);
        let error = load_from_path(file.path()).expect_err("short interval");
        assert!(error.to_string().contains("interval_seconds"));
    }

    #[test]
    fn empty_category_keys_are_rejected() {
        let contents = MINIMAL.replace(
            "category_keys = [\"Feature\", \"Bug\", \"Task\"]",
            "category_keys = []",
        );
        let file = write_config(&contents);
        let error = load_from_path(file.path()).expect_err("empty keys");
        assert!(error.to_string().contains("category_keys"));
    }

    #[test]
    fn missing_secrets_are_rejected() {
        let contents = MINIMAL.replace("api_key = \"redmine-key\"", "");
        let file = write_config(&contents);
        let error = load_from_path(file.path()).expect_err("missing key");
        assert!(error.to_string().contains("redmine.api_key"));
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let file = write_config(MINIMAL);
        let config = load_from_path(file.path()).expect("load");
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("redmine-key"));
        assert!(!rendered.contains("gitlab-token"));
    }
}
