//! Configuration loading for procrelay.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Error;
pub type Result<T> = std::result::Result<T, Error>;

/// Group id used for FIFO queues when none is configured.
pub const DEFAULT_FIFO_GROUP_ID: &str = "SOAMC_DEFAULT_GROUP";

/// Get the procrelay home directory (~/.procrelay).
pub fn get_home_dir() -> Result<PathBuf> {
    let home = directories::UserDirs::new()
        .ok_or_else(|| Error::Config("Could not determine home directory".to_string()))?;

    Ok(home.home_dir().join(".procrelay"))
}

/// Get the default settings file path.
pub fn get_settings_path() -> Result<PathBuf> {
    Ok(get_home_dir()?.join("settings.json"))
}

/// Load settings from an explicit path.
pub fn load_settings_from(path: &Path) -> Result<Settings> {
    if !path.exists() {
        return Err(Error::Config(format!(
            "Settings file not found at {}",
            path.display()
        )));
    }

    let content = std::fs::read_to_string(path)?;
    let settings: Settings = serde_json::from_str(&content)?;
    validate_settings(&settings)?;
    Ok(settings)
}

/// Where loaded settings came from.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingsSource {
    File(PathBuf),
    /// The file was missing, so defaults were used.
    Defaults(PathBuf),
}

impl SettingsSource {
    /// Report the source. Call once logging is initialized.
    pub fn log(&self) {
        match self {
            SettingsSource::File(path) => {
                tracing::debug!("Loaded settings from {}", path.display())
            }
            SettingsSource::Defaults(path) => {
                tracing::warn!("Settings file {} not found, using defaults", path.display())
            }
        }
    }
}

/// Load settings from `path`, or ~/.procrelay/settings.json when not given.
///
/// A missing file falls back to defaults; a malformed one is an error.
pub fn load_settings(path: Option<&Path>) -> Result<(Settings, SettingsSource)> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => get_settings_path()?,
    };

    if !path.exists() {
        return Ok((Settings::default(), SettingsSource::Defaults(path)));
    }

    let settings = load_settings_from(&path)?;
    Ok((settings, SettingsSource::File(path)))
}

fn validate_settings(settings: &Settings) -> Result<()> {
    url::Url::parse(&settings.processing_api.base_url).map_err(|e| {
        Error::Config(format!(
            "processing_api.base_url '{}' is not a valid URL: {}",
            settings.processing_api.base_url, e
        ))
    })?;

    if settings.transport.reply_prefix.is_empty() {
        return Err(Error::Config(
            "transport.reply_prefix must not be empty".to_string(),
        ));
    }

    let timeouts = &settings.timeouts;
    if timeouts.reply_seconds == 0 || timeouts.execute_seconds == 0 || timeouts.deploy_seconds == 0
    {
        return Err(Error::Config("timeouts must be greater than zero".to_string()));
    }
    Ok(())
}

/// Queue transport configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TransportConfig {
    /// Root directory holding the file-backed queues.
    pub root: Option<PathBuf>,
    /// Default target queue for client commands and inbound queue for the worker.
    #[serde(default = "default_queue")]
    pub queue: String,
    #[serde(default = "default_reply_prefix")]
    pub reply_prefix: String,
    pub fifo_group_id: Option<String>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Long-poll duration for a single worker receive.
    #[serde(default = "default_receive_wait_seconds")]
    pub receive_wait_seconds: u64,
}

fn default_queue() -> String {
    "procrelay_requests".to_string()
}

fn default_reply_prefix() -> String {
    "reply_queue_".to_string()
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_receive_wait_seconds() -> u64 {
    20
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            root: None,
            queue: default_queue(),
            reply_prefix: default_reply_prefix(),
            fifo_group_id: None,
            poll_interval_ms: default_poll_interval_ms(),
            receive_wait_seconds: default_receive_wait_seconds(),
        }
    }
}

impl TransportConfig {
    /// Resolve the queue root, defaulting to ~/.procrelay/queues.
    pub fn root_dir(&self) -> Result<PathBuf> {
        match &self.root {
            Some(root) => Ok(root.clone()),
            None => Ok(get_home_dir()?.join("queues")),
        }
    }

    pub fn group_id(&self) -> &str {
        self.fifo_group_id
            .as_deref()
            .filter(|g| !g.is_empty())
            .unwrap_or(DEFAULT_FIFO_GROUP_ID)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn receive_wait(&self) -> Duration {
        Duration::from_secs(self.receive_wait_seconds)
    }
}

/// Reply timeouts per operation class.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Timeouts {
    #[serde(default = "default_reply_seconds")]
    pub reply_seconds: u64,
    #[serde(default = "default_execute_seconds")]
    pub execute_seconds: u64,
    #[serde(default = "default_deploy_seconds")]
    pub deploy_seconds: u64,
}

fn default_reply_seconds() -> u64 {
    20
}

fn default_execute_seconds() -> u64 {
    600
}

fn default_deploy_seconds() -> u64 {
    900
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            reply_seconds: default_reply_seconds(),
            execute_seconds: default_execute_seconds(),
            deploy_seconds: default_deploy_seconds(),
        }
    }
}

/// Processing API configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ProcessingApi {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    pub request_timeout_seconds: Option<u64>,
}

fn default_base_url() -> String {
    "http://localhost:5000/".to_string()
}

impl Default for ProcessingApi {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_seconds: None,
        }
    }
}

/// Worker process files.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct DaemonConfig {
    pub pid_file: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
}

impl DaemonConfig {
    pub fn pid_path(&self) -> Result<PathBuf> {
        match &self.pid_file {
            Some(path) => Ok(path.clone()),
            None => Ok(get_home_dir()?.join("worker.pid")),
        }
    }
}

/// procrelay settings.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Settings {
    #[serde(default)]
    pub transport: TransportConfig,

    #[serde(default)]
    pub timeouts: Timeouts,

    #[serde(default)]
    pub processing_api: ProcessingApi,

    #[serde(default)]
    pub daemon: DaemonConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_sections() {
        let settings: Settings =
            serde_json::from_str(r#"{"transport": {"queue": "jobs.fifo"}}"#).unwrap();

        assert_eq!(settings.transport.queue, "jobs.fifo");
        assert_eq!(settings.transport.reply_prefix, "reply_queue_");
        assert_eq!(settings.transport.group_id(), DEFAULT_FIFO_GROUP_ID);
        assert_eq!(settings.timeouts.reply_seconds, 20);
        assert_eq!(settings.timeouts.execute_seconds, 600);
        assert_eq!(settings.timeouts.deploy_seconds, 900);
    }

    #[test]
    fn test_group_id_override() {
        let mut transport = TransportConfig::default();
        transport.fifo_group_id = Some("ades".to_string());
        assert_eq!(transport.group_id(), "ades");

        transport.fifo_group_id = Some(String::new());
        assert_eq!(transport.group_id(), DEFAULT_FIFO_GROUP_ID);
    }

    #[test]
    fn test_load_and_validate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        std::fs::write(
            &path,
            r#"{"processing_api": {"base_url": "http://ades.local:5000/"}}"#,
        )
        .unwrap();
        let (settings, source) = load_settings(Some(&path)).unwrap();
        assert_eq!(settings.processing_api.base_url, "http://ades.local:5000/");
        assert_eq!(source, SettingsSource::File(path.clone()));

        std::fs::write(&path, r#"{"processing_api": {"base_url": "not a url"}}"#).unwrap();
        assert!(matches!(load_settings(Some(&path)), Err(Error::Config(_))));

        std::fs::write(&path, r#"{"timeouts": {"reply_seconds": 0}}"#).unwrap();
        assert!(matches!(load_settings(Some(&path)), Err(Error::Config(_))));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let absent = dir.path().join("absent.json");
        let (settings, source) = load_settings(Some(&absent)).unwrap();
        assert_eq!(settings.transport.queue, "procrelay_requests");
        assert_eq!(source, SettingsSource::Defaults(absent));
    }
}
