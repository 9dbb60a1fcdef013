use crate::error::ArchivistError;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const CONFIG_ENV: &str = "ARCHIVIST_CONFIG";
pub const TOKEN_ENV: &str = "ARCHIVIST_DISCORD_TOKEN";
pub const WEBHOOK_ENV: &str = "ARCHIVIST_WEBHOOK_URL";

fn default_data_dir() -> String {
    "./archivist.data".into()
}
fn default_timezone() -> String {
    "America/New_York".into()
}
fn default_stop_grace_secs() -> u64 {
    15
}
fn default_disconnect_message() -> String {
    "Archive bot has disconnected or gone offline.".into()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub discord_bot_token: String,
    #[serde(default)]
    pub webhook_url: String,
    /// User ids allowed to run `!shutdown` and SQL commands.
    #[serde(default)]
    pub operators: Vec<u64>,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_stop_grace_secs")]
    pub stop_grace_secs: u64,
    #[serde(default = "default_disconnect_message")]
    pub disconnect_message: String,
}

impl Config {
    pub fn data_root_dir(&self) -> PathBuf {
        PathBuf::from(&self.data_dir)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_root_dir().join("logs")
    }

    pub fn tz(&self) -> Result<Tz, ArchivistError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| ArchivistError::Config(format!("Invalid timezone: {}", self.timezone)))
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    pub fn resolve_config_path() -> Result<Option<PathBuf>, ArchivistError> {
        if let Ok(custom) = std::env::var(CONFIG_ENV) {
            if std::path::Path::new(&custom).exists() {
                return Ok(Some(PathBuf::from(custom)));
            }
            return Err(ArchivistError::Config(format!(
                "{CONFIG_ENV} points to non-existent file: {custom}"
            )));
        }

        for candidate in ["./archivist.config.yaml", "./archivist.config.yml"] {
            if std::path::Path::new(candidate).exists() {
                return Ok(Some(PathBuf::from(candidate)));
            }
        }
        Ok(None)
    }

    pub fn load() -> Result<Self, ArchivistError> {
        let Some(path) = Self::resolve_config_path()? else {
            return Err(ArchivistError::Config(
                "No archivist.config.yaml found (set ARCHIVIST_CONFIG or create one in the working directory)".into(),
            ));
        };
        let path_str = path.to_string_lossy().to_string();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| ArchivistError::Config(format!("Failed to read {path_str}: {e}")))?;
        Self::from_yaml(&content).map_err(|e| match e {
            ArchivistError::Config(msg) => ArchivistError::Config(format!("{path_str}: {msg}")),
            other => other,
        })
    }

    pub fn from_yaml(content: &str) -> Result<Self, ArchivistError> {
        let mut config: Config = serde_yaml::from_str(content)
            .map_err(|e| ArchivistError::Config(format!("Failed to parse config: {e}")))?;
        config.apply_env_overrides();
        config.post_deserialize()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(token) = std::env::var(TOKEN_ENV) {
            if !token.trim().is_empty() {
                self.discord_bot_token = token;
            }
        }
        if let Ok(url) = std::env::var(WEBHOOK_ENV) {
            if !url.trim().is_empty() {
                self.webhook_url = url;
            }
        }
    }

    pub(crate) fn post_deserialize(&mut self) -> Result<(), ArchivistError> {
        self.discord_bot_token = self.discord_bot_token.trim().to_string();
        self.webhook_url = self.webhook_url.trim().to_string();
        self.timezone = self.timezone.trim().to_string();

        if self.discord_bot_token.is_empty() {
            return Err(ArchivistError::Config(format!(
                "discord_bot_token is required (or set {TOKEN_ENV})"
            )));
        }
        if self.webhook_url.is_empty() {
            return Err(ArchivistError::Config(format!(
                "webhook_url is required (or set {WEBHOOK_ENV})"
            )));
        }
        if !(self.webhook_url.starts_with("https://") || self.webhook_url.starts_with("http://")) {
            return Err(ArchivistError::Config(
                "webhook_url must be an http(s) URL".into(),
            ));
        }
        self.tz()?;
        if self.stop_grace_secs == 0 {
            return Err(ArchivistError::Config(
                "stop_grace_secs must be greater than 0".into(),
            ));
        }
        if self.data_dir.trim().is_empty() {
            self.data_dir = default_data_dir();
        }
        if self.disconnect_message.trim().is_empty() {
            self.disconnect_message = default_disconnect_message();
        }
        self.operators.sort_unstable();
        self.operators.dedup();
        Ok(())
    }
}
