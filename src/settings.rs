//! Layered settings: compiled defaults, then an optional JSON file, then
//! `KICKOFF_*` environment variables, then the legacy `FOOTBALL_DATA_API_KEY`
//! and `FETCH_SCHEDULE` variables, then command-line flags.
//!
//! A `.env` file, when present, is exported into the process environment
//! before any of this runs. Variables already set are not overwritten.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Json, Serialized};
use figment::Figment;
use kickoff_feed::{CadenceError, FeedConfig, DEFAULT_BASE_URL};
use kickoff_server::ServerConfig;
use kickoff_telemetry::TelemetryConfig;
use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use tracing::Level;

pub const DEFAULT_CONFIG_FILE: &str = "kickoff.json";
pub const API_KEY_ENV: &str = "FOOTBALL_DATA_API_KEY";
pub const SCHEDULE_ENV: &str = "FETCH_SCHEDULE";
pub const ENV_FILE: &str = ".env";
const ENV_PREFIX: &str = "KICKOFF_";

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("config file {0} does not exist")]
    MissingFile(PathBuf),

    #[error(transparent)]
    Load(#[from] Box<figment::Error>),

    #[error("FOOTBALL_DATA_API_KEY is not set (or feed.api_key in the config file)")]
    MissingApiKey,

    #[error("invalid fetch schedule: {0}")]
    Schedule(#[from] CadenceError),

    #[error("invalid log level {0:?}")]
    LogLevel(String),

    #[error("failed to read env file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
}

/// Export `KEY=value` lines from `path` into the process environment.
/// Returns `false` when the file does not exist.
pub fn load_env_file(path: &Path) -> Result<bool, SettingsError> {
    match dotenvy::from_path(path) {
        Ok(()) => Ok(true),
        Err(e) if e.not_found() => Ok(false),
        Err(source) => Err(SettingsError::EnvFile {
            path: path.to_owned(),
            source,
        }),
    }
}

/// Values given on the command line. They win over every other layer.
#[derive(Clone, Debug, Default)]
pub struct Overrides {
    pub config: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerConfig,
    pub feed: FeedSettings,
    pub telemetry: TelemetrySettings,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct FeedSettings {
    pub base_url: String,
    #[serde(deserialize_with = "deserialize_secret")]
    pub api_key: Option<SecretString>,
    pub schedule: String,
    pub request_timeout_secs: u64,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            api_key: None,
            schedule: "@every 1m".into(),
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    pub log_level: String,
    pub json: bool,
    pub log_file: Option<PathBuf>,
    pub metrics_enabled: bool,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            json: false,
            log_file: Some(PathBuf::from("kickoff.log")),
            metrics_enabled: true,
        }
    }
}

/// Blank keys count as missing.
fn deserialize_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw
        .map(|key| key.trim().to_owned())
        .filter(|key| !key.is_empty())
        .map(SecretString::from))
}

impl Settings {
    /// Build the provider stack without the command-line layer.
    pub fn figment(config_file: &Path) -> Figment {
        Figment::new()
            .merge(Json::file(config_file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .merge(Env::raw().only(&[API_KEY_ENV, SCHEDULE_ENV]).map(|key| {
                if key == API_KEY_ENV {
                    "feed.api_key".into()
                } else {
                    "feed.schedule".into()
                }
            }))
    }

    pub fn load(overrides: &Overrides) -> Result<Self, SettingsError> {
        let config_file = match &overrides.config {
            Some(path) if !path.is_file() => return Err(SettingsError::MissingFile(path.clone())),
            Some(path) => path.clone(),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        let mut figment = Self::figment(&config_file);
        if let Some(host) = &overrides.host {
            figment = figment.merge(Serialized::default("server.host", host));
        }
        if let Some(port) = overrides.port {
            figment = figment.merge(Serialized::default("server.port", port));
        }
        figment.extract().map_err(|e| SettingsError::Load(Box::new(e)))
    }

    /// Fails when no API key was configured anywhere.
    pub fn feed_config(&self) -> Result<FeedConfig, SettingsError> {
        let api_key = self.feed.api_key.clone().ok_or(SettingsError::MissingApiKey)?;
        Ok(FeedConfig {
            base_url: self.feed.base_url.clone(),
            api_key,
            cadence: self.feed.schedule.parse()?,
            request_timeout: Duration::from_secs(self.feed.request_timeout_secs.max(1)),
        })
    }

    pub fn telemetry_config(&self) -> Result<TelemetryConfig, SettingsError> {
        let log_level: Level = self
            .telemetry
            .log_level
            .parse()
            .map_err(|_| SettingsError::LogLevel(self.telemetry.log_level.clone()))?;
        Ok(TelemetryConfig {
            log_level,
            module_levels: Vec::new(),
            json: self.telemetry.json,
            log_file: self.telemetry.log_file.clone(),
            metrics_enabled: self.telemetry.metrics_enabled,
        })
    }
}
