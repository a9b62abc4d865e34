use std::{fmt, fs, io, path::Path, str::FromStr};

use anyhow::Context;
use gateway::{QueryStrategy, UnknownQueryStrategy};
use serde::Deserialize;
use thiserror::Error;

pub const SETTINGS_FILE: &str = "bloodbank.toml";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown backend '{0}' (expected 'local' or 'firebase')")]
    UnknownBackend(String),
    #[error("{0} must be set for the firebase backend")]
    Missing(&'static str),
    #[error(transparent)]
    QueryStrategy(#[from] UnknownQueryStrategy),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// SQLite records plus SQLite-held credentials.
    #[default]
    Local,
    /// Realtime-database REST records plus Identity Toolkit credentials.
    Firebase,
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(BackendKind::Local),
            "firebase" => Ok(BackendKind::Firebase),
            _ => Err(ConfigError::UnknownBackend(s.to_string())),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Local => f.write_str("local"),
            BackendKind::Firebase => f.write_str("firebase"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub backend: BackendKind,
    pub database_url: String,
    pub rtdb_url: Option<String>,
    pub rtdb_auth: Option<String>,
    pub api_key: Option<String>,
    pub identity_url: Option<String>,
    pub query_strategy: QueryStrategy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backend: BackendKind::Local,
            database_url: "sqlite://./data/bloodbank.db".into(),
            rtdb_url: None,
            rtdb_auth: None,
            api_key: None,
            identity_url: None,
            query_strategy: QueryStrategy::Indexed,
        }
    }
}

impl Settings {
    pub fn firebase_endpoints(&self) -> Result<(&str, &str), ConfigError> {
        let rtdb_url = self
            .rtdb_url
            .as_deref()
            .ok_or(ConfigError::Missing("rtdb_url"))?;
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(ConfigError::Missing("api_key"))?;
        Ok((rtdb_url, api_key))
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    backend: Option<BackendKind>,
    database_url: Option<String>,
    rtdb_url: Option<String>,
    rtdb_auth: Option<String>,
    api_key: Option<String>,
    identity_url: Option<String>,
    query_strategy: Option<QueryStrategy>,
}

/// Defaults, then `bloodbank.toml` in the working directory, then
/// `BLOODBANK_*` environment variables.
pub fn load_settings() -> anyhow::Result<Settings> {
    load_settings_from(Path::new(SETTINGS_FILE), |name| std::env::var(name).ok())
}

pub fn load_settings_from(
    file: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    match fs::read_to_string(file) {
        Ok(raw) => {
            let file_cfg: FileSettings = toml::from_str(&raw)
                .with_context(|| format!("failed to parse settings file '{}'", file.display()))?;
            apply_file(&mut settings, file_cfg);
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read settings file '{}'", file.display()))
        }
    }

    if let Some(v) = env("BLOODBANK_BACKEND") {
        settings.backend = v.parse()?;
    }
    if let Some(v) = env("BLOODBANK_DATABASE_URL") {
        settings.database_url = v;
    }
    if let Some(v) = env("BLOODBANK_RTDB_URL") {
        settings.rtdb_url = Some(v);
    }
    if let Some(v) = env("BLOODBANK_RTDB_AUTH") {
        settings.rtdb_auth = Some(v);
    }
    if let Some(v) = env("BLOODBANK_API_KEY") {
        settings.api_key = Some(v);
    }
    if let Some(v) = env("BLOODBANK_IDENTITY_URL") {
        settings.identity_url = Some(v);
    }
    if let Some(v) = env("BLOODBANK_QUERY_STRATEGY") {
        settings.query_strategy = v.parse().map_err(ConfigError::from)?;
    }

    Ok(settings)
}

fn apply_file(settings: &mut Settings, file_cfg: FileSettings) {
    if let Some(v) = file_cfg.backend {
        settings.backend = v;
    }
    if let Some(v) = file_cfg.database_url {
        settings.database_url = v;
    }
    if let Some(v) = file_cfg.query_strategy {
        settings.query_strategy = v;
    }
    settings.rtdb_url = file_cfg.rtdb_url.or(settings.rtdb_url.take());
    settings.rtdb_auth = file_cfg.rtdb_auth.or(settings.rtdb_auth.take());
    settings.api_key = file_cfg.api_key.or(settings.api_key.take());
    settings.identity_url = file_cfg.identity_url.or(settings.identity_url.take());
}
