use std::path::{Path, PathBuf};
use std::time::Duration;

use quick_from::QuickFrom;
use serde::Deserialize;
use url::Url;

pub const CONFIG_ENV : &str = "YARDOS_CONFIG";
const DEFAULT_CONFIG_FILE : &str = "config.json";

#[derive(Debug, QuickFrom)]
pub enum Error {
    #[quick_from]
    Io(std::io::Error),

    #[quick_from]
    SerdeJson(serde_json::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f : &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(err) => write!(f, "could not read config: {}", err),
            Error::SerdeJson(err) => write!(f, "invalid config: {}", err),
        }
    }
}

impl std::error::Error for Error {}

/// Which transport a deployment talks to the api with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Fetch,
    Jsonp,
}

impl Default for TransportKind {
    fn default() -> Self {
        TransportKind::Fetch
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub api_base : Url,
    #[serde(default)]
    pub api_key : Option<String>,
    pub admin_pin : String,
    #[serde(default = "default_session_minutes")]
    pub admin_session_minutes : u64,
    #[serde(default)]
    pub transport : TransportKind,
    #[serde(default = "default_jsonp_timeout_ms")]
    pub jsonp_timeout_ms : u64,
    #[serde(default = "default_store_path")]
    pub store_path : PathBuf,
}

fn default_session_minutes() -> u64 {
    30
}

fn default_jsonp_timeout_ms() -> u64 {
    12_000
}

fn default_store_path() -> PathBuf {
    "yardos-store.json".into()
}

impl Config {
    pub fn new(api_base : Url, admin_pin : &str) -> Self {
        Config {
            api_base,
            api_key : None,
            admin_pin : admin_pin.to_string(),
            admin_session_minutes : default_session_minutes(),
            transport : TransportKind::default(),
            jsonp_timeout_ms : default_jsonp_timeout_ms(),
            store_path : default_store_path(),
        }
    }

    pub fn from_file<P : AsRef<Path>>(path : P) -> Result<Self, Error> {
        let config_string = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&config_string)?)
    }

    /// reads the file named by `YARDOS_CONFIG`, or `config.json`
    pub fn from_env() -> Result<Self, Error> {
        let config_file = std::env::var(CONFIG_ENV)
            .unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());

        Self::from_file(config_file)
    }

    /// the api key, if one is set and not blank
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|k| !k.is_empty())
    }

    pub fn admin_session(&self) -> Duration {
        Duration::from_secs(self.admin_session_minutes.saturating_mul(60))
    }

    pub fn jsonp_timeout(&self) -> Duration {
        Duration::from_millis(self.jsonp_timeout_ms)
    }
}
