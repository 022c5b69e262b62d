use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;
use std::env;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use crate::catalog::Product;

pub const CONFIG_PATH_ENV: &str = "PRICE_TRACKER_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "tracker.toml";

#[derive(Deserialize, Clone, Debug)]
pub struct AppSettings {
    #[serde(default = "default_csv_path")]
    pub csv_path: PathBuf,
    #[serde(default = "default_log_path")]
    pub log_path: PathBuf,
    #[serde(default = "default_price_selector")]
    pub price_selector: String,
    #[serde(default)]
    pub browser: BrowserSettings,
    #[serde(default)]
    pub telegram: TelegramSettings,
    #[serde(default)]
    pub products: Vec<Product>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct BrowserSettings {
    #[serde(default = "default_true")]
    pub headless: bool,
    /// Leave unset to keep the browser library's own navigation timeout.
    #[serde(default)]
    pub navigation_timeout_secs: Option<u64>,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

/// Token and chat id normally arrive through `TELEGRAM_TOKEN` and
/// `TELEGRAM_CHAT_ID` rather than the settings file.
#[derive(Deserialize, Clone, Debug)]
pub struct TelegramSettings {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default = "default_telegram_timeout")]
    pub timeout_secs: u64,
}

fn default_csv_path() -> PathBuf {
    PathBuf::from("frontend/public/diapers.csv")
}

fn default_log_path() -> PathBuf {
    PathBuf::from("diapers.txt")
}

fn default_price_selector() -> String {
    ".a-price-whole".to_string()
}

fn default_true() -> bool {
    true
}

fn default_idle_timeout() -> u64 {
    120
}

fn default_telegram_timeout() -> u64 {
    30
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            navigation_timeout_secs: None,
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

impl Default for TelegramSettings {
    fn default() -> Self {
        Self {
            token: None,
            chat_id: None,
            timeout_secs: default_telegram_timeout(),
        }
    }
}

impl TelegramSettings {
    /// Both halves must be present and non-blank for notifications to be sent.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        let token = self.token.as_deref().map(str::trim).filter(|t| !t.is_empty())?;
        let chat_id = self
            .chat_id
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())?;
        Some((token, chat_id))
    }
}

impl AppSettings {
    /// Loads the file named by `PRICE_TRACKER_CONFIG`, or `tracker.toml`.
    pub fn load() -> Result<Self, ConfigError> {
        let path = env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::from_file(path)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        tracing::info!(path = %path.display(), "Loading settings");

        Config::builder()
            .add_source(File::from(path).format(FileFormat::Toml).required(true))
            .add_source(
                Environment::with_prefix("PRICE_TRACKER")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .set_override_option("telegram.token", env::var("TELEGRAM_TOKEN").ok())?
            .set_override_option("telegram.chat_id", env::var("TELEGRAM_CHAT_ID").ok())?
            .build()?
            .try_deserialize()
    }
}

/// CI runners cannot nest the browser sandbox, so any non-empty `CI`
/// value switches it off.
pub fn running_in_ci() -> bool {
    ci_flag_set(env::var_os("CI").as_deref())
}

fn ci_flag_set(value: Option<&OsStr>) -> bool {
    value.is_some_and(|value| !value.is_empty())
}
