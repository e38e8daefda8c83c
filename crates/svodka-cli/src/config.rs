//! YAML configuration with `${ENV_VAR}` substitution in secret-bearing
//! fields.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub token: String,
    #[serde(default)]
    pub allowed_users: Vec<String>,
    /// Mirror chat that receives the cross-chat digest.
    #[serde(default)]
    pub digest_chat_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_gap_minutes")]
    pub gap_minutes: i64,
    #[serde(default = "default_list_max")]
    pub list_max: u32,
    #[serde(default = "default_quote_max_words")]
    pub quote_max_words: u32,
    /// Local hour (0-23) at which the daily run fires.
    #[serde(default = "default_run_hour")]
    pub run_hour: u32,
    /// Optional override of the builtin prompt table.
    #[serde(default)]
    pub prompts_file: Option<String>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            gap_minutes: default_gap_minutes(),
            list_max: default_list_max(),
            quote_max_words: default_quote_max_words(),
            run_hour: default_run_hour(),
            prompts_file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub telegram: TelegramConfig,
    pub provider: ProviderConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_timezone() -> String {
    "Europe/Moscow".to_string()
}

fn default_gap_minutes() -> i64 {
    45
}

fn default_list_max() -> u32 {
    7
}

fn default_quote_max_words() -> u32 {
    12
}

fn default_run_hour() -> u32 {
    22
}

fn default_db_path() -> String {
    "svodka.db".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let mut config: Config = serde_yaml::from_str(&raw)
        .with_context(|| format!("failed to parse config {}", path.display()))?;

    config.telegram.token = resolve_env_var(&config.telegram.token);
    config.provider.api_key = resolve_env_var(&config.provider.api_key);
    config.provider.base_url = resolve_env_var(&config.provider.base_url);

    Ok(config)
}

impl Config {
    pub fn timezone(&self) -> Result<chrono_tz::Tz> {
        self.report
            .timezone
            .parse()
            .map_err(|_| anyhow::anyhow!("unknown timezone {:?}", self.report.timezone))
    }
}

/// Substitutes every `${NAME}` with the environment value, empty when
/// unset. An unterminated `${` is kept verbatim.
pub fn resolve_env_var(raw: &str) -> String {
    let mut output = String::new();
    let mut rest = raw;

    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);

        let candidate = &rest[start + 2..];
        let Some(end) = candidate.find('}') else {
            output.push_str(&rest[start..]);
            return output;
        };

        let key = &candidate[..end];
        output.push_str(&std::env::var(key).unwrap_or_default());
        rest = &candidate[end + 1..];
    }

    output.push_str(rest);
    output
}
