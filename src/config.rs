//! Configuration from environment variables

use crate::backend::StrapiConfig;
use crate::cart::AllowedQuantities;
use crate::transport::TelegramConfig;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_TELEGRAM_API_URL: &str = "https://api.telegram.org";
const DEFAULT_PORT: u16 = 8000;
const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} has invalid value {value:?}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct BotConfig {
    pub strapi: StrapiConfig,
    pub telegram: TelegramConfig,
    pub db_path: PathBuf,
    pub port: u16,
    pub quantities: AllowedQuantities,
}

impl BotConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let timeout = match var("HTTP_TIMEOUT_SECS") {
            Some(raw) => Duration::from_secs(parse_number("HTTP_TIMEOUT_SECS", &raw)?),
            None => Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        };

        let api_url = var("STRAPI_API_URL").ok_or(ConfigError::Missing("STRAPI_API_URL"))?;
        let strapi = StrapiConfig {
            media_url: var("STRAPI_MEDIA_URL")
                .unwrap_or_else(|| StrapiConfig::media_root(&api_url)),
            token: var("STRAPI_TOKEN"),
            api_url,
            timeout,
        };

        let telegram = TelegramConfig {
            api_url: var("TELEGRAM_API_URL")
                .unwrap_or_else(|| DEFAULT_TELEGRAM_API_URL.to_string()),
            bot_token: var("TELEGRAM_BOT_TOKEN").ok_or(ConfigError::Missing("TELEGRAM_BOT_TOKEN"))?,
            timeout,
        };

        let db_path = var("GROCERY_BOT_DB_PATH").map_or_else(
            || {
                let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".grocery-bot").join("sessions.db")
            },
            PathBuf::from,
        );

        let port = match var("GROCERY_BOT_PORT") {
            Some(raw) => parse_number("GROCERY_BOT_PORT", &raw)?,
            None => DEFAULT_PORT,
        };

        let quantities = match var("GROCERY_BOT_QUANTITIES") {
            Some(raw) => parse_quantities(&raw)?,
            None => AllowedQuantities::default(),
        };

        Ok(Self {
            strapi,
            telegram,
            db_path,
            port,
            quantities,
        })
    }
}

fn parse_number<T: std::str::FromStr>(name: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Invalid {
        name,
        value: raw.to_string(),
    })
}

/// Comma-separated positive amounts, e.g. `5,10,15`
fn parse_quantities(raw: &str) -> Result<AllowedQuantities, ConfigError> {
    let invalid = || ConfigError::Invalid {
        name: "GROCERY_BOT_QUANTITIES",
        value: raw.to_string(),
    };
    let amounts = raw
        .split(',')
        .map(|part| part.trim().parse::<u32>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| invalid())?;
    AllowedQuantities::new(amounts).ok_or_else(invalid)
}
