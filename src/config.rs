//! Dashboard server configuration from the environment.

use std::env;
use std::net::SocketAddr;

use thiserror::Error;

use crate::airtable::{AirtableConfig, ANALYSIS_TABLE, DEFAULT_AIRTABLE_URL};

pub const DEFAULT_DASHBOARD_ADDR: &str = "127.0.0.1:8080";
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 500;
pub const DEFAULT_AIRTABLE_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DashboardConfig {
    pub addr: SocketAddr,
    pub tick_interval_ms: u64,
    pub use_demo: bool,
    pub airtable: Option<AirtableSettings>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AirtableSettings {
    pub client: AirtableConfig,
    pub table: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid THEMEBOARD_DASHBOARD_ADDR `{value}`: {message}")]
    InvalidAddr { value: String, message: String },
}

pub fn dashboard_config_from_env() -> Result<DashboardConfig, ConfigError> {
    dashboard_config_from_lookup(|key| env::var(key).ok())
}

/// Same as [`dashboard_config_from_env`] but reads values through `lookup`.
/// Malformed optional values fall back to their defaults; only a malformed
/// bind address is an error.
pub fn dashboard_config_from_lookup(
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<DashboardConfig, ConfigError> {
    let get = |key: &str| {
        lookup(key)
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty())
    };

    let raw_addr =
        get("THEMEBOARD_DASHBOARD_ADDR").unwrap_or_else(|| DEFAULT_DASHBOARD_ADDR.to_string());
    let addr = raw_addr
        .parse::<SocketAddr>()
        .map_err(|err| ConfigError::InvalidAddr {
            value: raw_addr.clone(),
            message: err.to_string(),
        })?;

    let tick_interval_ms = get("THEMEBOARD_TICK_MS")
        .and_then(|raw| raw.parse::<u64>().ok())
        .filter(|ms| *ms > 0)
        .unwrap_or(DEFAULT_TICK_INTERVAL_MS);

    let use_demo = get("THEMEBOARD_DASHBOARD_USE_DEMO")
        .and_then(|raw| parse_bool(&raw))
        .unwrap_or(false);

    let airtable = match (
        get("THEMEBOARD_AIRTABLE_API_KEY"),
        get("THEMEBOARD_AIRTABLE_BASE_ID"),
    ) {
        (Some(api_key), Some(base_id)) => Some(AirtableSettings {
            client: AirtableConfig {
                api_url: get("THEMEBOARD_AIRTABLE_URL")
                    .unwrap_or_else(|| DEFAULT_AIRTABLE_URL.to_string()),
                api_key,
                base_id,
                timeout_ms: get("THEMEBOARD_AIRTABLE_TIMEOUT_MS")
                    .and_then(|raw| raw.parse::<u64>().ok())
                    .unwrap_or(DEFAULT_AIRTABLE_TIMEOUT_MS),
            },
            table: get("THEMEBOARD_AIRTABLE_TABLE")
                .unwrap_or_else(|| ANALYSIS_TABLE.to_string()),
        }),
        _ => None,
    };

    Ok(DashboardConfig {
        addr,
        tick_interval_ms,
        use_demo,
        airtable,
    })
}

pub(crate) fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
