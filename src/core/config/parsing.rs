use std::env;
use std::net::SocketAddr;

use super::types::{ConfigError, Environment};
use crate::schemas::exam::ExamLevel;
use crate::services::scoring::WeightTable;

pub(super) fn env_optional(key: &str) -> Option<String> {
    env::var(key).ok().map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}

pub(super) fn env_or_default(key: &str, default: &str) -> String {
    env_optional(key).unwrap_or_else(|| default.to_string())
}

pub(super) fn parse_u32(field: &'static str, value: String) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidValue { field, value })
}

pub(super) fn parse_u64(field: &'static str, value: String) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidValue { field, value })
}

pub(super) fn parse_bool(value: &str) -> bool {
    matches!(value, "1" | "true" | "TRUE" | "yes" | "YES" | "on" | "ON")
}

pub(super) fn parse_environment(value: Option<String>) -> Environment {
    match value.as_deref().map(|item| item.to_lowercase()) {
        Some(ref val) if val == "production" || val == "prod" => Environment::Production,
        Some(ref val) if val == "staging" => Environment::Staging,
        Some(ref val) if val == "test" || val == "testing" => Environment::Test,
        _ => Environment::Development,
    }
}

pub(super) fn parse_level(value: Option<String>) -> Result<Option<ExamLevel>, ConfigError> {
    let Some(raw) = value else {
        return Ok(None);
    };
    ExamLevel::parse(&raw)
        .map(Some)
        .ok_or(ConfigError::InvalidValue { field: "WAVY_EXAM_LEVEL", value: raw })
}

pub(super) fn parse_http_url(field: &'static str, value: String) -> Result<String, ConfigError> {
    let trimmed = value.trim_end_matches('/').to_string();
    let has_host = trimmed
        .split_once("://")
        .map(|(scheme, rest)| matches!(scheme, "http" | "https") && !rest.is_empty())
        .unwrap_or(false);
    if has_host {
        Ok(trimmed)
    } else {
        Err(ConfigError::InvalidUrl { field, value })
    }
}

pub(super) fn parse_ws_url(field: &'static str, value: String) -> Result<String, ConfigError> {
    let valid = value
        .split_once("://")
        .map(|(scheme, rest)| matches!(scheme, "ws" | "wss") && !rest.is_empty())
        .unwrap_or(false);
    if valid {
        Ok(value)
    } else {
        Err(ConfigError::InvalidUrl { field, value })
    }
}

/// Push channel lives on the same host as the HTTP API.
pub(super) fn derive_ws_url(api_url: &str) -> String {
    if let Some(rest) = api_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = api_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        api_url.to_string()
    }
}

pub(super) fn parse_socket_addr(
    field: &'static str,
    value: Option<String>,
) -> Result<Option<SocketAddr>, ConfigError> {
    value
        .map(|raw| {
            raw.parse::<SocketAddr>().map_err(|_| ConfigError::InvalidValue { field, value: raw })
        })
        .transpose()
}

pub(super) fn parse_weights(
    field: &'static str,
    value: String,
) -> Result<WeightTable, ConfigError> {
    value
        .parse::<WeightTable>()
        .map_err(|err| ConfigError::InvalidWeights { field, reason: err.to_string() })
}
