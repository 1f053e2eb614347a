use std::env;
use std::time::Duration;

use accounts_api_client::DEFAULT_BASE_URL;
use thiserror::Error;

use crate::actions::{DEFAULT_CREATE_REFRESH_DELAY, DEFAULT_MUTATION_REFRESH_DELAY, RefreshDelays};

pub const ENV_API_BASE_URL: &str = "ACCOUNTS_CONSOLE_API_BASE_URL";
pub const ENV_CREATE_REFRESH_DELAY_MS: &str = "ACCOUNTS_CONSOLE_CREATE_REFRESH_DELAY_MS";
pub const ENV_MUTATION_REFRESH_DELAY_MS: &str = "ACCOUNTS_CONSOLE_MUTATION_REFRESH_DELAY_MS";
pub const ENV_REQUEST_TIMEOUT_MS: &str = "ACCOUNTS_CONSOLE_REQUEST_TIMEOUT_MS";
pub const ENV_LOG_JSON: &str = "ACCOUNTS_CONSOLE_LOG_JSON";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsoleConfig {
    pub api_base_url: String,
    pub refresh_delays: RefreshDelays,
    pub request_timeout_ms: Option<u64>,
    pub log_json: bool,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_BASE_URL.to_string(),
            refresh_delays: RefreshDelays::default(),
            request_timeout_ms: None,
            log_json: false,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid ACCOUNTS_CONSOLE_API_BASE_URL: {0}")]
    InvalidApiBaseUrl(String),
    #[error("invalid ACCOUNTS_CONSOLE_CREATE_REFRESH_DELAY_MS: {0}")]
    InvalidCreateRefreshDelay(String),
    #[error("invalid ACCOUNTS_CONSOLE_MUTATION_REFRESH_DELAY_MS: {0}")]
    InvalidMutationRefreshDelay(String),
    #[error("invalid ACCOUNTS_CONSOLE_REQUEST_TIMEOUT_MS: {0}")]
    InvalidRequestTimeout(String),
    #[error("invalid ACCOUNTS_CONSOLE_LOG_JSON: {0}")]
    InvalidLogJson(String),
}

impl ConsoleConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_base_url = match non_empty(lookup(ENV_API_BASE_URL)) {
            Some(raw) => parse_base_url(&raw).map_err(ConfigError::InvalidApiBaseUrl)?,
            None => DEFAULT_BASE_URL.to_string(),
        };

        let after_create = parse_with_lookup(
            &lookup,
            ENV_CREATE_REFRESH_DELAY_MS,
            DEFAULT_CREATE_REFRESH_DELAY,
            |raw| parse_millis(&raw).map_err(ConfigError::InvalidCreateRefreshDelay),
        )?;
        let after_mutation = parse_with_lookup(
            &lookup,
            ENV_MUTATION_REFRESH_DELAY_MS,
            DEFAULT_MUTATION_REFRESH_DELAY,
            |raw| parse_millis(&raw).map_err(ConfigError::InvalidMutationRefreshDelay),
        )?;
        let request_timeout_ms =
            parse_with_lookup(&lookup, ENV_REQUEST_TIMEOUT_MS, None, |raw| {
                match raw.trim().parse::<u64>() {
                    Ok(0) => Err(ConfigError::InvalidRequestTimeout(
                        "must be greater than zero".to_string(),
                    )),
                    Ok(value) => Ok(Some(value)),
                    Err(error) => Err(ConfigError::InvalidRequestTimeout(format!(
                        "{raw}: {error}"
                    ))),
                }
            })?;
        let log_json = parse_with_lookup(&lookup, ENV_LOG_JSON, false, |raw| {
            parse_bool(&raw).map_err(ConfigError::InvalidLogJson)
        })?;

        Ok(Self {
            api_base_url,
            refresh_delays: RefreshDelays {
                after_create,
                after_mutation,
            },
            request_timeout_ms,
            log_json,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

fn parse_with_lookup<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
    parser: impl FnOnce(String) -> Result<T, ConfigError>,
) -> Result<T, ConfigError> {
    match non_empty(lookup(key)) {
        Some(raw) => parser(raw),
        None => Ok(default),
    }
}

/// Accepts an absolute `http` or `https` URL; trailing slashes are dropped.
pub fn parse_base_url(raw: &str) -> Result<String, String> {
    let trimmed = raw.trim().trim_end_matches('/');
    let host = trimmed
        .strip_prefix("http://")
        .or_else(|| trimmed.strip_prefix("https://"))
        .ok_or_else(|| format!("{raw}: expected http:// or https:// URL"))?;
    if host.is_empty() {
        return Err(format!("{raw}: missing host"));
    }
    Ok(trimmed.to_string())
}

fn parse_millis(raw: &str) -> Result<Duration, String> {
    raw.trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|error| format!("{raw}: {error}"))
}

fn parse_bool(raw: &str) -> Result<bool, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::{ConfigError, ConsoleConfig, parse_base_url};

    fn config_from(values: &[(&str, &str)]) -> Result<ConsoleConfig, ConfigError> {
        let values: HashMap<&str, &str> = values.iter().copied().collect();
        ConsoleConfig::from_lookup(|key| values.get(key).map(ToString::to_string))
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = config_from(&[]).expect("defaults");
        assert_eq!(config, ConsoleConfig::default());
        assert_eq!(config.api_base_url, "http://localhost:8080");
        assert_eq!(config.refresh_delays.after_create, Duration::from_millis(500));
        assert_eq!(
            config.refresh_delays.after_mutation,
            Duration::from_millis(1000)
        );
        assert_eq!(config.request_timeout_ms, None);
        assert!(!config.log_json);
    }

    #[test]
    fn overrides_are_parsed() {
        let config = config_from(&[
            ("ACCOUNTS_CONSOLE_API_BASE_URL", " https://accounts.internal/ "),
            ("ACCOUNTS_CONSOLE_CREATE_REFRESH_DELAY_MS", "50"),
            ("ACCOUNTS_CONSOLE_MUTATION_REFRESH_DELAY_MS", "75"),
            ("ACCOUNTS_CONSOLE_REQUEST_TIMEOUT_MS", "2500"),
            ("ACCOUNTS_CONSOLE_LOG_JSON", "yes"),
        ])
        .expect("overrides");
        assert_eq!(config.api_base_url, "https://accounts.internal");
        assert_eq!(config.refresh_delays.after_create, Duration::from_millis(50));
        assert_eq!(config.refresh_delays.after_mutation, Duration::from_millis(75));
        assert_eq!(config.request_timeout_ms, Some(2500));
        assert!(config.log_json);
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let config = config_from(&[
            ("ACCOUNTS_CONSOLE_API_BASE_URL", "  "),
            ("ACCOUNTS_CONSOLE_REQUEST_TIMEOUT_MS", ""),
        ])
        .expect("blank values");
        assert_eq!(config, ConsoleConfig::default());
    }

    #[test]
    fn invalid_values_name_the_variable() {
        let error = config_from(&[("ACCOUNTS_CONSOLE_CREATE_REFRESH_DELAY_MS", "soon")])
            .expect_err("invalid delay");
        assert!(matches!(error, ConfigError::InvalidCreateRefreshDelay(_)));
        assert!(
            error
                .to_string()
                .starts_with("invalid ACCOUNTS_CONSOLE_CREATE_REFRESH_DELAY_MS: soon")
        );

        let error = config_from(&[("ACCOUNTS_CONSOLE_LOG_JSON", "maybe")]).expect_err("bool");
        assert_eq!(error, ConfigError::InvalidLogJson("maybe".to_string()));

        let error =
            config_from(&[("ACCOUNTS_CONSOLE_REQUEST_TIMEOUT_MS", "0")]).expect_err("zero");
        assert!(matches!(error, ConfigError::InvalidRequestTimeout(_)));

        let error = config_from(&[("ACCOUNTS_CONSOLE_API_BASE_URL", "localhost:8080")])
            .expect_err("scheme");
        assert!(matches!(error, ConfigError::InvalidApiBaseUrl(_)));
    }

    #[test]
    fn base_url_requires_scheme_and_host() {
        assert_eq!(
            parse_base_url("http://127.0.0.1:9000//").as_deref(),
            Ok("http://127.0.0.1:9000")
        );
        assert!(parse_base_url("https://").is_err());
        assert!(parse_base_url("ftp://accounts").is_err());
    }
}
