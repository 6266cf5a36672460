//! Environment-driven settings.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::convert::{ConverterSettings, DEFAULT_CONVERSION_TIMEOUT};

pub const BIND_ADDR_VAR: &str = "REPORT_BIND_ADDR";
pub const ATTACHMENT_DIR_VAR: &str = "REPORT_ATTACHMENT_DIR";
pub const CONVERTER_PATH_VAR: &str = "REPORT_CONVERTER_PATH";
pub const CONVERSION_TIMEOUT_VAR: &str = "REPORT_CONVERSION_TIMEOUT_SECS";
pub const RENDER_CONCURRENCY_VAR: &str = "REPORT_RENDER_CONCURRENCY";

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_ATTACHMENT_DIR: &str = "./filestore";

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{name} must be {expected}, got '{value}'")]
    Invalid {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub attachment_dir: PathBuf,
    pub converter: ConverterSettings,
    pub render_concurrency: usize,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let timeout_secs: u64 = parse_var(CONVERSION_TIMEOUT_VAR, var(CONVERSION_TIMEOUT_VAR), "a positive number of seconds")?
            .unwrap_or(DEFAULT_CONVERSION_TIMEOUT.as_secs());
        if timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                name: CONVERSION_TIMEOUT_VAR,
                expected: "a positive number of seconds",
                value: "0".to_string(),
            });
        }
        let render_concurrency: usize = parse_var(RENDER_CONCURRENCY_VAR, var(RENDER_CONCURRENCY_VAR), "a positive integer")?
            .unwrap_or(1);
        if render_concurrency == 0 {
            return Err(ConfigError::Invalid {
                name: RENDER_CONCURRENCY_VAR,
                expected: "a positive integer",
                value: "0".to_string(),
            });
        }

        Ok(Self {
            bind_addr: var(BIND_ADDR_VAR).unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            attachment_dir: var(ATTACHMENT_DIR_VAR)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_ATTACHMENT_DIR)),
            converter: ConverterSettings {
                executable: var(CONVERTER_PATH_VAR).map(PathBuf::from),
                timeout: Duration::from_secs(timeout_secs),
            },
            render_concurrency,
        })
    }
}

fn parse_var<T: FromStr>(
    name: &'static str,
    value: Option<String>,
    expected: &'static str,
) -> Result<Option<T>, ConfigError> {
    value
        .map(|value| {
            value.trim().parse().map_err(|_| ConfigError::Invalid {
                name,
                expected,
                value,
            })
        })
        .transpose()
}
