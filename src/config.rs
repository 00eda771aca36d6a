// Process configuration
// Read once at startup and handed to the router state; nothing below main reads the environment.

use std::env;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

use crate::api::{ClientConfig, DEFAULT_USER_AGENT};

pub const KEYWORD_SEARCH_URL: &str =
    "https://app.rakuten.co.jp/services/api/Travel/KeywordHotelSearch/20170426";
pub const DETAIL_SEARCH_URL: &str =
    "https://app.rakuten.co.jp/services/api/Travel/HotelDetailSearch/20170426";

// Rakuten allows roughly one request per second per application id
pub const RATE_LIMIT_FLOOR: Duration = Duration::from_secs(1);

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8000";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub application_id: String,
    pub affiliate_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub keyword_search: String,
    pub hotel_detail: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            keyword_search: KEYWORD_SEARCH_URL.to_string(),
            hotel_detail: DETAIL_SEARCH_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    // None when RAKUTEN_APP_ID is unset; the form stays up but exports are refused
    pub credentials: Option<Credentials>,
    pub endpoints: Endpoints,
    pub rate_limit_floor: Duration,
    pub timeout_secs: u64,
    pub bind_addr: SocketAddr,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            credentials: None,
            endpoints: Endpoints::default(),
            rate_limit_floor: RATE_LIMIT_FLOOR,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8000)),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    // Build from an arbitrary variable source; empty values count as unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let credentials = var("RAKUTEN_APP_ID").map(|application_id| Credentials {
            application_id,
            affiliate_id: var("RAKUTEN_AFFILIATE_ID"),
        });

        let defaults = Endpoints::default();
        let endpoints = Endpoints {
            keyword_search: var("RAKUTEN_KEYWORD_SEARCH_URL").unwrap_or(defaults.keyword_search),
            hotel_detail: var("RAKUTEN_DETAIL_SEARCH_URL").unwrap_or(defaults.hotel_detail),
        };

        let rate_limit_floor = match var("RAKUTEN_MIN_INTERVAL_MS") {
            Some(raw) => {
                let millis: u64 = raw.parse().map_err(|_| ConfigError::InvalidValue {
                    name: "RAKUTEN_MIN_INTERVAL_MS",
                    value: raw.clone(),
                })?;
                Duration::from_millis(millis).max(RATE_LIMIT_FLOOR)
            }
            None => RATE_LIMIT_FLOOR,
        };

        let timeout_secs = match var("RAKUTEN_TIMEOUT_SECS") {
            Some(raw) => match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => secs,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        name: "RAKUTEN_TIMEOUT_SECS",
                        value: raw,
                    })
                }
            },
            None => DEFAULT_TIMEOUT_SECS,
        };

        let bind_raw = var("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind_raw
            .parse()
            .map_err(|_| ConfigError::InvalidValue {
                name: "BIND_ADDR",
                value: bind_raw.clone(),
            })?;

        Ok(Self {
            credentials,
            endpoints,
            rate_limit_floor,
            timeout_secs,
            bind_addr,
        })
    }

    // Upstream client settings, available only once an application id is configured
    pub fn client_config(&self) -> Option<ClientConfig> {
        let credentials = self.credentials.clone()?;
        Some(ClientConfig {
            credentials,
            endpoints: self.endpoints.clone(),
            timeout_ms: self.timeout_secs * 1000,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        })
    }
}
