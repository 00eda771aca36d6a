// Rakuten Travel API client
// Both endpoints are plain HTTPS GETs with query-string parameters. Every call
// resolves to a JSON payload: transport and HTTP failures are folded into the
// same error-payload shape the API uses, so callers have one error path.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::{Credentials, Endpoints};
use crate::response::extract_api_error;
use crate::search::HotelNo;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (compatible; RakutenTravelCSV/1.0)";

// Failures of a single upstream request
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("API error: {status_code} - {message}")]
    ApiResponseError { status_code: u16, message: String },

    #[error("Invalid response body: {0}")]
    InvalidBody(String),
}

impl ApiError {
    // Synthetic {error, error_description} payload for this failure
    pub fn into_payload(self) -> Value {
        let (error, description) = match self {
            ApiError::NetworkError(message) => ("network_error".to_string(), message),
            ApiError::Timeout(ms) => ("timeout".to_string(), format!("no response after {}ms", ms)),
            ApiError::ApiResponseError {
                status_code,
                message,
            } => (format!("http_{}", status_code), message),
            ApiError::InvalidBody(message) => ("invalid_response".to_string(), message),
        };
        json!({ "error": error, "error_description": description })
    }
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Initialization error: {0}")]
    InitError(String),
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub credentials: Credentials,
    pub endpoints: Endpoints,
    pub timeout_ms: u64,
    pub user_agent: String,
}

// The two upstream lookups the exporter needs
#[async_trait]
pub trait TravelApi: Send + Sync + 'static {
    // One page (1-based) of keyword search results, or an error payload
    async fn keyword_search(&self, keyword: &str, hits: u32, page: u32) -> Value;

    // Detail record for one hotel, or an error payload
    async fn hotel_detail(&self, hotel_no: &HotelNo) -> Value;
}

pub struct RakutenClient {
    http: reqwest::Client,
    config: ClientConfig,
}

impl RakutenClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        if config.credentials.application_id.trim().is_empty() {
            return Err(ClientError::ConfigError(
                "application id must not be empty".to_string(),
            ));
        }

        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| ClientError::InitError(e.to_string()))?;

        Ok(Self { http, config })
    }

    // Parameters shared by both endpoints
    fn base_params(&self) -> Vec<(&'static str, String)> {
        let credentials = &self.config.credentials;
        let mut params = vec![
            ("applicationId", credentials.application_id.clone()),
            ("format", "json".to_string()),
            ("formatVersion", "2".to_string()),
            ("responseType", "large".to_string()),
        ];
        if let Some(affiliate_id) = &credentials.affiliate_id {
            params.push(("affiliateId", affiliate_id.clone()));
        }
        params
    }

    async fn get_json(&self, url: &str, params: &[(&'static str, String)]) -> Result<Value, ApiError> {
        let response = self
            .http
            .get(url)
            .query(params)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| self.transport_error(e))?;

        if !status.is_success() {
            // Some error bodies are well-formed JSON carrying the API's own error fields
            if let Ok(payload) = serde_json::from_str::<Value>(&body) {
                if extract_api_error(&payload).is_some() {
                    return Ok(payload);
                }
            }
            return Err(ApiError::ApiResponseError {
                status_code: status.as_u16(),
                message: status
                    .canonical_reason()
                    .unwrap_or("Unknown Status")
                    .to_string(),
            });
        }

        serde_json::from_str(&body).map_err(|e| ApiError::InvalidBody(e.to_string()))
    }

    fn transport_error(&self, err: reqwest::Error) -> ApiError {
        if err.is_timeout() {
            ApiError::Timeout(self.config.timeout_ms)
        } else {
            ApiError::NetworkError(err.to_string())
        }
    }
}

#[async_trait]
impl TravelApi for RakutenClient {
    async fn keyword_search(&self, keyword: &str, hits: u32, page: u32) -> Value {
        let mut params = self.base_params();
        params.push(("keyword", keyword.to_string()));
        params.push(("hits", hits.to_string()));
        params.push(("page", page.to_string()));

        debug!(keyword, hits, page, "keyword search request");
        self.get_json(&self.config.endpoints.keyword_search, &params)
            .await
            .unwrap_or_else(ApiError::into_payload)
    }

    async fn hotel_detail(&self, hotel_no: &HotelNo) -> Value {
        let mut params = self.base_params();
        params.push(("hotelNo", hotel_no.to_string()));

        debug!(hotel_no = %hotel_no, "hotel detail request");
        self.get_json(&self.config.endpoints.hotel_detail, &params)
            .await
            .unwrap_or_else(ApiError::into_payload)
    }
}
