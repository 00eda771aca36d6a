// Search parameters, hotel identifiers and the flattened CSV row

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

use crate::response::{scalar_text, Record};

pub const DEFAULT_KEYWORD: &str = "貸し別荘";
pub const DEFAULT_HITS: u32 = 30;
pub const MAX_HITS: u32 = 30;
pub const DEFAULT_MAX_PAGES: u32 = 10;
pub const MAX_PAGES_LIMIT: u32 = 100;
pub const DEFAULT_SLEEP_SECS: f64 = 0.5;

// Column order of the exported file
pub const CSV_HEADER: [&str; 6] = ["hotel_name", "min_charge", "url", "address", "tel", "total_rooms"];

// Raw form submission; every field is optional and parsed leniently
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchForm {
    pub keyword: Option<String>,
    pub hits: Option<String>,
    pub max_pages: Option<String>,
    pub sleep: Option<String>,
}

// Parameters for one export, fixed for the lifetime of the request
#[derive(Debug, Clone, PartialEq)]
pub struct SearchParams {
    keyword: String,
    hits: u32,
    max_pages: u32,
    sleep: Duration,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self::new(
            DEFAULT_KEYWORD,
            DEFAULT_HITS as i64,
            DEFAULT_MAX_PAGES as i64,
            DEFAULT_SLEEP_SECS,
        )
    }
}

impl SearchParams {
    // Clamp everything into the ranges the upstream API accepts
    pub fn new(keyword: &str, hits: i64, max_pages: i64, sleep_secs: f64) -> Self {
        let keyword = match keyword.trim() {
            "" => DEFAULT_KEYWORD.to_string(),
            trimmed => trimmed.to_string(),
        };
        let sleep = if sleep_secs.is_finite() {
            Duration::try_from_secs_f64(sleep_secs.max(0.0))
                .unwrap_or_else(|_| Duration::from_secs_f64(DEFAULT_SLEEP_SECS))
        } else {
            Duration::from_secs_f64(DEFAULT_SLEEP_SECS)
        };

        Self {
            keyword,
            hits: hits.clamp(1, MAX_HITS as i64) as u32,
            max_pages: max_pages.clamp(1, MAX_PAGES_LIMIT as i64) as u32,
            sleep,
        }
    }

    // Malformed numbers fall back to the defaults before clamping
    pub fn from_form(form: &SearchForm) -> Self {
        fn parse_or<T: std::str::FromStr>(raw: &Option<String>, default: T) -> T {
            raw.as_deref()
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(default)
        }

        Self::new(
            form.keyword.as_deref().unwrap_or(DEFAULT_KEYWORD),
            parse_or(&form.hits, DEFAULT_HITS as i64),
            parse_or(&form.max_pages, DEFAULT_MAX_PAGES as i64),
            parse_or(&form.sleep, DEFAULT_SLEEP_SECS),
        )
    }

    pub fn keyword(&self) -> &str {
        &self.keyword
    }

    pub fn hits(&self) -> u32 {
        self.hits
    }

    pub fn max_pages(&self) -> u32 {
        self.max_pages
    }

    pub fn sleep(&self) -> Duration {
        self.sleep
    }

    // The requested pause never undercuts the upstream rate limit
    pub fn effective_delay(&self, rate_limit_floor: Duration) -> Duration {
        self.sleep.max(rate_limit_floor)
    }

    pub fn export_filename(&self) -> String {
        format!("rakuten_hotels_{}.csv", self.keyword)
    }
}

// Hotel identifier; numeric and string forms of the same id compare equal
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HotelNo(String);

impl HotelNo {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    // "hotelNo", falling back to "hotel_no"; blank, zero and null count as absent
    pub fn from_listing(listing: &Record) -> Option<Self> {
        ["hotelNo", "hotel_no"]
            .iter()
            .find_map(|key| listing.get(*key).and_then(Self::from_value))
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if !s.trim().is_empty() => Some(Self(s.trim().to_string())),
            Value::Number(n) if n.as_f64() != Some(0.0) => Some(Self(n.to_string())),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HotelNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// One exported line; field order matches CSV_HEADER
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputRow {
    pub hotel_name: Option<String>,
    pub min_charge: Option<String>,
    pub url: Option<String>,
    pub address: String,
    pub tel: Option<String>,
    pub total_rooms: Option<u64>,
}

impl OutputRow {
    pub fn from_listing(listing: &Record, total_rooms: Option<u64>) -> Self {
        let text = |key: &str| listing.get(key).and_then(scalar_text);

        let address = ["address1", "address2"]
            .iter()
            .filter_map(|&key| text(key))
            .collect::<Vec<_>>()
            .concat();

        Self {
            hotel_name: text("hotelName"),
            min_charge: text("hotelMinCharge"),
            url: text("hotelInformationUrl"),
            address,
            tel: text("telephoneNo"),
            total_rooms,
        }
    }
}
