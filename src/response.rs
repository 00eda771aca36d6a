// Interpretation of upstream Travel API payloads
// The API reports failures as ordinary JSON bodies and has shipped more than one
// nesting for its hotel lists, so everything here is best-effort over serde_json::Value.

use serde_json::{Map, Value};

// One hotel record, flattened to a single key-value map
pub type Record = Map<String, Value>;

// Normalize the known error payload shapes into one description
//   {"error": "...", "error_description": "..."}
//   {"Error": "..."}
//   {"errorMessage": "..."}
pub fn extract_api_error(payload: &Value) -> Option<String> {
    let obj = payload.as_object()?;

    let description = if obj.contains_key("error") || obj.contains_key("error_description") {
        let error = obj.get("error").map(value_text).unwrap_or_default();
        let detail = obj
            .get("error_description")
            .map(value_text)
            .unwrap_or_default();
        format!("{} {}", error, detail).trim().to_string()
    } else if let Some(error) = obj.get("Error") {
        value_text(error)
    } else {
        value_text(obj.get("errorMessage")?)
    };

    Some(description).filter(|d| !d.is_empty())
}

// Text form of a JSON value; null renders empty
fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// Scalar field as CSV text, None for null
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        other => Some(value_text(other)),
    }
}

// Room counts arrive as numbers or numeric strings
pub fn count_value(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                // u64::MAX as f64 rounds up to 2^64, which is already out of range
                .filter(|f| *f >= 0.0 && *f < u64::MAX as f64 && f.fract() == 0.0)
                .map(|f| f as u64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// A hotel is either a flat object or a list of single-key info groups
// ([{"hotelBasicInfo": {...}}, {"hotelFacilitiesInfo": {...}}]), which are merged.
pub fn flatten_record(value: &Value) -> Option<Record> {
    match value {
        Value::Object(obj) => Some(obj.clone()),
        Value::Array(groups) => {
            let mut merged = Record::new();
            for group in groups.iter().filter_map(Value::as_object) {
                for (key, field) in group {
                    match field {
                        Value::Object(inner) => {
                            for (inner_key, inner_value) in inner {
                                merged
                                    .entry(inner_key.clone())
                                    .or_insert_with(|| inner_value.clone());
                            }
                        }
                        other => {
                            merged.entry(key.clone()).or_insert_with(|| other.clone());
                        }
                    }
                }
            }
            Some(merged).filter(|m| !m.is_empty())
        }
        _ => None,
    }
}

// Known nestings of the hotel list, tried in declaration order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingShape {
    // {"hotels": [{"hotel": ...} | ...]}
    Lowercase,
    // {"Hotels": [{"Hotel": ...}]}
    Capitalized,
}

impl ListingShape {
    pub const ALL: [ListingShape; 2] = [ListingShape::Lowercase, ListingShape::Capitalized];

    fn keys(self) -> (&'static str, &'static str) {
        match self {
            ListingShape::Lowercase => ("hotels", "hotel"),
            ListingShape::Capitalized => ("Hotels", "Hotel"),
        }
    }

    pub fn match_page(self, payload: &Value) -> Option<ListingPage> {
        let (list_key, item_key) = self.keys();
        let entries = payload.get(list_key)?.as_array()?;

        let listings = entries
            .iter()
            .filter_map(|entry| match entry.get(item_key) {
                Some(inner) => flatten_record(inner),
                // Lowercase responses may also list bare hotel records
                None if self == ListingShape::Lowercase => flatten_record(entry),
                None => None,
            })
            .collect();

        Some(ListingPage {
            shape: self,
            entry_count: entries.len(),
            listings,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListingPage {
    pub shape: ListingShape,
    // Raw entries returned, including any that could not be read as a hotel.
    // This is what the page-size check compares against.
    pub entry_count: usize,
    pub listings: Vec<Record>,
}

pub fn extract_listings(payload: &Value) -> Option<ListingPage> {
    ListingShape::ALL
        .iter()
        .find_map(|shape| shape.match_page(payload))
}

// Total room count from a detail response: first hotel of a list, or a bare "Hotel" object
pub fn extract_room_count(detail: &Value) -> Option<u64> {
    let record = extract_listings(detail)
        .and_then(|page| page.listings.into_iter().next())
        .or_else(|| detail.get("Hotel").and_then(flatten_record))?;

    record.get("hotelRoomNum").and_then(count_value)
}
