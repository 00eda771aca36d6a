// Rakuten Travel hotel search -> CSV export service

// Modules, bottom-up
pub mod api;
pub mod config;
pub mod csv_stream;
pub mod fetcher;
pub mod response;
pub mod search;
pub mod server;

// Re-export key types for convenience
pub use api::{ApiError, ClientConfig, ClientError, RakutenClient, TravelApi};
pub use config::{Config, ConfigError, Credentials, Endpoints, RATE_LIMIT_FLOOR};
pub use csv_stream::{CsvResponder, CsvRowEncoder};
pub use fetcher::HotelFetcher;
pub use response::{extract_api_error, extract_listings, extract_room_count, ListingPage, ListingShape};
pub use search::{HotelNo, OutputRow, SearchForm, SearchParams, CSV_HEADER};
pub use server::{build_app, AppState};
