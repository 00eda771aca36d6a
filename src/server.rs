// HTTP surface: health check, search form, CSV export

use axum::{
    body::Body,
    extract::{Form, State},
    http::{header, HeaderValue},
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api::{ClientError, RakutenClient, TravelApi};
use crate::config::Config;
use crate::csv_stream::CsvResponder;
use crate::fetcher::HotelFetcher;
use crate::search::{
    SearchForm, SearchParams, DEFAULT_HITS, DEFAULT_KEYWORD, DEFAULT_MAX_PAGES,
    DEFAULT_SLEEP_SECS, MAX_HITS, MAX_PAGES_LIMIT,
};

pub const MISSING_APP_ID_MESSAGE: &str = "RAKUTEN_APP_ID が設定されていません。";

#[derive(Clone)]
pub struct AppState {
    // None until an application id is configured
    pub api: Option<Arc<dyn TravelApi>>,
    pub rate_limit_floor: Duration,
}

impl AppState {
    pub fn from_config(config: &Config) -> Result<Self, ClientError> {
        let api = match config.client_config() {
            Some(client_config) => {
                Some(Arc::new(RakutenClient::new(client_config)?) as Arc<dyn TravelApi>)
            }
            None => None,
        };

        Ok(Self {
            api,
            rate_limit_floor: config.rate_limit_floor,
        })
    }
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/", get(index_handler).post(export_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn index_handler(State(state): State<AppState>) -> Html<String> {
    render_form(state.api.is_some(), None)
}

pub async fn export_handler(
    State(state): State<AppState>,
    Form(form): Form<SearchForm>,
) -> Response {
    let Some(api) = state.api.clone() else {
        return render_form(false, Some(MISSING_APP_ID_MESSAGE)).into_response();
    };

    let params = SearchParams::from_form(&form);
    info!(
        keyword = params.keyword(),
        hits = params.hits(),
        max_pages = params.max_pages(),
        sleep_secs = params.sleep().as_secs_f64(),
        "starting CSV export"
    );

    let disposition = content_disposition(&params.export_filename());
    let fetcher = HotelFetcher::new(api, params, state.rate_limit_floor);
    let body = Body::from_stream(CsvResponder::new(fetcher).into_stream());

    (
        [
            (
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/csv; charset=utf-8"),
            ),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response()
}

// RFC 5987 extended filename; percent-encoding keeps non-ASCII keywords header-safe
fn content_disposition(filename: &str) -> HeaderValue {
    let value = format!(
        "attachment; filename*=UTF-8''{}",
        urlencoding::encode(filename)
    );
    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

fn render_form(app_id_configured: bool, error: Option<&str>) -> Html<String> {
    let status = if app_id_configured {
        r#"<p class="status ok">RAKUTEN_APP_ID: 設定済み</p>"#.to_string()
    } else {
        r#"<p class="status missing">RAKUTEN_APP_ID: 未設定</p>"#.to_string()
    };
    let error = error
        .map(|message| {
            format!(
                r#"<p class="error">{}</p>"#,
                html_escape::encode_text(message)
            )
        })
        .unwrap_or_default();

    Html(format!(
        r#"<!doctype html>
<html lang="ja">
<head>
<meta charset="utf-8">
<title>楽天トラベル ホテルCSV出力</title>
</head>
<body>
<h1>楽天トラベル ホテルCSV出力</h1>
{status}
{error}
<form method="post" action="/">
  <label>キーワード <input type="text" name="keyword" value="{keyword}"></label><br>
  <label>1ページの件数 (1-{max_hits}) <input type="number" name="hits" min="1" max="{max_hits}" value="{hits}"></label><br>
  <label>最大ページ数 (1-{max_pages_limit}) <input type="number" name="max_pages" min="1" max="{max_pages_limit}" value="{max_pages}"></label><br>
  <label>待機秒数 <input type="number" name="sleep" min="0" step="0.1" value="{sleep}"></label><br>
  <button type="submit">CSVをダウンロード</button>
</form>
</body>
</html>
"#,
        status = status,
        error = error,
        keyword = html_escape::encode_double_quoted_attribute(DEFAULT_KEYWORD),
        max_hits = MAX_HITS,
        hits = DEFAULT_HITS,
        max_pages_limit = MAX_PAGES_LIMIT,
        max_pages = DEFAULT_MAX_PAGES,
        sleep = DEFAULT_SLEEP_SECS,
    ))
}
