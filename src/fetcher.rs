// Fetch loop: paged keyword search -> dedup -> per-hotel detail lookup -> OutputRow
//
// Rows are produced one at a time on demand. Dropping the fetcher (or the stream
// built from it) abandons any in-flight request and issues no further calls, which
// is how a client disconnect stops upstream traffic.

use futures::stream::{self, Stream};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::api::TravelApi;
use crate::response::{extract_api_error, extract_listings, extract_room_count, Record};
use crate::search::{HotelNo, OutputRow, SearchParams};

pub struct HotelFetcher {
    api: Arc<dyn TravelApi>,
    params: SearchParams,
    delay: Duration,
    seen: HashSet<HotelNo>,
    pending: VecDeque<Record>,
    pages_fetched: u32,
    rows_emitted: usize,
    more_pages: bool,
    // Start of the previous upstream call; the next one waits until `delay` after it
    last_call: Option<Instant>,
    finished: bool,
}

impl HotelFetcher {
    pub fn new(api: Arc<dyn TravelApi>, params: SearchParams, rate_limit_floor: Duration) -> Self {
        let delay = params.effective_delay(rate_limit_floor);
        Self {
            api,
            params,
            delay,
            seen: HashSet::new(),
            pending: VecDeque::new(),
            pages_fetched: 0,
            rows_emitted: 0,
            more_pages: true,
            last_call: None,
            finished: false,
        }
    }

    pub fn params(&self) -> &SearchParams {
        &self.params
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn pages_fetched(&self) -> u32 {
        self.pages_fetched
    }

    pub fn rows_emitted(&self) -> usize {
        self.rows_emitted
    }

    // Next enriched row, or None once the search is exhausted or has failed
    pub async fn next_row(&mut self) -> Option<OutputRow> {
        if self.finished {
            return None;
        }

        loop {
            while let Some(listing) = self.pending.pop_front() {
                let Some(hotel_no) = HotelNo::from_listing(&listing) else {
                    debug!("skipping listing without hotel number");
                    continue;
                };
                if !self.seen.insert(hotel_no.clone()) {
                    debug!(hotel_no = %hotel_no, "skipping duplicate listing");
                    continue;
                }

                let total_rooms = self.lookup_total_rooms(&hotel_no).await;
                self.rows_emitted += 1;
                return Some(OutputRow::from_listing(&listing, total_rooms));
            }

            if !self.more_pages {
                self.finished = true;
                info!(
                    keyword = self.params.keyword(),
                    pages = self.pages_fetched,
                    rows = self.rows_emitted,
                    "hotel fetch finished"
                );
                return None;
            }

            self.fetch_next_page().await;
        }
    }

    // Pull rows lazily; each poll drives at most the upstream calls needed for one row
    pub fn into_stream(self) -> impl Stream<Item = OutputRow> + Send {
        stream::unfold(self, |mut fetcher| async move {
            let row = fetcher.next_row().await?;
            Some((row, fetcher))
        })
    }

    async fn fetch_next_page(&mut self) {
        if self.pages_fetched >= self.params.max_pages() {
            self.more_pages = false;
            return;
        }

        self.throttle().await;
        let page = self.pages_fetched + 1;
        let hits = self.params.hits();
        let payload = self
            .api
            .keyword_search(self.params.keyword(), hits, page)
            .await;
        self.pages_fetched = page;

        if let Some(error) = extract_api_error(&payload) {
            warn!(page, error = %error, "keyword search failed, ending export");
            self.more_pages = false;
            return;
        }

        let Some(listing_page) = extract_listings(&payload) else {
            warn!(page, "unrecognized keyword search response, treating as empty");
            self.more_pages = false;
            return;
        };

        debug!(
            page,
            entries = listing_page.entry_count,
            shape = ?listing_page.shape,
            "fetched search page"
        );

        // A short page is the last one
        if listing_page.entry_count == 0 || listing_page.entry_count < hits as usize {
            self.more_pages = false;
        }
        self.pending.extend(listing_page.listings);
    }

    async fn lookup_total_rooms(&mut self, hotel_no: &HotelNo) -> Option<u64> {
        self.throttle().await;
        let detail = self.api.hotel_detail(hotel_no).await;

        if let Some(error) = extract_api_error(&detail) {
            warn!(hotel_no = %hotel_no, error = %error, "hotel detail lookup failed");
            return None;
        }
        extract_room_count(&detail)
    }

    // Spaces every upstream call, search or detail, at least `delay` apart
    async fn throttle(&mut self) {
        if let Some(last) = self.last_call {
            tokio::time::sleep_until(last + self.delay).await;
        }
        self.last_call = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock_server::{detail, listing, search_page, MockCall, MockServer};
    use futures::StreamExt;
    use serde_json::{json, Value};
    use test_case::test_case;

    const FLOOR: Duration = Duration::from_secs(1);

    fn fetcher(server: &Arc<MockServer>, hits: i64, max_pages: i64, sleep: f64) -> HotelFetcher {
        HotelFetcher::new(
            server.clone(),
            SearchParams::new("貸し別荘", hits, max_pages, sleep),
            FLOOR,
        )
    }

    async fn collect(fetcher: HotelFetcher) -> Vec<OutputRow> {
        fetcher.into_stream().collect().await
    }

    // `count` listings with consecutive ids starting at `first`
    fn listings(first: u64, count: u64) -> Vec<Value> {
        (first..first + count)
            .map(|id| listing(id, &format!("Hotel {}", id)))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_first_page_stops_after_one_search() {
        let server = Arc::new(MockServer::new());
        server.add_search_page(1, search_page(vec![listing(1, "A"), listing(2, "B")]));
        server.add_detail("1", detail(10));
        server.add_detail("2", detail(20));

        let rows = collect(fetcher(&server, 30, 10, 0.0)).await;

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].hotel_name.as_deref(), Some("A"));
        assert_eq!(rows[0].total_rooms, Some(10));
        assert_eq!(rows[1].hotel_name.as_deref(), Some("B"));
        assert_eq!(rows[1].total_rooms, Some(20));
        assert_eq!(server.search_calls(), 1);
        assert_eq!(server.detail_calls(), vec!["1", "2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_page_with_duplicate_continues_to_next_page() {
        let server = Arc::new(MockServer::new());
        let mut first = listings(1, 29);
        first.push(listing(5, "Hotel 5 again"));
        server.add_search_page(1, search_page(first));
        server.add_search_page(2, search_page(vec![listing(100, "Late")]));

        let rows = collect(fetcher(&server, 30, 10, 0.0)).await;

        assert_eq!(rows.len(), 30);
        assert!(rows[..29].iter().all(|r| r.hotel_name.as_deref() != Some("Hotel 5 again")));
        assert_eq!(rows[29].hotel_name.as_deref(), Some("Late"));
        assert_eq!(server.search_calls(), 2);
        assert_eq!(server.detail_calls().len(), 30);
    }

    #[tokio::test(start_paused = true)]
    async fn test_detail_error_leaves_rooms_empty() {
        let server = Arc::new(MockServer::new());
        server.add_search_page(
            1,
            search_page(vec![listing(1, "A"), listing(3, "C"), listing(4, "D")]),
        );
        server.add_detail("1", detail(10));
        server.add_detail("3", json!({"Error": "invalid_hotel_no"}));
        server.add_detail("4", detail(5));

        let rows = collect(fetcher(&server, 30, 10, 0.0)).await;

        let rooms: Vec<_> = rows.iter().map(|r| r.total_rooms).collect();
        assert_eq!(rooms, vec![Some(10), None, Some(5)]);
        assert_eq!(rows[1].hotel_name.as_deref(), Some("C"));
        assert_eq!(server.detail_calls(), vec!["1", "3", "4"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicates_across_pages_are_emitted_once() {
        let server = Arc::new(MockServer::new());
        server.add_search_page(1, search_page(vec![listing(1, "A"), listing(2, "B")]));
        server.add_search_page(2, search_page(vec![listing(2, "B"), listing(3, "C")]));
        server.add_search_page(3, search_page(vec![listing(1, "A"), listing(3, "C")]));

        let rows = collect(fetcher(&server, 2, 10, 0.0)).await;

        let names: Vec<_> = rows.iter().filter_map(|r| r.hotel_name.clone()).collect();
        assert_eq!(names, vec!["A", "B", "C"]);
        assert_eq!(server.detail_calls(), vec!["1", "2", "3"]);
        // Page 4 is unscripted and comes back empty
        assert_eq!(server.search_calls(), 4);
    }

    #[test_case(1, 1; "single page")]
    #[test_case(3, 2; "two of three pages")]
    #[test_case(5, 5; "all pages")]
    #[tokio::test(start_paused = true)]
    async fn test_search_calls_bounded_by_max_pages(hits: u64, max_pages: u32) {
        let server = Arc::new(MockServer::new());
        for page in 1..=(max_pages + 2) as u64 {
            server.add_search_page(page as u32, search_page(listings(page * 100, hits)));
        }

        let rows = collect(fetcher(&server, hits as i64, max_pages as i64, 0.0)).await;

        assert_eq!(server.search_calls(), max_pages as usize);
        assert_eq!(rows.len(), (hits * max_pages as u64) as usize);
    }

    #[tokio::test(start_paused = true)]
    async fn test_search_pages_are_requested_in_order() {
        let server = Arc::new(MockServer::new());
        server.add_search_page(1, search_page(listings(1, 2)));
        server.add_search_page(2, search_page(listings(3, 1)));

        collect(fetcher(&server, 2, 10, 0.0)).await;

        let searches: Vec<_> = server
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                MockCall::Search { keyword, hits, page } => Some((keyword, hits, page)),
                _ => None,
            })
            .collect();
        assert_eq!(
            searches,
            vec![("貸し別荘".to_string(), 2, 1), ("貸し別荘".to_string(), 2, 2)]
        );
    }

    #[test_case(json!({"error": "wrong_parameter", "error_description": "keyword is too short"}); "error pair")]
    #[test_case(json!({"Error": "not_found"}); "capitalized error")]
    #[test_case(json!({"errorMessage": "rate limit exceeded"}); "error message")]
    #[tokio::test(start_paused = true)]
    async fn test_search_error_ends_stream(error_payload: Value) {
        let server = Arc::new(MockServer::new());
        server.add_search_page(1, search_page(listings(1, 2)));
        server.add_search_page(2, error_payload);
        server.add_search_page(3, search_page(listings(10, 2)));

        let rows = collect(fetcher(&server, 2, 10, 0.0)).await;

        // Page one survives, nothing after the failing page is requested
        assert_eq!(rows.len(), 2);
        assert_eq!(server.search_calls(), 2);
        assert_eq!(server.detail_calls(), vec!["1", "2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_on_first_page_yields_nothing() {
        let server = Arc::new(MockServer::new());
        server.add_search_page(
            1,
            json!({"error": "wrong_parameter", "error_description": "specify valid applicationId"}),
        );

        let rows = collect(fetcher(&server, 30, 10, 0.0)).await;

        assert!(rows.is_empty());
        assert_eq!(server.search_calls(), 1);
        assert!(server.detail_calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrecognized_shape_ends_stream() {
        let server = Arc::new(MockServer::new());
        server.add_search_page(1, json!({"pagingInfo": {"recordCount": 0}}));
        server.add_search_page(2, search_page(listings(1, 1)));

        let rows = collect(fetcher(&server, 30, 10, 0.0)).await;

        assert!(rows.is_empty());
        assert_eq!(server.search_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capitalized_shape_is_read() {
        let server = Arc::new(MockServer::new());
        server.add_search_page(
            1,
            json!({"Hotels": [{"Hotel": {"hotelNo": 77, "hotelName": "Upper"}}]}),
        );
        server.add_detail("77", json!({"Hotel": {"hotelRoomNum": 3}}));

        let rows = collect(fetcher(&server, 30, 10, 0.0)).await;

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].hotel_name.as_deref(), Some("Upper"));
        assert_eq!(rows[0].total_rooms, Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_listing_without_id_is_skipped() {
        let server = Arc::new(MockServer::new());
        server.add_search_page(
            1,
            search_page(vec![json!({"hotel": {"hotelName": "Anonymous"}}), listing(2, "B")]),
        );

        let rows = collect(fetcher(&server, 30, 10, 0.0)).await;

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].hotel_name.as_deref(), Some("B"));
        assert_eq!(server.detail_calls(), vec!["2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_sleep_still_waits_for_rate_limit_floor() {
        let server = Arc::new(MockServer::new());
        server.add_search_page(1, search_page(listings(1, 3)));

        let fetcher = fetcher(&server, 30, 10, 0.0);
        assert_eq!(fetcher.delay(), FLOOR);
        collect(fetcher).await;

        let instants = server.detail_instants();
        assert_eq!(instants.len(), 3);
        for pair in instants.windows(2) {
            assert!(pair[1] - pair[0] >= FLOOR);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_longer_sleep_is_honoured() {
        let server = Arc::new(MockServer::new());
        server.add_search_page(1, search_page(listings(1, 2)));

        collect(fetcher(&server, 30, 10, 2.5)).await;

        let instants = server.detail_instants();
        assert!(instants[1] - instants[0] >= Duration::from_millis(2500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_pause_after_last_row() {
        let server = Arc::new(MockServer::new());
        server.add_search_page(1, search_page(listings(1, 3)));

        let started = tokio::time::Instant::now();
        collect(fetcher(&server, 30, 10, 0.0)).await;

        // Search plus three details: three gaps, nothing trailing
        assert_eq!(server.calls().len(), 4);
        assert!(started.elapsed() >= FLOOR * 3);
        assert!(started.elapsed() < FLOOR * 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_upstream_call_is_spaced_by_delay() {
        let server = Arc::new(MockServer::new());
        server.add_search_page(1, search_page(listings(1, 2)));
        server.add_search_page(2, search_page(listings(3, 1)));
        server.add_detail("1", detail(1));

        collect(fetcher(&server, 2, 10, 0.0)).await;

        assert_eq!(
            server.calls(),
            vec![
                MockCall::Search { keyword: "貸し別荘".to_string(), hits: 2, page: 1 },
                MockCall::Detail("1".to_string()),
                MockCall::Detail("2".to_string()),
                MockCall::Search { keyword: "貸し別荘".to_string(), hits: 2, page: 2 },
                MockCall::Detail("3".to_string()),
            ]
        );
        // Search -> detail and detail -> next search gaps included
        let instants = server.call_instants();
        assert_eq!(instants.len(), 5);
        for pair in instants.windows(2) {
            assert!(pair[1] - pair[0] >= FLOOR);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_only_page_still_waits_before_next_search() {
        let server = Arc::new(MockServer::new());
        server.add_search_page(1, search_page(listings(1, 2)));
        server.add_search_page(2, search_page(listings(1, 2)));

        collect(fetcher(&server, 2, 2, 0.0)).await;

        assert_eq!(server.search_calls(), 2);
        let instants = server.call_instants();
        assert_eq!(instants.len(), 4);
        for pair in instants.windows(2) {
            assert!(pair[1] - pair[0] >= FLOOR);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_stream_stops_upstream_calls() {
        let server = Arc::new(MockServer::new());
        server.add_search_page(1, search_page(listings(1, 3)));

        let mut stream = Box::pin(fetcher(&server, 30, 10, 0.0).into_stream());
        let first = stream.next().await;
        assert!(first.is_some());
        drop(stream);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(server.search_calls(), 1);
        assert_eq!(server.detail_calls(), vec!["1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_row_after_finish_makes_no_calls() {
        let server = Arc::new(MockServer::new());
        server.add_search_page(1, search_page(listings(1, 1)));

        let mut fetcher = fetcher(&server, 30, 10, 0.0);
        assert!(fetcher.next_row().await.is_some());
        assert!(fetcher.next_row().await.is_none());
        assert!(fetcher.next_row().await.is_none());

        assert_eq!(fetcher.pages_fetched(), 1);
        assert_eq!(fetcher.rows_emitted(), 1);
        assert_eq!(server.search_calls(), 1);
    }
}
