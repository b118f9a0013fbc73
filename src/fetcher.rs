use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{Config, PaginationConfig};
use crate::db::Writer;
use crate::error::{AppError, Result};
use crate::latency::FetchLatency;
use crate::types::{ApiBase, OrderBook, RecordKind};

/// One page request: `limit`/`offset`, plus ordering when the kind supports it.
#[derive(Debug, Clone, PartialEq)]
pub struct PageRequest<'a> {
    pub offset: usize,
    pub limit: usize,
    pub order: Option<&'a str>,
    pub ascending: bool,
}

/// A remote paginated collection.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(&self, kind: RecordKind, req: &PageRequest<'_>) -> Result<Vec<Value>>;
}

/// Source of CLOB orderbooks for snapshot capture.
#[async_trait]
pub trait BookSource: Send + Sync {
    async fn fetch_book(&self, token_id: &str) -> Result<OrderBook>;
}

/// Public Polymarket REST APIs (Gamma, Data, CLOB). No authentication.
pub struct ApiClient {
    client: reqwest::Client,
    gamma_api_url: String,
    data_api_url: String,
    clob_api_url: String,
}

impl ApiClient {
    pub fn new(cfg: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("polymarket-ingest/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            gamma_api_url: cfg.gamma_api_url.trim_end_matches('/').to_string(),
            data_api_url: cfg.data_api_url.trim_end_matches('/').to_string(),
            clob_api_url: cfg.clob_api_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint_url(&self, kind: RecordKind) -> String {
        let base = match kind.api_base() {
            ApiBase::Gamma => &self.gamma_api_url,
            ApiBase::Data => &self.data_api_url,
        };
        format!("{}/{}", base, kind.endpoint())
    }
}

#[async_trait]
impl PageSource for ApiClient {
    async fn fetch_page(&self, kind: RecordKind, req: &PageRequest<'_>) -> Result<Vec<Value>> {
        let url = self.endpoint_url(kind);
        let mut query: Vec<(&str, String)> = vec![
            ("limit", req.limit.to_string()),
            ("offset", req.offset.to_string()),
        ];
        if let (Some(order), true) = (req.order, kind.supports_ordering()) {
            query.push(("order", order.to_string()));
            query.push(("ascending", req.ascending.to_string()));
        }

        let body: Value = self
            .client
            .get(&url)
            .query(&query)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        extract_items(kind, body)
    }
}

#[async_trait]
impl BookSource for ApiClient {
    async fn fetch_book(&self, token_id: &str) -> Result<OrderBook> {
        let url = format!("{}/book", self.clob_api_url);
        let book = self
            .client
            .get(&url)
            .query(&[("token_id", token_id)])
            .send()
            .await?
            .error_for_status()?
            .json::<OrderBook>()
            .await?;
        Ok(book)
    }
}

/// A page body is either a bare array or an object with a `data` array.
/// An object without `data` counts as an empty page.
pub fn extract_items(kind: RecordKind, body: Value) -> Result<Vec<Value>> {
    match body {
        Value::Array(items) => Ok(items),
        Value::Object(mut obj) => match obj.remove("data") {
            Some(Value::Array(items)) => Ok(items),
            None | Some(Value::Null) => {
                warn!(endpoint = %kind, "Response object has no `data` array, treating as empty page");
                Ok(Vec::new())
            }
            Some(other) => Err(AppError::UnexpectedResponse {
                endpoint: kind.to_string(),
                detail: format!("`data` is not an array: {}", type_name(&other)),
            }),
        },
        other => Err(AppError::UnexpectedResponse {
            endpoint: kind.to_string(),
            detail: format!("expected array or object, got {}", type_name(&other)),
        }),
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// Pagination loop
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    Fetching(usize),
    Done,
}

/// Terminal-page heuristic: a short (or empty) page ends the walk. The remote
/// collection reports no total, so a short page that is not actually final
/// also ends it.
pub fn next_state(offset: usize, limit: usize, page_len: usize) -> PageState {
    if page_len == 0 || page_len < limit {
        PageState::Done
    } else {
        PageState::Fetching(offset + limit)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointStats {
    pub kind: RecordKind,
    pub requests: usize,
    pub processed: usize,
    pub failed: usize,
    /// Offset the next run would need to resume from.
    pub next_offset: usize,
}

/// Walk one endpoint from the configured start offset to its terminal page,
/// normalizing and upserting every item in the order received.
///
/// Per-item failures are logged and skipped. Transport errors, malformed
/// bodies and lost storage connections end the run.
pub async fn run_endpoint<S>(
    source: &S,
    writer: &mut Writer,
    kind: RecordKind,
    cfg: &PaginationConfig,
) -> Result<EndpointStats>
where
    S: PageSource + ?Sized,
{
    info!(endpoint = %kind, start_offset = cfg.start_offset, limit = cfg.limit, "Fetching {kind} data");

    let mut stats = EndpointStats {
        kind,
        requests: 0,
        processed: 0,
        failed: 0,
        next_offset: cfg.start_offset,
    };
    let mut latency = FetchLatency::new();
    let mut state = PageState::Fetching(cfg.start_offset);

    while let PageState::Fetching(offset) = state {
        let req = PageRequest {
            offset,
            limit: cfg.limit,
            order: cfg.order_field.as_deref(),
            ascending: cfg.ascending,
        };

        let started = Instant::now();
        let items = source.fetch_page(kind, &req).await?;
        latency.record(started.elapsed());
        stats.requests += 1;

        let page_items = items.len();
        let mut page_processed = 0usize;

        for (index, item) in items.iter().enumerate() {
            match writer.apply(kind, item).await {
                Ok(key) => {
                    page_processed += 1;
                    debug!(endpoint = %kind, record = %key, "Upserted");
                }
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    stats.failed += 1;
                    warn!(
                        endpoint = %kind,
                        offset,
                        index,
                        record = %describe(item),
                        "Error processing item: {e}"
                    );
                }
            }
        }

        stats.processed += page_processed;
        stats.next_offset = offset + page_items;
        info!(
            endpoint = %kind,
            offset,
            page_items,
            page_processed,
            total_processed = stats.processed,
            "Processed {page_processed}/{page_items} items from {kind} (total {})",
            stats.processed,
        );

        state = next_state(offset, cfg.limit, page_items);
        match state {
            PageState::Done => {
                info!(
                    endpoint = %kind,
                    "Received {page_items} items (less than limit {}), this is the last page",
                    cfg.limit
                );
            }
            PageState::Fetching(_) => pause(cfg.page_delay).await,
        }
    }

    latency.log_summary(kind.endpoint());
    info!(
        endpoint = %kind,
        requests = stats.requests,
        processed = stats.processed,
        failed = stats.failed,
        "Total {kind} processed: {} items ({} failed)",
        stats.processed,
        stats.failed,
    );
    Ok(stats)
}

async fn pause(d: Duration) {
    if !d.is_zero() {
        tokio::time::sleep(d).await;
    }
}

/// Short identifier for log lines about a record that failed.
fn describe(item: &Value) -> String {
    for field in ["id", "condition_id", "conditionId", "transactionHash", "slug", "question"] {
        if let Some(v) = item.get(field).filter(|v| !v.is_null()) {
            let s = v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string());
            let s: String = s.chars().take(50).collect();
            return format!("{field}={s}");
        }
    }
    "<unidentified>".to_string()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::{TimeZone, Utc};
    use serde_json::json;

    use super::*;
    use crate::db::memory_connection;

    /// Serves fixed pages by offset and records every request.
    struct MockSource {
        limit: usize,
        pages: Vec<Vec<Value>>,
        requests: Mutex<Vec<usize>>,
    }

    impl MockSource {
        fn new(limit: usize, pages: Vec<Vec<Value>>) -> Self {
            Self {
                limit,
                pages,
                requests: Mutex::new(Vec::new()),
            }
        }

        fn offsets(&self) -> Vec<usize> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PageSource for MockSource {
        async fn fetch_page(&self, _kind: RecordKind, req: &PageRequest<'_>) -> Result<Vec<Value>> {
            assert_eq!(req.limit, self.limit);
            self.requests.lock().unwrap().push(req.offset);
            Ok(self.pages.get(req.offset / self.limit).cloned().unwrap_or_default())
        }
    }

    struct FailingSource;

    #[async_trait]
    impl PageSource for FailingSource {
        async fn fetch_page(&self, kind: RecordKind, _req: &PageRequest<'_>) -> Result<Vec<Value>> {
            Err(AppError::UnexpectedResponse {
                endpoint: kind.to_string(),
                detail: "boom".to_string(),
            })
        }
    }

    fn tag(i: usize) -> Value {
        json!({"id": i.to_string(), "label": format!("Tag {i}"), "slug": format!("tag-{i}")})
    }

    fn tags(range: std::ops::Range<usize>) -> Vec<Value> {
        range.map(tag).collect()
    }

    fn pagination(limit: usize) -> PaginationConfig {
        PaginationConfig {
            limit,
            start_offset: 0,
            order_field: Some("createdAt".to_string()),
            ascending: true,
            page_delay: Duration::ZERO,
        }
    }

    async fn writer() -> Writer {
        Writer::new(
            memory_connection().await,
            Utc.with_ymd_and_hms(2024, 6, 3, 0, 0, 0).unwrap(),
        )
    }

    #[test]
    fn short_or_empty_page_is_terminal() {
        assert_eq!(next_state(0, 100, 100), PageState::Fetching(100));
        assert_eq!(next_state(200, 100, 99), PageState::Done);
        assert_eq!(next_state(0, 100, 0), PageState::Done);
    }

    #[test]
    fn page_bodies_in_both_shapes() {
        let items = extract_items(RecordKind::Market, json!([{"a": 1}, {"a": 2}])).unwrap();
        assert_eq!(items.len(), 2);
        let items = extract_items(RecordKind::Market, json!({"data": [{"a": 1}], "next_cursor": "MA=="})).unwrap();
        assert_eq!(items.len(), 1);
        assert!(extract_items(RecordKind::Market, json!({"count": 0})).unwrap().is_empty());
        assert!(extract_items(RecordKind::Market, json!("nope")).is_err());
        assert!(extract_items(RecordKind::Market, json!({"data": 5})).is_err());
    }

    #[tokio::test]
    async fn stops_after_first_short_page() {
        // Pages 0..3 are full, page 3 is short: exactly 4 requests.
        let limit = 3;
        let source = MockSource::new(
            limit,
            vec![tags(0..3), tags(3..6), tags(6..9), tags(9..10)],
        );
        let mut w = writer().await;

        let stats = run_endpoint(&source, &mut w, RecordKind::Tag, &pagination(limit))
            .await
            .unwrap();

        assert_eq!(source.offsets(), vec![0, 3, 6, 9]);
        assert_eq!(stats.requests, 4);
        assert_eq!(stats.processed, 10);
        assert_eq!(stats.failed, 0);
        // Resume right after the last item seen, not past the short page.
        assert_eq!(stats.next_offset, 10);
    }

    #[tokio::test]
    async fn exact_multiple_needs_one_empty_page() {
        let limit = 2;
        let source = MockSource::new(limit, vec![tags(0..2), tags(2..4)]);
        let mut w = writer().await;

        let stats = run_endpoint(&source, &mut w, RecordKind::Tag, &pagination(limit))
            .await
            .unwrap();

        assert_eq!(source.offsets(), vec![0, 2, 4]);
        assert_eq!(stats.processed, 4);
        assert_eq!(stats.next_offset, 4);
    }

    #[tokio::test]
    async fn one_bad_item_does_not_sink_the_page() {
        let limit = 10;
        let mut page = tags(0..5);
        page[2] = json!({"id": "2", "slug": "no-label"});
        let source = MockSource::new(limit, vec![page]);
        let mut w = writer().await;

        let stats = run_endpoint(&source, &mut w, RecordKind::Tag, &pagination(limit))
            .await
            .unwrap();

        assert_eq!(stats.processed, 4);
        assert_eq!(stats.failed, 1);
        let ids: Vec<String> = sqlx::query_scalar("SELECT id FROM tags ORDER BY id")
            .fetch_all(w.connection())
            .await
            .unwrap();
        assert_eq!(ids, vec!["0", "1", "3", "4"]);
    }

    #[tokio::test]
    async fn starts_from_configured_offset() {
        let limit = 2;
        let source = MockSource::new(limit, vec![tags(0..2), tags(2..3)]);
        let mut w = writer().await;
        let mut cfg = pagination(limit);
        cfg.start_offset = 2;

        let stats = run_endpoint(&source, &mut w, RecordKind::Tag, &cfg).await.unwrap();
        assert_eq!(source.offsets(), vec![2]);
        assert_eq!(stats.processed, 1);
    }

    #[tokio::test]
    async fn rerun_is_idempotent() {
        let limit = 5;
        let source = MockSource::new(limit, vec![tags(0..4)]);
        let mut w = writer().await;

        run_endpoint(&source, &mut w, RecordKind::Tag, &pagination(limit)).await.unwrap();
        run_endpoint(&source, &mut w, RecordKind::Tag, &pagination(limit)).await.unwrap();

        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tags")
            .fetch_one(w.connection())
            .await
            .unwrap();
        assert_eq!(n, 4);
    }

    #[tokio::test]
    async fn transport_failure_ends_the_run() {
        let mut w = writer().await;
        let err = run_endpoint(&FailingSource, &mut w, RecordKind::Tag, &pagination(10))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::UnexpectedResponse { .. }));
    }

    #[test]
    fn describe_prefers_identity_fields() {
        assert_eq!(describe(&json!({"id": 5, "slug": "x"})), "id=5");
        assert_eq!(describe(&json!({"conditionId": "0xabc"})), "conditionId=0xabc");
        assert_eq!(describe(&json!({"foo": 1})), "<unidentified>");
    }
}
