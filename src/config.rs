use std::str::FromStr;
use std::time::Duration;

use crate::error::{AppError, Result};
use crate::types::RecordKind;

pub const GAMMA_API_URL: &str = "https://gamma-api.polymarket.com";
pub const DATA_API_URL: &str = "https://data-api.polymarket.com";
pub const CLOB_API_URL: &str = "https://clob.polymarket.com";

/// Items requested per page.
pub const DEFAULT_PAGE_LIMIT: usize = 100;

/// Fixed pause between page requests (seconds).
pub const DEFAULT_PAGE_DELAY_SECS: u64 = 10;

/// Pause between two endpoint runs (seconds).
pub const DEFAULT_ENDPOINT_PAUSE_SECS: u64 = 100;

pub const DEFAULT_ORDER_FIELD: &str = "createdAt";

/// Rows per multi-row INSERT when bulk-appending price snapshots.
/// Keeps the bind count (6 per row) well under SQLite's parameter limit.
pub const SNAPSHOT_BULK_CHUNK: usize = 500;

/// Cap on `latest_prices` when no market filter is given.
pub const LATEST_PRICES_LIMIT: i64 = 100;

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
    pub gamma_api_url: String,
    pub data_api_url: String,
    pub clob_api_url: String,
    pub log_level: String,
    /// Page size sent as `limit` (PAGE_LIMIT, must be >= 1)
    pub page_limit: usize,
    /// First offset requested on every run (START_OFFSET)
    pub start_offset: usize,
    /// Sent as `order`; None when ORDER_FIELD is empty
    pub order_field: Option<String>,
    pub ascending: bool,
    pub page_delay: Duration,
    /// Endpoints ingested in order (INGEST_ENDPOINTS, comma-separated).
    /// Example: "events,markets,tags,trades"
    pub endpoints: Vec<RecordKind>,
    pub endpoint_pause: Duration,
    pub capture_snapshots: bool,
    pub snapshot_market_limit: i64,
    pub book_delay: Duration,
    pub api_port: u16,
}

/// Pagination knobs handed to the fetcher.
#[derive(Debug, Clone)]
pub struct PaginationConfig {
    pub limit: usize,
    pub start_offset: usize,
    pub order_field: Option<String>,
    pub ascending: bool,
    pub page_delay: Duration,
}

/// Knobs for the optional price/orderbook snapshot capture.
#[derive(Debug, Clone)]
pub struct SnapshotConfig {
    pub market_limit: i64,
    pub book_delay: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key lookup. Missing keys take their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let page_limit: usize = parse_var(&lookup, "PAGE_LIMIT", DEFAULT_PAGE_LIMIT)?;
        if page_limit == 0 {
            return Err(AppError::Config("PAGE_LIMIT must be at least 1".to_string()));
        }

        let order_field = var("ORDER_FIELD", DEFAULT_ORDER_FIELD);
        let order_field = if order_field.trim().is_empty() {
            None
        } else {
            Some(order_field.trim().to_string())
        };

        let endpoints = var("INGEST_ENDPOINTS", "events,markets")
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<RecordKind>()
                    .map_err(|_| AppError::Config(format!("INGEST_ENDPOINTS: unknown endpoint {s:?}")))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            db_path: var("DB_PATH", "polymarket.db"),
            gamma_api_url: var("GAMMA_API_URL", GAMMA_API_URL),
            data_api_url: var("DATA_API_URL", DATA_API_URL),
            clob_api_url: var("CLOB_API_URL", CLOB_API_URL),
            log_level: var("LOG_LEVEL", "info"),
            page_limit,
            start_offset: parse_var(&lookup, "START_OFFSET", 0usize)?,
            order_field,
            ascending: parse_var(&lookup, "ORDER_ASCENDING", true)?,
            page_delay: Duration::from_secs(parse_var(
                &lookup,
                "PAGE_DELAY_SECS",
                DEFAULT_PAGE_DELAY_SECS,
            )?),
            endpoints,
            endpoint_pause: Duration::from_secs(parse_var(
                &lookup,
                "ENDPOINT_PAUSE_SECS",
                DEFAULT_ENDPOINT_PAUSE_SECS,
            )?),
            capture_snapshots: parse_var(&lookup, "CAPTURE_SNAPSHOTS", false)?,
            snapshot_market_limit: parse_var(&lookup, "SNAPSHOT_MARKET_LIMIT", 100i64)?,
            book_delay: Duration::from_millis(parse_var(&lookup, "BOOK_DELAY_MS", 250u64)?),
            api_port: parse_var(&lookup, "API_PORT", 3000u16)?,
        })
    }

    pub fn pagination(&self) -> PaginationConfig {
        PaginationConfig {
            limit: self.page_limit,
            start_offset: self.start_offset,
            order_field: self.order_field.clone(),
            ascending: self.ascending,
            page_delay: self.page_delay,
        }
    }

    pub fn snapshots(&self) -> SnapshotConfig {
        SnapshotConfig {
            market_limit: self.snapshot_market_limit,
            book_delay: self.book_delay,
        }
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::Config(format!("{key} has invalid value {raw:?}"))),
        _ => Ok(default),
    }
}
