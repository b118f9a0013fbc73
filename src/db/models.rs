//! Read-side row types. Used by sqlx for typed queries and serialized as-is
//! by the read API.
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct LatestPrice {
    pub market_id: String,
    pub token_id: String,
    pub outcome: Option<String>,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
    pub winner: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct PricePoint {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub winner: bool,
}

/// Input row for hourly aggregation.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct PriceTick {
    pub timestamp: DateTime<Utc>,
    pub outcome: Option<String>,
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OhlcBar {
    pub bucket: DateTime<Utc>,
    pub outcome: Option<String>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub avg_price: f64,
    pub num_samples: i64,
}

#[derive(Debug, sqlx::FromRow)]
pub struct ActiveMarketRow {
    pub market_id: String,
    pub question: Option<String>,
    pub end_date_iso: Option<DateTime<Utc>>,
    pub market_slug: Option<String>,
    pub active: bool,
    pub closed: bool,
    pub tokens: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveMarket {
    pub market_id: String,
    pub question: Option<String>,
    pub end_date_iso: Option<DateTime<Utc>>,
    pub market_slug: Option<String>,
    pub active: bool,
    pub closed: bool,
    pub tokens: serde_json::Value,
}
