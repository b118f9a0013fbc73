use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::NormalizeError;

// ---------------------------------------------------------------------------
// Record kinds
// ---------------------------------------------------------------------------

/// The four upserted collections. Each variant owns its endpoint, API base
/// and normalizer; see `normalize` and `db::writer` for the per-kind strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Market,
    Event,
    Tag,
    Trade,
}

/// Which public API a kind is served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiBase {
    Gamma,
    Data,
}

impl RecordKind {
    pub const ALL: [RecordKind; 4] = [
        RecordKind::Market,
        RecordKind::Event,
        RecordKind::Tag,
        RecordKind::Trade,
    ];

    pub fn endpoint(self) -> &'static str {
        match self {
            RecordKind::Market => "markets",
            RecordKind::Event => "events",
            RecordKind::Tag => "tags",
            RecordKind::Trade => "trades",
        }
    }

    pub fn api_base(self) -> ApiBase {
        match self {
            RecordKind::Trade => ApiBase::Data,
            RecordKind::Market | RecordKind::Event | RecordKind::Tag => ApiBase::Gamma,
        }
    }

    /// The data API's trades endpoint ignores `order`/`ascending`.
    pub fn supports_ordering(self) -> bool {
        !matches!(self, RecordKind::Trade)
    }

    pub fn normalize(self, raw: &Value) -> Result<Record, NormalizeError> {
        crate::normalize::normalize(self, raw)
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.endpoint())
    }
}

impl std::str::FromStr for RecordKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.to_ascii_lowercase();
        RecordKind::ALL
            .into_iter()
            .find(|k| name == k.endpoint() || name == k.endpoint().trim_end_matches('s'))
            .ok_or_else(|| format!("unknown record kind: {name}"))
    }
}

// ---------------------------------------------------------------------------
// Canonical rows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketRow {
    pub market_id: String,
    pub condition_id: Option<String>,
    pub question_id: Option<String>,
    pub question: Option<String>,
    pub description: Option<String>,
    pub market_slug: Option<String>,
    pub active: bool,
    pub closed: bool,
    pub archived: bool,
    pub accepting_orders: bool,
    pub enable_order_book: bool,
    pub end_date_iso: Option<DateTime<Utc>>,
    pub game_start_time: Option<DateTime<Utc>>,
    pub minimum_order_size: Option<f64>,
    pub minimum_tick_size: Option<f64>,
    pub maker_base_fee: f64,
    pub taker_base_fee: f64,
    pub seconds_delay: i64,
    pub fpmm: Option<String>,
    pub neg_risk: bool,
    pub neg_risk_market_id: Option<String>,
    pub neg_risk_request_id: Option<String>,
    pub notifications_enabled: bool,
    pub is_50_50_outcome: bool,
    pub icon: Option<String>,
    pub image: Option<String>,
    pub volume: Option<f64>,
    /// Opaque JSON, stored as-is.
    pub tags: Value,
    pub rewards: Value,
    pub tokens: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventRow {
    pub id: String,
    pub ticker: Option<String>,
    pub slug: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub creation_date: Option<DateTime<Utc>>,
    pub image: Option<String>,
    pub icon: Option<String>,
    pub active: bool,
    pub closed: bool,
    pub archived: bool,
    pub featured: bool,
    pub restricted: bool,
    pub is_new: bool,
    pub neg_risk: bool,
    pub liquidity: Option<f64>,
    pub volume: Option<f64>,
    pub open_interest: Option<f64>,
    pub volume_24hr: Option<f64>,
    pub competitive: Option<f64>,
    pub comment_count: i64,
    pub tags: Value,
    pub markets: Value,
    pub series: Value,
    pub sub_events: Value,
    pub image_optimized: Option<Value>,
    pub icon_optimized: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagRow {
    pub id: String,
    pub label: String,
    pub slug: String,
    pub force_show: bool,
    pub force_hide: bool,
    pub is_carousel: bool,
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeRow {
    pub trade_time: DateTime<Utc>,
    pub proxy_wallet: String,
    pub condition_id: String,
    pub transaction_hash: String,
    pub side: Option<String>,
    pub asset: Option<String>,
    pub size: f64,
    pub price: f64,
    pub title: Option<String>,
    pub slug: Option<String>,
    pub icon: Option<String>,
    pub event_slug: Option<String>,
    pub outcome: Option<String>,
    pub outcome_index: Option<i64>,
    pub name: Option<String>,
    pub pseudonym: Option<String>,
}

/// One normalized, storage-ready record.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Market(MarketRow),
    Event(EventRow),
    Tag(TagRow),
    Trade(TradeRow),
}

impl Record {
    pub fn kind(&self) -> RecordKind {
        match self {
            Record::Market(_) => RecordKind::Market,
            Record::Event(_) => RecordKind::Event,
            Record::Tag(_) => RecordKind::Tag,
            Record::Trade(_) => RecordKind::Trade,
        }
    }
}

// ---------------------------------------------------------------------------
// Identity keys
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TradeKey {
    pub trade_time: DateTime<Utc>,
    pub proxy_wallet: String,
    pub condition_id: String,
    pub transaction_hash: String,
}

/// Identity of a successfully written row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum RecordKey {
    Market(String),
    Event(String),
    Tag(String),
    Trade(TradeKey),
}

impl std::fmt::Display for RecordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordKey::Market(id) => write!(f, "market:{id}"),
            RecordKey::Event(id) => write!(f, "event:{id}"),
            RecordKey::Tag(id) => write!(f, "tag:{id}"),
            RecordKey::Trade(k) => write!(
                f,
                "trade:{}:{}:{}:{}",
                k.trade_time.timestamp(),
                k.proxy_wallet,
                k.condition_id,
                k.transaction_hash
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// One entry of a market's `tokens` array. Parsed leniently from the opaque
/// stored JSON when capturing price snapshots.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TokenOutcome {
    pub token_id: String,
    #[serde(default)]
    pub outcome: Option<String>,
    #[serde(default, deserialize_with = "de_opt_lenient_f64")]
    pub price: Option<f64>,
    #[serde(default)]
    pub winner: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceSnapshot {
    pub timestamp: DateTime<Utc>,
    pub market_id: String,
    pub token_id: String,
    pub outcome: Option<String>,
    pub price: f64,
    pub winner: bool,
}

/// A resting price level. The CLOB sends price/size as strings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BookLevel {
    #[serde(deserialize_with = "de_lenient_f64")]
    pub price: f64,
    #[serde(deserialize_with = "de_lenient_f64")]
    pub size: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct OrderBook {
    #[serde(default)]
    pub bids: Vec<BookLevel>,
    #[serde(default)]
    pub asks: Vec<BookLevel>,
}

/// Values derived from a book once, at insert time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OrderbookMetrics {
    pub bid_volume: f64,
    pub ask_volume: f64,
    /// Best ask minus best bid; None when either side is empty.
    pub spread: Option<f64>,
}

impl OrderBook {
    pub fn metrics(&self) -> OrderbookMetrics {
        let bid_volume = self.bids.iter().map(|l| l.size).sum();
        let ask_volume = self.asks.iter().map(|l| l.size).sum();

        let best_bid = self.bids.iter().map(|l| l.price).reduce(f64::max);
        let best_ask = self.asks.iter().map(|l| l.price).reduce(f64::min);
        let spread = match (best_bid, best_ask) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        };

        OrderbookMetrics {
            bid_volume,
            ask_volume,
            spread,
        }
    }
}

// ---------------------------------------------------------------------------
// Lenient numeric decoding
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(untagged)]
enum NumOrString {
    Num(f64),
    Str(String),
}

fn de_lenient_f64<'de, D>(d: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    match NumOrString::deserialize(d)? {
        NumOrString::Num(n) => Ok(n),
        NumOrString::Str(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

fn de_opt_lenient_f64<'de, D>(d: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<NumOrString>::deserialize(d)? {
        None => Ok(None),
        Some(NumOrString::Num(n)) => Ok(Some(n)),
        Some(NumOrString::Str(s)) if s.trim().is_empty() => Ok(None),
        Some(NumOrString::Str(s)) => s.trim().parse().map(Some).map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(price: f64, size: f64) -> BookLevel {
        BookLevel { price, size }
    }

    #[test]
    fn spread_and_volumes_from_both_sides() {
        let book = OrderBook {
            bids: vec![level(0.40, 10.0)],
            asks: vec![level(0.45, 5.0)],
        };
        let m = book.metrics();
        assert!((m.spread.unwrap() - 0.05).abs() < 1e-9);
        assert_eq!(m.bid_volume, 10.0);
        assert_eq!(m.ask_volume, 5.0);
    }

    #[test]
    fn spread_is_null_when_a_side_is_empty() {
        let book = OrderBook {
            bids: vec![level(0.40, 10.0), level(0.38, 2.5)],
            asks: vec![],
        };
        let m = book.metrics();
        assert_eq!(m.spread, None);
        assert_eq!(m.bid_volume, 12.5);
        assert_eq!(m.ask_volume, 0.0);
    }

    #[test]
    fn best_levels_do_not_depend_on_ladder_order() {
        let book = OrderBook {
            bids: vec![level(0.30, 1.0), level(0.42, 1.0)],
            asks: vec![level(0.60, 1.0), level(0.47, 1.0)],
        };
        assert!((book.metrics().spread.unwrap() - 0.05).abs() < 1e-9);
    }

    #[test]
    fn book_levels_accept_string_numbers() {
        let raw = r#"{"bids":[{"price":"0.54","size":"200"}],"asks":[{"price":0.55,"size":100}]}"#;
        let book: OrderBook = serde_json::from_str(raw).unwrap();
        assert_eq!(book.bids[0].size, 200.0);
        assert_eq!(book.asks[0].price, 0.55);
    }

    #[test]
    fn token_outcome_tolerates_missing_and_string_price() {
        let t: TokenOutcome =
            serde_json::from_str(r#"{"token_id":"t1","outcome":"Yes","price":"0.61"}"#).unwrap();
        assert_eq!(t.price, Some(0.61));
        assert!(!t.winner);
        let t: TokenOutcome = serde_json::from_str(r#"{"token_id":"t2"}"#).unwrap();
        assert_eq!(t.price, None);
    }

    #[test]
    fn record_kind_round_trips_through_endpoint_name() {
        for kind in RecordKind::ALL {
            assert_eq!(kind.endpoint().parse::<RecordKind>().unwrap(), kind);
        }
        assert_eq!("Trade".parse::<RecordKind>().unwrap(), RecordKind::Trade);
        assert!("orders".parse::<RecordKind>().is_err());
        assert!(!RecordKind::Trade.supports_ordering());
        assert_eq!(RecordKind::Trade.api_base(), ApiBase::Data);
    }
}
