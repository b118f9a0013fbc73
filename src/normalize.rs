//! Raw API record -> canonical row.
//!
//! Field lookups take a list of source names: the CLOB snake_case name first,
//! then the Gamma camelCase alias. Errors report the first name.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use serde_json::{json, Map, Value};

use crate::error::NormalizeError;
use crate::types::{EventRow, MarketRow, Record, RecordKind, TagRow, TradeRow};

type Result<T> = std::result::Result<T, NormalizeError>;

pub fn normalize(kind: RecordKind, raw: &Value) -> Result<Record> {
    let obj = raw.as_object().ok_or(NormalizeError::NotAnObject)?;
    let f = Fields(obj);
    match kind {
        RecordKind::Market => normalize_market(&f).map(Record::Market),
        RecordKind::Event => normalize_event(&f).map(Record::Event),
        RecordKind::Tag => normalize_tag(&f).map(Record::Tag),
        RecordKind::Trade => normalize_trade(&f).map(Record::Trade),
    }
}

fn normalize_market(f: &Fields) -> Result<MarketRow> {
    let condition_id = f.non_empty_string(&["condition_id", "conditionId"])?;
    let market_slug = f.non_empty_string(&["market_slug", "slug"])?;
    let market_id = condition_id
        .clone()
        .or_else(|| market_slug.clone())
        .ok_or(NormalizeError::MissingField("condition_id"))?;

    Ok(MarketRow {
        market_id,
        condition_id,
        question_id: f.string(&["question_id", "questionID"])?,
        question: f.string(&["question"])?,
        description: f.string(&["description"])?,
        market_slug,
        active: f.bool_or(&["active"], false)?,
        closed: f.bool_or(&["closed"], false)?,
        archived: f.bool_or(&["archived"], false)?,
        accepting_orders: f.bool_or(&["accepting_orders", "acceptingOrders"], false)?,
        enable_order_book: f.bool_or(&["enable_order_book", "enableOrderBook"], false)?,
        end_date_iso: f.timestamp(&["end_date_iso", "endDate", "endDateIso"])?,
        game_start_time: f.timestamp(&["game_start_time", "gameStartTime"])?,
        minimum_order_size: f.f64_opt(&["minimum_order_size", "orderMinSize"])?,
        minimum_tick_size: f.f64_opt(&["minimum_tick_size", "orderPriceMinTickSize"])?,
        maker_base_fee: f.f64_opt(&["maker_base_fee", "makerBaseFee"])?.unwrap_or(0.0),
        taker_base_fee: f.f64_opt(&["taker_base_fee", "takerBaseFee"])?.unwrap_or(0.0),
        seconds_delay: f.i64_opt(&["seconds_delay", "secondsDelay"])?.unwrap_or(0),
        fpmm: f.string(&["fpmm", "marketMakerAddress"])?,
        neg_risk: f.bool_or(&["neg_risk", "negRisk"], false)?,
        neg_risk_market_id: f.string(&["neg_risk_market_id", "negRiskMarketID"])?,
        neg_risk_request_id: f.string(&["neg_risk_request_id", "negRiskRequestID"])?,
        notifications_enabled: f.bool_or(&["notifications_enabled", "notificationsEnabled"], true)?,
        is_50_50_outcome: f.bool_or(&["is_50_50_outcome", "is5050Outcome"], false)?,
        icon: f.string(&["icon"])?,
        image: f.string(&["image"])?,
        volume: f.f64_opt(&["volume", "volumeNum"])?,
        tags: f.json(&["tags"]).unwrap_or_else(|| json!([])),
        rewards: f.json(&["rewards"]).unwrap_or_else(|| json!({})),
        tokens: market_tokens(f)?,
    })
}

/// `tokens` as sent by the CLOB, or synthesized from Gamma's JSON-encoded
/// `clobTokenIds` / `outcomes` / `outcomePrices` strings.
fn market_tokens(f: &Fields) -> Result<Value> {
    if let Some(tokens) = f.json(&["tokens"]) {
        return Ok(tokens);
    }

    let Some(token_ids) = f.embedded_json("clobTokenIds")? else {
        return Ok(json!([]));
    };
    let token_ids = token_ids.as_array().cloned().unwrap_or_default();
    let outcomes = f.embedded_json("outcomes")?.unwrap_or_else(|| json!([]));
    let prices = f.embedded_json("outcomePrices")?.unwrap_or_else(|| json!([]));

    let tokens = token_ids
        .into_iter()
        .enumerate()
        .map(|(i, token_id)| {
            let price = prices
                .get(i)
                .and_then(|p| p.as_f64().or_else(|| p.as_str().and_then(|s| s.parse().ok())));
            json!({
                "token_id": token_id,
                "outcome": outcomes.get(i).cloned().unwrap_or(Value::Null),
                "price": price,
                "winner": false,
            })
        })
        .collect();
    Ok(Value::Array(tokens))
}

fn normalize_event(f: &Fields) -> Result<EventRow> {
    let id = f.required_string(&["id"])?;
    let title = f
        .string(&["title"])?
        .unwrap_or_else(|| format!("Event {id}"));

    Ok(EventRow {
        ticker: f.string(&["ticker"])?,
        slug: f.string(&["slug"])?,
        title,
        description: f.string(&["description"])?,
        start_date: f.timestamp(&["startDate", "start_date"])?,
        end_date: f.timestamp(&["endDate", "end_date"])?,
        creation_date: f.timestamp(&["creationDate", "createdAt"])?,
        image: f.string(&["image"])?,
        icon: f.string(&["icon"])?,
        active: f.bool_or(&["active"], false)?,
        closed: f.bool_or(&["closed"], false)?,
        archived: f.bool_or(&["archived"], false)?,
        featured: f.bool_or(&["featured"], false)?,
        restricted: f.bool_or(&["restricted"], false)?,
        is_new: f.bool_or(&["new"], false)?,
        neg_risk: f.bool_or(&["negRisk", "neg_risk"], false)?,
        liquidity: f.f64_opt(&["liquidity"])?,
        volume: f.f64_opt(&["volume"])?,
        open_interest: f.f64_opt(&["openInterest", "open_interest"])?,
        volume_24hr: f.f64_opt(&["volume24hr", "volume_24hr"])?,
        competitive: f.f64_opt(&["competitive"])?,
        comment_count: f.i64_opt(&["commentCount", "comment_count"])?.unwrap_or(0),
        tags: f.json(&["tags"]).unwrap_or_else(|| json!([])),
        markets: f.json(&["markets"]).unwrap_or_else(|| json!([])),
        series: f.json(&["series"]).unwrap_or_else(|| json!([])),
        sub_events: f.json(&["subEvents", "sub_events"]).unwrap_or_else(|| json!([])),
        image_optimized: f.json(&["imageOptimized", "image_optimized"]),
        icon_optimized: f.json(&["iconOptimized", "icon_optimized"]),
        id,
    })
}

fn normalize_tag(f: &Fields) -> Result<TagRow> {
    Ok(TagRow {
        id: f.required_string(&["id"])?,
        label: f.required_string(&["label"])?,
        slug: f.required_string(&["slug"])?,
        force_show: f.bool_or(&["forceShow", "force_show"], false)?,
        force_hide: f.bool_or(&["forceHide", "force_hide"], false)?,
        is_carousel: f.bool_or(&["isCarousel", "is_carousel"], false)?,
        published_at: f.timestamp(&["publishedAt", "published_at"])?,
    })
}

fn normalize_trade(f: &Fields) -> Result<TradeRow> {
    let trade_time = f
        .epoch(&["timestamp"])?
        .ok_or(NormalizeError::MissingField("timestamp"))?;

    Ok(TradeRow {
        trade_time,
        proxy_wallet: f.required_string(&["proxyWallet", "proxy_wallet"])?,
        condition_id: f.required_string(&["conditionId", "condition_id"])?,
        transaction_hash: f.required_string(&["transactionHash", "transaction_hash"])?,
        side: f.string(&["side"])?,
        asset: f.string(&["asset"])?,
        size: f.required_f64(&["size"])?,
        price: f.required_f64(&["price"])?,
        title: f.string(&["title"])?,
        slug: f.string(&["slug"])?,
        icon: f.string(&["icon"])?,
        event_slug: f.string(&["eventSlug", "event_slug"])?,
        outcome: f.string(&["outcome"])?,
        outcome_index: f.i64_opt(&["outcomeIndex", "outcome_index"])?,
        name: f.string(&["name"])?,
        pseudonym: f.string(&["pseudonym"])?,
    })
}

// ---------------------------------------------------------------------------
// Field access and coercion
// ---------------------------------------------------------------------------

struct Fields<'a>(&'a Map<String, Value>);

impl Fields<'_> {
    /// First non-null value among `names`.
    fn get(&self, names: &[&'static str]) -> Option<&Value> {
        names
            .iter()
            .filter_map(|n| self.0.get(*n))
            .find(|v| !v.is_null())
    }

    fn string(&self, names: &[&'static str]) -> Result<Option<String>> {
        match self.get(names) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(Value::Number(n)) => Ok(Some(n.to_string())),
            Some(_) => Err(NormalizeError::InvalidField {
                field: names[0],
                expected: "string",
            }),
        }
    }

    /// Empty strings count as absent.
    fn non_empty_string(&self, names: &[&'static str]) -> Result<Option<String>> {
        Ok(self.string(names)?.filter(|s| !s.is_empty()))
    }

    fn required_string(&self, names: &[&'static str]) -> Result<String> {
        self.non_empty_string(names)?
            .ok_or(NormalizeError::MissingField(names[0]))
    }

    fn bool_or(&self, names: &[&'static str], default: bool) -> Result<bool> {
        match self.get(names) {
            None => Ok(default),
            Some(Value::Bool(b)) => Ok(*b),
            Some(Value::String(s)) if s.eq_ignore_ascii_case("true") => Ok(true),
            Some(Value::String(s)) if s.eq_ignore_ascii_case("false") => Ok(false),
            Some(_) => Err(NormalizeError::InvalidField {
                field: names[0],
                expected: "boolean",
            }),
        }
    }

    fn f64_opt(&self, names: &[&'static str]) -> Result<Option<f64>> {
        let invalid = NormalizeError::InvalidField {
            field: names[0],
            expected: "number",
        };
        match self.get(names) {
            None => Ok(None),
            Some(Value::Number(n)) => n.as_f64().map(Some).ok_or(invalid),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
            Some(Value::String(s)) => s.trim().parse().map(Some).map_err(|_| invalid),
            Some(_) => Err(invalid),
        }
    }

    fn required_f64(&self, names: &[&'static str]) -> Result<f64> {
        self.f64_opt(names)?
            .ok_or(NormalizeError::MissingField(names[0]))
    }

    fn i64_opt(&self, names: &[&'static str]) -> Result<Option<i64>> {
        let invalid = NormalizeError::InvalidField {
            field: names[0],
            expected: "integer",
        };
        match self.get(names) {
            None => Ok(None),
            Some(Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|x| x.fract() == 0.0).map(|x| x as i64))
                .map(Some)
                .ok_or(invalid),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
            Some(Value::String(s)) => s.trim().parse().map(Some).map_err(|_| invalid),
            Some(_) => Err(invalid),
        }
    }

    /// ISO-8601 string -> UTC instant. Empty strings are treated as absent.
    fn timestamp(&self, names: &[&'static str]) -> Result<Option<DateTime<Utc>>> {
        match self.get(names) {
            None => Ok(None),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
            Some(Value::String(s)) => parse_timestamp(s)
                .map(Some)
                .ok_or_else(|| NormalizeError::InvalidTimestamp {
                    field: names[0],
                    value: s.clone(),
                }),
            Some(other) => Err(NormalizeError::InvalidTimestamp {
                field: names[0],
                value: other.to_string(),
            }),
        }
    }

    /// Unix-epoch seconds (number or numeric string) -> UTC instant.
    fn epoch(&self, names: &[&'static str]) -> Result<Option<DateTime<Utc>>> {
        let secs = self.i64_opt(names).map_err(|_| NormalizeError::InvalidTimestamp {
            field: names[0],
            value: self.get(names).map(|v| v.to_string()).unwrap_or_default(),
        })?;
        match secs {
            None => Ok(None),
            Some(secs) => DateTime::from_timestamp(secs, 0)
                .map(Some)
                .ok_or_else(|| NormalizeError::InvalidTimestamp {
                    field: names[0],
                    value: secs.to_string(),
                }),
        }
    }

    /// Structured value kept as-is.
    fn json(&self, names: &[&'static str]) -> Option<Value> {
        self.get(names).cloned()
    }

    /// A field holding a JSON document encoded as a string (Gamma does this
    /// for `clobTokenIds`, `outcomes` and `outcomePrices`).
    fn embedded_json(&self, name: &'static str) -> Result<Option<Value>> {
        match self.get(&[name]) {
            None => Ok(None),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
            Some(Value::String(s)) => serde_json::from_str(s)
                .map(Some)
                .map_err(|_| NormalizeError::InvalidJson { field: name }),
            Some(v) => Ok(Some(v.clone())),
        }
    }
}

/// Accepts RFC 3339 (`2024-03-01T12:00:00Z`), `2024-03-01 12:00:00+00`,
/// naive date-times (taken as UTC) and bare dates (UTC midnight).
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f%#z", "%Y-%m-%dT%H:%M:%S%.f%#z"] {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .map(|d| Utc.from_utc_datetime(&d.and_time(NaiveTime::MIN)))
}
