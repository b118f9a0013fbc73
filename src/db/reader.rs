//! Read-side contract for downstream consumers: latest prices, price
//! history windows and hourly OHLC bars.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, DurationRound, Utc};
use sqlx::SqliteExecutor;
use tracing::warn;

use crate::config::LATEST_PRICES_LIMIT;
use crate::db::models::{ActiveMarket, ActiveMarketRow, LatestPrice, OhlcBar, PricePoint, PriceTick};
use crate::error::Result;

pub const DEFAULT_HISTORY_HOURS: u32 = 24;
pub const DEFAULT_OHLC_HOURS: u32 = 168;

/// Latest snapshot per (market, token). Without a market filter the result is
/// capped at `LATEST_PRICES_LIMIT` rows.
pub async fn latest_prices<'e, E>(exec: E, market_id: Option<&str>) -> Result<Vec<LatestPrice>>
where
    E: SqliteExecutor<'e>,
{
    let rows = match market_id {
        Some(id) => {
            sqlx::query_as::<_, LatestPrice>(
                r#"
                SELECT market_id, token_id, outcome, price, timestamp, winner
                FROM latest_prices
                WHERE market_id = ?
                ORDER BY token_id
                "#,
            )
            .bind(id)
            .fetch_all(exec)
            .await?
        }
        None => {
            sqlx::query_as::<_, LatestPrice>(
                r#"
                SELECT market_id, token_id, outcome, price, timestamp, winner
                FROM latest_prices
                ORDER BY timestamp DESC
                LIMIT ?
                "#,
            )
            .bind(LATEST_PRICES_LIMIT)
            .fetch_all(exec)
            .await?
        }
    };
    Ok(rows)
}

/// Snapshots for one token within the last `hours`, newest first.
pub async fn price_history<'e, E>(
    exec: E,
    market_id: &str,
    token_id: &str,
    hours: u32,
) -> Result<Vec<PricePoint>>
where
    E: SqliteExecutor<'e>,
{
    let since = Utc::now() - Duration::hours(i64::from(hours));
    let rows = sqlx::query_as::<_, PricePoint>(
        r#"
        SELECT timestamp, price, winner
        FROM price_snapshots
        WHERE market_id = ? AND token_id = ? AND timestamp > ?
        ORDER BY timestamp DESC
        "#,
    )
    .bind(market_id)
    .bind(token_id)
    .bind(since)
    .fetch_all(exec)
    .await?;
    Ok(rows)
}

/// Hourly OHLC bars for one token over the last `hours`, newest bucket first.
pub async fn hourly_ohlc<'e, E>(
    exec: E,
    market_id: &str,
    token_id: &str,
    hours: u32,
) -> Result<Vec<OhlcBar>>
where
    E: SqliteExecutor<'e>,
{
    let since = Utc::now() - Duration::hours(i64::from(hours));
    let ticks = sqlx::query_as::<_, PriceTick>(
        r#"
        SELECT timestamp, outcome, price
        FROM price_snapshots
        WHERE market_id = ? AND token_id = ? AND timestamp > ?
        ORDER BY timestamp ASC, rowid ASC
        "#,
    )
    .bind(market_id)
    .bind(token_id)
    .bind(since)
    .fetch_all(exec)
    .await?;
    Ok(aggregate_hourly(&ticks))
}

/// Latest stored version of each market that is active and not closed.
pub async fn active_markets<'e, E>(exec: E, limit: i64) -> Result<Vec<ActiveMarket>>
where
    E: SqliteExecutor<'e>,
{
    let rows = sqlx::query_as::<_, ActiveMarketRow>(
        r#"
        SELECT market_id, question, end_date_iso, market_slug, active, closed, tokens
        FROM active_markets
        ORDER BY market_id
        LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(exec)
    .await?;
    Ok(rows.into_iter().map(decode_active).collect())
}

/// Active markets written under exactly `version`. Older versions are left
/// out, so their stored token prices are never treated as current.
pub async fn active_markets_at<'e, E>(
    exec: E,
    version: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<ActiveMarket>>
where
    E: SqliteExecutor<'e>,
{
    let rows = sqlx::query_as::<_, ActiveMarketRow>(
        r#"
        SELECT market_id, question, end_date_iso, market_slug, active, closed, tokens
        FROM markets
        WHERE created_at = ? AND active = 1 AND closed = 0
        ORDER BY market_id
        LIMIT ?
        "#,
    )
    .bind(version)
    .bind(limit)
    .fetch_all(exec)
    .await?;
    Ok(rows.into_iter().map(decode_active).collect())
}

fn decode_active(r: ActiveMarketRow) -> ActiveMarket {
    let tokens = serde_json::from_str(&r.tokens).unwrap_or_else(|e| {
        warn!(market_id = %r.market_id, "Stored tokens are not valid JSON: {e}");
        serde_json::Value::Array(Vec::new())
    });
    ActiveMarket {
        market_id: r.market_id,
        question: r.question,
        end_date_iso: r.end_date_iso,
        market_slug: r.market_slug,
        active: r.active,
        closed: r.closed,
        tokens,
    }
}

/// Bucket ticks (ascending by time) into UTC hours. Output is newest first.
pub fn aggregate_hourly(ticks: &[PriceTick]) -> Vec<OhlcBar> {
    let mut buckets: BTreeMap<DateTime<Utc>, OhlcBar> = BTreeMap::new();
    let mut sums: BTreeMap<DateTime<Utc>, f64> = BTreeMap::new();

    for tick in ticks {
        let Ok(bucket) = tick.timestamp.duration_trunc(Duration::hours(1)) else {
            continue;
        };
        *sums.entry(bucket).or_insert(0.0) += tick.price;
        buckets
            .entry(bucket)
            .and_modify(|bar| {
                bar.high = bar.high.max(tick.price);
                bar.low = bar.low.min(tick.price);
                bar.close = tick.price;
                bar.num_samples += 1;
                if tick.outcome.is_some() {
                    bar.outcome = tick.outcome.clone();
                }
            })
            .or_insert_with(|| OhlcBar {
                bucket,
                outcome: tick.outcome.clone(),
                open: tick.price,
                high: tick.price,
                low: tick.price,
                close: tick.price,
                avg_price: tick.price,
                num_samples: 1,
            });
    }

    buckets
        .into_iter()
        .rev()
        .map(|(bucket, mut bar)| {
            bar.avg_price = sums.get(&bucket).copied().unwrap_or(bar.close) / bar.num_samples as f64;
            bar
        })
        .collect()
}
