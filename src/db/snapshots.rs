//! Append-only time-series writes. No conflict checks: every call adds rows.

use chrono::{DateTime, Utc};
use sqlx::{Connection, QueryBuilder, Sqlite, SqliteConnection};

use crate::config::SNAPSHOT_BULK_CHUNK;
use crate::error::Result;
use crate::types::{OrderBook, OrderbookMetrics, PriceSnapshot};

pub async fn append_price_snapshot(conn: &mut SqliteConnection, s: &PriceSnapshot) -> Result<()> {
    let mut tx = conn.begin().await?;
    sqlx::query(
        r#"
        INSERT INTO price_snapshots (timestamp, market_id, token_id, outcome, price, winner)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(s.timestamp)
    .bind(&s.market_id)
    .bind(&s.token_id)
    .bind(&s.outcome)
    .bind(s.price)
    .bind(s.winner)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;
    Ok(())
}

/// Bulk variant: one multi-row INSERT per chunk, all chunks in one transaction.
/// Returns the number of rows written.
pub async fn append_price_snapshots(
    conn: &mut SqliteConnection,
    snapshots: &[PriceSnapshot],
) -> Result<u64> {
    if snapshots.is_empty() {
        return Ok(0);
    }

    let mut tx = conn.begin().await?;
    let mut written = 0;
    for chunk in snapshots.chunks(SNAPSHOT_BULK_CHUNK) {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO price_snapshots (timestamp, market_id, token_id, outcome, price, winner) ",
        );
        qb.push_values(chunk, |mut row, s| {
            row.push_bind(s.timestamp)
                .push_bind(&s.market_id)
                .push_bind(&s.token_id)
                .push_bind(&s.outcome)
                .push_bind(s.price)
                .push_bind(s.winner);
        });
        written += qb.build().execute(&mut *tx).await?.rows_affected();
    }
    tx.commit().await?;
    Ok(written)
}

/// Store a full bid/ask ladder with its volumes and spread computed once here.
pub async fn append_orderbook_snapshot(
    conn: &mut SqliteConnection,
    timestamp: DateTime<Utc>,
    market_id: &str,
    token_id: &str,
    book: &OrderBook,
) -> Result<OrderbookMetrics> {
    let metrics = book.metrics();
    let bids = serde_json::to_string(&book.bids)?;
    let asks = serde_json::to_string(&book.asks)?;

    let mut tx = conn.begin().await?;
    sqlx::query(
        r#"
        INSERT INTO orderbook_snapshots (
            timestamp, market_id, token_id, bids, asks, bid_volume, ask_volume, spread
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(timestamp)
    .bind(market_id)
    .bind(token_id)
    .bind(bids)
    .bind(asks)
    .bind(metrics.bid_volume)
    .bind(metrics.ask_volume)
    .bind(metrics.spread)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    Ok(metrics)
}
