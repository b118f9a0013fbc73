use std::time::Instant;

use chrono::Utc;
use tracing::{info, warn};

use crate::config::SnapshotConfig;
use crate::db::models::ActiveMarket;
use crate::db::{reader, snapshots, Writer};
use crate::error::Result;
use crate::fetcher::BookSource;
use crate::latency::FetchLatency;
use crate::types::{PriceSnapshot, TokenOutcome};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CaptureStats {
    pub markets: usize,
    pub price_rows: u64,
    pub books_written: usize,
    pub books_failed: usize,
}

/// Append one price snapshot per priced token of every active market written
/// in this run, then one orderbook snapshot per token. Runs after ingestion,
/// never interleaved with it.
pub async fn capture_snapshots<B>(
    books: &B,
    writer: &mut Writer,
    cfg: &SnapshotConfig,
) -> Result<CaptureStats>
where
    B: BookSource + ?Sized,
{
    let version = writer.version();
    let conn = writer.connection();
    let markets = reader::active_markets_at(&mut *conn, version, cfg.market_limit).await?;
    let mut stats = CaptureStats {
        markets: markets.len(),
        ..CaptureStats::default()
    };
    if markets.is_empty() {
        warn!(
            version = %version.date_naive(),
            "No active markets ingested in this run, nothing to capture"
        );
    }
    info!(markets = markets.len(), "Capturing snapshots");

    let observed_at = Utc::now();
    let tokens: Vec<(String, TokenOutcome)> = markets
        .iter()
        .flat_map(|m| market_tokens(m).into_iter().map(|t| (m.market_id.clone(), t)))
        .collect();

    let prices: Vec<PriceSnapshot> = tokens
        .iter()
        .filter_map(|(market_id, t)| {
            t.price.map(|price| PriceSnapshot {
                timestamp: observed_at,
                market_id: market_id.clone(),
                token_id: t.token_id.clone(),
                outcome: t.outcome.clone(),
                price,
                winner: t.winner,
            })
        })
        .collect();
    stats.price_rows = snapshots::append_price_snapshots(&mut *conn, &prices).await?;

    let mut latency = FetchLatency::new();
    for (i, (market_id, token)) in tokens.iter().enumerate() {
        if i > 0 && !cfg.book_delay.is_zero() {
            tokio::time::sleep(cfg.book_delay).await;
        }

        let started = Instant::now();
        let book = match books.fetch_book(&token.token_id).await {
            Ok(b) => b,
            Err(e) => {
                stats.books_failed += 1;
                warn!(market_id = %market_id, token_id = %token.token_id, "Orderbook fetch failed: {e}");
                continue;
            }
        };
        latency.record(started.elapsed());

        let metrics = snapshots::append_orderbook_snapshot(
            &mut *conn,
            Utc::now(),
            market_id,
            &token.token_id,
            &book,
        )
        .await?;
        stats.books_written += 1;
        tracing::debug!(
            market_id = %market_id,
            token_id = %token.token_id,
            bid_volume = metrics.bid_volume,
            ask_volume = metrics.ask_volume,
            spread = ?metrics.spread,
            "Orderbook snapshot appended"
        );
    }

    latency.log_summary("orderbook");
    info!(
        markets = stats.markets,
        price_rows = stats.price_rows,
        books_written = stats.books_written,
        books_failed = stats.books_failed,
        "Snapshot capture complete",
    );
    Ok(stats)
}

/// Tokens from the opaque stored array; entries without a token id are skipped.
fn market_tokens(m: &ActiveMarket) -> Vec<TokenOutcome> {
    let Some(entries) = m.tokens.as_array() else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|v| match serde_json::from_value::<TokenOutcome>(v.clone()) {
            Ok(t) if !t.token_id.is_empty() => Some(t),
            Ok(_) => None,
            Err(e) => {
                warn!(market_id = %m.market_id, "Skipping unreadable token entry: {e}");
                None
            }
        })
        .collect()
}
