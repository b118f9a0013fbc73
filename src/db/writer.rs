use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{Connection, SqliteConnection};
use tracing::warn;

use crate::error::{ItemError, Result};
use crate::types::{
    EventRow, MarketRow, Record, RecordKey, RecordKind, TagRow, TradeKey, TradeRow,
};

type ItemResult<T> = std::result::Result<T, ItemError>;

/// Applies canonical rows to storage with insert-or-update semantics.
///
/// Owns the run's single storage connection. Every write runs in its own
/// transaction: committed on success, rolled back on any error, so a failed
/// record never leaves a partial update behind.
pub struct Writer {
    conn: SqliteConnection,
    version: DateTime<Utc>,
}

impl Writer {
    /// `version` is stored in `created_at` and forms half of the conflict key.
    pub fn new(conn: SqliteConnection, version: DateTime<Utc>) -> Self {
        Self { conn, version }
    }

    pub fn version(&self) -> DateTime<Utc> {
        self.version
    }

    /// Normalize one raw API record and upsert it.
    pub async fn apply(&mut self, kind: RecordKind, raw: &Value) -> ItemResult<RecordKey> {
        let record = kind.normalize(raw)?;
        self.upsert(&record).await
    }

    pub async fn upsert(&mut self, record: &Record) -> ItemResult<RecordKey> {
        let now = Utc::now();
        let version = self.version;
        let mut tx = self.conn.begin().await?;

        let written = match record {
            Record::Market(m) => upsert_market(&mut tx, m, version, now).await,
            Record::Event(e) => upsert_event(&mut tx, e, version, now).await,
            Record::Tag(t) => upsert_tag(&mut tx, t, version, now).await,
            Record::Trade(t) => upsert_trade(&mut tx, t, now).await,
        };

        match written {
            Ok(key) => {
                tx.commit().await?;
                Ok(key)
            }
            Err(e) => {
                if let Err(rb) = tx.rollback().await {
                    warn!(kind = %record.kind(), "Rollback failed: {rb}");
                }
                Err(e)
            }
        }
    }

    /// Shared handle for snapshot appends and reads within the same run.
    pub fn connection(&mut self) -> &mut SqliteConnection {
        &mut self.conn
    }

    /// Close the connection once every endpoint has reached its terminal page.
    pub async fn close(self) -> Result<()> {
        self.conn.close().await?;
        Ok(())
    }
}

fn json_text(v: &Value) -> ItemResult<String> {
    Ok(serde_json::to_string(v)?)
}

async fn upsert_market(
    conn: &mut SqliteConnection,
    m: &MarketRow,
    version: DateTime<Utc>,
    now: DateTime<Utc>,
) -> ItemResult<RecordKey> {
    let id: String = sqlx::query_scalar(
        r#"
        INSERT INTO markets (
            market_id, condition_id, question_id, question, description, market_slug,
            active, closed, archived, accepting_orders, enable_order_book,
            end_date_iso, game_start_time, minimum_order_size, minimum_tick_size,
            maker_base_fee, taker_base_fee, seconds_delay, fpmm,
            neg_risk, neg_risk_market_id, neg_risk_request_id,
            notifications_enabled, is_50_50_outcome, icon, image, volume,
            tags, rewards, tokens, created_at, updated_at
        ) VALUES (
            ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?,
            ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?
        )
        ON CONFLICT (market_id, created_at) DO UPDATE SET
            active = excluded.active,
            closed = excluded.closed,
            archived = excluded.archived,
            accepting_orders = excluded.accepting_orders,
            volume = excluded.volume,
            tokens = excluded.tokens,
            updated_at = excluded.updated_at
        RETURNING market_id
        "#,
    )
    .bind(&m.market_id)
    .bind(&m.condition_id)
    .bind(&m.question_id)
    .bind(&m.question)
    .bind(&m.description)
    .bind(&m.market_slug)
    .bind(m.active)
    .bind(m.closed)
    .bind(m.archived)
    .bind(m.accepting_orders)
    .bind(m.enable_order_book)
    .bind(m.end_date_iso)
    .bind(m.game_start_time)
    .bind(m.minimum_order_size)
    .bind(m.minimum_tick_size)
    .bind(m.maker_base_fee)
    .bind(m.taker_base_fee)
    .bind(m.seconds_delay)
    .bind(&m.fpmm)
    .bind(m.neg_risk)
    .bind(&m.neg_risk_market_id)
    .bind(&m.neg_risk_request_id)
    .bind(m.notifications_enabled)
    .bind(m.is_50_50_outcome)
    .bind(&m.icon)
    .bind(&m.image)
    .bind(m.volume)
    .bind(json_text(&m.tags)?)
    .bind(json_text(&m.rewards)?)
    .bind(json_text(&m.tokens)?)
    .bind(version)
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;

    Ok(RecordKey::Market(id))
}

async fn upsert_event(
    conn: &mut SqliteConnection,
    e: &EventRow,
    version: DateTime<Utc>,
    now: DateTime<Utc>,
) -> ItemResult<RecordKey> {
    let image_optimized = e.image_optimized.as_ref().map(json_text).transpose()?;
    let icon_optimized = e.icon_optimized.as_ref().map(json_text).transpose()?;

    let id: String = sqlx::query_scalar(
        r#"
        INSERT INTO events (
            id, ticker, slug, title, description,
            start_date, end_date, creation_date, image, icon,
            active, closed, archived, featured, restricted, is_new, neg_risk,
            liquidity, volume, open_interest, volume_24hr, competitive, comment_count,
            tags, markets, series, sub_events, image_optimized, icon_optimized,
            created_at, updated_at
        ) VALUES (
            ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?,
            ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?
        )
        ON CONFLICT (id, created_at) DO UPDATE SET
            active = excluded.active,
            closed = excluded.closed,
            archived = excluded.archived,
            featured = excluded.featured,
            restricted = excluded.restricted,
            liquidity = excluded.liquidity,
            volume = excluded.volume,
            open_interest = excluded.open_interest,
            volume_24hr = excluded.volume_24hr,
            competitive = excluded.competitive,
            comment_count = excluded.comment_count,
            updated_at = excluded.updated_at
        RETURNING id
        "#,
    )
    .bind(&e.id)
    .bind(&e.ticker)
    .bind(&e.slug)
    .bind(&e.title)
    .bind(&e.description)
    .bind(e.start_date)
    .bind(e.end_date)
    .bind(e.creation_date)
    .bind(&e.image)
    .bind(&e.icon)
    .bind(e.active)
    .bind(e.closed)
    .bind(e.archived)
    .bind(e.featured)
    .bind(e.restricted)
    .bind(e.is_new)
    .bind(e.neg_risk)
    .bind(e.liquidity)
    .bind(e.volume)
    .bind(e.open_interest)
    .bind(e.volume_24hr)
    .bind(e.competitive)
    .bind(e.comment_count)
    .bind(json_text(&e.tags)?)
    .bind(json_text(&e.markets)?)
    .bind(json_text(&e.series)?)
    .bind(json_text(&e.sub_events)?)
    .bind(image_optimized)
    .bind(icon_optimized)
    .bind(version)
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;

    Ok(RecordKey::Event(id))
}

async fn upsert_tag(
    conn: &mut SqliteConnection,
    t: &TagRow,
    version: DateTime<Utc>,
    now: DateTime<Utc>,
) -> ItemResult<RecordKey> {
    let id: String = sqlx::query_scalar(
        r#"
        INSERT INTO tags (
            id, label, slug, force_show, force_hide, is_carousel, published_at,
            created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (id, created_at) DO UPDATE SET
            force_show = excluded.force_show,
            force_hide = excluded.force_hide,
            is_carousel = excluded.is_carousel,
            updated_at = excluded.updated_at
        RETURNING id
        "#,
    )
    .bind(&t.id)
    .bind(&t.label)
    .bind(&t.slug)
    .bind(t.force_show)
    .bind(t.force_hide)
    .bind(t.is_carousel)
    .bind(t.published_at)
    .bind(version)
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;

    Ok(RecordKey::Tag(id))
}

/// Trades are keyed by their own composite identity; only size and price
/// take late corrections.
async fn upsert_trade(
    conn: &mut SqliteConnection,
    t: &TradeRow,
    now: DateTime<Utc>,
) -> ItemResult<RecordKey> {
    let (trade_time, proxy_wallet, condition_id, transaction_hash): (
        DateTime<Utc>,
        String,
        String,
        String,
    ) = sqlx::query_as(
        r#"
        INSERT INTO trades (
            trade_time, proxy_wallet, condition_id, transaction_hash,
            side, asset, size, price, title, slug, icon, event_slug,
            outcome, outcome_index, name, pseudonym, inserted_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (trade_time, proxy_wallet, condition_id, transaction_hash) DO UPDATE SET
            size = excluded.size,
            price = excluded.price
        RETURNING trade_time, proxy_wallet, condition_id, transaction_hash
        "#,
    )
    .bind(t.trade_time)
    .bind(&t.proxy_wallet)
    .bind(&t.condition_id)
    .bind(&t.transaction_hash)
    .bind(&t.side)
    .bind(&t.asset)
    .bind(t.size)
    .bind(t.price)
    .bind(&t.title)
    .bind(&t.slug)
    .bind(&t.icon)
    .bind(&t.event_slug)
    .bind(&t.outcome)
    .bind(t.outcome_index)
    .bind(&t.name)
    .bind(&t.pseudonym)
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;

    Ok(RecordKey::Trade(TradeKey {
        trade_time,
        proxy_wallet,
        condition_id,
        transaction_hash,
    }))
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    use super::*;
    use crate::db::memory_connection;
    use crate::error::NormalizeError;

    fn version() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, 0, 0, 0).unwrap()
    }

    async fn writer() -> Writer {
        Writer::new(memory_connection().await, version())
    }

    async fn count(w: &mut Writer, table: &str) -> i64 {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(w.connection())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn same_market_twice_yields_one_row() {
        let mut w = writer().await;
        let raw = json!({"condition_id": "0xabc", "question": "Q?", "active": true});

        let first = w.apply(RecordKind::Market, &raw).await.unwrap();
        let second = w.apply(RecordKind::Market, &raw).await.unwrap();

        assert_eq!(first, RecordKey::Market("0xabc".to_string()));
        assert_eq!(first, second);
        assert_eq!(count(&mut w, "markets").await, 1);
    }

    #[tokio::test]
    async fn conflict_refreshes_only_mutable_market_fields() {
        let mut w = writer().await;
        w.apply(
            RecordKind::Market,
            &json!({"condition_id": "0xabc", "question": "Original?", "active": true, "closed": false, "seconds_delay": 3}),
        )
        .await
        .unwrap();
        w.apply(
            RecordKind::Market,
            &json!({"condition_id": "0xabc", "question": "Rewritten?", "active": false, "closed": true, "seconds_delay": 9}),
        )
        .await
        .unwrap();

        let (question, active, closed, seconds_delay): (String, bool, bool, i64) = sqlx::query_as(
            "SELECT question, active, closed, seconds_delay FROM markets WHERE market_id = '0xabc'",
        )
        .fetch_one(w.connection())
        .await
        .unwrap();
        assert_eq!(question, "Original?");
        assert!(!active);
        assert!(closed);
        assert_eq!(seconds_delay, 3);
    }

    #[tokio::test]
    async fn later_version_keeps_history() {
        let mut today = writer().await;
        let raw = json!({"condition_id": "0xabc", "question": "Q?"});
        today.apply(RecordKind::Market, &raw).await.unwrap();

        let mut next_day = Writer::new(today.conn, version() + Duration::days(1));
        next_day.apply(RecordKind::Market, &raw).await.unwrap();

        assert_eq!(count(&mut next_day, "markets").await, 2);
    }

    #[tokio::test]
    async fn event_and_tag_upserts_are_idempotent() {
        let mut w = writer().await;
        let event = json!({"id": "7", "title": "Election", "volume": 10, "imageOptimized": {"id": "1"}});
        let tag = json!({"id": "2", "label": "Politics", "slug": "politics"});

        for _ in 0..2 {
            assert_eq!(
                w.apply(RecordKind::Event, &event).await.unwrap(),
                RecordKey::Event("7".to_string())
            );
            assert_eq!(
                w.apply(RecordKind::Tag, &tag).await.unwrap(),
                RecordKey::Tag("2".to_string())
            );
        }
        assert_eq!(count(&mut w, "events").await, 1);
        assert_eq!(count(&mut w, "tags").await, 1);

        let blob: Option<String> = sqlx::query_scalar("SELECT image_optimized FROM events")
            .fetch_one(w.connection())
            .await
            .unwrap();
        assert_eq!(blob.as_deref(), Some(r#"{"id":"1"}"#));
    }

    #[tokio::test]
    async fn event_title_is_immutable_volume_is_not() {
        let mut w = writer().await;
        w.apply(RecordKind::Event, &json!({"id": "7", "title": "First", "volume": 10}))
            .await
            .unwrap();
        w.apply(RecordKind::Event, &json!({"id": "7", "title": "Second", "volume": 25}))
            .await
            .unwrap();

        let (title, volume): (String, f64) = sqlx::query_as("SELECT title, volume FROM events")
            .fetch_one(w.connection())
            .await
            .unwrap();
        assert_eq!(title, "First");
        assert_eq!(volume, 25.0);
    }

    #[tokio::test]
    async fn trade_corrections_update_size_and_price_only() {
        let mut w = writer().await;
        let base = json!({
            "timestamp": 1_700_000_000,
            "proxyWallet": "0xw",
            "conditionId": "0xc",
            "transactionHash": "0xh",
            "size": 10,
            "price": 0.5,
            "outcome": "Yes",
        });
        let mut corrected = base.clone();
        corrected["size"] = json!(12);
        corrected["price"] = json!(0.55);
        corrected["outcome"] = json!("No");

        let k1 = w.apply(RecordKind::Trade, &base).await.unwrap();
        let k2 = w.apply(RecordKind::Trade, &corrected).await.unwrap();
        assert_eq!(k1, k2);
        assert!(matches!(k1, RecordKey::Trade(ref k) if k.transaction_hash == "0xh"));

        let (size, price, outcome): (f64, f64, String) =
            sqlx::query_as("SELECT size, price, outcome FROM trades")
                .fetch_one(w.connection())
                .await
                .unwrap();
        assert_eq!(size, 12.0);
        assert_eq!(price, 0.55);
        assert_eq!(outcome, "Yes");
        assert_eq!(count(&mut w, "trades").await, 1);
    }

    #[tokio::test]
    async fn trade_redelivered_without_fill_keeps_stored_values() {
        let mut w = writer().await;
        let fill = json!({
            "timestamp": 1_700_000_000,
            "proxyWallet": "0xw",
            "conditionId": "0xc",
            "transactionHash": "0xh",
            "size": 10,
            "price": 0.5,
        });
        w.apply(RecordKind::Trade, &fill).await.unwrap();

        let mut partial = fill.clone();
        partial.as_object_mut().unwrap().remove("size");
        partial.as_object_mut().unwrap().remove("price");
        let err = w.apply(RecordKind::Trade, &partial).await.unwrap_err();
        assert!(matches!(
            err,
            ItemError::Normalize(NormalizeError::MissingField("size"))
        ));

        let (size, price): (f64, f64) = sqlx::query_as("SELECT size, price FROM trades")
            .fetch_one(w.connection())
            .await
            .unwrap();
        assert_eq!((size, price), (10.0, 0.5));
    }

    #[tokio::test]
    async fn markets_with_blank_condition_ids_stay_distinct() {
        let mut w = writer().await;
        let a = w
            .apply(RecordKind::Market, &json!({"conditionId": "", "slug": "market-a"}))
            .await
            .unwrap();
        let b = w
            .apply(RecordKind::Market, &json!({"conditionId": "", "slug": "market-b"}))
            .await
            .unwrap();
        assert_ne!(a, b);
        assert_eq!(count(&mut w, "markets").await, 2);
    }

    #[tokio::test]
    async fn failed_normalization_writes_nothing() {
        let mut w = writer().await;
        let err = w
            .apply(RecordKind::Tag, &json!({"id": "2", "slug": "politics"}))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ItemError::Normalize(NormalizeError::MissingField("label"))
        ));
        assert_eq!(count(&mut w, "tags").await, 0);
    }

    #[tokio::test]
    async fn storage_error_is_rolled_back_and_connection_stays_usable() {
        let mut w = writer().await;
        sqlx::query("DROP TABLE tags")
            .execute(w.connection())
            .await
            .unwrap();

        let err = w
            .apply(RecordKind::Tag, &json!({"id": "2", "label": "L", "slug": "s"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ItemError::Storage(_)));
        assert!(!err.is_fatal());

        w.apply(RecordKind::Market, &json!({"condition_id": "0x1"}))
            .await
            .unwrap();
        assert_eq!(count(&mut w, "markets").await, 1);
    }
}
