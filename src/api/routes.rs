use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use crate::db::models::{ActiveMarket, LatestPrice, OhlcBar, PricePoint};
use crate::db::reader::{self, DEFAULT_HISTORY_HOURS, DEFAULT_OHLC_HOURS};
use crate::error::AppError;

/// Upper bound on any lookback window (one year).
const MAX_WINDOW_HOURS: u32 = 24 * 366;

#[derive(Clone)]
pub struct ApiState {
    pub pool: sqlx::SqlitePool,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/prices/latest", get(get_latest_prices))
        .route("/markets/active", get(get_active_markets))
        .route(
            "/markets/:market_id/tokens/:token_id/history",
            get(get_price_history),
        )
        .route("/markets/:market_id/tokens/:token_id/ohlc", get(get_hourly_ohlc))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct LatestPricesQuery {
    pub market_id: Option<String>,
}

#[derive(Deserialize)]
pub struct WindowQuery {
    pub hours: Option<u32>,
}

#[derive(Deserialize)]
pub struct ActiveMarketsQuery {
    pub limit: Option<i64>,
}

fn window_hours(requested: Option<u32>, default: u32) -> Result<u32, AppError> {
    match requested {
        None => Ok(default),
        Some(h) if (1..=MAX_WINDOW_HOURS).contains(&h) => Ok(h),
        Some(h) => Err(AppError::Config(format!(
            "hours must be between 1 and {MAX_WINDOW_HOURS}, got {h}"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_latest_prices(
    State(state): State<ApiState>,
    Query(params): Query<LatestPricesQuery>,
) -> Result<Json<Vec<LatestPrice>>, AppError> {
    let rows = reader::latest_prices(&state.pool, params.market_id.as_deref()).await?;
    Ok(Json(rows))
}

async fn get_active_markets(
    State(state): State<ApiState>,
    Query(params): Query<ActiveMarketsQuery>,
) -> Result<Json<Vec<ActiveMarket>>, AppError> {
    let limit = params.limit.unwrap_or(500).clamp(1, 5_000);
    let rows = reader::active_markets(&state.pool, limit).await?;
    Ok(Json(rows))
}

async fn get_price_history(
    State(state): State<ApiState>,
    Path((market_id, token_id)): Path<(String, String)>,
    Query(params): Query<WindowQuery>,
) -> Result<Json<Vec<PricePoint>>, AppError> {
    let hours = window_hours(params.hours, DEFAULT_HISTORY_HOURS)?;
    let rows = reader::price_history(&state.pool, &market_id, &token_id, hours).await?;
    Ok(Json(rows))
}

async fn get_hourly_ohlc(
    State(state): State<ApiState>,
    Path((market_id, token_id)): Path<(String, String)>,
    Query(params): Query<WindowQuery>,
) -> Result<Json<Vec<OhlcBar>>, AppError> {
    let hours = window_hours(params.hours, DEFAULT_OHLC_HOURS)?;
    let bars = reader::hourly_ohlc(&state.pool, &market_id, &token_id, hours).await?;
    Ok(Json(bars))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_defaults_and_bounds() {
        assert_eq!(window_hours(None, 24).unwrap(), 24);
        assert_eq!(window_hours(Some(6), 24).unwrap(), 6);
        assert!(window_hours(Some(0), 24).is_err());
        assert!(window_hours(Some(MAX_WINDOW_HOURS + 1), 24).is_err());
    }
}
