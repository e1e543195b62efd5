//! CLOB REST client.
//!
//! Implements `MarketClient` over the exchange's HTTP API plus the Gamma
//! metadata API for market lookup. All trading endpoints carry L2 auth
//! headers; read-only market-data endpoints are unauthenticated.

use std::time::Duration;

use async_trait::async_trait;
use court_common::OrderBookLevel;
use reqwest::Client;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::auth::ClobAuth;
use crate::client::{MarketClient, MarketError};
use crate::ctf::CtfMerger;
use crate::orderbook::OrderBook;
use crate::types::{GamePrice, MergeReceipt, MoneylineMarket, OrderLifecycle, OrderState};

/// Configuration for the CLOB client.
#[derive(Debug, Clone)]
pub struct ClobConfig {
    /// CLOB trading host.
    pub clob_host: String,
    /// Gamma metadata host (market search).
    pub gamma_host: String,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl Default for ClobConfig {
    fn default() -> Self {
        Self {
            clob_host: "https://clob.polymarket.com".to_string(),
            gamma_host: "https://gamma-api.polymarket.com".to_string(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// HTTP market client.
pub struct ClobClient {
    config: ClobConfig,
    http: Client,
    auth: ClobAuth,
    /// On-chain redeem path; absent in configurations that never merge.
    merger: Option<CtfMerger>,
}

impl ClobClient {
    pub fn new(config: ClobConfig, auth: ClobAuth) -> Result<Self, MarketError> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| MarketError::Permanent(e.to_string()))?;
        Ok(Self {
            config,
            http,
            auth,
            merger: None,
        })
    }

    pub fn with_merger(mut self, merger: CtfMerger) -> Self {
        self.merger = Some(merger);
        self
    }

    fn merger(&self) -> Result<&CtfMerger, MarketError> {
        self.merger
            .as_ref()
            .ok_or_else(|| MarketError::Permanent("no wallet configured for merges".into()))
    }

    async fn fetch_book(&self, token_id: &str) -> Result<OrderBook, MarketError> {
        let url = format!("{}/book", self.config.clob_host);
        let resp = self
            .http
            .get(&url)
            .query(&[("token_id", token_id)])
            .send()
            .await
            .map_err(MarketError::from_http)?
            .error_for_status()
            .map_err(MarketError::from_http)?;

        let dto: BookDto = resp.json().await.map_err(MarketError::from_http)?;
        Ok(OrderBook::new(parse_levels(&dto.bids), parse_levels(&dto.asks)))
    }
}

#[async_trait]
impl MarketClient for ClobClient {
    async fn get_moneyline(
        &self,
        away_abbr: &str,
        home_abbr: &str,
        game_date: &str,
    ) -> Result<Option<MoneylineMarket>, MarketError> {
        let slug = format!(
            "nba-{}-{}-{}",
            away_abbr.to_lowercase(),
            home_abbr.to_lowercase(),
            game_date,
        );
        let url = format!("{}/events", self.config.gamma_host);
        let resp = self
            .http
            .get(&url)
            .query(&[("slug", slug.as_str())])
            .send()
            .await
            .map_err(MarketError::from_http)?
            .error_for_status()
            .map_err(MarketError::from_http)?;

        let events: Vec<GammaEventDto> = resp.json().await.map_err(MarketError::from_http)?;
        let Some(event) = events.into_iter().next() else {
            return Ok(None);
        };

        // The moneyline is the first binary market on the event; totals and
        // spreads carry more than two outcomes or a line in the question.
        let Some(market) = event.markets.into_iter().find(|m| !m.closed) else {
            return Ok(None);
        };

        let outcomes = parse_json_string_array(&market.outcomes);
        let token_ids = parse_json_string_array(&market.clob_token_ids);
        let prices: Vec<Decimal> = parse_json_string_array(&market.outcome_prices)
            .iter()
            .filter_map(|p| p.parse().ok())
            .collect();

        if outcomes.len() != 2 || token_ids.len() != 2 || prices.len() != 2 {
            warn!(slug = %slug, "Malformed moneyline market payload");
            return Ok(None);
        }

        Ok(Some(MoneylineMarket {
            event_slug: slug,
            title: event.title,
            condition_id: market.condition_id,
            outcomes,
            token_ids,
            prices,
            active: market.active && !market.closed,
        }))
    }

    async fn get_price(&self, token_id: &str) -> Result<GamePrice, MarketError> {
        let book = self.fetch_book(token_id).await?;
        let best_bid = book.best_bid().unwrap_or(Decimal::ZERO);
        let best_ask = book.best_ask().unwrap_or(Decimal::ONE);
        Ok(GamePrice {
            best_bid,
            best_ask,
            mid: (best_bid + best_ask) / dec!(2),
        })
    }

    async fn get_order_book(&self, token_id: &str) -> Result<OrderBook, MarketError> {
        self.fetch_book(token_id).await
    }

    async fn place_limit_buy(
        &self,
        token_id: &str,
        price: Decimal,
        size_usd: Decimal,
    ) -> Result<String, MarketError> {
        // Maker discipline: never cross the book.
        let quote = self.get_price(token_id).await?;
        if price >= quote.best_ask {
            return Err(MarketError::Permanent(format!(
                "limit {} would cross best ask {}",
                price, quote.best_ask
            )));
        }
        if price <= Decimal::ZERO {
            return Err(MarketError::Permanent("non-positive limit price".into()));
        }

        let shares = (size_usd / price).round_dp(2);
        let body = json!({
            "tokenID": token_id,
            "price": price.to_string(),
            "size": shares.to_string(),
            "side": "BUY",
            "orderType": "GTC",
            "owner": self.auth.api_key().unwrap_or_default(),
        })
        .to_string();

        let headers = self
            .auth
            .l2_headers("POST", "/order", &body)
            .map_err(|e| MarketError::Permanent(e.to_string()))?;
        let resp = headers
            .apply(self.http.post(format!("{}/order", self.config.clob_host)))
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(MarketError::from_http)?
            .error_for_status()
            .map_err(MarketError::from_http)?;

        let dto: PlaceOrderDto = resp.json().await.map_err(MarketError::from_http)?;
        if !dto.success {
            return Err(MarketError::Permanent(
                dto.error_msg.unwrap_or_else(|| "order rejected".into()),
            ));
        }
        debug!(token_id, %price, %size_usd, order_id = %dto.order_id, "Limit buy placed");
        Ok(dto.order_id)
    }

    async fn cancel_order(&self, order_id: &str) -> Result<bool, MarketError> {
        let body = json!({ "orderID": order_id }).to_string();
        let headers = self
            .auth
            .l2_headers("DELETE", "/order", &body)
            .map_err(|e| MarketError::Permanent(e.to_string()))?;
        let resp = headers
            .apply(self.http.delete(format!("{}/order", self.config.clob_host)))
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(MarketError::from_http)?;
        Ok(resp.status().is_success())
    }

    async fn cancel_and_replace(
        &self,
        order_id: &str,
        token_id: &str,
        new_price: Decimal,
        size_usd: Decimal,
    ) -> Result<String, MarketError> {
        if !self.cancel_order(order_id).await? {
            return Err(MarketError::Transient(format!(
                "cancel of {} not acknowledged",
                order_id
            )));
        }
        self.place_limit_buy(token_id, new_price, size_usd).await
    }

    async fn get_order(&self, order_id: &str) -> Result<OrderState, MarketError> {
        let path = format!("/data/order/{}", order_id);
        let headers = self
            .auth
            .l2_headers("GET", &path, "")
            .map_err(|e| MarketError::Permanent(e.to_string()))?;
        let resp = headers
            .apply(
                self.http
                    .get(format!("{}{}", self.config.clob_host, path)),
            )
            .send()
            .await
            .map_err(MarketError::from_http)?;

        if resp.status().as_u16() == 404 {
            return Err(MarketError::NotFound(order_id.to_string()));
        }
        let resp = resp.error_for_status().map_err(MarketError::from_http)?;
        let dto: OrderDto = resp.json().await.map_err(MarketError::from_http)?;

        let status = match dto.status.to_lowercase().as_str() {
            "matched" | "filled" => OrderLifecycle::Filled,
            "partially_filled" | "partial" => OrderLifecycle::PartiallyFilled,
            "cancelled" | "canceled" => OrderLifecycle::Cancelled,
            "expired" => OrderLifecycle::Expired,
            _ => OrderLifecycle::Live,
        };

        let filled: Decimal = dto.size_matched.parse().unwrap_or(Decimal::ZERO);
        let avg_price = dto
            .associate_trades
            .first()
            .and_then(|t| t.price.parse().ok());

        Ok(OrderState {
            order_id: order_id.to_string(),
            status,
            filled_shares: filled,
            avg_price,
            fee_rate_bps: dto.fee_rate_bps.parse().unwrap_or(Decimal::ZERO),
            fee_usd: Decimal::ZERO,
        })
    }

    async fn get_balance(&self) -> Result<Decimal, MarketError> {
        self.merger()?.usdc_balance().await
    }

    async fn merge_positions(
        &self,
        condition_id: &str,
        shares: Decimal,
    ) -> Result<MergeReceipt, MarketError> {
        self.merger()?.merge(condition_id, shares).await
    }

    async fn estimate_merge_gas_usd(
        &self,
        condition_id: &str,
        shares: Decimal,
    ) -> Result<Decimal, MarketError> {
        self.merger()?.estimate_gas_usd(condition_id, shares).await
    }
}

// --- Wire DTOs ---

#[derive(Debug, Deserialize)]
struct LevelDto {
    price: String,
    size: String,
}

#[derive(Debug, Deserialize)]
struct BookDto {
    #[serde(default)]
    bids: Vec<LevelDto>,
    #[serde(default)]
    asks: Vec<LevelDto>,
}

#[derive(Debug, Deserialize)]
struct GammaEventDto {
    #[serde(default)]
    title: String,
    #[serde(default)]
    markets: Vec<GammaMarketDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GammaMarketDto {
    #[serde(default)]
    condition_id: String,
    /// JSON-encoded string array, e.g. `"[\"BOS\", \"LAL\"]"`.
    #[serde(default)]
    outcomes: String,
    #[serde(default)]
    outcome_prices: String,
    #[serde(default)]
    clob_token_ids: String,
    #[serde(default)]
    active: bool,
    #[serde(default)]
    closed: bool,
}

#[derive(Debug, Deserialize)]
struct PlaceOrderDto {
    #[serde(default)]
    success: bool,
    #[serde(rename = "orderID", default)]
    order_id: String,
    #[serde(rename = "errorMsg", default)]
    error_msg: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrderDto {
    #[serde(default)]
    status: String,
    #[serde(default)]
    size_matched: String,
    #[serde(default)]
    fee_rate_bps: String,
    #[serde(default)]
    associate_trades: Vec<TradeDto>,
}

#[derive(Debug, Deserialize)]
struct TradeDto {
    #[serde(default)]
    price: String,
}

fn parse_levels(levels: &[LevelDto]) -> Vec<OrderBookLevel> {
    levels
        .iter()
        .filter_map(|l| {
            let price: Decimal = l.price.parse().ok()?;
            let size: Decimal = l.size.parse().ok()?;
            Some(OrderBookLevel::new(price, size))
        })
        .collect()
}

/// Gamma encodes arrays as JSON strings inside JSON. Fall back to empty on
/// malformed payloads rather than failing the whole scan.
fn parse_json_string_array(raw: &str) -> Vec<String> {
    serde_json::from_str::<Vec<String>>(raw).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_string_array() {
        assert_eq!(
            parse_json_string_array(r#"["BOS","LAL"]"#),
            vec!["BOS".to_string(), "LAL".to_string()]
        );
        assert!(parse_json_string_array("not json").is_empty());
        assert!(parse_json_string_array("").is_empty());
    }

    #[test]
    fn test_parse_levels_skips_garbage() {
        let levels = vec![
            LevelDto { price: "0.40".into(), size: "100".into() },
            LevelDto { price: "oops".into(), size: "1".into() },
        ];
        let parsed = parse_levels(&levels);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].price, dec!(0.40));
    }
}
