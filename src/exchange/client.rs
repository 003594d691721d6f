//! Binance spot REST API client.

use super::traits::{ExchangeResult, SpotExchange};
use super::types::*;
use crate::config::BinanceConfig;
use crate::error::ExchangeError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, Response};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use sha2::Sha256;
use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use tracing::{debug, instrument};

const SPOT_BASE_URL: &str = "https://api.binance.com";
const SPOT_TESTNET_URL: &str = "https://testnet.binance.vision";

/// Binance API client for the spot market.
pub struct BinanceClient {
    http: Client,
    api_key: String,
    secret_key: String,
    base_url: String,
    recv_window_ms: u64,
    /// Trading rules rarely change; fetched once per symbol
    rules_cache: RwLock<HashMap<String, SymbolRules>>,
}

impl BinanceClient {
    /// Create a new Binance client from configuration.
    pub fn new(config: &BinanceConfig) -> Result<Self> {
        let base_url = if config.testnet {
            SPOT_TESTNET_URL
        } else {
            SPOT_BASE_URL
        };
        Self::with_base_url(config, base_url)
    }

    /// Create a client against a custom base URL.
    pub fn with_base_url(config: &BinanceConfig, base_url: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            secret_key: config.secret_key.clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
            recv_window_ms: config.recv_window_ms,
            rules_cache: RwLock::new(HashMap::new()),
        })
    }

    /// Generate HMAC-SHA256 signature for authenticated requests.
    fn sign(&self, query_string: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.secret_key.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(query_string.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Get current timestamp in milliseconds.
    fn timestamp() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("Time went backwards")
            .as_millis() as u64
    }

    fn encode_params(params: &[(&str, String)]) -> String {
        params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Turn an HTTP response into a typed value or a structured error.
    async fn decode<T: DeserializeOwned>(response: Response) -> ExchangeResult<T> {
        let status = response.status();
        let body = response.text().await?;

        if status.is_success() {
            return serde_json::from_str(&body).map_err(|e| ExchangeError::Decode(e.to_string()));
        }

        match serde_json::from_str::<ApiErrorBody>(&body) {
            Ok(err) => Err(ExchangeError::Api {
                status: status.as_u16(),
                code: err.code,
                msg: err.msg,
            }),
            Err(_) => Err(ExchangeError::Api {
                status: status.as_u16(),
                code: 0,
                msg: body,
            }),
        }
    }

    async fn get_public<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> ExchangeResult<T> {
        let url = format!("{}{}?{}", self.base_url, path, Self::encode_params(params));
        let response = self.http.get(&url).send().await?;
        Self::decode(response).await
    }

    async fn send_signed<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        mut params: Vec<(&str, String)>,
    ) -> ExchangeResult<T> {
        params.push(("recvWindow", self.recv_window_ms.to_string()));
        params.push(("timestamp", Self::timestamp().to_string()));

        let query_string = Self::encode_params(&params);
        let signature = self.sign(&query_string);
        let url = format!(
            "{}{}?{}&signature={}",
            self.base_url, path, query_string, signature
        );

        let response = self
            .http
            .request(method, &url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;
        Self::decode(response).await
    }
}

#[async_trait]
impl SpotExchange for BinanceClient {
    // ==================== Account (Authenticated) ====================

    #[instrument(skip(self))]
    async fn account_balances(&self) -> ExchangeResult<Vec<AssetBalance>> {
        let account: AccountInfo = self
            .send_signed(
                Method::GET,
                "/api/v3/account",
                vec![("omitZeroBalances", "true".to_string())],
            )
            .await?;

        Ok(account
            .balances
            .into_iter()
            .filter(|b| b.total() > Decimal::ZERO)
            .collect())
    }

    // ==================== Market Data (Public) ====================

    #[instrument(skip(self))]
    async fn avg_price(&self, symbol: &str) -> ExchangeResult<Decimal> {
        let avg: AvgPrice = self
            .get_public("/api/v3/avgPrice", &[("symbol", symbol.to_string())])
            .await?;
        Ok(avg.price)
    }

    #[instrument(skip(self))]
    async fn order_book(&self, symbol: &str, depth: u16) -> ExchangeResult<OrderBook> {
        self.get_public(
            "/api/v3/depth",
            &[("symbol", symbol.to_string()), ("limit", depth.to_string())],
        )
        .await
    }

    #[instrument(skip(self))]
    async fn recent_trades(&self, symbol: &str, limit: u16) -> ExchangeResult<Vec<RecentTrade>> {
        self.get_public(
            "/api/v3/aggTrades",
            &[("symbol", symbol.to_string()), ("limit", limit.to_string())],
        )
        .await
    }

    #[instrument(skip(self))]
    async fn candles(
        &self,
        symbol: &str,
        interval: &str,
        limit: u16,
    ) -> ExchangeResult<Vec<Candle>> {
        let rows: Vec<Vec<serde_json::Value>> = self
            .get_public(
                "/api/v3/klines",
                &[
                    ("symbol", symbol.to_string()),
                    ("interval", interval.to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;

        rows.iter().map(|row| Candle::from_row(row)).collect()
    }

    #[instrument(skip(self))]
    async fn symbol_rules(&self, symbol: &str) -> ExchangeResult<SymbolRules> {
        if let Some(rules) = self.rules_cache.read().await.get(symbol) {
            return Ok(rules.clone());
        }

        let info: ExchangeInfo = self
            .get_public("/api/v3/exchangeInfo", &[("symbol", symbol.to_string())])
            .await?;

        let symbol_info = info
            .symbols
            .into_iter()
            .find(|s| s.symbol == symbol)
            .ok_or_else(|| ExchangeError::UnknownSymbol(symbol.to_string()))?;
        let rules = SymbolRules::try_from(symbol_info)?;

        self.rules_cache
            .write()
            .await
            .insert(symbol.to_string(), rules.clone());
        Ok(rules)
    }

    // ==================== Orders (Authenticated) ====================

    #[instrument(skip(self))]
    async fn place_order(&self, order: &NewOrder) -> ExchangeResult<OrderResponse> {
        let mut params = vec![
            ("symbol", order.symbol.clone()),
            ("side", order.side.to_string()),
            ("type", order.order_type.as_str().to_string()),
            ("quantity", order.quantity.to_string()),
            ("newOrderRespType", "RESULT".to_string()),
        ];

        if let Some(price) = &order.price {
            params.push(("price", price.to_string()));
        }

        if let Some(tif) = &order.time_in_force {
            params.push(("timeInForce", format!("{:?}", tif).to_uppercase()));
        }

        debug!("Placing spot order: {:?}", order);

        self.send_signed(Method::POST, "/api/v3/order", params).await
    }

    #[instrument(skip(self))]
    async fn cancel_order(&self, symbol: &str, order_id: i64) -> ExchangeResult<()> {
        let _: serde_json::Value = self
            .send_signed(
                Method::DELETE,
                "/api/v3/order",
                vec![
                    ("symbol", symbol.to_string()),
                    ("orderId", order_id.to_string()),
                ],
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn open_orders(&self) -> ExchangeResult<Vec<OpenOrder>> {
        self.send_signed(Method::GET, "/api/v3/openOrders", Vec::new())
            .await
    }
}
