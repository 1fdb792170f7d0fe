use std::collections::HashMap;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use log::error;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use sha2::Sha256;
use tokio::sync::broadcast;
use zeroize::Zeroizing;

use super::models::{
    parse_kline, ApiErrorBody, RawAccount, RawBookTicker, RawDepth, RawExchangeInfo, RawListenKey, RawOrder,
    RawPositionMode, RawPremiumIndex,
};
use crate::exchange::{
    ExchangeClient, ExchangeError, ExchangeUserClient, RetryHandler, UserStreamEvent, USER_STREAM_CAPACITY,
};
use crate::helpers::{now_ms, round_to_step};
use crate::models::{
    Account, BookUpdate, Candle, Contract, DepthSnapshot, FundingRate, MarginType, Order, OrderId, OrderRequest,
    Symbol, Timeframe, Timestamp,
};

const API_URL: &str = "https://fapi.binance.com";
const TESTNET_API_URL: &str = "https://testnet.binancefuture.com";

pub const MAX_LEVERAGE: u32 = 25;

type Params = Vec<(&'static str, String)>;

/// Binance USDⓈ-M futures REST client.
///
/// API Doc: https://binance-docs.github.io/apidocs/futures/en
pub struct BinanceClient {
    http: reqwest::Client,
    base_url: String,
    public_key: String,
    private_key: Zeroizing<String>,
    retry: RetryHandler,
    events: broadcast::Sender<UserStreamEvent>,
}

impl BinanceClient {
    pub fn new(public_key: &str, private_key: &str, testnet: bool) -> Self {
        let (events, _) = broadcast::channel(USER_STREAM_CAPACITY);
        Self {
            http: reqwest::Client::new(),
            base_url: if testnet { TESTNET_API_URL } else { API_URL }.to_string(),
            public_key: public_key.to_string(),
            private_key: Zeroizing::new(private_key.to_string()),
            retry: RetryHandler::default(),
            events,
        }
    }

    /// Client for public endpoints only.
    pub fn public(testnet: bool) -> Self {
        Self::new("", "", testnet)
    }

    /// Sender the user stream publishes into.
    pub(crate) fn event_sender(&self) -> broadcast::Sender<UserStreamEvent> {
        self.events.clone()
    }

    pub(crate) fn sign(&self, query: &str) -> Result<String, ExchangeError> {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.private_key.as_bytes())
            .map_err(|err| ExchangeError::CredentialsError(err.to_string()))?;
        mac.update(query.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    async fn get<T: DeserializeOwned>(&self, endpoint: &str, params: Params) -> Result<T, ExchangeError> {
        self.retry
            .retry(|| self.request(Method::GET, endpoint, params.clone(), false))
            .await
    }

    async fn signed<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        mut params: Params,
    ) -> Result<T, ExchangeError> {
        if self.public_key.is_empty() || self.private_key.is_empty() {
            return Err(ExchangeError::CredentialsError(endpoint.to_string()));
        }
        params.push(("timestamp", now_ms().to_string()));
        self.request(method, endpoint, params, true).await
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        params: Params,
        signed: bool,
    ) -> Result<T, ExchangeError> {
        let mut query =
            serde_urlencoded::to_string(&params).map_err(|err| ExchangeError::ValidationError(err.to_string()))?;
        if signed {
            let signature = self.sign(&query)?;
            if !query.is_empty() {
                query.push('&');
            }
            query.push_str("signature=");
            query.push_str(&signature);
        }

        let mut url = format!("{}{}", self.base_url, endpoint);
        if !query.is_empty() {
            url.push('?');
            url.push_str(&query);
        }

        let response = self
            .http
            .request(method, &url)
            .header("X-MBX-APIKEY", &self.public_key)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::OK {
            return Ok(response.json::<T>().await?);
        }

        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED {
            let body: ApiErrorBody = response.json().await?;
            let err = ExchangeError::ApiError {
                endpoint: endpoint.to_string(),
                code: body.code,
                message: body.msg,
            };
            error!("{}", err);
            return Err(err);
        }

        error!("Server respond with status {}", status.as_u16());
        Err(ExchangeError::StatusError {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
        })
    }
}

/// Query parameters of a new order, with quantity and price snapped to the contract steps.
pub(crate) fn order_params(request: &OrderRequest) -> Params {
    let contract = &request.contract;
    let mut params: Params = vec![
        ("symbol", contract.symbol.clone()),
        ("side", request.side.as_str().to_string()),
        ("positionSide", request.position_side.as_str().to_string()),
        ("quantity", round_to_step(request.quantity, contract.lot_size).to_string()),
        ("type", request.order_type.as_str().to_string()),
        ("newClientOrderId", request.client_order_id.clone()),
    ];
    if let Some(price) = request.price {
        params.push(("price", round_to_step(price, contract.tick_size).to_string()));
    }
    if let Some(tif) = request.time_in_force {
        params.push(("timeInForce", tif.as_str().to_string()));
    }
    params
}

#[async_trait]
impl ExchangeClient for BinanceClient {
    async fn get_contracts(&self) -> Result<HashMap<Symbol, Contract>, ExchangeError> {
        let info: RawExchangeInfo = self.get("/fapi/v1/exchangeInfo", vec![]).await?;
        Ok(info
            .symbols
            .into_iter()
            .map(Contract::from)
            .map(|c| (c.symbol.clone(), c))
            .collect())
    }

    async fn get_funding_rate(&self, symbol: &str) -> Result<FundingRate, ExchangeError> {
        let raw: RawPremiumIndex = self
            .get("/fapi/v1/premiumIndex", vec![("symbol", symbol.to_string())])
            .await?;
        Ok(raw.into())
    }

    async fn get_historical_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
        start_time: Option<Timestamp>,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let mut params: Params = vec![
            ("symbol", symbol.to_string()),
            ("interval", timeframe.as_str().to_string()),
            ("limit", limit.to_string()),
        ];
        if let Some(start_time) = start_time {
            params.push(("startTime", start_time.to_string()));
        }

        let rows: Vec<Vec<Value>> = self.get("/fapi/v1/klines", params).await?;
        rows.iter().map(|row| parse_kline(row)).collect()
    }

    async fn get_book(&self) -> Result<HashMap<Symbol, BookUpdate>, ExchangeError> {
        let tickers: Vec<RawBookTicker> = self.get("/fapi/v1/ticker/bookTicker", vec![]).await?;
        Ok(tickers.into_iter().map(RawBookTicker::into_book).collect())
    }

    async fn get_depth(&self, symbol: &str, limit: usize) -> Result<DepthSnapshot, ExchangeError> {
        let raw: RawDepth = self
            .get(
                "/fapi/v1/depth",
                vec![("symbol", symbol.to_string()), ("limit", limit.to_string())],
            )
            .await?;
        Ok(raw.into())
    }
}

#[async_trait]
impl ExchangeUserClient for BinanceClient {
    async fn get_account_info(&self) -> Result<Account, ExchangeError> {
        let raw: RawAccount = self.signed(Method::GET, "/fapi/v2/account", vec![]).await?;
        Ok(raw.into())
    }

    async fn change_leverage(&self, symbol: &str, leverage: u32) -> Result<(), ExchangeError> {
        if leverage == 0 || leverage > MAX_LEVERAGE {
            return Err(ExchangeError::ValidationError(format!(
                "leverage {} is out of 1..={}",
                leverage, MAX_LEVERAGE
            )));
        }
        let _: Value = self
            .signed(
                Method::POST,
                "/fapi/v1/leverage",
                vec![("symbol", symbol.to_string()), ("leverage", leverage.to_string())],
            )
            .await?;
        Ok(())
    }

    async fn is_hedge_mode(&self) -> Result<bool, ExchangeError> {
        let raw: RawPositionMode = self.signed(Method::GET, "/fapi/v1/positionSide/dual", vec![]).await?;
        Ok(raw.dual_side_position)
    }

    async fn change_position_mode(&self, hedge_mode: bool) -> Result<(), ExchangeError> {
        let _: Value = self
            .signed(
                Method::POST,
                "/fapi/v1/positionSide/dual",
                vec![("dualSidePosition", hedge_mode.to_string())],
            )
            .await?;
        Ok(())
    }

    async fn change_margin_type(&self, symbol: &str, margin_type: MarginType) -> Result<(), ExchangeError> {
        let _: Value = self
            .signed(
                Method::POST,
                "/fapi/v1/marginType",
                vec![("symbol", symbol.to_string()), ("marginType", margin_type.as_str().to_string())],
            )
            .await?;
        Ok(())
    }

    async fn place_order(&self, request: OrderRequest) -> Result<Option<Order>, ExchangeError> {
        match self
            .signed::<RawOrder>(Method::POST, "/fapi/v1/order", order_params(&request))
            .await
        {
            Ok(raw) => Ok(Some(raw.into())),
            // already logged by the request
            Err(ExchangeError::ApiError { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn cancel_order(&self, contract: &Contract, order_id: OrderId) -> Result<Option<Order>, ExchangeError> {
        let params = vec![("symbol", contract.symbol.clone()), ("orderId", order_id.to_string())];
        match self.signed::<RawOrder>(Method::DELETE, "/fapi/v1/order", params).await {
            Ok(raw) => Ok(Some(raw.into())),
            Err(ExchangeError::ApiError { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn get_order(&self, contract: &Contract, order_id: OrderId) -> Result<Option<Order>, ExchangeError> {
        let params = vec![("symbol", contract.symbol.clone()), ("orderId", order_id.to_string())];
        match self.signed::<RawOrder>(Method::GET, "/fapi/v1/order", params).await {
            Ok(raw) => Ok(Some(raw.into())),
            Err(ExchangeError::ApiError { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn create_listen_key(&self) -> Result<String, ExchangeError> {
        if self.public_key.is_empty() {
            return Err(ExchangeError::CredentialsError("/fapi/v1/listenKey".to_string()));
        }
        let raw: RawListenKey = self.request(Method::POST, "/fapi/v1/listenKey", vec![], false).await?;
        Ok(raw.listen_key)
    }

    async fn keepalive_listen_key(&self) -> Result<(), ExchangeError> {
        let _: Value = self.request(Method::PUT, "/fapi/v1/listenKey", vec![], false).await?;
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<UserStreamEvent> {
        self.events.subscribe()
    }
}
