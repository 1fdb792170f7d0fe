//! Raw Binance futures payloads and their conversion into domain models.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;

use crate::exchange::error::ExchangeError;
use crate::exchange::UserStreamEvent;
use crate::helpers::{now_ms, remove_exponent};
use crate::models::{
    Account, AccountBalance, AccountConfig, AccountPosition, BookUpdate, Candle, Contract, DepthSnapshot,
    DepthUpdate, FundingRate, LineUpdate, Order, OrderSide, OrderStatus, OrderType, PositionSide, Symbol,
    TradeUpdate,
};

#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorBody {
    pub code: i64,
    pub msg: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawBalance {
    asset: String,
    cross_wallet_balance: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawPosition {
    symbol: String,
    position_side: PositionSide,
    position_amt: Decimal,
    entry_price: Decimal,
    isolated: bool,
    isolated_wallet: Decimal,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawAccount {
    assets: Vec<RawBalance>,
    positions: Vec<RawPosition>,
}

impl From<RawAccount> for Account {
    fn from(raw: RawAccount) -> Self {
        Account {
            assets: raw
                .assets
                .into_iter()
                .map(|b| {
                    let balance = AccountBalance {
                        asset: b.asset.clone(),
                        wallet_balance: remove_exponent(b.cross_wallet_balance),
                    };
                    (b.asset, balance)
                })
                .collect(),
            positions: raw
                .positions
                .into_iter()
                .map(|p| AccountPosition {
                    symbol: p.symbol,
                    side: p.position_side,
                    quantity: remove_exponent(p.position_amt.abs()),
                    entry_price: remove_exponent(p.entry_price),
                    isolated: p.isolated,
                    margin: remove_exponent(p.isolated_wallet.abs()),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFilter {
    filter_type: String,
    #[serde(default)]
    notional: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawContract {
    symbol: String,
    base_asset: String,
    quote_asset: String,
    price_precision: u32,
    quantity_precision: u32,
    filters: Vec<RawFilter>,
}

impl From<RawContract> for Contract {
    fn from(raw: RawContract) -> Self {
        let min_notional = raw
            .filters
            .iter()
            .find(|f| f.filter_type == "MIN_NOTIONAL")
            .and_then(|f| f.notional)
            .unwrap_or_default();

        Contract::new(
            &raw.symbol,
            &raw.base_asset,
            &raw.quote_asset,
            raw.price_precision,
            raw.quantity_precision,
            min_notional,
        )
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawExchangeInfo {
    pub symbols: Vec<RawContract>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawPremiumIndex {
    symbol: String,
    mark_price: Decimal,
    index_price: Decimal,
    last_funding_rate: Decimal,
    interest_rate: Decimal,
    next_funding_time: i64,
    time: i64,
}

impl From<RawPremiumIndex> for FundingRate {
    fn from(raw: RawPremiumIndex) -> Self {
        FundingRate {
            symbol: raw.symbol,
            mark_price: remove_exponent(raw.mark_price),
            index_price: remove_exponent(raw.index_price),
            last_funding_rate_pct: remove_exponent(raw.last_funding_rate * Decimal::ONE_HUNDRED),
            next_funding_timestamp: raw.next_funding_time,
            interest_rate: remove_exponent(raw.interest_rate),
            timestamp: raw.time,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawDepth {
    last_update_id: i64,
    bids: Vec<[Decimal; 2]>,
    asks: Vec<[Decimal; 2]>,
}

impl From<RawDepth> for DepthSnapshot {
    fn from(raw: RawDepth) -> Self {
        DepthSnapshot {
            last_update_id: raw.last_update_id,
            bids: raw.bids,
            asks: raw.asks,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawBookTicker {
    pub symbol: String,
    bid_price: Decimal,
    ask_price: Decimal,
}

impl RawBookTicker {
    pub fn into_book(self) -> (Symbol, BookUpdate) {
        (self.symbol, BookUpdate::new(self.bid_price, self.ask_price))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawOrder {
    order_id: i64,
    client_order_id: String,
    symbol: String,
    status: OrderStatus,
    #[serde(rename = "type")]
    order_type: OrderType,
    side: OrderSide,
    position_side: PositionSide,
    orig_qty: Decimal,
    avg_price: Decimal,
}

impl From<RawOrder> for Order {
    fn from(raw: RawOrder) -> Self {
        Order {
            id: raw.order_id,
            client_order_id: raw.client_order_id,
            position_id: None,
            symbol: raw.symbol,
            status: raw.status,
            order_type: raw.order_type,
            side: raw.side,
            position_side: raw.position_side,
            quantity: remove_exponent(raw.orig_qty),
            entry_price: remove_exponent(raw.avg_price),
            context: None,
            timestamp: now_ms(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawListenKey {
    pub listen_key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawPositionMode {
    pub dual_side_position: bool,
}

/// Kline rows are positional: `[open time, open, high, low, close, volume, ...]`.
pub(crate) fn parse_kline(row: &[Value]) -> Result<Candle, ExchangeError> {
    fn field(row: &[Value], n: usize) -> Result<Decimal, ExchangeError> {
        let raw = row
            .get(n)
            .and_then(Value::as_str)
            .ok_or_else(|| ExchangeError::DecodeError(format!("kline field {} is missing", n)))?;
        raw.parse::<Decimal>()
            .map_err(|err| ExchangeError::DecodeError(format!("kline field {}: {}", n, err)))
    }

    let timestamp = row
        .first()
        .and_then(Value::as_i64)
        .ok_or_else(|| ExchangeError::DecodeError("kline open time is missing".to_string()))?;

    Ok(Candle {
        timestamp,
        open: field(row, 1)?,
        high: field(row, 2)?,
        low: field(row, 3)?,
        close: field(row, 4)?,
        volume: field(row, 5)?,
    })
}

/// Market stream message.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    /// Subscription acknowledgement.
    Ack(u64),
    Update { symbol: Symbol, update: LineUpdate },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "e")]
enum RawMarketEvent {
    #[serde(rename = "aggTrade")]
    AggTrade {
        s: String,
        p: Decimal,
        q: Decimal,
        #[serde(rename = "T")]
        trade_time: i64,
        m: bool,
    },
    #[serde(rename = "bookTicker")]
    BookTicker { s: String, b: Decimal, a: Decimal },
    #[serde(rename = "depthUpdate")]
    DepthUpdate {
        s: String,
        #[serde(rename = "U")]
        first_update_id: i64,
        u: i64,
        b: Vec<[Decimal; 2]>,
        a: Vec<[Decimal; 2]>,
        #[serde(rename = "T")]
        transaction_time: i64,
    },
}

pub fn parse_market_message(text: &str) -> Result<Option<StreamMessage>, ExchangeError> {
    let value: Value = serde_json::from_str(text)?;

    if let Some(id) = value.get("id").and_then(Value::as_u64) {
        return Ok(Some(StreamMessage::Ack(id)));
    }
    if value.get("e").is_none() {
        return Ok(None);
    }

    let message = match serde_json::from_value::<RawMarketEvent>(value) {
        Ok(RawMarketEvent::AggTrade { s, p, q, trade_time, m }) => StreamMessage::Update {
            symbol: s,
            update: LineUpdate::Trade(TradeUpdate {
                price: p,
                quantity: q,
                timestamp: trade_time,
                is_buyer_maker: m,
            }),
        },
        Ok(RawMarketEvent::BookTicker { s, b, a }) => StreamMessage::Update {
            symbol: s,
            update: LineUpdate::Book(BookUpdate::new(b, a)),
        },
        Ok(RawMarketEvent::DepthUpdate { s, first_update_id, u, b, a, transaction_time }) => StreamMessage::Update {
            symbol: s.clone(),
            update: LineUpdate::Depth(DepthUpdate {
                symbol: s,
                first_update_id,
                last_update_id: u,
                bids: b,
                asks: a,
                timestamp: transaction_time,
            }),
        },
        // other event kinds are not subscribed to
        Err(_) => return Ok(None),
    };
    Ok(Some(message))
}

#[derive(Debug, Deserialize)]
struct RawStreamBalance {
    a: String,
    cw: Decimal,
}

#[derive(Debug, Deserialize)]
struct RawStreamPosition {
    s: String,
    ps: PositionSide,
    pa: Decimal,
    ep: Decimal,
    mt: String,
    iw: Decimal,
}

#[derive(Debug, Deserialize)]
#[allow(non_snake_case)]
struct RawAccountData {
    B: Vec<RawStreamBalance>,
    P: Vec<RawStreamPosition>,
}

#[derive(Debug, Deserialize)]
struct RawAccountConfig {
    s: String,
    l: u32,
}

#[derive(Debug, Deserialize)]
#[allow(non_snake_case)]
struct RawStreamOrder {
    i: i64,
    c: String,
    s: String,
    X: OrderStatus,
    ot: OrderType,
    S: OrderSide,
    ps: PositionSide,
    q: Decimal,
    ap: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "e")]
enum RawUserEvent {
    #[serde(rename = "ACCOUNT_UPDATE")]
    AccountUpdate { a: RawAccountData },
    #[serde(rename = "ACCOUNT_CONFIG_UPDATE")]
    AccountConfigUpdate {
        #[serde(default)]
        ac: Option<RawAccountConfig>,
    },
    #[serde(rename = "ORDER_TRADE_UPDATE")]
    OrderTradeUpdate {
        #[serde(rename = "T")]
        transaction_time: i64,
        o: RawStreamOrder,
    },
}

pub fn parse_user_message(text: &str) -> Result<Option<UserStreamEvent>, ExchangeError> {
    let value: Value = serde_json::from_str(text)?;
    if value.get("e").is_none() {
        return Ok(None);
    }

    let event = match serde_json::from_value::<RawUserEvent>(value) {
        Ok(RawUserEvent::AccountUpdate { a }) => {
            let assets: HashMap<_, _> = a
                .B
                .into_iter()
                .map(|b| {
                    let balance = AccountBalance {
                        asset: b.a.clone(),
                        wallet_balance: remove_exponent(b.cw),
                    };
                    (b.a, balance)
                })
                .collect();
            let positions = a
                .P
                .into_iter()
                .map(|p| AccountPosition {
                    symbol: p.s,
                    side: p.ps,
                    quantity: remove_exponent(p.pa.abs()),
                    entry_price: remove_exponent(p.ep),
                    isolated: p.mt == "isolated",
                    margin: remove_exponent(p.iw.abs()),
                })
                .collect();
            UserStreamEvent::AccountUpdate(Account { assets, positions })
        }
        Ok(RawUserEvent::AccountConfigUpdate { ac: Some(ac) }) => UserStreamEvent::AccountConfigUpdate(AccountConfig {
            symbol: ac.s,
            leverage: ac.l,
        }),
        // multi-assets mode changes carry no symbol config
        Ok(RawUserEvent::AccountConfigUpdate { ac: None }) => return Ok(None),
        Ok(RawUserEvent::OrderTradeUpdate { transaction_time, o }) => UserStreamEvent::OrderTradeUpdate(Order {
            id: o.i,
            client_order_id: o.c,
            position_id: None,
            symbol: o.s,
            status: o.X,
            order_type: o.ot,
            side: o.S,
            position_side: o.ps,
            quantity: remove_exponent(o.q),
            entry_price: remove_exponent(o.ap),
            context: None,
            timestamp: transaction_time,
        }),
        Err(_) => return Ok(None),
    };
    Ok(Some(event))
}
