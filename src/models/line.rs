use rust_decimal::Decimal;
use serde::{Deserialize, Serialize, Serializer};

use super::types::{OrderSide, StreamEntity, Symbol, Timestamp};

/// Decimals travel as plain strings without trailing zeros.
fn plain_decimal<S: Serializer>(value: &Decimal, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.normalize().to_string())
}

fn plain_levels<S: Serializer>(levels: &[[Decimal; 2]], serializer: S) -> Result<S::Ok, S::Error> {
    let encoded: Vec<[String; 2]> = levels
        .iter()
        .map(|[price, quantity]| [price.normalize().to_string(), quantity.normalize().to_string()])
        .collect();
    encoded.serialize(serializer)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeUpdate {
    #[serde(rename = "p", alias = "price", serialize_with = "plain_decimal")]
    pub price: Decimal,
    #[serde(rename = "q", alias = "quantity", serialize_with = "plain_decimal")]
    pub quantity: Decimal,
    #[serde(rename = "t", alias = "timestamp")]
    pub timestamp: Timestamp,
    #[serde(rename = "m", alias = "is_buyer_maker")]
    pub is_buyer_maker: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookUpdate {
    #[serde(rename = "b", alias = "bid", serialize_with = "plain_decimal")]
    pub bid: Decimal,
    #[serde(rename = "a", alias = "ask", serialize_with = "plain_decimal")]
    pub ask: Decimal,
}

impl BookUpdate {
    pub fn new(bid: Decimal, ask: Decimal) -> Self {
        Self { bid, ask }
    }

    /// Price a market order on `side` would be matched against.
    pub fn price(&self, side: OrderSide) -> Decimal {
        match side {
            OrderSide::Buy => self.bid,
            OrderSide::Sell => self.ask,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthUpdate {
    #[serde(rename = "s", alias = "symbol")]
    pub symbol: Symbol,
    #[serde(rename = "U", alias = "first_update_id")]
    pub first_update_id: i64,
    #[serde(rename = "u", alias = "last_update_id")]
    pub last_update_id: i64,
    #[serde(rename = "b", alias = "bids", serialize_with = "plain_levels")]
    pub bids: Vec<[Decimal; 2]>,
    #[serde(rename = "a", alias = "asks", serialize_with = "plain_levels")]
    pub asks: Vec<[Decimal; 2]>,
    #[serde(rename = "t", alias = "timestamp")]
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LineUpdate {
    Trade(TradeUpdate),
    Book(BookUpdate),
    Depth(DepthUpdate),
}

impl LineUpdate {
    pub fn entity(&self) -> StreamEntity {
        match self {
            LineUpdate::Trade(_) => StreamEntity::Trade,
            LineUpdate::Book(_) => StreamEntity::Book,
            LineUpdate::Depth(_) => StreamEntity::Depth,
        }
    }

    pub fn encode(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            LineUpdate::Trade(m) => serde_json::to_value(m),
            LineUpdate::Book(m) => serde_json::to_value(m),
            LineUpdate::Depth(m) => serde_json::to_value(m),
        }
    }

    pub fn decode(entity: StreamEntity, data: serde_json::Value) -> Result<Self, serde_json::Error> {
        Ok(match entity {
            StreamEntity::Trade => LineUpdate::Trade(serde_json::from_value(data)?),
            StreamEntity::Book => LineUpdate::Book(serde_json::from_value(data)?),
            StreamEntity::Depth => LineUpdate::Depth(serde_json::from_value(data)?),
        })
    }
}

/// One line update as persisted by the line logger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateLog {
    #[serde(rename = "s")]
    pub symbol: Symbol,
    #[serde(rename = "e")]
    pub entity: StreamEntity,
    #[serde(rename = "t")]
    pub timestamp: Timestamp,
    #[serde(rename = "d")]
    pub data: serde_json::Value,
}

impl UpdateLog {
    pub fn new(symbol: Symbol, update: &LineUpdate, timestamp: Timestamp) -> Result<Self, serde_json::Error> {
        Ok(Self {
            symbol,
            entity: update.entity(),
            timestamp,
            data: update.encode()?,
        })
    }

    pub fn update(&self) -> Result<LineUpdate, serde_json::Error> {
        LineUpdate::decode(self.entity, self.data.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineAction {
    Update,
    Alive,
    Reset,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinePayload {
    pub entity: StreamEntity,
    pub symbol: Symbol,
    pub data: serde_json::Value,
}

/// Envelope published on the `pubsub_line` exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineMessage {
    pub action: LineAction,
    #[serde(default)]
    pub payload: Option<LinePayload>,
}

impl LineMessage {
    pub fn update(symbol: &str, update: &LineUpdate) -> Result<Self, serde_json::Error> {
        Ok(Self {
            action: LineAction::Update,
            payload: Some(LinePayload {
                entity: update.entity(),
                symbol: symbol.to_string(),
                data: update.encode()?,
            }),
        })
    }

    pub fn alive() -> Self {
        Self { action: LineAction::Alive, payload: None }
    }

    pub fn reset() -> Self {
        Self { action: LineAction::Reset, payload: None }
    }

    pub fn routing_key(&self) -> String {
        match (&self.action, &self.payload) {
            (LineAction::Update, Some(payload)) => format!("{}.{}", payload.symbol, payload.entity),
            (LineAction::Reset, _) => "reset".to_string(),
            _ => "alive".to_string(),
        }
    }
}
