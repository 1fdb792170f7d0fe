use std::collections::{BTreeMap, HashMap};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::line::BookUpdate;
use super::types::{
    Asset, ClientOrderId, OrderId, OrderSide, OrderStatus, OrderType, PositionId, PositionSide, Symbol,
    TimeInForce, Timestamp,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub asset: Asset,
    pub wallet_balance: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountPosition {
    pub symbol: Symbol,
    pub side: PositionSide,
    pub quantity: Decimal, // always absolute
    pub entry_price: Decimal,
    pub isolated: bool,
    pub margin: Decimal,
}

impl AccountPosition {
    pub fn calc_pnl(&self, book: &BookUpdate, quantity: Option<Decimal>) -> Option<Decimal> {
        let quantity = quantity.unwrap_or(self.quantity);
        if quantity > self.quantity {
            return None;
        }
        Some(match self.side {
            PositionSide::Long => (book.bid - self.entry_price) * quantity,
            PositionSide::Short => (self.entry_price - book.ask) * quantity,
            PositionSide::Both => Decimal::ZERO,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub assets: HashMap<Asset, AccountBalance>,
    pub positions: Vec<AccountPosition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountConfig {
    pub symbol: Symbol,
    pub leverage: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: Timestamp,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Candle {
    /// Flat candle carrying the previous close, used to fill gaps.
    pub fn flat(timestamp: Timestamp, price: Decimal) -> Self {
        Self {
            timestamp,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: Decimal::ZERO,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DepthSnapshot {
    pub last_update_id: i64,
    pub bids: Vec<[Decimal; 2]>,
    pub asks: Vec<[Decimal; 2]>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    pub symbol: Symbol,
    pub base_asset: Asset,
    pub quote_asset: Asset,
    pub price_decimals: u32,
    pub quantity_decimals: u32,
    pub tick_size: Decimal,
    pub lot_size: Decimal,
    pub min_notional: Decimal, // minimal price * quantity accepted for an order
}

impl Contract {
    pub fn new(
        symbol: &str,
        base_asset: &str,
        quote_asset: &str,
        price_decimals: u32,
        quantity_decimals: u32,
        min_notional: Decimal,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            base_asset: base_asset.to_string(),
            quote_asset: quote_asset.to_string(),
            price_decimals,
            quantity_decimals,
            tick_size: Decimal::new(1, price_decimals),
            lot_size: Decimal::new(1, quantity_decimals),
            min_notional: min_notional.normalize(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundingRate {
    pub symbol: Symbol,
    pub mark_price: Decimal,
    pub index_price: Decimal,
    pub last_funding_rate_pct: Decimal,
    pub next_funding_timestamp: Timestamp,
    pub interest_rate: Decimal,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub client_order_id: ClientOrderId,
    #[serde(default)]
    pub position_id: Option<PositionId>,
    pub symbol: Symbol,
    pub status: OrderStatus,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub side: OrderSide,
    pub position_side: PositionSide,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    #[serde(default)]
    pub context: Option<BTreeMap<String, String>>,
    pub timestamp: Timestamp,
}

impl Order {
    pub fn is_filled(&self) -> bool {
        self.status.is_filled()
    }

    pub fn is_processed(&self) -> bool {
        self.status.is_processed()
    }
}

/// Parameters of a new order as the strategy layer sees them.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub contract: Contract,
    pub client_order_id: ClientOrderId,
    pub order_type: OrderType,
    pub side: OrderSide,
    pub position_side: PositionSide,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub time_in_force: Option<TimeInForce>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_contract_steps_from_precision() {
        let contract = Contract::new("BTCUSDT", "BTC", "USDT", 2, 3, dec!(5.000));
        assert_eq!(contract.tick_size, dec!(0.01));
        assert_eq!(contract.lot_size, dec!(0.001));
        assert_eq!(contract.min_notional.to_string(), "5");
    }

    #[test]
    fn test_account_position_pnl() {
        let position = AccountPosition {
            symbol: "BTCUSDT".into(),
            side: PositionSide::Short,
            quantity: dec!(2),
            entry_price: dec!(100),
            isolated: true,
            margin: dec!(10),
        };
        let book = BookUpdate::new(dec!(94), dec!(95));
        assert_eq!(position.calc_pnl(&book, None), Some(dec!(10)));
        assert_eq!(position.calc_pnl(&book, Some(dec!(1))), Some(dec!(5)));
        assert_eq!(position.calc_pnl(&book, Some(dec!(3))), None);
    }
}
