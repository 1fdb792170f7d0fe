use std::collections::BTreeMap;

use log::info;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::models::{BookUpdate, Contract, OrderSide, PositionSide, RulesError};

pub type OrderContext = BTreeMap<String, String>;

pub fn reason(text: impl Into<String>) -> OrderContext {
    BTreeMap::from([("reason".to_string(), text.into())])
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaceOrder {
    pub contract: Contract,
    pub position_side: PositionSide,
    pub order_side: OrderSide,
    pub quantity: Decimal,
    pub context: Option<OrderContext>,
}

/// Delays `next` until price reverses by `callback_rate` from its best level.
#[derive(Debug, Clone, PartialEq)]
pub struct TrailingStop {
    pub contract: Contract,
    pub price: BookUpdate,
    pub order_side: OrderSide,
    pub callback_rate: Decimal,
    pub next: PlaceOrder,
}

impl TrailingStop {
    pub fn new(
        contract: Contract,
        price: BookUpdate,
        order_side: OrderSide,
        callback_rate: Decimal,
        next: PlaceOrder,
    ) -> Result<Self, RulesError> {
        if callback_rate <= Decimal::ZERO || callback_rate > dec!(0.02) {
            return Err(RulesError::TrailingCallbackRate(callback_rate));
        }
        Ok(Self {
            contract,
            price,
            order_side,
            callback_rate,
            next,
        })
    }

    fn stop_size(&self) -> Decimal {
        match self.order_side {
            OrderSide::Buy => self.price.bid * self.callback_rate,
            OrderSide::Sell => self.price.ask * self.callback_rate,
        }
    }

    pub fn stop_price(&self) -> Decimal {
        match self.order_side {
            OrderSide::Buy => self.price.bid + self.stop_size(),
            OrderSide::Sell => self.price.ask - self.stop_size(),
        }
    }

    /// Moves the anchor on a new extreme; returns true once the stop is hit.
    pub fn update(&mut self, price: &BookUpdate) -> bool {
        let precision = self.contract.price_decimals;
        match self.order_side {
            OrderSide::Buy => {
                if price.bid < self.price.bid {
                    self.price = price.clone();
                    info!(
                        "New low observed: Updating stop loss to {}",
                        self.stop_price().round_dp(precision)
                    );
                } else if price.bid >= self.stop_price() {
                    info!(
                        "Buy triggered | Price: {} | Stop loss: {}",
                        price.bid.round_dp(precision),
                        self.stop_price().round_dp(precision)
                    );
                    return true;
                }
            }
            OrderSide::Sell => {
                if price.ask > self.price.ask {
                    self.price = price.clone();
                    info!(
                        "New high observed: Updating stop loss to {}",
                        self.stop_price().round_dp(precision)
                    );
                } else if price.ask <= self.stop_price() {
                    info!(
                        "Sell triggered | Price: {} | Stop loss: {}",
                        price.ask.round_dp(precision),
                        self.stop_price().round_dp(precision)
                    );
                    return true;
                }
            }
        }
        false
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    PlaceOrder(PlaceOrder),
    TrailingStop(TrailingStop),
}

impl Command {
    pub fn symbol(&self) -> &str {
        match self {
            Command::PlaceOrder(command) => &command.contract.symbol,
            Command::TrailingStop(command) => &command.contract.symbol,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trailing(order_side: OrderSide, bid: Decimal, ask: Decimal) -> TrailingStop {
        let contract = Contract::new("BTCUSDT", "BTC", "USDT", 2, 3, dec!(5));
        let next = PlaceOrder {
            contract: contract.clone(),
            position_side: PositionSide::Long,
            order_side,
            quantity: dec!(0.01),
            context: None,
        };
        TrailingStop::new(contract, BookUpdate::new(bid, ask), order_side, dec!(0.01), next).unwrap()
    }

    #[test]
    fn test_buy_follows_lows_and_triggers_on_rebound() {
        let mut stop = trailing(OrderSide::Buy, dec!(100), dec!(101));
        assert_eq!(stop.stop_price(), dec!(101));

        assert!(!stop.update(&BookUpdate::new(dec!(90), dec!(91))));
        assert_eq!(stop.stop_price(), dec!(90.9));

        assert!(!stop.update(&BookUpdate::new(dec!(90.5), dec!(91))));
        assert!(stop.update(&BookUpdate::new(dec!(90.9), dec!(91))));
    }

    #[test]
    fn test_sell_follows_highs_and_triggers_on_drop() {
        let mut stop = trailing(OrderSide::Sell, dec!(99), dec!(100));
        assert_eq!(stop.stop_price(), dec!(99));

        assert!(!stop.update(&BookUpdate::new(dec!(109), dec!(110))));
        assert_eq!(stop.stop_price(), dec!(108.9));

        assert!(!stop.update(&BookUpdate::new(dec!(109), dec!(109.5))));
        assert!(stop.update(&BookUpdate::new(dec!(108), dec!(108.9))));
    }

    #[test]
    fn test_callback_rate_bounds() {
        let contract = Contract::new("BTCUSDT", "BTC", "USDT", 2, 3, dec!(5));
        let next = PlaceOrder {
            contract: contract.clone(),
            position_side: PositionSide::Long,
            order_side: OrderSide::Buy,
            quantity: dec!(1),
            context: None,
        };
        let book = BookUpdate::new(dec!(1), dec!(1));
        assert!(TrailingStop::new(contract.clone(), book.clone(), OrderSide::Buy, dec!(0.021), next.clone()).is_err());
        assert!(TrailingStop::new(contract, book, OrderSide::Buy, Decimal::ZERO, next).is_err());
    }
}
