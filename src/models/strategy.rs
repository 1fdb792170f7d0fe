use std::collections::HashSet;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::line::BookUpdate;
use super::types::{
    OrderId, OrderSide, PositionId, PositionSide, PositionStatus, StrategyId, Symbol, Timeframe, Timestamp,
};

#[derive(Debug, Error, PartialEq)]
pub enum RulesError {
    #[error("Stop loss rate must be in (0, 1], got {0}")]
    StopLossRate(Decimal),

    #[error("Take profit step {index} is invalid: level={level}; stake={stake}")]
    TakeProfitStep { index: usize, level: Decimal, stake: Decimal },

    #[error("The sum of take profit stakes should be equal to 1, got {0}")]
    TakeProfitStakes(Decimal),

    #[error("Leverage must be in 1..=25, got {0}")]
    Leverage(u32),

    #[error("Trailing callback rate must be in (0, 0.02], got {0}")]
    TrailingCallbackRate(Decimal),

    #[error("Balance stake must be in (0, 1], got {0}")]
    BalanceStake(Decimal),

    #[error("Strategy {0} has no symbols")]
    NoSymbols(String),

    #[error("Condition {0} must keep at least one signal candle")]
    SignalCandles(usize),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopLossConfig {
    pub rate: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TakeProfitStep {
    pub level: Decimal, // 0.01 - 1%, 1 - 100%, 10 - 1000%
    pub stake: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TakeProfitConfig {
    pub steps: Vec<TakeProfitStep>,
}

impl TakeProfitConfig {
    pub fn steps_count(&self) -> usize {
        self.steps.len()
    }

    pub fn validate(&self) -> Result<(), RulesError> {
        for (index, step) in self.steps.iter().enumerate() {
            let level_ok = step.level > Decimal::ZERO && step.level <= dec!(10);
            let stake_ok = step.stake > Decimal::ZERO && step.stake <= Decimal::ONE;
            if !level_ok || !stake_ok {
                return Err(RulesError::TakeProfitStep {
                    index,
                    level: step.level,
                    stake: step.stake,
                });
            }
        }

        let total: Decimal = self.steps.iter().map(|s| s.stake).sum();
        if total != Decimal::ONE {
            return Err(RulesError::TakeProfitStakes(total));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub symbol: Symbol,
    pub side: PositionSide,
    pub strategy_id: StrategyId,
    pub status: PositionStatus,
    pub quantity: Decimal,
    pub total_quantity: Decimal,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub orders: Vec<OrderId>,
    pub create_timestamp: Timestamp,
    #[serde(default)]
    pub update_timestamp: Option<Timestamp>,
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    pub fn is_closed(&self) -> bool {
        self.status == PositionStatus::Closed
    }

    pub fn entry_side(&self) -> OrderSide {
        if self.side == PositionSide::Long {
            OrderSide::Buy
        } else {
            OrderSide::Sell
        }
    }

    pub fn exit_side(&self) -> OrderSide {
        self.entry_side().opposite()
    }

    pub fn calc_pnl(&self, book: &BookUpdate) -> Decimal {
        match self.side {
            PositionSide::Long => (book.bid - self.entry_price) * self.quantity,
            PositionSide::Short => (self.entry_price - book.ask) * self.quantity,
            PositionSide::Both => Decimal::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparison {
    Eq,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl Comparison {
    pub fn compare(&self, left: Option<Decimal>, right: Decimal) -> bool {
        let Some(left) = left else {
            return false;
        };
        match self {
            Comparison::Eq => left == right,
            Comparison::Lt => left < right,
            Comparison::Lte => left <= right,
            Comparison::Gt => left > right,
            Comparison::Gte => left >= right,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorParameter {
    pub field: String,
    pub value: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueCondition {
    pub field: String,
    pub condition: Comparison,
    pub value: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub position_side: PositionSide,
    pub order_side: OrderSide,
    pub timeframe: Timeframe,
    pub indicator: String,
    #[serde(default)]
    pub parameters: Vec<IndicatorParameter>,
    pub conditions: Vec<ValueCondition>,
    #[serde(default = "default_signal_candles")]
    pub save_signal_candles: usize,
}

fn default_signal_candles() -> usize {
    1
}

/// User-defined trading rules driving one strategy instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyRules {
    pub id: StrategyId,
    pub name: String,
    #[serde(default)]
    pub binance_testnet: bool,
    pub binance_public_key: String,
    pub binance_private_key: String,
    #[serde(default)]
    pub trailing: bool,
    #[serde(default)]
    pub trailing_callback_rate: Option<Decimal>,
    #[serde(default)]
    pub leverage: Option<u32>,
    pub balance_stake: Decimal,
    pub symbols: Vec<Symbol>,
    pub conditions: Vec<Condition>,
    pub conditions_trigger_count: usize,
    #[serde(default)]
    pub stop_loss: Option<StopLossConfig>,
    #[serde(default)]
    pub take_profit: Option<TakeProfitConfig>,
}

impl StrategyRules {
    pub fn validate(&self) -> Result<(), RulesError> {
        if self.symbols.is_empty() {
            return Err(RulesError::NoSymbols(self.name.clone()));
        }
        if self.balance_stake <= Decimal::ZERO || self.balance_stake > Decimal::ONE {
            return Err(RulesError::BalanceStake(self.balance_stake));
        }
        if let Some(leverage) = self.leverage {
            if !(1..=25).contains(&leverage) {
                return Err(RulesError::Leverage(leverage));
            }
        }
        if let Some(rate) = self.trailing_callback_rate {
            if rate <= Decimal::ZERO || rate > dec!(0.02) {
                return Err(RulesError::TrailingCallbackRate(rate));
            }
        }
        if let Some(stop_loss) = &self.stop_loss {
            if stop_loss.rate <= Decimal::ZERO || stop_loss.rate > Decimal::ONE {
                return Err(RulesError::StopLossRate(stop_loss.rate));
            }
        }
        if let Some(take_profit) = &self.take_profit {
            take_profit.validate()?;
        }
        if let Some(index) = self.conditions.iter().position(|c| c.save_signal_candles == 0) {
            return Err(RulesError::SignalCandles(index));
        }
        Ok(())
    }

    pub fn leverage(&self) -> u32 {
        self.leverage.unwrap_or(1)
    }

    pub fn has_symbol(&self, symbol: &str) -> bool {
        self.symbols.iter().any(|s| s == symbol)
    }

    /// Distinct timeframes the conditions read candles from.
    pub fn timeframes(&self) -> HashSet<Timeframe> {
        self.conditions.iter().map(|c| c.timeframe).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rules_json() -> serde_json::Value {
        json!({
            "id": "7179559cb2724ff9b86f9cada8387748",
            "name": "scalp",
            "binance_testnet": true,
            "binance_public_key": "public",
            "binance_private_key": "private",
            "trailing": true,
            "balance_stake": "0.1",
            "symbols": ["BTCUSDT", "ETHUSDT"],
            "conditions": [{
                "position_side": "LONG",
                "order_side": "BUY",
                "timeframe": "5m",
                "indicator": "rsi",
                "parameters": [{"field": "period", "value": 14}],
                "conditions": [{"field": "rsi", "condition": "lte", "value": 35}],
                "save_signal_candles": 2
            }],
            "conditions_trigger_count": 1,
            "stop_loss": {"rate": "0.025"},
            "take_profit": {"steps": [
                {"level": "0.005", "stake": "0.2"},
                {"level": "0.010", "stake": "0.4"},
                {"level": "0.015", "stake": "0.4"}
            ]}
        })
    }

    #[test]
    fn test_rules_parse_and_validate() {
        let rules: StrategyRules = serde_json::from_value(rules_json()).unwrap();
        assert!(rules.validate().is_ok());
        assert_eq!(rules.leverage(), 1);
        assert_eq!(rules.conditions[0].timeframe, Timeframe::M5);
        assert_eq!(rules.conditions[0].conditions[0].condition, Comparison::Lte);
    }

    #[test]
    fn test_take_profit_stakes_must_sum_to_one() {
        let mut value = rules_json();
        value["take_profit"]["steps"][2]["stake"] = json!("0.3");
        let rules: StrategyRules = serde_json::from_value(value).unwrap();
        assert_eq!(rules.validate(), Err(RulesError::TakeProfitStakes(dec!(0.9))));
    }

    #[test]
    fn test_trailing_rate_bounds() {
        let mut value = rules_json();
        value["trailing_callback_rate"] = json!("0.05");
        let rules: StrategyRules = serde_json::from_value(value).unwrap();
        assert_eq!(rules.validate(), Err(RulesError::TrailingCallbackRate(dec!(0.05))));
    }

    #[test]
    fn test_comparison_ignores_missing_values() {
        assert!(!Comparison::Lte.compare(None, dec!(35)));
        assert!(Comparison::Lte.compare(Some(dec!(35)), dec!(35)));
        assert!(!Comparison::Gt.compare(Some(dec!(35)), dec!(35)));
    }

    #[test]
    fn test_position_sides() {
        let position = Position {
            id: "p".into(),
            symbol: "BTCUSDT".into(),
            side: PositionSide::Short,
            strategy_id: "s".into(),
            status: PositionStatus::Open,
            quantity: dec!(1),
            total_quantity: dec!(1),
            entry_price: dec!(100),
            exit_price: Decimal::ZERO,
            orders: vec![],
            create_timestamp: 0,
            update_timestamp: None,
        };
        assert_eq!(position.entry_side(), OrderSide::Sell);
        assert_eq!(position.exit_side(), OrderSide::Buy);
        assert_eq!(position.calc_pnl(&BookUpdate::new(dec!(89), dec!(90))), dec!(10));
    }
}
