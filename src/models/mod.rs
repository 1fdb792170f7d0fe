mod exchange;
mod line;
mod strategy;
mod types;

pub use exchange::{
    Account, AccountBalance, AccountConfig, AccountPosition, Candle, Contract, DepthSnapshot, FundingRate, Order,
    OrderRequest,
};
pub use line::{BookUpdate, DepthUpdate, LineAction, LineMessage, LinePayload, LineUpdate, TradeUpdate, UpdateLog};
pub use strategy::{
    Comparison, Condition, IndicatorParameter, Position, RulesError, StopLossConfig, StrategyRules,
    TakeProfitConfig, TakeProfitStep, ValueCondition,
};
pub use types::{
    Asset, ClientOrderId, MarginType, OrderId, OrderSide, OrderStatus, OrderType, PositionId, PositionSide,
    PositionStatus, StrategyId, StreamEntity, Symbol, TickType, TimeInForce, Timeframe, Timestamp,
    UserStreamEntity,
};
