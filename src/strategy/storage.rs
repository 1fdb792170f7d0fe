use std::collections::HashMap;

use crate::models::{Order, OrderId, OrderSide, Position, PositionSide, Symbol};

/// Open positions and their orders for one strategy, per symbol.
#[derive(Debug, Default)]
pub struct LocalStorage {
    positions: HashMap<Symbol, HashMap<PositionSide, Position>>,
    orders: HashMap<Symbol, HashMap<OrderId, Order>>,
}

impl LocalStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces what is known about `symbol`.
    pub fn set_snapshot(&mut self, symbol: &str, positions: Vec<Position>, orders: Vec<Order>) {
        self.positions
            .insert(symbol.to_string(), positions.into_iter().map(|p| (p.side, p)).collect());
        self.orders
            .insert(symbol.to_string(), orders.into_iter().map(|o| (o.id, o)).collect());
    }

    pub fn add_position(&mut self, position: Position) {
        self.positions
            .entry(position.symbol.clone())
            .or_default()
            .insert(position.side, position);
    }

    pub fn drop_position(&mut self, symbol: &str, side: PositionSide) {
        if let Some(positions) = self.positions.get_mut(symbol) {
            positions.remove(&side);
        }
    }

    pub fn get_position(&self, symbol: &str, side: PositionSide) -> Option<&Position> {
        self.positions.get(symbol).and_then(|positions| positions.get(&side))
    }

    pub fn get_order(&self, symbol: &str, id: OrderId) -> Option<&Order> {
        self.orders.get(symbol).and_then(|orders| orders.get(&id))
    }

    /// Orders of a position, optionally only one side of them.
    pub fn get_orders(&self, symbol: &str, position_id: &str, side: Option<OrderSide>) -> Vec<&Order> {
        let Some(orders) = self.orders.get(symbol) else {
            return Vec::new();
        };
        let mut found: Vec<&Order> = orders
            .values()
            .filter(|o| o.position_id.as_deref() == Some(position_id))
            .filter(|o| side.map_or(true, |side| o.side == side))
            .collect();
        found.sort_by_key(|o| (o.timestamp, o.id));
        found
    }

    pub fn add_order(&mut self, order: Order) {
        self.orders.entry(order.symbol.clone()).or_default().insert(order.id, order);
    }

    pub fn drop_orders(&mut self, symbol: &str, position_id: &str) {
        if let Some(orders) = self.orders.get_mut(symbol) {
            orders.retain(|_, o| o.position_id.as_deref() != Some(position_id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OrderStatus, OrderType, PositionStatus};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn order(id: OrderId, position_id: &str, side: OrderSide) -> Order {
        Order {
            id,
            client_order_id: format!("c{}", id),
            position_id: Some(position_id.to_string()),
            symbol: "BTCUSDT".into(),
            status: OrderStatus::Filled,
            order_type: OrderType::Market,
            side,
            position_side: PositionSide::Long,
            quantity: dec!(1),
            entry_price: dec!(10),
            context: None,
            timestamp: id,
        }
    }

    fn position(id: &str, side: PositionSide) -> Position {
        Position {
            id: id.to_string(),
            symbol: "BTCUSDT".into(),
            side,
            strategy_id: "s".into(),
            status: PositionStatus::Open,
            quantity: Decimal::ZERO,
            total_quantity: Decimal::ZERO,
            entry_price: Decimal::ZERO,
            exit_price: Decimal::ZERO,
            orders: vec![],
            create_timestamp: 0,
            update_timestamp: None,
        }
    }

    #[test]
    fn test_orders_by_position_and_side() {
        let mut storage = LocalStorage::new();
        storage.add_order(order(1, "p1", OrderSide::Buy));
        storage.add_order(order(2, "p1", OrderSide::Sell));
        storage.add_order(order(3, "p2", OrderSide::Buy));

        assert_eq!(storage.get_orders("BTCUSDT", "p1", None).len(), 2);
        let sells = storage.get_orders("BTCUSDT", "p1", Some(OrderSide::Sell));
        assert_eq!(sells.len(), 1);
        assert_eq!(sells[0].id, 2);
        assert!(storage.get_orders("ETHUSDT", "p1", None).is_empty());

        storage.drop_orders("BTCUSDT", "p1");
        assert!(storage.get_order("BTCUSDT", 1).is_none());
        assert!(storage.get_order("BTCUSDT", 3).is_some());
    }

    #[test]
    fn test_positions_per_side() {
        let mut storage = LocalStorage::new();
        storage.add_position(position("long", PositionSide::Long));
        storage.add_position(position("short", PositionSide::Short));
        assert_eq!(storage.get_position("BTCUSDT", PositionSide::Long).unwrap().id, "long");

        storage.drop_position("BTCUSDT", PositionSide::Long);
        assert!(storage.get_position("BTCUSDT", PositionSide::Long).is_none());

        storage.set_snapshot("BTCUSDT", vec![position("new", PositionSide::Long)], vec![]);
        assert!(storage.get_position("BTCUSDT", PositionSide::Short).is_none());
        assert_eq!(storage.get_position("BTCUSDT", PositionSide::Long).unwrap().id, "new");
    }
}
