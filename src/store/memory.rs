use std::collections::HashMap;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::RwLock;

use super::{StoreError, TradeStore, UpdateLogQuery, UpdateLogStore};
use crate::models::{Order, OrderId, Position, PositionId, Symbol, UpdateLog};

/// In-process store for replays and tests.
#[derive(Default)]
pub struct MemoryStore {
    orders: RwLock<HashMap<OrderId, Order>>,
    positions: RwLock<HashMap<PositionId, Position>>,
    update_logs: RwLock<Vec<UpdateLog>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn positions(&self) -> Vec<Position> {
        let mut positions: Vec<Position> = self.positions.read().await.values().cloned().collect();
        positions.sort_by_key(|p| p.create_timestamp);
        positions
    }

    pub async fn orders(&self) -> Vec<Order> {
        let mut orders: Vec<Order> = self.orders.read().await.values().cloned().collect();
        orders.sort_by_key(|o| o.timestamp);
        orders
    }
}

#[async_trait]
impl TradeStore for MemoryStore {
    async fn create_order(&self, order: &Order) -> Result<(), StoreError> {
        self.orders.write().await.insert(order.id, order.clone());
        Ok(())
    }

    async fn count_orders(&self, id: OrderId) -> Result<u64, StoreError> {
        Ok(u64::from(self.orders.read().await.contains_key(&id)))
    }

    async fn update_order(&self, order: &Order) -> Result<Order, StoreError> {
        let mut orders = self.orders.write().await;
        let stored = orders
            .get_mut(&order.id)
            .ok_or_else(|| StoreError::NotFound(format!("order id={}", order.id)))?;

        let position_id = order.position_id.clone().or_else(|| stored.position_id.take());
        let context = order.context.clone().or_else(|| stored.context.take());
        *stored = Order {
            position_id,
            context,
            ..order.clone()
        };
        Ok(stored.clone())
    }

    async fn find_orders(&self, ids: &[OrderId]) -> Result<Vec<Order>, StoreError> {
        let orders = self.orders.read().await;
        Ok(ids.iter().filter_map(|id| orders.get(id).cloned()).collect())
    }

    async fn create_position(&self, position: &Position) -> Result<(), StoreError> {
        self.positions.write().await.insert(position.id.clone(), position.clone());
        Ok(())
    }

    async fn update_position(&self, position: &Position) -> Result<(), StoreError> {
        self.positions.write().await.insert(position.id.clone(), position.clone());
        Ok(())
    }

    async fn find_open_positions(&self, strategy_id: &str, symbols: &[Symbol]) -> Result<Vec<Position>, StoreError> {
        Ok(self
            .positions
            .read()
            .await
            .values()
            .filter(|p| p.is_open() && p.strategy_id == strategy_id && symbols.contains(&p.symbol))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl UpdateLogStore for MemoryStore {
    async fn insert_update_logs(&self, logs: Vec<UpdateLog>) -> Result<(), StoreError> {
        self.update_logs.write().await.extend(logs);
        Ok(())
    }

    async fn count_update_logs(&self, query: &UpdateLogQuery) -> Result<u64, StoreError> {
        Ok(self.update_logs.read().await.iter().filter(|log| query.matches(log)).count() as u64)
    }

    async fn stream_update_logs(
        &self,
        query: &UpdateLogQuery,
    ) -> Result<BoxStream<'static, Result<UpdateLog, StoreError>>, StoreError> {
        let mut logs: Vec<UpdateLog> = self
            .update_logs
            .read()
            .await
            .iter()
            .filter(|log| query.matches(log))
            .cloned()
            .collect();
        logs.sort_by_key(|log| log.timestamp);
        Ok(stream::iter(logs.into_iter().map(Ok)).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LineUpdate, OrderSide, OrderStatus, OrderType, PositionSide, TradeUpdate};
    use futures::TryStreamExt;
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;

    fn order(status: OrderStatus) -> Order {
        Order {
            id: 7,
            client_order_id: "c".into(),
            position_id: None,
            symbol: "BTCUSDT".into(),
            status,
            order_type: OrderType::Market,
            side: OrderSide::Buy,
            position_side: PositionSide::Long,
            quantity: dec!(1),
            entry_price: dec!(0),
            context: None,
            timestamp: 1,
        }
    }

    #[tokio::test]
    async fn test_update_order_keeps_stored_context() {
        let store = MemoryStore::new();
        let mut created = order(OrderStatus::New);
        created.context = Some(BTreeMap::from([("reason".to_string(), "signal".to_string())]));
        store.create_order(&created).await.unwrap();
        assert_eq!(store.count_orders(7).await.unwrap(), 1);

        let mut filled = order(OrderStatus::Filled);
        filled.entry_price = dec!(101);
        let stored = store.update_order(&filled).await.unwrap();
        assert_eq!(stored.status, OrderStatus::Filled);
        assert_eq!(stored.entry_price, dec!(101));
        assert_eq!(stored.context, created.context);
    }

    #[tokio::test]
    async fn test_update_logs_are_filtered_and_sorted() {
        let store = MemoryStore::new();
        let update = LineUpdate::Trade(TradeUpdate {
            price: dec!(1),
            quantity: dec!(1),
            timestamp: 0,
            is_buyer_maker: false,
        });
        let logs = vec![
            UpdateLog::new("ETHUSDT".into(), &update, 30).unwrap(),
            UpdateLog::new("BTCUSDT".into(), &update, 20).unwrap(),
            UpdateLog::new("BTCUSDT".into(), &update, 10).unwrap(),
            UpdateLog::new("BTCUSDT".into(), &update, 5).unwrap(),
        ];
        store.insert_update_logs(logs).await.unwrap();

        let query = UpdateLogQuery {
            symbols: vec!["BTCUSDT".into(), "ETHUSDT".into()],
            from: Some(10),
            to: None,
        };
        assert_eq!(store.count_update_logs(&query).await.unwrap(), 3);

        let timestamps: Vec<i64> = store
            .stream_update_logs(&query)
            .await
            .unwrap()
            .map_ok(|log| log.timestamp)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(timestamps, vec![10, 20, 30]);
    }
}
