use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use log::info;
use mongodb::bson::{doc, Bson, Document};
use mongodb::options::{FindOneAndUpdateOptions, FindOptions, IndexOptions, ReturnDocument};
use mongodb::{Client, Collection, Database, IndexModel};

use super::{StoreError, TradeStore, UpdateLogQuery, UpdateLogStore};
use crate::models::{Order, OrderId, Position, PositionStatus, Symbol, UpdateLog};

const DEFAULT_DATABASE: &str = "bot";

const UPDATE_LOGS: &str = "UpdateLogModel";
const ORDERS: &str = "OrderModel";
const POSITIONS: &str = "PositionModel";

fn index(keys: Document, name: &str, unique: bool) -> IndexModel {
    IndexModel::builder()
        .keys(keys)
        .options(IndexOptions::builder().name(name.to_string()).unique(unique).build())
        .build()
}

/// `$set` document with absent optional fields left untouched.
fn present_fields(order: &Order) -> Result<Document, StoreError> {
    let mut fields = mongodb::bson::to_document(order)?;
    let nulls: Vec<String> = fields
        .iter()
        .filter(|(_, value)| matches!(value, Bson::Null))
        .map(|(key, _)| key.clone())
        .collect();
    for key in nulls {
        fields.remove(&key);
    }
    Ok(fields)
}

fn update_log_filter(query: &UpdateLogQuery) -> Document {
    let mut filter = doc! { "s": { "$in": query.symbols.clone() } };
    let mut range = Document::new();
    if let Some(from) = query.from {
        range.insert("$gte", from);
    }
    if let Some(to) = query.to {
        range.insert("$lte", to);
    }
    if !range.is_empty() {
        filter.insert("t", range);
    }
    filter
}

/// MongoDB persistence. Decimals are stored as strings.
#[derive(Clone)]
pub struct MongoStore {
    db: Database,
}

impl MongoStore {
    pub async fn connect(uri: &str) -> Result<Self, StoreError> {
        let client = Client::with_uri_str(uri).await?;
        let db = client
            .default_database()
            .unwrap_or_else(|| client.database(DEFAULT_DATABASE));

        db.run_command(doc! { "ping": 1 }, None).await?;
        info!("Connected to MongoDB database \"{}\"", db.name());

        let store = Self { db };
        store.create_indexes().await?;
        Ok(store)
    }

    async fn create_indexes(&self) -> Result<(), StoreError> {
        self.update_logs()
            .create_indexes(vec![index(doc! { "s": 1, "t": 1 }, "symbol__timestamp__index", false)], None)
            .await?;

        self.orders()
            .create_indexes(
                vec![
                    index(doc! { "id": 1 }, "id__index", true),
                    index(doc! { "symbol": 1, "timestamp": 1 }, "symbol__timestamp__index", false),
                    index(
                        doc! { "symbol": 1, "side": 1, "timestamp": 1 },
                        "symbol__side__timestamp__index",
                        false,
                    ),
                ],
                None,
            )
            .await?;

        self.positions()
            .create_indexes(
                vec![
                    index(doc! { "id": 1 }, "id__index", true),
                    index(
                        doc! { "symbol": 1, "strategy_id": 1, "status": 1, "timestamp": 1 },
                        "symbol__strategy_id__status__timestamp__index",
                        false,
                    ),
                ],
                None,
            )
            .await?;
        Ok(())
    }

    fn update_logs(&self) -> Collection<UpdateLog> {
        self.db.collection(UPDATE_LOGS)
    }

    fn orders(&self) -> Collection<Order> {
        self.db.collection(ORDERS)
    }

    fn positions(&self) -> Collection<Position> {
        self.db.collection(POSITIONS)
    }
}

#[async_trait]
impl TradeStore for MongoStore {
    async fn create_order(&self, order: &Order) -> Result<(), StoreError> {
        self.orders().insert_one(order, None).await?;
        Ok(())
    }

    async fn count_orders(&self, id: OrderId) -> Result<u64, StoreError> {
        Ok(self.orders().count_documents(doc! { "id": id }, None).await?)
    }

    async fn update_order(&self, order: &Order) -> Result<Order, StoreError> {
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();
        let fields = present_fields(order)?;
        self.orders()
            .find_one_and_update(doc! { "id": order.id }, doc! { "$set": fields }, options)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("order id={}", order.id)))
    }

    async fn find_orders(&self, ids: &[OrderId]) -> Result<Vec<Order>, StoreError> {
        let cursor = self.orders().find(doc! { "id": { "$in": ids.to_vec() } }, None).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn create_position(&self, position: &Position) -> Result<(), StoreError> {
        self.positions().insert_one(position, None).await?;
        Ok(())
    }

    async fn update_position(&self, position: &Position) -> Result<(), StoreError> {
        self.positions()
            .replace_one(doc! { "id": position.id.as_str() }, position, None)
            .await?;
        Ok(())
    }

    async fn find_open_positions(&self, strategy_id: &str, symbols: &[Symbol]) -> Result<Vec<Position>, StoreError> {
        let filter = doc! {
            "symbol": { "$in": symbols.to_vec() },
            "strategy_id": strategy_id,
            "status": PositionStatus::Open.as_str(),
        };
        let cursor = self.positions().find(filter, None).await?;
        Ok(cursor.try_collect().await?)
    }
}

#[async_trait]
impl UpdateLogStore for MongoStore {
    async fn insert_update_logs(&self, logs: Vec<UpdateLog>) -> Result<(), StoreError> {
        if logs.is_empty() {
            return Ok(());
        }
        self.update_logs().insert_many(logs, None).await?;
        Ok(())
    }

    async fn count_update_logs(&self, query: &UpdateLogQuery) -> Result<u64, StoreError> {
        Ok(self
            .update_logs()
            .count_documents(update_log_filter(query), None)
            .await?)
    }

    async fn stream_update_logs(
        &self,
        query: &UpdateLogQuery,
    ) -> Result<BoxStream<'static, Result<UpdateLog, StoreError>>, StoreError> {
        let options = FindOptions::builder().sort(doc! { "t": 1 }).build();
        let cursor = self.update_logs().find(update_log_filter(query), options).await?;
        Ok(cursor.map_err(StoreError::from).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OrderSide, OrderStatus, OrderType, PositionSide};
    use rust_decimal_macros::dec;

    #[test]
    fn test_update_log_filter_range() {
        let query = UpdateLogQuery {
            symbols: vec!["BTCUSDT".into()],
            from: Some(10),
            to: None,
        };
        assert_eq!(
            update_log_filter(&query),
            doc! { "s": { "$in": ["BTCUSDT"] }, "t": { "$gte": 10i64 } }
        );
    }

    #[test]
    fn test_present_fields_skip_missing_values() {
        let order = Order {
            id: 1,
            client_order_id: "c".into(),
            position_id: None,
            symbol: "BTCUSDT".into(),
            status: OrderStatus::Filled,
            order_type: OrderType::Market,
            side: OrderSide::Buy,
            position_side: PositionSide::Long,
            quantity: dec!(0.5),
            entry_price: dec!(100.1),
            context: None,
            timestamp: 5,
        };
        let fields = present_fields(&order).unwrap();
        assert!(!fields.contains_key("position_id"));
        assert!(!fields.contains_key("context"));
        assert_eq!(fields.get_str("entry_price").unwrap(), "100.1");
        assert_eq!(fields.get_str("type").unwrap(), "MARKET");
    }
}
