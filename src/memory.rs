//! In-process stores used by tests. One `MemoryStore` backs products, files
//! and orders together so the cross-table rules of the Postgres schema hold:
//! one live order per user, items and files must point at a known product,
//! and a deleted product takes its files and order items with it.

use std::{cmp::Ordering, collections::HashMap};

use anyhow::anyhow;
use async_trait::async_trait;
use rust_decimal::Decimal;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
    config::CancelPolicy,
    error::AppError,
    files::repo::{FileRecord, FileStore},
    filters::{OrderFilter, ProductFilter},
    orders::{
        model::{NewItem, Order, OrderLine, OrderStatus, ORDER_IS_FINAL},
        pricing::order_total,
        store::{OrderStore, Scope, ONE_ORDER_AT_A_TIME},
    },
    products::repo::{Product, ProductChanges, ProductStore},
};

const DEFAULT_STOCK: i32 = 10;

fn admits(scope: Scope, order: &Order) -> bool {
    match scope {
        Scope::All => true,
        Scope::Owner(id) => order.user_id == id,
    }
}

fn by_column(a: &Product, b: &Product, column: &str) -> Ordering {
    match column {
        "name" => a.name.cmp(&b.name),
        "price" => a.price.cmp(&b.price),
        _ => a.stock.cmp(&b.stock),
    }
}

#[derive(Default)]
struct Inner {
    products: Vec<Product>,
    files: Vec<FileRecord>,
    next_file_id: i64,
    orders: Vec<Order>,
    items: HashMap<Uuid, Vec<NewItem>>,
    fail_deletes: bool,
}

impl Inner {
    fn product(&self, id: i64) -> Option<&Product> {
        self.products.iter().find(|p| p.id == id)
    }

    fn lines(&self, order_id: Uuid) -> Vec<OrderLine> {
        self.items
            .get(&order_id)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|i| {
                        self.product(i.product).map(|p| OrderLine {
                            product_id: i.product,
                            product_name: p.name.clone(),
                            product_price: p.price,
                            quantity: i.quantity,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn check_products(&self, items: &[NewItem]) -> Result<(), AppError> {
        if items.iter().all(|i| self.product(i.product).is_some()) {
            Ok(())
        } else {
            Err(AppError::NotFound("product"))
        }
    }

    /// Another order of `user_id` that is still live.
    fn live_order_besides(&self, user_id: Uuid, order_id: Uuid) -> bool {
        self.orders.iter().any(|o| {
            o.user_id == user_id && o.order_id != order_id && o.status != OrderStatus::Cancelled
        })
    }

    fn position(&self, order_id: Uuid) -> Option<usize> {
        self.orders.iter().position(|o| o.order_id == order_id)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn with_products(
        products: impl IntoIterator<Item = (i64, &'static str, Decimal)>,
    ) -> Self {
        let products = products
            .into_iter()
            .map(|(id, name, price)| Product {
                id,
                name: name.to_string(),
                description: String::new(),
                price,
                stock: DEFAULT_STOCK,
            })
            .collect();
        Self {
            inner: Mutex::new(Inner {
                products,
                ..Default::default()
            }),
        }
    }

    pub async fn set_price(&self, product_id: i64, price: Decimal) {
        let mut inner = self.inner.lock().await;
        if let Some(p) = inner.products.iter_mut().find(|p| p.id == product_id) {
            p.price = price;
        }
    }

    /// Makes every later `OrderStore::delete` fail.
    pub async fn fail_deletes(&self) {
        self.inner.lock().await.fail_deletes = true;
    }

    pub async fn order_count(&self) -> usize {
        self.inner.lock().await.orders.len()
    }

    pub async fn item_count(&self) -> usize {
        self.inner.lock().await.items.values().map(Vec::len).sum()
    }

    pub async fn file_count(&self) -> usize {
        self.inner.lock().await.files.len()
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn has_open_order(&self, user_id: Uuid) -> Result<bool, AppError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .orders
            .iter()
            .any(|o| o.user_id == user_id && o.status != OrderStatus::Cancelled))
    }

    async fn insert(&self, order: &Order, items: &[NewItem]) -> Result<Order, AppError> {
        let mut inner = self.inner.lock().await;
        if order.status != OrderStatus::Cancelled
            && inner.live_order_besides(order.user_id, order.order_id)
        {
            return Err(AppError::Conflict(ONE_ORDER_AT_A_TIME.into()));
        }
        inner.check_products(items)?;

        inner.items.insert(order.order_id, items.to_vec());
        let mut stored = order.clone();
        stored.total_price = Some(order_total(&inner.lines(order.order_id)));
        inner.orders.push(stored.clone());
        Ok(stored)
    }

    async fn find(&self, scope: Scope, order_id: Uuid) -> Result<Option<Order>, AppError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .orders
            .iter()
            .find(|o| o.order_id == order_id && admits(scope, o))
            .cloned())
    }

    async fn list(&self, scope: Scope, filter: &OrderFilter) -> Result<Vec<Order>, AppError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .orders
            .iter()
            .filter(|o| admits(scope, o) && filter.matches(o.status.as_str(), o.created_at))
            .cloned()
            .collect())
    }

    async fn lines(&self, order_id: Uuid) -> Result<Vec<OrderLine>, AppError> {
        Ok(self.inner.lock().await.lines(order_id))
    }

    async fn update(
        &self,
        order_id: Uuid,
        status: Option<OrderStatus>,
        items: Option<&[NewItem]>,
    ) -> Result<Order, AppError> {
        let mut inner = self.inner.lock().await;
        let idx = inner.position(order_id).ok_or(AppError::NotFound("order"))?;
        let current = inner.orders[idx].clone();

        if let Some(status) = status {
            if status != current.status && current.status.is_final() {
                return Err(AppError::Conflict(ORDER_IS_FINAL.into()));
            }
            if status != OrderStatus::Cancelled
                && inner.live_order_besides(current.user_id, order_id)
            {
                return Err(AppError::Conflict(ONE_ORDER_AT_A_TIME.into()));
            }
        }
        if let Some(items) = items {
            inner.check_products(items)?;
        }

        if let Some(status) = status {
            inner.orders[idx].status = status;
        }
        if let Some(items) = items {
            inner.items.insert(order_id, items.to_vec());
            let total = order_total(&inner.lines(order_id));
            inner.orders[idx].total_price = Some(total);
        }
        Ok(inner.orders[idx].clone())
    }

    async fn purchase(&self, order_id: Uuid) -> Result<bool, AppError> {
        let mut inner = self.inner.lock().await;
        match inner.orders.iter_mut().find(|o| o.order_id == order_id) {
            Some(order) if !order.status.is_final() => {
                order.status = OrderStatus::Completed;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn cancel(&self, order_id: Uuid, policy: CancelPolicy) -> Result<bool, AppError> {
        let mut inner = self.inner.lock().await;
        let Some(idx) = inner.position(order_id) else {
            return Ok(false);
        };
        if inner.orders[idx].status == OrderStatus::Cancelled {
            return Ok(false);
        }
        inner.orders[idx].status = OrderStatus::Cancelled;
        if policy == CancelPolicy::Delete {
            inner.orders.remove(idx);
            inner.items.remove(&order_id);
        }
        Ok(true)
    }

    async fn delete(&self, order_id: Uuid) -> Result<bool, AppError> {
        let mut inner = self.inner.lock().await;
        if inner.fail_deletes {
            return Err(anyhow!("delete rejected by test store").into());
        }
        let before = inner.orders.len();
        inner.orders.retain(|o| o.order_id != order_id);
        inner.items.remove(&order_id);
        Ok(inner.orders.len() < before)
    }
}

#[async_trait]
impl ProductStore for MemoryStore {
    async fn list(&self, filter: &ProductFilter) -> anyhow::Result<Vec<Product>> {
        let inner = self.inner.lock().await;
        let mut out: Vec<Product> = inner
            .products
            .iter()
            .filter(|p| p.in_stock() && filter.matches(&p.name, &p.description, p.price))
            .cloned()
            .collect();
        out.sort_by_key(|p| p.id);
        if let Some(o) = filter.ordering {
            out.sort_by(|a, b| {
                let ord = by_column(a, b, o.column);
                if o.descending {
                    ord.reverse()
                } else {
                    ord
                }
            });
        }
        Ok(out)
    }

    async fn list_all(&self) -> anyhow::Result<Vec<Product>> {
        let mut out = self.inner.lock().await.products.clone();
        out.sort_by_key(|p| p.id);
        Ok(out)
    }

    async fn find(&self, id: i64) -> anyhow::Result<Option<Product>> {
        Ok(self.inner.lock().await.product(id).cloned())
    }

    async fn exists(&self, id: i64) -> anyhow::Result<bool> {
        Ok(self.inner.lock().await.product(id).is_some())
    }

    async fn insert(
        &self,
        name: &str,
        description: &str,
        price: Decimal,
        stock: i32,
    ) -> anyhow::Result<Product> {
        let mut inner = self.inner.lock().await;
        let id = inner.products.iter().map(|p| p.id).max().unwrap_or(0) + 1;
        let product = Product {
            id,
            name: name.to_string(),
            description: description.to_string(),
            price,
            stock,
        };
        inner.products.push(product.clone());
        Ok(product)
    }

    async fn update(&self, id: i64, changes: &ProductChanges) -> anyhow::Result<Option<Product>> {
        let mut inner = self.inner.lock().await;
        let Some(p) = inner.products.iter_mut().find(|p| p.id == id) else {
            return Ok(None);
        };
        if let Some(name) = &changes.name {
            p.name = name.clone();
        }
        if let Some(description) = &changes.description {
            p.description = description.clone();
        }
        if let Some(price) = changes.price {
            p.price = price;
        }
        if let Some(stock) = changes.stock {
            p.stock = stock;
        }
        Ok(Some(p.clone()))
    }

    async fn delete(&self, id: i64) -> anyhow::Result<bool> {
        let mut inner = self.inner.lock().await;
        let before = inner.products.len();
        inner.products.retain(|p| p.id != id);
        if inner.products.len() == before {
            return Ok(false);
        }
        inner.files.retain(|f| f.product_id != Some(id));
        for items in inner.items.values_mut() {
            items.retain(|i| i.product != id);
        }
        Ok(true)
    }

    async fn max_price(&self) -> anyhow::Result<Option<Decimal>> {
        Ok(self.inner.lock().await.products.iter().map(|p| p.price).max())
    }
}

#[async_trait]
impl FileStore for MemoryStore {
    async fn insert_file(
        &self,
        product_id: i64,
        s3_key: &str,
        content_type: &str,
        size_bytes: i64,
    ) -> anyhow::Result<FileRecord> {
        let mut inner = self.inner.lock().await;
        if inner.product(product_id).is_none() {
            return Err(anyhow!("files.product_id references a missing product"));
        }
        inner.next_file_id += 1;
        let record = FileRecord {
            id: inner.next_file_id,
            product_id: Some(product_id),
            s3_key: s3_key.to_string(),
            content_type: content_type.to_string(),
            size_bytes,
            uploaded_at: OffsetDateTime::now_utc(),
        };
        inner.files.push(record.clone());
        Ok(record)
    }

    async fn list_by_product(&self, product_id: i64) -> anyhow::Result<Vec<FileRecord>> {
        self.list_by_products(&[product_id]).await
    }

    async fn list_by_products(&self, product_ids: &[i64]) -> anyhow::Result<Vec<FileRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .files
            .iter()
            .filter(|f| f.product_id.is_some_and(|id| product_ids.contains(&id)))
            .cloned()
            .collect())
    }

    async fn find_file(&self, product_id: i64, id: i64) -> anyhow::Result<Option<FileRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .files
            .iter()
            .find(|f| f.id == id && f.product_id == Some(product_id))
            .cloned())
    }

    async fn replace_object(
        &self,
        product_id: i64,
        id: i64,
        s3_key: &str,
        content_type: &str,
        size_bytes: i64,
    ) -> anyhow::Result<Option<FileRecord>> {
        let mut inner = self.inner.lock().await;
        let Some(f) = inner
            .files
            .iter_mut()
            .find(|f| f.id == id && f.product_id == Some(product_id))
        else {
            return Ok(None);
        };
        f.s3_key = s3_key.to_string();
        f.content_type = content_type.to_string();
        f.size_bytes = size_bytes;
        Ok(Some(f.clone()))
    }

    async fn delete_file(&self, product_id: i64, id: i64) -> anyhow::Result<Option<String>> {
        let mut inner = self.inner.lock().await;
        let Some(idx) = inner
            .files
            .iter()
            .position(|f| f.id == id && f.product_id == Some(product_id))
        else {
            return Ok(None);
        };
        Ok(Some(inner.files.remove(idx).s3_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn place(
        store: &MemoryStore,
        user: Uuid,
        status: OrderStatus,
        items: &[NewItem],
    ) -> Order {
        OrderStore::insert(store, &Order::new(user, status), items)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn update_cannot_revive_a_second_live_order() {
        let store = MemoryStore::default();
        let user = Uuid::new_v4();
        let live = place(&store, user, OrderStatus::Pending, &[]).await;
        let retained = place(&store, user, OrderStatus::Cancelled, &[]).await;

        let err = OrderStore::update(&store, retained.order_id, Some(OrderStatus::Pending), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let filter = OrderFilter::default();
        let orders = OrderStore::list(&store, Scope::Owner(user), &filter).await.unwrap();
        let live_count = orders
            .iter()
            .filter(|o| o.status != OrderStatus::Cancelled)
            .count();
        assert_eq!(live_count, 1);
        assert_eq!(orders[0].order_id, live.order_id);
    }

    #[tokio::test]
    async fn live_orders_of_other_users_do_not_block_updates() {
        let store = MemoryStore::default();
        place(&store, Uuid::new_v4(), OrderStatus::Pending, &[]).await;
        let mine = place(&store, Uuid::new_v4(), OrderStatus::Pending, &[]).await;

        let updated = OrderStore::update(&store, mine.order_id, Some(OrderStatus::Confirmed), None)
            .await
            .unwrap();
        assert_eq!(updated.status, OrderStatus::Confirmed);
    }

    #[tokio::test]
    async fn deleting_a_product_cascades() {
        let store = MemoryStore::with_products([(1, "Mug", Decimal::new(500, 2))]);
        let item = NewItem {
            product: 1,
            quantity: 2,
        };
        let order = place(&store, Uuid::new_v4(), OrderStatus::Pending, &[item]).await;
        store.insert_file(1, "products/1/a.png", "image/png", 3).await.unwrap();

        assert!(ProductStore::delete(&store, 1).await.unwrap());
        assert_eq!(store.file_count().await, 0);
        assert!(OrderStore::lines(&store, order.order_id).await.unwrap().is_empty());
        assert!(store.insert_file(1, "products/1/b.png", "image/png", 3).await.is_err());
    }
}
