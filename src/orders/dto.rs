use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{
    model::{NewItem, Order, OrderLine, OrderStatus},
    pricing::{item_subtotal, order_total},
};

#[derive(Debug, Default, Deserialize)]
pub struct CreateOrderRequest {
    #[serde(default)]
    pub items: Vec<NewItem>,
    pub status: Option<OrderStatus>,
}

/// Absent `items` leaves the item list untouched; present replaces it.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateOrderRequest {
    pub items: Option<Vec<NewItem>>,
    pub status: Option<OrderStatus>,
}

#[derive(Debug, Serialize)]
pub struct OrderItemResponse {
    pub product: i64,
    pub product_name: String,
    pub product_price: Decimal,
    pub quantity: i32,
    pub item_subtotal: Decimal,
}

impl From<&OrderLine> for OrderItemResponse {
    fn from(line: &OrderLine) -> Self {
        Self {
            product: line.product_id,
            product_name: line.product_name.clone(),
            product_price: line.product_price,
            quantity: line.quantity,
            item_subtotal: item_subtotal(line),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub order_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub user: Uuid,
    pub status: OrderStatus,
    pub items: Vec<OrderItemResponse>,
    /// Derived from current product prices.
    pub total_price: Decimal,
    /// Stored when the item list was last written.
    pub snapshot_total: Option<Decimal>,
}

impl OrderResponse {
    pub fn new(order: Order, lines: &[OrderLine]) -> Self {
        Self {
            order_id: order.order_id,
            created_at: order.created_at,
            user: order.user_id,
            status: order.status,
            items: lines.iter().map(OrderItemResponse::from).collect(),
            total_price: order_total(lines),
            snapshot_total: order.total_price,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DetailResponse {
    pub detail: &'static str,
}
