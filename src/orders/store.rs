use async_trait::async_trait;
use uuid::Uuid;

use super::model::{NewItem, Order, OrderLine, OrderStatus};
use crate::{
    auth::extractors::Caller, config::CancelPolicy, error::AppError, filters::OrderFilter,
};

pub const ONE_ORDER_AT_A_TIME: &str = "You can only create one order at a time.";

/// Which orders a lookup may see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    All,
    Owner(Uuid),
}

impl Scope {
    /// Admins see every order, everyone else only their own.
    pub fn for_caller(caller: &Caller) -> Self {
        if caller.is_admin {
            Self::All
        } else {
            Self::Owner(caller.id)
        }
    }
}

/// Persistence for orders and their items.
///
/// Writes that touch the item list are atomic: either the order row and
/// every item are stored, or nothing is.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// True if the user holds an order that is not Cancelled.
    async fn has_open_order(&self, user_id: Uuid) -> Result<bool, AppError>;

    /// Stores `order` with `items` and snapshots the total.
    /// A second live order for the same user is a `Conflict`; an unknown
    /// product is `NotFound("product")`.
    async fn insert(&self, order: &Order, items: &[NewItem]) -> Result<Order, AppError>;

    async fn find(&self, scope: Scope, order_id: Uuid) -> Result<Option<Order>, AppError>;

    /// Oldest first.
    async fn list(&self, scope: Scope, filter: &OrderFilter) -> Result<Vec<Order>, AppError>;

    async fn lines(&self, order_id: Uuid) -> Result<Vec<OrderLine>, AppError>;

    /// Applies `status` and, if given, replaces the whole item list.
    /// Changing the status of a Completed or Cancelled order is a `Conflict`.
    async fn update(
        &self,
        order_id: Uuid,
        status: Option<OrderStatus>,
        items: Option<&[NewItem]>,
    ) -> Result<Order, AppError>;

    /// Marks the order Completed unless it already is Completed or
    /// Cancelled. False when nothing changed.
    async fn purchase(&self, order_id: Uuid) -> Result<bool, AppError>;

    /// Marks the order Cancelled and, under `CancelPolicy::Delete`, removes
    /// it, as one unit. False when it was already Cancelled or is gone.
    async fn cancel(&self, order_id: Uuid, policy: CancelPolicy) -> Result<bool, AppError>;

    async fn delete(&self, order_id: Uuid) -> Result<bool, AppError>;
}
