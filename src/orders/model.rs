//! Order aggregate and its lifecycle rules.
//!
//! ```text
//! Pending ──purchase──▶ Completed
//!    │  ╲
//!    │   ╲──update──▶ Confirmed ──purchase──▶ Completed
//!    ╰──cancel──▶ Cancelled (then deleted under the default policy)
//! ```
//!
//! Completed and Cancelled are final: once there, the status no longer
//! changes except that a Completed order may still be cancelled. Every
//! transition is preceded by the owner-or-admin check.

use std::{fmt, str::FromStr};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{auth::extractors::Caller, error::AppError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OrderStatus {
    #[default]
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Confirmed => "Confirmed",
            Self::Completed => "Completed",
            Self::Cancelled => "Cancelled",
        }
    }

    pub fn is_final(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

pub const ALREADY_PURCHASED: &str = "This order has already been purchased.";
pub const ALREADY_CANCELED: &str = "This order has already been canceled.";
pub const ORDER_IS_FINAL: &str = "This order can no longer be changed.";

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(Self::Pending),
            "Confirmed" => Ok(Self::Confirmed),
            "Completed" => Ok(Self::Completed),
            "Cancelled" => Ok(Self::Cancelled),
            other => anyhow::bail!("unknown order status: {other}"),
        }
    }
}

/// Row as stored; `status` is plain text in the table.
#[derive(Debug, Clone, FromRow)]
pub struct OrderRow {
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub created_at: OffsetDateTime,
    pub status: String,
    pub total_price: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub created_at: OffsetDateTime,
    pub status: OrderStatus,
    /// Total captured when the item list was last written.
    pub total_price: Option<Decimal>,
}

impl TryFrom<OrderRow> for Order {
    type Error = anyhow::Error;

    fn try_from(r: OrderRow) -> Result<Self, Self::Error> {
        Ok(Self {
            order_id: r.order_id,
            user_id: r.user_id,
            created_at: r.created_at,
            status: r.status.parse()?,
            total_price: r.total_price,
        })
    }
}

/// An order item joined with the product it points at.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct OrderLine {
    pub product_id: i64,
    pub product_name: String,
    pub product_price: Decimal,
    pub quantity: i32,
}

/// An item as submitted by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct NewItem {
    #[serde(alias = "product_id")]
    pub product: i64,
    pub quantity: i32,
}

/// Statuses a client may set directly; cancelling goes through `cancel`.
pub fn settable_status(status: OrderStatus) -> Result<OrderStatus, AppError> {
    if status == OrderStatus::Cancelled {
        return Err(AppError::validation(
            "status",
            "Use the cancel action to cancel an order.",
        ));
    }
    Ok(status)
}

pub fn validate_items(items: &[NewItem]) -> Result<(), AppError> {
    if items.iter().any(|i| i.quantity <= 0) {
        return Err(AppError::validation(
            "items",
            "Quantity must be a positive integer.",
        ));
    }
    Ok(())
}

impl Order {
    pub fn new(user_id: Uuid, status: OrderStatus) -> Self {
        Self {
            order_id: Uuid::new_v4(),
            user_id,
            created_at: OffsetDateTime::now_utc(),
            status,
            total_price: None,
        }
    }

    pub fn authorize(&self, caller: &Caller) -> Result<(), AppError> {
        if caller.owns(self.user_id) || caller.is_admin {
            Ok(())
        } else {
            Err(AppError::Forbidden("Permission denied.".into()))
        }
    }

    /// Direct status edit from an update request. Setting the current
    /// status again is a no-op, even on a final order.
    pub fn change_status(&mut self, status: OrderStatus) -> Result<(), AppError> {
        let status = settable_status(status)?;
        if status == self.status {
            return Ok(());
        }
        if self.status.is_final() {
            return Err(AppError::Conflict(ORDER_IS_FINAL.into()));
        }
        self.status = status;
        Ok(())
    }

    pub fn purchase(&mut self, caller: &Caller) -> Result<(), AppError> {
        self.authorize(caller)?;
        match self.status {
            OrderStatus::Completed => Err(AppError::Conflict(ALREADY_PURCHASED.into())),
            OrderStatus::Cancelled => Err(AppError::Conflict(ALREADY_CANCELED.into())),
            _ => {
                self.status = OrderStatus::Completed;
                Ok(())
            }
        }
    }

    pub fn cancel(&mut self, caller: &Caller) -> Result<(), AppError> {
        self.authorize(caller)?;
        if self.status == OrderStatus::Cancelled {
            return Err(AppError::Conflict(ALREADY_CANCELED.into()));
        }
        self.status = OrderStatus::Cancelled;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caller(id: Uuid, is_admin: bool) -> Caller {
        Caller { id, is_admin }
    }

    #[test]
    fn status_text_round_trip() {
        for s in [
            OrderStatus::Pending,
            OrderStatus::Confirmed,
            OrderStatus::Completed,
            OrderStatus::Cancelled,
        ] {
            assert_eq!(s.as_str().parse::<OrderStatus>().unwrap(), s);
        }
        assert!("pending".parse::<OrderStatus>().is_err());
        assert_eq!(OrderStatus::default(), OrderStatus::Pending);
    }

    #[test]
    fn owner_can_purchase_once() {
        let owner = Uuid::new_v4();
        let mut order = Order::new(owner, OrderStatus::Pending);
        order.purchase(&caller(owner, false)).unwrap();
        assert_eq!(order.status, OrderStatus::Completed);

        let err = order.purchase(&caller(owner, false)).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(order.status, OrderStatus::Completed);
    }

    #[test]
    fn stranger_cannot_purchase_or_cancel() {
        let mut order = Order::new(Uuid::new_v4(), OrderStatus::Pending);
        let stranger = caller(Uuid::new_v4(), false);
        assert!(matches!(order.purchase(&stranger), Err(AppError::Forbidden(_))));
        assert!(matches!(order.cancel(&stranger), Err(AppError::Forbidden(_))));
        assert_eq!(order.status, OrderStatus::Pending);
    }

    #[test]
    fn admin_can_act_on_any_order() {
        let mut order = Order::new(Uuid::new_v4(), OrderStatus::Confirmed);
        order.purchase(&caller(Uuid::new_v4(), true)).unwrap();
        assert_eq!(order.status, OrderStatus::Completed);
    }

    #[test]
    fn permission_is_checked_before_state() {
        let mut order = Order::new(Uuid::new_v4(), OrderStatus::Completed);
        let err = order.purchase(&caller(Uuid::new_v4(), false)).unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[test]
    fn cancelling_twice_conflicts() {
        let owner = Uuid::new_v4();
        let mut order = Order::new(owner, OrderStatus::Completed);
        order.cancel(&caller(owner, false)).unwrap();
        assert!(order.status.is_final());
        assert!(matches!(order.cancel(&caller(owner, false)), Err(AppError::Conflict(_))));
    }

    #[test]
    fn final_orders_keep_their_status() {
        let mut done = Order::new(Uuid::new_v4(), OrderStatus::Completed);
        let err = done.change_status(OrderStatus::Pending).unwrap_err();
        assert!(matches!(err, AppError::Conflict(ref m) if m == ORDER_IS_FINAL));
        assert_eq!(done.status, OrderStatus::Completed);
        done.change_status(OrderStatus::Completed).unwrap();

        let mut gone = Order::new(Uuid::new_v4(), OrderStatus::Cancelled);
        assert!(matches!(
            gone.change_status(OrderStatus::Confirmed),
            Err(AppError::Conflict(_))
        ));
        let owner = Caller {
            id: gone.user_id,
            is_admin: false,
        };
        assert!(matches!(gone.purchase(&owner), Err(AppError::Conflict(_))));
        assert_eq!(gone.status, OrderStatus::Cancelled);
    }

    #[test]
    fn open_orders_move_freely_but_not_to_cancelled() {
        let mut order = Order::new(Uuid::new_v4(), OrderStatus::Pending);
        order.change_status(OrderStatus::Confirmed).unwrap();
        order.change_status(OrderStatus::Pending).unwrap();
        assert!(matches!(
            order.change_status(OrderStatus::Cancelled),
            Err(AppError::Validation { field: "status", .. })
        ));
        assert_eq!(order.status, OrderStatus::Pending);
    }

    #[test]
    fn non_positive_quantity_is_invalid() {
        let ok = [NewItem { product: 1, quantity: 1 }];
        assert!(validate_items(&ok).is_ok());
        let bad = [
            NewItem { product: 1, quantity: 2 },
            NewItem { product: 2, quantity: 0 },
        ];
        assert!(matches!(
            validate_items(&bad),
            Err(AppError::Validation { field: "items", .. })
        ));
    }

    #[test]
    fn order_ids_are_random() {
        let user = Uuid::new_v4();
        assert_ne!(
            Order::new(user, OrderStatus::Pending).order_id,
            Order::new(user, OrderStatus::Pending).order_id
        );
    }
}
