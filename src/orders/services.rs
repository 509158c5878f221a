use tracing::info;
use uuid::Uuid;

use super::{
    dto::{CreateOrderRequest, OrderResponse, UpdateOrderRequest},
    model::{
        settable_status, validate_items, Order, OrderStatus, ALREADY_CANCELED,
        ALREADY_PURCHASED,
    },
    store::{OrderStore, Scope, ONE_ORDER_AT_A_TIME},
};
use crate::{
    auth::extractors::Caller, config::CancelPolicy, error::AppError, filters::OrderFilter,
};

async fn respond(store: &dyn OrderStore, order: Order) -> Result<OrderResponse, AppError> {
    let lines = store.lines(order.order_id).await?;
    Ok(OrderResponse::new(order, &lines))
}

async fn respond_all(
    store: &dyn OrderStore,
    orders: Vec<Order>,
) -> Result<Vec<OrderResponse>, AppError> {
    let mut out = Vec::with_capacity(orders.len());
    for order in orders {
        out.push(respond(store, order).await?);
    }
    Ok(out)
}

async fn find_scoped(
    store: &dyn OrderStore,
    caller: &Caller,
    id: Uuid,
) -> Result<Order, AppError> {
    store
        .find(Scope::for_caller(caller), id)
        .await?
        .ok_or(AppError::NotFound("order"))
}

/// Purchase and cancel look the order up unscoped so that a stranger gets
/// 403 rather than 404.
async fn find_any(store: &dyn OrderStore, id: Uuid) -> Result<Order, AppError> {
    store
        .find(Scope::All, id)
        .await?
        .ok_or(AppError::NotFound("order"))
}

/// Reason a conditional purchase matched no row: someone else finished or
/// cancelled the order after we read it.
async fn purchase_lost(store: &dyn OrderStore, id: Uuid) -> AppError {
    match store.find(Scope::All, id).await {
        Ok(Some(o)) if o.status == OrderStatus::Cancelled => {
            AppError::Conflict(ALREADY_CANCELED.into())
        }
        Ok(Some(_)) => AppError::Conflict(ALREADY_PURCHASED.into()),
        Ok(None) => AppError::NotFound("order"),
        Err(e) => e,
    }
}

pub async fn create_order(
    store: &dyn OrderStore,
    caller: &Caller,
    req: CreateOrderRequest,
) -> Result<OrderResponse, AppError> {
    validate_items(&req.items)?;
    let status = settable_status(req.status.unwrap_or_default())?;

    if store.has_open_order(caller.id).await? {
        return Err(AppError::Conflict(ONE_ORDER_AT_A_TIME.into()));
    }

    let order = Order::new(caller.id, status);
    let order = store.insert(&order, &req.items).await?;
    info!(order_id = %order.order_id, user_id = %caller.id, "order created");
    respond(store, order).await
}

pub async fn list_orders(
    store: &dyn OrderStore,
    caller: &Caller,
    filter: &OrderFilter,
) -> Result<Vec<OrderResponse>, AppError> {
    let orders = store.list(Scope::for_caller(caller), filter).await?;
    respond_all(store, orders).await
}

/// Always the caller's own orders, admin or not.
pub async fn user_orders(
    store: &dyn OrderStore,
    caller: &Caller,
) -> Result<Vec<OrderResponse>, AppError> {
    let orders = store
        .list(Scope::Owner(caller.id), &OrderFilter::default())
        .await?;
    respond_all(store, orders).await
}

pub async fn get_order(
    store: &dyn OrderStore,
    caller: &Caller,
    id: Uuid,
) -> Result<OrderResponse, AppError> {
    let order = find_scoped(store, caller, id).await?;
    respond(store, order).await
}

pub async fn update_order(
    store: &dyn OrderStore,
    caller: &Caller,
    id: Uuid,
    req: UpdateOrderRequest,
) -> Result<OrderResponse, AppError> {
    if let Some(items) = &req.items {
        validate_items(items)?;
    }

    let mut current = find_scoped(store, caller, id).await?;
    if let Some(status) = req.status {
        current.change_status(status)?;
    }
    let order = store
        .update(current.order_id, req.status, req.items.as_deref())
        .await?;
    info!(order_id = %order.order_id, replaced_items = req.items.is_some(), "order updated");
    respond(store, order).await
}

pub async fn delete_order(
    store: &dyn OrderStore,
    caller: &Caller,
    id: Uuid,
) -> Result<(), AppError> {
    let order = find_scoped(store, caller, id).await?;
    if !store.delete(order.order_id).await? {
        return Err(AppError::NotFound("order"));
    }
    info!(order_id = %id, "order deleted");
    Ok(())
}

pub async fn purchase(store: &dyn OrderStore, caller: &Caller, id: Uuid) -> Result<(), AppError> {
    let mut order = find_any(store, id).await?;
    order.purchase(caller)?;
    if !store.purchase(order.order_id).await? {
        return Err(purchase_lost(store, id).await);
    }
    info!(order_id = %id, by = %caller.id, "order purchased");
    Ok(())
}

pub async fn cancel(
    store: &dyn OrderStore,
    caller: &Caller,
    id: Uuid,
    policy: CancelPolicy,
) -> Result<(), AppError> {
    let mut order = find_any(store, id).await?;
    order.cancel(caller)?;
    if !store.cancel(order.order_id, policy).await? {
        return Err(AppError::Conflict(ALREADY_CANCELED.into()));
    }
    info!(order_id = %id, by = %caller.id, ?policy, "order cancelled");
    Ok(())
}
