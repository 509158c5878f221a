use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;
use uuid::Uuid;

use super::{
    dto::{CreateOrderRequest, DetailResponse, OrderResponse, UpdateOrderRequest},
    services,
};
use crate::{
    auth::extractors::AuthUser,
    error::AppError,
    filters::{OrderFilter, OrderQuery},
    state::AppState,
};

pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/orders", get(list_orders).post(create_order))
        .route("/orders/user-orders", get(user_orders))
        .route(
            "/orders/:id",
            get(get_order)
                .put(update_order)
                .patch(update_order)
                .delete(delete_order),
        )
        .route("/orders/:id/purchase", post(purchase_order))
        .route("/orders/:id/cancel", post(cancel_order))
}

#[instrument(skip(state))]
pub async fn list_orders(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Query(q): Query<OrderQuery>,
) -> Result<Json<Vec<OrderResponse>>, AppError> {
    let filter = OrderFilter::try_from(q)?;
    let orders = services::list_orders(state.orders.as_ref(), &caller, &filter).await?;
    Ok(Json(orders))
}

#[instrument(skip(state))]
pub async fn user_orders(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
) -> Result<Json<Vec<OrderResponse>>, AppError> {
    Ok(Json(services::user_orders(state.orders.as_ref(), &caller).await?))
}

#[instrument(skip(state, payload))]
pub async fn create_order(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderResponse>), AppError> {
    let order = services::create_order(state.orders.as_ref(), &caller, payload).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

#[instrument(skip(state))]
pub async fn get_order(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderResponse>, AppError> {
    Ok(Json(services::get_order(state.orders.as_ref(), &caller, id).await?))
}

#[instrument(skip(state, payload))]
pub async fn update_order(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateOrderRequest>,
) -> Result<Json<OrderResponse>, AppError> {
    let order = services::update_order(state.orders.as_ref(), &caller, id, payload).await?;
    Ok(Json(order))
}

#[instrument(skip(state))]
pub async fn delete_order(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    services::delete_order(state.orders.as_ref(), &caller, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state))]
pub async fn purchase_order(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<DetailResponse>, AppError> {
    services::purchase(state.orders.as_ref(), &caller, id).await?;
    Ok(Json(DetailResponse {
        detail: "Order purchased successfully.",
    }))
}

#[instrument(skip(state))]
pub async fn cancel_order(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<DetailResponse>, AppError> {
    services::cancel(state.orders.as_ref(), &caller, id, state.config.cancel_policy).await?;
    Ok(Json(DetailResponse {
        detail: "Order cancelled successfully.",
    }))
}
