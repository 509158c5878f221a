use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use tracing::instrument;

use super::{
    dto::{ProductInfo, ProductRequest, ProductResponse},
    services,
};
use crate::{
    auth::extractors::AuthUser,
    error::AppError,
    filters::{ProductFilter, ProductQuery},
    state::AppState,
};

pub fn product_routes() -> Router<AppState> {
    Router::new()
        .route("/products", get(list_products).post(create_product))
        .route("/products/info", get(product_info))
        .route(
            "/products/:id",
            get(get_product)
                .put(update_product)
                .patch(update_product)
                .delete(delete_product),
        )
}

#[instrument(skip(state))]
pub async fn list_products(
    State(state): State<AppState>,
    Query(q): Query<ProductQuery>,
) -> Result<Json<Vec<ProductResponse>>, AppError> {
    let filter = ProductFilter::try_from(q)?;
    Ok(Json(services::list(&state, &filter).await?))
}

#[instrument(skip(state))]
pub async fn product_info(State(state): State<AppState>) -> Result<Json<ProductInfo>, AppError> {
    Ok(Json(services::info(&state).await?))
}

#[instrument(skip(state))]
pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ProductResponse>, AppError> {
    Ok(Json(services::get(&state, id).await?))
}

#[instrument(skip(state, payload))]
pub async fn create_product(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Json(payload): Json<ProductRequest>,
) -> Result<(StatusCode, Json<ProductResponse>), AppError> {
    let product = services::create(&state, &caller, payload).await?;
    Ok((StatusCode::CREATED, Json(product)))
}

#[instrument(skip(state, payload))]
pub async fn update_product(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(id): Path<i64>,
    Json(payload): Json<ProductRequest>,
) -> Result<Json<ProductResponse>, AppError> {
    Ok(Json(services::update(&state, &caller, id, payload).await?))
}

#[instrument(skip(state))]
pub async fn delete_product(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    services::delete(&state, &caller, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
