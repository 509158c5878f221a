pub mod dto;
pub mod handlers;
pub mod model;
pub mod pg;
pub mod pricing;
pub mod services;
pub mod store;

use crate::state::AppState;
use axum::Router;

pub fn router() -> Router<AppState> {
    handlers::order_routes()
}
