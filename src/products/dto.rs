use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::repo::Product;
use crate::files::dto::FileResponse;

/// Body for create (all fields required) and update (any subset).
#[derive(Debug, Default, Deserialize)]
pub struct ProductRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<Decimal>,
    pub stock: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct ProductResponse {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub price: Decimal,
    pub stock: i32,
    pub in_stock: bool,
    pub files: Vec<FileResponse>,
}

impl ProductResponse {
    pub fn new(product: Product, files: Vec<FileResponse>) -> Self {
        Self {
            in_stock: product.in_stock(),
            id: product.id,
            name: product.name,
            description: product.description,
            price: product.price,
            stock: product.stock,
            files,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ProductInfo {
    pub products: Vec<ProductResponse>,
    pub count: usize,
    pub max_price: Option<Decimal>,
}
