use std::collections::HashMap;

use rust_decimal::Decimal;
use tracing::info;

use super::{
    dto::{ProductInfo, ProductRequest, ProductResponse},
    hooks::ProductChange,
    repo::{Product, ProductChanges},
};
use crate::{
    auth::extractors::Caller,
    error::AppError,
    files::services as files_services,
    filters::ProductFilter,
    state::AppState,
};

/// NUMERIC(10, 2)
const PRICE_MAX_SCALE: u32 = 2;
const PRICE_MAX_INTEGER_DIGITS: u32 = 8;
const NAME_MAX_LEN: usize = 255;

pub fn validate_price(price: Decimal) -> Result<Decimal, AppError> {
    if price.is_sign_negative() && !price.is_zero() {
        return Err(AppError::validation("price", "Price must be a positive number."));
    }
    if price.normalize().scale() > PRICE_MAX_SCALE {
        return Err(AppError::validation(
            "price",
            format!("Ensure that there are no more than {PRICE_MAX_SCALE} decimal places."),
        ));
    }
    if price.trunc() >= Decimal::from(10_i64.pow(PRICE_MAX_INTEGER_DIGITS)) {
        return Err(AppError::validation(
            "price",
            format!(
                "Ensure that there are no more than {PRICE_MAX_INTEGER_DIGITS} digits \
                 before the decimal point."
            ),
        ));
    }
    Ok(price)
}

fn validate_stock(stock: i32) -> Result<i32, AppError> {
    if stock < 0 {
        return Err(AppError::validation(
            "stock",
            "Ensure this value is greater than or equal to 0.",
        ));
    }
    Ok(stock)
}

fn validate_name(name: &str) -> Result<String, AppError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::validation("name", "This field may not be blank."));
    }
    if name.chars().count() > NAME_MAX_LEN {
        return Err(AppError::validation(
            "name",
            format!("Ensure this field has no more than {NAME_MAX_LEN} characters."),
        ));
    }
    Ok(name.to_string())
}

/// Validates whichever fields are present.
pub fn validate_changes(req: ProductRequest) -> Result<ProductChanges, AppError> {
    Ok(ProductChanges {
        name: req.name.as_deref().map(validate_name).transpose()?,
        description: req.description,
        price: req.price.map(validate_price).transpose()?,
        stock: req.stock.map(validate_stock).transpose()?,
    })
}

fn required<T>(value: Option<T>, field: &'static str) -> Result<T, AppError> {
    value.ok_or_else(|| AppError::validation(field, "This field is required."))
}

/// Create needs name, price and stock; description defaults to empty.
pub fn validate_new(req: ProductRequest) -> Result<ProductChanges, AppError> {
    let changes = validate_changes(req)?;
    Ok(ProductChanges {
        name: Some(required(changes.name, "name")?),
        description: Some(changes.description.unwrap_or_default()),
        price: Some(required(changes.price, "price")?),
        stock: Some(required(changes.stock, "stock")?),
    })
}

async fn with_files(
    st: &AppState,
    products: Vec<Product>,
) -> Result<Vec<ProductResponse>, AppError> {
    let ids: Vec<i64> = products.iter().map(|p| p.id).collect();
    let records = st.files.list_by_products(&ids).await?;
    let files = files_services::to_responses(st.storage.as_ref(), records).await?;

    let mut by_product: HashMap<i64, Vec<_>> = HashMap::new();
    for f in files {
        if let Some(pid) = f.product {
            by_product.entry(pid).or_default().push(f);
        }
    }
    Ok(products
        .into_iter()
        .map(|p| {
            let files = by_product.remove(&p.id).unwrap_or_default();
            ProductResponse::new(p, files)
        })
        .collect())
}

pub async fn list(
    st: &AppState,
    filter: &ProductFilter,
) -> Result<Vec<ProductResponse>, AppError> {
    let products = st.products.list(filter).await?;
    with_files(st, products).await
}

pub async fn get(st: &AppState, id: i64) -> Result<ProductResponse, AppError> {
    let product = st.products.find(id)
        .await?
        .ok_or(AppError::NotFound("product"))?;
    let mut out = with_files(st, vec![product]).await?;
    out.pop().ok_or(AppError::NotFound("product"))
}

pub async fn info(st: &AppState) -> Result<ProductInfo, AppError> {
    let products = with_files(st, st.products.list_all().await?).await?;
    let max_price = st.products.max_price().await?;
    Ok(ProductInfo {
        count: products.len(),
        products,
        max_price,
    })
}

pub async fn create(
    st: &AppState,
    caller: &Caller,
    req: ProductRequest,
) -> Result<ProductResponse, AppError> {
    caller.require_admin()?;
    let new = validate_new(req)?;
    let product = st
        .products
        .insert(
            new.name.as_deref().unwrap_or_default(),
            new.description.as_deref().unwrap_or_default(),
            new.price.unwrap_or_default(),
            new.stock.unwrap_or_default(),
        )
        .await?;

    st.product_hook.on_change(ProductChange::Saved(product.id));
    info!(product_id = product.id, "product created");
    Ok(ProductResponse::new(product, Vec::new()))
}

pub async fn update(
    st: &AppState,
    caller: &Caller,
    id: i64,
    req: ProductRequest,
) -> Result<ProductResponse, AppError> {
    caller.require_admin()?;
    let changes = validate_changes(req)?;
    let product = st
        .products
        .update(id, &changes)
        .await?
        .ok_or(AppError::NotFound("product"))?;

    st.product_hook.on_change(ProductChange::Saved(product.id));
    info!(product_id = product.id, "product updated");
    let mut out = with_files(st, vec![product]).await?;
    out.pop().ok_or(AppError::NotFound("product"))
}

pub async fn delete(st: &AppState, caller: &Caller, id: i64) -> Result<(), AppError> {
    caller.require_admin()?;
    let files = st.files.list_by_product(id).await?;
    if !st.products.delete(id).await? {
        return Err(AppError::NotFound("product"));
    }
    // rows went with the product; the objects have to be removed separately
    for f in files {
        files_services::discard_object(st.storage.as_ref(), &f.s3_key).await;
    }

    st.product_hook.on_change(ProductChange::Deleted(id));
    info!(product_id = id, "product deleted");
    Ok(())
}
