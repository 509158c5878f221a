use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};

use crate::filters::ProductFilter;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub price: Decimal,
    pub stock: i32,
}

impl Product {
    pub fn in_stock(&self) -> bool {
        self.stock > 0
    }
}

/// Fields written on create; on update every field is optional.
#[derive(Debug, Clone, Default)]
pub struct ProductChanges {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<Decimal>,
    pub stock: Option<i32>,
}

/// Catalog persistence.
#[async_trait]
pub trait ProductStore: Send + Sync {
    /// Catalog listing. Only products with stock left are returned.
    async fn list(&self, filter: &ProductFilter) -> anyhow::Result<Vec<Product>>;
    async fn list_all(&self) -> anyhow::Result<Vec<Product>>;
    async fn find(&self, id: i64) -> anyhow::Result<Option<Product>>;
    async fn exists(&self, id: i64) -> anyhow::Result<bool>;
    async fn insert(
        &self,
        name: &str,
        description: &str,
        price: Decimal,
        stock: i32,
    ) -> anyhow::Result<Product>;
    async fn update(&self, id: i64, changes: &ProductChanges) -> anyhow::Result<Option<Product>>;
    /// Files and order items of the product go with it.
    async fn delete(&self, id: i64) -> anyhow::Result<bool>;
    async fn max_price(&self) -> anyhow::Result<Option<Decimal>>;
}

#[derive(Clone)]
pub struct PgProductStore {
    db: PgPool,
}

impl PgProductStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ProductStore for PgProductStore {
    async fn list(&self, filter: &ProductFilter) -> anyhow::Result<Vec<Product>> {
        let mut qb = QueryBuilder::<Postgres>::new(
            "SELECT id, name, description, price, stock FROM products WHERE stock > 0",
        );
        filter.push_conditions(&mut qb);
        filter.push_order_by(&mut qb);
        let rows = qb.build_query_as::<Product>().fetch_all(&self.db).await?;
        Ok(rows)
    }

    async fn list_all(&self) -> anyhow::Result<Vec<Product>> {
        let rows = sqlx::query_as::<_, Product>(
            "SELECT id, name, description, price, stock FROM products ORDER BY id ASC",
        )
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    async fn find(&self, id: i64) -> anyhow::Result<Option<Product>> {
        let row = sqlx::query_as::<_, Product>(
            "SELECT id, name, description, price, stock FROM products WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row)
    }

    async fn exists(&self, id: i64) -> anyhow::Result<bool> {
        let found = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM products WHERE id = $1)",
        )
        .bind(id)
        .fetch_one(&self.db)
        .await?;
        Ok(found)
    }

    async fn insert(
        &self,
        name: &str,
        description: &str,
        price: Decimal,
        stock: i32,
    ) -> anyhow::Result<Product> {
        let row = sqlx::query_as::<_, Product>(
            r#"
            INSERT INTO products (name, description, price, stock)
            VALUES ($1, $2, $3, $4)
            RETURNING id, name, description, price, stock
            "#,
        )
        .bind(name)
        .bind(description)
        .bind(price)
        .bind(stock)
        .fetch_one(&self.db)
        .await?;
        Ok(row)
    }

    async fn update(&self, id: i64, changes: &ProductChanges) -> anyhow::Result<Option<Product>> {
        let row = sqlx::query_as::<_, Product>(
            r#"
            UPDATE products
               SET name = COALESCE($2, name),
                   description = COALESCE($3, description),
                   price = COALESCE($4, price),
                   stock = COALESCE($5, stock)
             WHERE id = $1
            RETURNING id, name, description, price, stock
            "#,
        )
        .bind(id)
        .bind(changes.name.as_deref())
        .bind(changes.description.as_deref())
        .bind(changes.price)
        .bind(changes.stock)
        .fetch_optional(&self.db)
        .await?;
        Ok(row)
    }

    async fn delete(&self, id: i64) -> anyhow::Result<bool> {
        let res = sqlx::query("DELETE FROM products WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn max_price(&self) -> anyhow::Result<Option<Decimal>> {
        let max = sqlx::query_scalar::<_, Option<Decimal>>("SELECT MAX(price) FROM products")
            .fetch_one(&self.db)
            .await?;
        Ok(max)
    }
}
