use anyhow::Context;
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use tracing::debug;
use uuid::Uuid;

use super::{
    model::{NewItem, Order, OrderLine, OrderRow, OrderStatus, ORDER_IS_FINAL},
    store::{OrderStore, Scope, ONE_ORDER_AT_A_TIME},
};
use crate::{
    config::CancelPolicy,
    error::{db_error_code, AppError, FOREIGN_KEY_VIOLATION, UNIQUE_VIOLATION},
    filters::OrderFilter,
};

const ORDER_COLUMNS: &str = "order_id, user_id, created_at, status, total_price";

#[derive(Clone)]
pub struct PgOrderStore {
    db: PgPool,
}

impl PgOrderStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn map_write_error(e: sqlx::Error) -> AppError {
    match db_error_code(&e).as_deref() {
        Some(UNIQUE_VIOLATION) => AppError::Conflict(ONE_ORDER_AT_A_TIME.into()),
        Some(FOREIGN_KEY_VIOLATION) => {
            let constraint = e
                .as_database_error()
                .and_then(|d| d.constraint())
                .unwrap_or_default();
            if constraint.contains("user") {
                AppError::NotFound("user")
            } else {
                AppError::NotFound("product")
            }
        }
        _ => e.into(),
    }
}

fn to_order(row: OrderRow) -> Result<Order, AppError> {
    Ok(Order::try_from(row)?)
}

async fn insert_items_tx(
    tx: &mut Transaction<'_, Postgres>,
    order_id: Uuid,
    items: &[NewItem],
) -> Result<(), AppError> {
    for item in items {
        sqlx::query(
            r#"
            INSERT INTO order_items (order_id, product_id, quantity)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(order_id)
        .bind(item.product)
        .bind(item.quantity)
        .execute(&mut **tx)
        .await
        .map_err(map_write_error)?;
    }
    Ok(())
}

/// Recomputes the stored total from the current item list.
async fn snapshot_total_tx(
    tx: &mut Transaction<'_, Postgres>,
    order_id: Uuid,
) -> Result<OrderRow, AppError> {
    let row = sqlx::query_as::<_, OrderRow>(&format!(
        r#"
        UPDATE orders
           SET total_price = (
               SELECT COALESCE(SUM(p.price * oi.quantity), 0)
                 FROM order_items oi
                 JOIN products p ON p.id = oi.product_id
                WHERE oi.order_id = $1
           )
         WHERE order_id = $1
        RETURNING {ORDER_COLUMNS}
        "#
    ))
    .bind(order_id)
    .fetch_one(&mut **tx)
    .await?;
    Ok(row)
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn has_open_order(&self, user_id: Uuid) -> Result<bool, AppError> {
        let found = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM orders WHERE user_id = $1 AND status <> 'Cancelled')",
        )
        .bind(user_id)
        .fetch_one(&self.db)
        .await?;
        Ok(found)
    }

    async fn insert(&self, order: &Order, items: &[NewItem]) -> Result<Order, AppError> {
        let mut tx = self.db.begin().await.context("begin tx")?;

        sqlx::query(
            r#"
            INSERT INTO orders (order_id, user_id, created_at, status)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(order.order_id)
        .bind(order.user_id)
        .bind(order.created_at)
        .bind(order.status.as_str())
        .execute(&mut *tx)
        .await
        .map_err(map_write_error)?;

        insert_items_tx(&mut tx, order.order_id, items).await?;
        let row = snapshot_total_tx(&mut tx, order.order_id).await?;

        tx.commit().await.context("commit tx")?;
        debug!(order_id = %order.order_id, items = items.len(), "order stored");
        to_order(row)
    }

    async fn find(&self, scope: Scope, order_id: Uuid) -> Result<Option<Order>, AppError> {
        let row = match scope {
            Scope::All => {
                sqlx::query_as::<_, OrderRow>(&format!(
                    "SELECT {ORDER_COLUMNS} FROM orders WHERE order_id = $1"
                ))
                .bind(order_id)
                .fetch_optional(&self.db)
                .await?
            }
            Scope::Owner(user_id) => {
                sqlx::query_as::<_, OrderRow>(&format!(
                    "SELECT {ORDER_COLUMNS} FROM orders WHERE order_id = $1 AND user_id = $2"
                ))
                .bind(order_id)
                .bind(user_id)
                .fetch_optional(&self.db)
                .await?
            }
        };
        row.map(to_order).transpose()
    }

    async fn list(&self, scope: Scope, filter: &OrderFilter) -> Result<Vec<Order>, AppError> {
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE TRUE"
        ));
        if let Scope::Owner(user_id) = scope {
            qb.push(" AND user_id = ").push_bind(user_id);
        }
        filter.push_conditions(&mut qb);
        qb.push(" ORDER BY created_at ASC, order_id ASC");

        let rows = qb.build_query_as::<OrderRow>().fetch_all(&self.db).await?;
        rows.into_iter().map(to_order).collect()
    }

    async fn lines(&self, order_id: Uuid) -> Result<Vec<OrderLine>, AppError> {
        let lines = sqlx::query_as::<_, OrderLine>(
            r#"
            SELECT oi.product_id,
                   p.name  AS product_name,
                   p.price AS product_price,
                   oi.quantity
              FROM order_items oi
              JOIN products p ON p.id = oi.product_id
             WHERE oi.order_id = $1
             ORDER BY oi.id ASC
            "#,
        )
        .bind(order_id)
        .fetch_all(&self.db)
        .await?;
        Ok(lines)
    }

    async fn update(
        &self,
        order_id: Uuid,
        status: Option<OrderStatus>,
        items: Option<&[NewItem]>,
    ) -> Result<Order, AppError> {
        let mut tx = self.db.begin().await.context("begin tx")?;

        // a final order keeps its status; re-sending the same one is allowed
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            r#"
            UPDATE orders
               SET status = COALESCE($2::text, status)
             WHERE order_id = $1
               AND ($2::text IS NULL
                    OR status = $2::text
                    OR status NOT IN ('Completed', 'Cancelled'))
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(order_id)
        .bind(status.map(OrderStatus::as_str))
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_write_error)?;

        let row = match row {
            Some(row) => row,
            None => {
                let exists = sqlx::query_scalar::<_, bool>(
                    "SELECT EXISTS(SELECT 1 FROM orders WHERE order_id = $1)",
                )
                .bind(order_id)
                .fetch_one(&mut *tx)
                .await?;
                return Err(if exists {
                    AppError::Conflict(ORDER_IS_FINAL.into())
                } else {
                    AppError::NotFound("order")
                });
            }
        };

        let row = match items {
            Some(items) => {
                sqlx::query("DELETE FROM order_items WHERE order_id = $1")
                    .bind(order_id)
                    .execute(&mut *tx)
                    .await?;
                insert_items_tx(&mut tx, order_id, items).await?;
                snapshot_total_tx(&mut tx, order_id).await?
            }
            None => row,
        };

        tx.commit().await.context("commit tx")?;
        to_order(row)
    }

    async fn purchase(&self, order_id: Uuid) -> Result<bool, AppError> {
        // concurrent purchases serialise on the row lock; the losers see
        // the committed status and match nothing
        let res = sqlx::query(
            r#"
            UPDATE orders
               SET status = 'Completed'
             WHERE order_id = $1
               AND status NOT IN ('Completed', 'Cancelled')
            "#,
        )
        .bind(order_id)
        .execute(&self.db)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn cancel(&self, order_id: Uuid, policy: CancelPolicy) -> Result<bool, AppError> {
        let mut tx = self.db.begin().await.context("begin tx")?;

        let res = sqlx::query(
            r#"
            UPDATE orders
               SET status = 'Cancelled'
             WHERE order_id = $1
               AND status <> 'Cancelled'
            "#,
        )
        .bind(order_id)
        .execute(&mut *tx)
        .await?;
        if res.rows_affected() == 0 {
            return Ok(false);
        }

        if policy == CancelPolicy::Delete {
            sqlx::query("DELETE FROM orders WHERE order_id = $1")
                .bind(order_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await.context("commit tx")?;
        debug!(%order_id, ?policy, "order cancelled");
        Ok(true)
    }

    async fn delete(&self, order_id: Uuid) -> Result<bool, AppError> {
        let res = sqlx::query("DELETE FROM orders WHERE order_id = $1")
            .bind(order_id)
            .execute(&self.db)
            .await?;
        Ok(res.rows_affected() > 0)
    }
}
