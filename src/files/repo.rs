use anyhow::Context;
use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;

#[derive(Debug, Clone, FromRow)]
pub struct FileRecord {
    pub id: i64,
    pub product_id: Option<i64>,
    pub s3_key: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub uploaded_at: OffsetDateTime,
}

/// Metadata rows for stored objects. The objects themselves live behind
/// `StorageClient`.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Insert a new file entry bound to a product.
    async fn insert_file(
        &self,
        product_id: i64,
        s3_key: &str,
        content_type: &str,
        size_bytes: i64,
    ) -> anyhow::Result<FileRecord>;

    /// All files of one product, oldest first.
    async fn list_by_product(&self, product_id: i64) -> anyhow::Result<Vec<FileRecord>>;

    /// Files of several products in one round trip.
    async fn list_by_products(&self, product_ids: &[i64]) -> anyhow::Result<Vec<FileRecord>>;

    async fn find_file(&self, product_id: i64, id: i64) -> anyhow::Result<Option<FileRecord>>;

    /// Points an existing row at a new object. `uploaded_at` is left untouched.
    async fn replace_object(
        &self,
        product_id: i64,
        id: i64,
        s3_key: &str,
        content_type: &str,
        size_bytes: i64,
    ) -> anyhow::Result<Option<FileRecord>>;

    /// Deletes the row and returns the object key it pointed at.
    async fn delete_file(&self, product_id: i64, id: i64) -> anyhow::Result<Option<String>>;
}

#[derive(Clone)]
pub struct PgFileStore {
    db: PgPool,
}

impl PgFileStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl FileStore for PgFileStore {
    async fn insert_file(
        &self,
        product_id: i64,
        s3_key: &str,
        content_type: &str,
        size_bytes: i64,
    ) -> anyhow::Result<FileRecord> {
        sqlx::query_as::<_, FileRecord>(
            r#"
            INSERT INTO files (product_id, s3_key, content_type, size_bytes)
            VALUES ($1, $2, $3, $4)
            RETURNING id, product_id, s3_key, content_type, size_bytes, uploaded_at
            "#,
        )
        .bind(product_id)
        .bind(s3_key)
        .bind(content_type)
        .bind(size_bytes)
        .fetch_one(&self.db)
        .await
        .context("insert file")
    }

    // ---- Queries ----

    async fn list_by_product(&self, product_id: i64) -> anyhow::Result<Vec<FileRecord>> {
        sqlx::query_as::<_, FileRecord>(
            r#"
            SELECT id, product_id, s3_key, content_type, size_bytes, uploaded_at
              FROM files
             WHERE product_id = $1
             ORDER BY uploaded_at ASC, id ASC
            "#,
        )
        .bind(product_id)
        .fetch_all(&self.db)
        .await
        .context("list files by product")
    }

    async fn list_by_products(&self, product_ids: &[i64]) -> anyhow::Result<Vec<FileRecord>> {
        if product_ids.is_empty() {
            return Ok(Vec::new());
        }
        sqlx::query_as::<_, FileRecord>(
            r#"
            SELECT id, product_id, s3_key, content_type, size_bytes, uploaded_at
              FROM files
             WHERE product_id = ANY($1)
             ORDER BY uploaded_at ASC, id ASC
            "#,
        )
        .bind(product_ids)
        .fetch_all(&self.db)
        .await
        .context("list files by products")
    }

    async fn find_file(&self, product_id: i64, id: i64) -> anyhow::Result<Option<FileRecord>> {
        sqlx::query_as::<_, FileRecord>(
            r#"
            SELECT id, product_id, s3_key, content_type, size_bytes, uploaded_at
              FROM files
             WHERE id = $1 AND product_id = $2
            "#,
        )
        .bind(id)
        .bind(product_id)
        .fetch_optional(&self.db)
        .await
        .context("find file")
    }

    async fn replace_object(
        &self,
        product_id: i64,
        id: i64,
        s3_key: &str,
        content_type: &str,
        size_bytes: i64,
    ) -> anyhow::Result<Option<FileRecord>> {
        sqlx::query_as::<_, FileRecord>(
            r#"
            UPDATE files
               SET s3_key = $3, content_type = $4, size_bytes = $5
             WHERE id = $1 AND product_id = $2
            RETURNING id, product_id, s3_key, content_type, size_bytes, uploaded_at
            "#,
        )
        .bind(id)
        .bind(product_id)
        .bind(s3_key)
        .bind(content_type)
        .bind(size_bytes)
        .fetch_optional(&self.db)
        .await
        .context("replace file object")
    }

    async fn delete_file(&self, product_id: i64, id: i64) -> anyhow::Result<Option<String>> {
        sqlx::query_scalar::<_, String>(
            "DELETE FROM files WHERE id = $1 AND product_id = $2 RETURNING s3_key",
        )
        .bind(id)
        .bind(product_id)
        .fetch_optional(&self.db)
        .await
        .context("delete file")
    }
}
