use anyhow::Context;
use bytes::Bytes;
use tracing::{info, warn};
use uuid::Uuid;

use super::{dto::FileResponse, repo};
use crate::{auth::extractors::Caller, error::AppError, state::AppState, storage::StorageClient};

const PRESIGN_TTL_SECS: u64 = 30 * 60;

pub struct Upload {
    pub body: Bytes,
    pub content_type: String,
}

fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        "application/pdf" => Some("pdf"),
        "text/plain" => Some("txt"),
        _ => None,
    }
}

pub fn object_key(product_id: i64, object_id: Uuid, content_type: &str) -> String {
    let ext = ext_from_mime(content_type).unwrap_or("bin");
    format!("products/{}/{}.{}", product_id, object_id, ext)
}

pub async fn to_response(
    storage: &dyn StorageClient,
    record: repo::FileRecord,
) -> anyhow::Result<FileResponse> {
    let url = storage
        .presign_get(&record.s3_key, PRESIGN_TTL_SECS)
        .await
        .with_context(|| format!("presign url for s3_key {}", record.s3_key))?;
    Ok(FileResponse {
        id: record.id,
        product: record.product_id,
        content_type: record.content_type,
        size_bytes: record.size_bytes,
        uploaded_at: record.uploaded_at,
        url,
    })
}

pub async fn to_responses(
    storage: &dyn StorageClient,
    records: Vec<repo::FileRecord>,
) -> anyhow::Result<Vec<FileResponse>> {
    let mut out = Vec::with_capacity(records.len());
    for r in records {
        out.push(to_response(storage, r).await?);
    }
    Ok(out)
}

fn validate_upload(upload: &Upload) -> Result<(), AppError> {
    if upload.body.is_empty() {
        return Err(AppError::validation("file", "The submitted file is empty."));
    }
    Ok(())
}

async fn put(
    st: &AppState,
    product_id: i64,
    upload: Upload,
) -> anyhow::Result<(String, String, i64)> {
    let key = object_key(product_id, Uuid::new_v4(), &upload.content_type);
    let size = upload.body.len() as i64;
    st.storage
        .put_object(&key, upload.body, &upload.content_type)
        .await
        .with_context(|| format!("put_object {}", key))?;
    Ok((key, upload.content_type, size))
}

/// Best effort; an orphaned object is preferable to failing a committed request.
pub async fn discard_object(storage: &dyn StorageClient, key: &str) {
    if let Err(e) = storage.delete_object(key).await {
        warn!(error = %e, s3_key = %key, "failed to delete stored object");
    }
}

pub async fn list(st: &AppState, product_id: i64) -> Result<Vec<FileResponse>, AppError> {
    let records = st.files.list_by_product(product_id).await?;
    Ok(to_responses(st.storage.as_ref(), records).await?)
}

pub async fn get(st: &AppState, product_id: i64, id: i64) -> Result<FileResponse, AppError> {
    let record = st
        .files
        .find_file(product_id, id)
        .await?
        .ok_or(AppError::NotFound("file"))?;
    Ok(to_response(st.storage.as_ref(), record).await?)
}

pub async fn attach(
    st: &AppState,
    caller: &Caller,
    product_id: i64,
    upload: Upload,
) -> Result<FileResponse, AppError> {
    caller.require_admin()?;
    validate_upload(&upload)?;
    if !st.products.exists(product_id).await? {
        return Err(AppError::NotFound("product"));
    }

    let (key, content_type, size) = put(st, product_id, upload).await?;
    let inserted = st
        .files
        .insert_file(product_id, &key, &content_type, size)
        .await;
    let record = match inserted {
        Ok(r) => r,
        Err(e) => {
            discard_object(st.storage.as_ref(), &key).await;
            return Err(e.into());
        }
    };

    info!(file_id = record.id, product_id, "file attached");
    Ok(to_response(st.storage.as_ref(), record).await?)
}

pub async fn replace(
    st: &AppState,
    caller: &Caller,
    product_id: i64,
    id: i64,
    upload: Upload,
) -> Result<FileResponse, AppError> {
    caller.require_admin()?;
    validate_upload(&upload)?;
    let current = st
        .files
        .find_file(product_id, id)
        .await?
        .ok_or(AppError::NotFound("file"))?;

    let (key, content_type, size) = put(st, product_id, upload).await?;
    let replaced = st
        .files
        .replace_object(product_id, id, &key, &content_type, size)
        .await;
    let record = match replaced {
        Ok(Some(r)) => r,
        Ok(None) => {
            discard_object(st.storage.as_ref(), &key).await;
            return Err(AppError::NotFound("file"));
        }
        Err(e) => {
            discard_object(st.storage.as_ref(), &key).await;
            return Err(e.into());
        }
    };
    discard_object(st.storage.as_ref(), &current.s3_key).await;

    info!(file_id = id, product_id, "file replaced");
    Ok(to_response(st.storage.as_ref(), record).await?)
}

pub async fn remove(
    st: &AppState,
    caller: &Caller,
    product_id: i64,
    id: i64,
) -> Result<(), AppError> {
    caller.require_admin()?;
    let key = st
        .files
        .delete_file(product_id, id)
        .await?
        .ok_or(AppError::NotFound("file"))?;
    discard_object(st.storage.as_ref(), &key).await;
    info!(file_id = id, product_id, "file deleted");
    Ok(())
}
