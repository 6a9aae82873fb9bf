use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::{FromRequest, FromRequestParts, Path, Request},
    http::{request::Parts, StatusCode},
    Json,
};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::info;

use crate::{
    db::StoreError,
    error::{AppError, AppResult},
    models::{CreateProduct, Product, UpdateProduct},
    telemetry::context::TracedStore,
};

/// JSON body whose rejections render as `{"message": ...}`. The body is parsed
/// as JSON whatever `Content-Type` the client sent, or none at all.
pub struct AppJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for AppJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let body = Bytes::from_request(req, state).await?;
        Ok(Self(serde_json::from_slice(&body)?))
    }
}

/// Numeric product id from the path. Anything that can't name a row is "not found".
#[derive(Debug, Clone, Copy)]
pub struct ProductId(pub i64);

#[async_trait]
impl<S> FromRequestParts<S> for ProductId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(id) = Path::<i64>::from_request_parts(parts, state).await?;
        if id <= 0 {
            return Err(AppError::NotFound);
        }
        Ok(Self(id))
    }
}

fn message(text: &str) -> Json<serde_json::Value> {
    Json(json!({ "message": text }))
}

// ── Create ────────────────────────────────────────────────────────────────────

pub async fn create_product(
    store: TracedStore,
    AppJson(payload): AppJson<CreateProduct>,
) -> AppResult<(StatusCode, Json<serde_json::Value>)> {
    payload.validate()?;

    let product = store.insert(&payload).await.map_err(|e| match e {
        StoreError::Duplicate => AppError::Conflict("Product already exists".to_string()),
        other => other.into(),
    })?;

    info!(id = product.id, code = %product.code, "Created product");

    Ok((StatusCode::CREATED, message("Product created successfully")))
}

// ── List ──────────────────────────────────────────────────────────────────────

pub async fn list_products(store: TracedStore) -> AppResult<(StatusCode, Json<Vec<Product>>)> {
    let products = store.list().await?;

    info!(count = products.len(), "Listed products");

    Ok((StatusCode::OK, Json(products)))
}

// ── Get by ID ─────────────────────────────────────────────────────────────────

pub async fn get_product(
    store: TracedStore,
    ProductId(id): ProductId,
) -> AppResult<(StatusCode, Json<Product>)> {
    let product = store.find(id).await?.ok_or(AppError::NotFound)?;

    info!(id, "Fetched product");

    Ok((StatusCode::OK, Json(product)))
}

// ── Update ────────────────────────────────────────────────────────────────────

pub async fn update_product(
    store: TracedStore,
    ProductId(id): ProductId,
    AppJson(payload): AppJson<UpdateProduct>,
) -> AppResult<(StatusCode, Json<serde_json::Value>)> {
    let mut product = store.find(id).await?.ok_or(AppError::NotFound)?;

    product.apply(payload);
    product.validate()?;

    store
        .save(&product)
        .await
        .map_err(|e| match e {
            StoreError::Duplicate => {
                AppError::Conflict("Product with this id already exists".to_string())
            }
            other => other.into(),
        })?
        // Deleted between the lookup and the write.
        .ok_or(AppError::NotFound)?;

    info!(id, code = %product.code, price = product.price, "Updated product");

    Ok((StatusCode::OK, message("Product updated successfully")))
}

// ── Delete ────────────────────────────────────────────────────────────────────

pub async fn delete_product(
    store: TracedStore,
    ProductId(id): ProductId,
) -> AppResult<(StatusCode, Json<serde_json::Value>)> {
    if !store.soft_delete(id).await? {
        return Err(AppError::NotFound);
    }

    info!(id, "Deleted product");

    Ok((StatusCode::OK, message("Product deleted successfully")))
}
