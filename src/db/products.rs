use async_trait::async_trait;
use sqlx::PgPool;

use super::{ProductRepository, StoreError};
use crate::models::{CreateProduct, Product};

const PRODUCT_COLUMNS: &str = "id, code, price, created_at, updated_at, deleted_at";

/// The process-wide repository every request-scoped handle derives from.
#[derive(Debug, Clone)]
pub struct PgProductRepository {
    pool: PgPool,
}

impl PgProductRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// Handlers reject prices above `MAX_PRICE` first; this only guards direct callers.
fn to_db_price(price: u64) -> Result<i64, StoreError> {
    i64::try_from(price).map_err(|e| StoreError::Sql(sqlx::Error::Encode(Box::new(e))))
}

#[async_trait]
impl ProductRepository for PgProductRepository {
    async fn list(&self) -> Result<Vec<Product>, StoreError> {
        let products = sqlx::query_as::<_, Product>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE deleted_at IS NULL ORDER BY id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(products)
    }

    async fn find(&self, id: i64) -> Result<Option<Product>, StoreError> {
        let product = sqlx::query_as::<_, Product>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1 AND deleted_at IS NULL"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(product)
    }

    async fn insert(&self, payload: &CreateProduct) -> Result<Product, StoreError> {
        // Uniqueness is enforced by products_code_live_idx; a collision surfaces
        // as a unique violation instead of racing a separate count query.
        let product = sqlx::query_as::<_, Product>(&format!(
            "INSERT INTO products (code, price) VALUES ($1, $2) RETURNING {PRODUCT_COLUMNS}"
        ))
        .bind(&payload.code)
        .bind(to_db_price(payload.price)?)
        .fetch_one(&self.pool)
        .await?;

        Ok(product)
    }

    async fn save(&self, product: &Product) -> Result<Option<Product>, StoreError> {
        let saved = sqlx::query_as::<_, Product>(&format!(
            r#"
            UPDATE products
            SET code       = $1,
                price      = $2,
                updated_at = NOW()
            WHERE id = $3 AND deleted_at IS NULL
            RETURNING {PRODUCT_COLUMNS}
            "#
        ))
        .bind(&product.code)
        .bind(to_db_price(product.price)?)
        .bind(product.id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(saved)
    }

    async fn soft_delete(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE products SET deleted_at = NOW() WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
