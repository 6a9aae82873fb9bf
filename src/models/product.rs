use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest price the BIGINT column can hold.
pub const MAX_PRICE: u64 = i64::MAX as u64;

/// Why a product's fields can't be stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InvalidProduct {
    #[error("Code and Price are required")]
    MissingFields,

    #[error("Price must not exceed 9223372036854775807")]
    PriceOutOfRange,
}

/// Core product entity. A row with `deleted_at` set is logically deleted and
/// never returned by the repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: i64,
    pub code: String,
    /// Stored as BIGINT with a `price > 0` check.
    #[sqlx(try_from = "i64")]
    pub price: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Product {
    /// Merge the fields present in a partial update over this record.
    pub fn apply(&mut self, update: UpdateProduct) {
        if let Some(code) = update.code {
            self.code = code;
        }
        if let Some(price) = update.price {
            self.price = price;
        }
    }

    pub fn validate(&self) -> Result<(), InvalidProduct> {
        check_fields(&self.code, self.price)
    }
}

fn check_fields(code: &str, price: u64) -> Result<(), InvalidProduct> {
    if code.is_empty() || price == 0 {
        return Err(InvalidProduct::MissingFields);
    }
    if price > MAX_PRICE {
        return Err(InvalidProduct::PriceOutOfRange);
    }
    Ok(())
}

// ── Request payloads ─────────────────────────────────────────────────────────

/// Missing fields fall back to zero values and are rejected by validation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CreateProduct {
    pub code: String,
    pub price: u64,
}

impl CreateProduct {
    pub fn validate(&self) -> Result<(), InvalidProduct> {
        check_fields(&self.code, self.price)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateProduct {
    pub code: Option<String>,
    pub price: Option<u64>,
}
