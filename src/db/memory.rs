//! In-memory repository for router tests. Mirrors the Postgres semantics:
//! serial ids, soft deletes, and a unique code among live rows.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use super::{ProductRepository, StoreError};
use crate::models::{CreateProduct, Product};

#[derive(Debug, Default)]
pub struct MemoryProductRepository {
    rows: Mutex<Vec<Product>>,
}

impl MemoryProductRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every row, including logically deleted ones.
    pub fn all_rows(&self) -> Vec<Product> {
        self.rows.lock().unwrap().clone()
    }
}

fn code_taken(rows: &[Product], code: &str, except_id: Option<i64>) -> bool {
    rows.iter().any(|p| {
        p.deleted_at.is_none() && p.code == code && Some(p.id) != except_id
    })
}

#[async_trait]
impl ProductRepository for MemoryProductRepository {
    async fn list(&self) -> Result<Vec<Product>, StoreError> {
        let rows = self.rows.lock().unwrap();
        Ok(rows.iter().filter(|p| p.deleted_at.is_none()).cloned().collect())
    }

    async fn find(&self, id: i64) -> Result<Option<Product>, StoreError> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .iter()
            .find(|p| p.id == id && p.deleted_at.is_none())
            .cloned())
    }

    async fn insert(&self, payload: &CreateProduct) -> Result<Product, StoreError> {
        let mut rows = self.rows.lock().unwrap();
        if code_taken(&rows, &payload.code, None) {
            return Err(StoreError::Duplicate);
        }

        let now = Utc::now();
        let product = Product {
            id: rows.len() as i64 + 1,
            code: payload.code.clone(),
            price: payload.price,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        rows.push(product.clone());
        Ok(product)
    }

    async fn save(&self, product: &Product) -> Result<Option<Product>, StoreError> {
        let mut rows = self.rows.lock().unwrap();
        if code_taken(&rows, &product.code, Some(product.id)) {
            return Err(StoreError::Duplicate);
        }

        let Some(row) = rows
            .iter_mut()
            .find(|p| p.id == product.id && p.deleted_at.is_none())
        else {
            return Ok(None);
        };
        row.code = product.code.clone();
        row.price = product.price;
        row.updated_at = Utc::now();
        Ok(Some(row.clone()))
    }

    async fn soft_delete(&self, id: i64) -> Result<bool, StoreError> {
        let mut rows = self.rows.lock().unwrap();
        match rows.iter_mut().find(|p| p.id == id && p.deleted_at.is_none()) {
            Some(row) => {
                row.deleted_at = Some(Utc::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
