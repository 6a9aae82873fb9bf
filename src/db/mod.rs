use async_trait::async_trait;
use sqlx::{
    error::{DatabaseError, ErrorKind},
    postgres::PgPoolOptions,
    PgPool,
};
use tracing::info;

use crate::config::DatabaseConfig;
use crate::models::{CreateProduct, Product};

mod products;

#[cfg(test)]
pub mod memory;

pub use products::PgProductRepository;

/// Startup failures. Any of these stops the process before it serves traffic.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("invalid database options: {0}")]
    Options(#[source] sqlx::Error),

    #[error("failed to connect to PostgreSQL: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("failed to run migrations: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("a live product with this code already exists")]
    Duplicate,

    #[error(transparent)]
    Sql(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(error: sqlx::Error) -> Self {
        match error.as_database_error().map(DatabaseError::kind) {
            Some(ErrorKind::UniqueViolation) => Self::Duplicate,
            _ => Self::Sql(error),
        }
    }
}

/// Open the pool, apply limits and make sure the schema exists.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, ConnectionError> {
    let options = config.connect_options().map_err(ConnectionError::Options)?;

    info!(
        max_connections = config.max_connections,
        max_lifetime_secs = config.max_lifetime.as_secs(),
        "Connecting to PostgreSQL..."
    );
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .max_lifetime(config.max_lifetime)
        .acquire_timeout(config.acquire_timeout)
        .connect_with(options)
        .await
        .map_err(ConnectionError::Connect)?;
    info!("Database connection pool established.");

    info!("Running migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Migrations complete.");

    Ok(pool)
}

/// Storage operations over live products.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProductRepository: Send + Sync {
    /// Live products in insertion order.
    async fn list(&self) -> Result<Vec<Product>, StoreError>;

    async fn find(&self, id: i64) -> Result<Option<Product>, StoreError>;

    /// Fails with [`StoreError::Duplicate`] when a live product already uses the code.
    async fn insert(&self, product: &CreateProduct) -> Result<Product, StoreError>;

    /// Persist `code` and `price` by primary key. `None` when the row is no longer live.
    async fn save(&self, product: &Product) -> Result<Option<Product>, StoreError>;

    /// Mark a live product deleted. `false` when nothing live matched.
    async fn soft_delete(&self, id: i64) -> Result<bool, StoreError>;
}
