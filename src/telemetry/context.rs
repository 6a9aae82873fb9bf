use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use tracing::{debug, info_span, Instrument, Span};

use crate::{
    db::{ProductRepository, StoreError},
    error::AppError,
    models::{CreateProduct, Product},
    AppState,
};

/// Storage handle bound to one request's transaction. Every call is recorded
/// as a `db.query` span under that transaction.
#[derive(Clone)]
pub struct TracedStore {
    repository: Arc<dyn ProductRepository>,
    transaction: Span,
}

impl TracedStore {
    pub fn new(repository: Arc<dyn ProductRepository>, transaction: Span) -> Self {
        Self {
            repository,
            transaction,
        }
    }

    fn query_span(&self, operation: &'static str) -> Span {
        info_span!(
            parent: &self.transaction,
            "db.query",
            db.system = "postgresql",
            db.operation = operation,
            db.sql.table = "products",
        )
    }

    pub async fn list(&self) -> Result<Vec<Product>, StoreError> {
        self.repository
            .list()
            .instrument(self.query_span("SELECT"))
            .await
    }

    pub async fn find(&self, id: i64) -> Result<Option<Product>, StoreError> {
        self.repository
            .find(id)
            .instrument(self.query_span("SELECT"))
            .await
    }

    pub async fn insert(&self, product: &CreateProduct) -> Result<Product, StoreError> {
        self.repository
            .insert(product)
            .instrument(self.query_span("INSERT"))
            .await
    }

    pub async fn save(&self, product: &Product) -> Result<Option<Product>, StoreError> {
        self.repository
            .save(product)
            .instrument(self.query_span("UPDATE"))
            .await
    }

    pub async fn soft_delete(&self, id: i64) -> Result<bool, StoreError> {
        self.repository
            .soft_delete(id)
            .instrument(self.query_span("UPDATE"))
            .await
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for TracedStore
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<TracedStore>().cloned().ok_or_else(|| {
            AppError::Internal("request has no traced storage handle".to_string())
        })
    }
}

/// Wraps the request in a transaction and hands downstream handlers a
/// [`TracedStore`] bound to it.
///
/// Install it outside `CatchPanicLayer` so a panicking handler still reaches
/// here as a 500 response and the transaction records that status.
pub async fn trace_context(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let mut transaction = state
        .telemetry
        .start_transaction(req.method(), req.uri().path());
    transaction.set_web_request(&req);
    debug!(parent: transaction.span(), transaction = transaction.name(), "Transaction started");

    let span = transaction.span().clone();
    req.extensions_mut()
        .insert(TracedStore::new(Arc::clone(&state.repository), span.clone()));

    let response = next.run(req).instrument(span).await;
    transaction.set_web_response(response.status());

    response
}
