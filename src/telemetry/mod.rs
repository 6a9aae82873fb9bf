//! Per-request tracing transactions.
//!
//! A [`Telemetry`] handle is built once at startup. Each inbound request gets a
//! [`Transaction`] backed by a `tracing` span; every storage query issued for
//! that request is recorded as a child span (see [`context::TracedStore`]).
//! [`Observability`] exports those spans over OTLP when a collector is
//! configured. Without a license key or endpoint the handle is disabled and
//! transactions cost nothing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::http::{Method, Request, StatusCode};
use serde::Serialize;
use thiserror::Error;
use tracing::{field, info, info_span, warn, Span};
use tracing_opentelemetry::OpenTelemetrySpanExt as _;
use uuid::Uuid;

use crate::config::TelemetryConfig;

pub mod context;
mod init;
mod otel;
mod propagation;

pub use init::Observability;

/// Errors raised while setting up span export.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("failed to build OTLP exporter: {0}")]
    OtlpExporter(#[from] opentelemetry_otlp::ExporterBuildError),

    #[error("license key is not a valid header value")]
    LicenseKey,

    #[error("failed to initialise tracing subscriber: {0}")]
    TracingSubscriber(#[from] tracing_subscriber::util::TryInitError),
}

#[derive(Debug)]
struct Agent {
    app_name: String,
    distributed_tracing: bool,
    started: AtomicU64,
    ended: AtomicU64,
    failed: AtomicU64,
}

/// Transaction counters since startup, reported by the health endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransactionStats {
    pub started: u64,
    pub ended: u64,
    /// Ended with a 5xx response.
    pub failed: u64,
}

#[derive(Debug, Clone)]
pub struct Telemetry {
    agent: Option<Arc<Agent>>,
}

impl Telemetry {
    pub fn new(config: &TelemetryConfig) -> Self {
        if config.exporter_endpoint().is_none() {
            warn!(
                "neither TELEMETRY_LICENSE_KEY nor OTEL_EXPORTER_OTLP_ENDPOINT is set; \
                 request transactions will not be reported"
            );
            return Self::disabled();
        }
        if config.app_name.trim().is_empty() {
            warn!("TELEMETRY_APP_NAME is empty; request transactions will not be reported");
            return Self::disabled();
        }

        info!(
            app = %config.app_name,
            distributed_tracing = config.distributed_tracing,
            "Telemetry enabled"
        );
        Self {
            agent: Some(Arc::new(Agent {
                app_name: config.app_name.clone(),
                distributed_tracing: config.distributed_tracing,
                started: AtomicU64::new(0),
                ended: AtomicU64::new(0),
                failed: AtomicU64::new(0),
            })),
        }
    }

    pub fn disabled() -> Self {
        Self { agent: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.agent.is_some()
    }

    /// Start a transaction named `"<METHOD> <path>"`. It ends when dropped.
    pub fn start_transaction(&self, method: &Method, path: &str) -> Transaction {
        let name = format!("{} {}", method.as_str(), path);

        let Some(agent) = &self.agent else {
            return Transaction {
                agent: None,
                name,
                span: Span::none(),
                started_at: Instant::now(),
                status: None,
            };
        };

        // Root span; a propagated caller context is attached in `set_web_request`.
        let span = info_span!(
            parent: None,
            "transaction",
            otel.name = %name,
            otel.kind = "server",
            otel.status_code = field::Empty,
            app = %agent.app_name,
            guid = %Uuid::new_v4(),
            http.method = field::Empty,
            http.uri = field::Empty,
            http.status_code = field::Empty,
        );
        agent.started.fetch_add(1, Ordering::Relaxed);

        Transaction {
            agent: Some(Arc::clone(agent)),
            name,
            span,
            started_at: Instant::now(),
            status: None,
        }
    }

    pub fn stats(&self) -> TransactionStats {
        self.agent
            .as_ref()
            .map_or_else(TransactionStats::default, |agent| TransactionStats {
                started: agent.started.load(Ordering::Relaxed),
                ended: agent.ended.load(Ordering::Relaxed),
                failed: agent.failed.load(Ordering::Relaxed),
            })
    }
}

/// One request's worth of tracing. Ending happens in `Drop`, so it runs exactly
/// once whether the handler returns, returns early, or panics.
#[derive(Debug)]
pub struct Transaction {
    agent: Option<Arc<Agent>>,
    name: String,
    span: Span,
    started_at: Instant,
    status: Option<StatusCode>,
}

impl Transaction {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn set_web_request<B>(&mut self, req: &Request<B>) {
        let Some(agent) = &self.agent else {
            return;
        };

        self.span.record("http.method", req.method().as_str());
        self.span.record("http.uri", field::display(req.uri()));

        if !agent.distributed_tracing {
            return;
        }
        if let Some(parent) = propagation::extract_parent_context(req.headers()) {
            if let Err(source) = self.span.set_parent(parent) {
                warn!("failed to set parent context on transaction span: {source}");
            }
        }
    }

    pub fn set_web_response(&mut self, status: StatusCode) {
        self.status = Some(status);
        self.span.record("http.status_code", status.as_u16());
        if status.is_server_error() {
            self.span.record("otel.status_code", "ERROR");
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        let Some(agent) = self.agent.take() else {
            return;
        };
        agent.ended.fetch_add(1, Ordering::Relaxed);
        if self.status.is_some_and(|status| status.is_server_error()) {
            agent.failed.fetch_add(1, Ordering::Relaxed);
        }

        let elapsed_ms = self.started_at.elapsed().as_secs_f64() * 1000.0;
        match self.status {
            Some(status) => info!(
                parent: &self.span,
                transaction = %self.name,
                status = status.as_u16(),
                elapsed_ms,
                "Transaction ended"
            ),
            None => warn!(
                parent: &self.span,
                transaction = %self.name,
                elapsed_ms,
                "Transaction ended without a response"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use opentelemetry::trace::{TraceContextExt as _, TraceId, TracerProvider as _};
    use opentelemetry_sdk::{propagation::TraceContextPropagator, trace::SdkTracerProvider};
    use tracing_opentelemetry::OpenTelemetrySpanExt as _;
    use tracing_subscriber::layer::SubscriberExt;

    use super::*;

    const TRACEPARENT: &str = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";

    fn enabled() -> Telemetry {
        Telemetry::new(&TelemetryConfig::for_tests(Some("license")))
    }

    #[test]
    fn transaction_is_named_after_method_and_path() {
        let telemetry = enabled();
        let txn = telemetry.start_transaction(&Method::PATCH, "/products/7");
        assert_eq!(txn.name(), "PATCH /products/7");
    }

    #[test]
    fn missing_license_key_disables_without_failing() {
        let telemetry = Telemetry::new(&TelemetryConfig::for_tests(None));
        assert!(!telemetry.is_enabled());

        let mut txn = telemetry.start_transaction(&Method::GET, "/products/");
        txn.set_web_response(StatusCode::OK);
        drop(txn);

        assert_eq!(telemetry.stats(), TransactionStats::default());
    }

    #[test]
    fn endpoint_without_license_key_enables() {
        let telemetry = Telemetry::new(&TelemetryConfig {
            otlp_endpoint: Some("http://collector:4317".to_string()),
            ..TelemetryConfig::for_tests(None)
        });
        assert!(telemetry.is_enabled());
    }

    #[test]
    fn empty_app_name_disables() {
        let telemetry = Telemetry::new(&TelemetryConfig {
            app_name: " ".to_string(),
            ..TelemetryConfig::for_tests(Some("license"))
        });
        assert!(!telemetry.is_enabled());
    }

    #[test]
    fn drop_ends_the_transaction_exactly_once() {
        let telemetry = enabled();
        {
            let mut txn = telemetry.start_transaction(&Method::GET, "/products/");
            let req = Request::builder()
                .uri("/products/?x=1")
                .header("traceparent", TRACEPARENT)
                .body(())
                .unwrap();
            txn.set_web_request(&req);
            txn.set_web_response(StatusCode::OK);
            assert_eq!(telemetry.stats().started, 1);
            assert_eq!(telemetry.stats().ended, 0);
        }
        assert_eq!(
            telemetry.stats(),
            TransactionStats {
                started: 1,
                ended: 1,
                failed: 0
            }
        );
    }

    #[test]
    fn server_errors_count_as_failed() {
        let telemetry = enabled();

        let mut txn = telemetry.start_transaction(&Method::POST, "/products/");
        txn.set_web_response(StatusCode::INTERNAL_SERVER_ERROR);
        drop(txn);

        let mut txn = telemetry.start_transaction(&Method::POST, "/products/");
        txn.set_web_response(StatusCode::BAD_REQUEST);
        drop(txn);

        assert_eq!(telemetry.stats().ended, 2);
        assert_eq!(telemetry.stats().failed, 1);
    }

    #[test]
    fn panic_still_ends_the_transaction() {
        let telemetry = enabled();
        let cloned = telemetry.clone();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _txn = cloned.start_transaction(&Method::DELETE, "/products/1");
            panic!("handler blew up");
        }));

        assert!(result.is_err());
        assert_eq!(
            telemetry.stats(),
            TransactionStats {
                started: 1,
                ended: 1,
                failed: 0
            }
        );
    }

    #[test]
    fn incoming_trace_context_parents_the_transaction() {
        opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());
        let provider = SdkTracerProvider::builder().build();
        let subscriber = tracing_subscriber::registry()
            .with(tracing_opentelemetry::layer().with_tracer(provider.tracer("test")));

        tracing::subscriber::with_default(subscriber, || {
            let telemetry = enabled();
            let mut txn = telemetry.start_transaction(&Method::GET, "/products/");
            let req = Request::builder()
                .uri("/products/")
                .header("traceparent", TRACEPARENT)
                .body(())
                .unwrap();
            txn.set_web_request(&req);

            let context = txn.span().context();
            assert_eq!(
                context.span().span_context().trace_id(),
                TraceId::from_hex("4bf92f3577b34da6a3ce929d0e0e4736").unwrap()
            );
        });
    }

    #[test]
    fn distributed_tracing_off_ignores_the_caller() {
        opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());
        let provider = SdkTracerProvider::builder().build();
        let subscriber = tracing_subscriber::registry()
            .with(tracing_opentelemetry::layer().with_tracer(provider.tracer("test")));

        tracing::subscriber::with_default(subscriber, || {
            let telemetry = Telemetry::new(&TelemetryConfig {
                distributed_tracing: false,
                ..TelemetryConfig::for_tests(Some("license"))
            });
            let mut txn = telemetry.start_transaction(&Method::GET, "/products/");
            let req = Request::builder()
                .uri("/products/")
                .header("traceparent", TRACEPARENT)
                .body(())
                .unwrap();
            txn.set_web_request(&req);

            let context = txn.span().context();
            assert_ne!(
                context.span().span_context().trace_id(),
                TraceId::from_hex("4bf92f3577b34da6a3ce929d0e0e4736").unwrap()
            );
        });
    }
}
