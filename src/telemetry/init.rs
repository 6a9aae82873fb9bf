//! Subscriber setup and span export lifecycle.

use opentelemetry::{global, trace::TracerProvider as _};
use opentelemetry_sdk::{propagation::TraceContextPropagator, trace::SdkTracerProvider};
use tracing::{error, info, warn};
use tracing_subscriber::{
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter, Registry,
};

use crate::config::TelemetryConfig;

use super::{otel, TelemetryError};

const DEFAULT_FILTER: &str = "info,product_service=debug,h2=warn,hyper=warn,tonic=warn,opentelemetry=warn";

/// Process-wide logging and span export. Held by `main` until shutdown.
#[derive(Debug)]
pub struct Observability {
    tracer_provider: Option<SdkTracerProvider>,
}

impl Observability {
    /// Install the global subscriber. Spans go to the OTLP collector when an
    /// endpoint or license key is configured; logs always go to stdout.
    pub fn init(config: &TelemetryConfig) -> Result<Self, TelemetryError> {
        let mut export_failure = None;
        let tracer_provider = match config.exporter_endpoint() {
            Some(endpoint) => match otel::build_tracer_provider(config, endpoint) {
                Ok(provider) => Some(provider),
                Err(source) => {
                    export_failure = Some(source);
                    None
                }
            },
            None => None,
        };

        if tracer_provider.is_some() {
            global::set_text_map_propagator(TraceContextPropagator::new());
        }

        init_subscriber(
            config,
            tracing_subscriber::fmt::layer().compact().with_target(false),
            tracer_provider.as_ref(),
        )?;

        // The subscriber is live now, so the failure can be reported.
        if let Some(source) = export_failure {
            warn!("span export disabled: {source}");
        }
        if let (Some(endpoint), Some(_)) = (config.exporter_endpoint(), &tracer_provider) {
            info!(endpoint, "Exporting spans over OTLP");
        }

        Ok(Self { tracer_provider })
    }

    pub fn is_exporting(&self) -> bool {
        self.tracer_provider.is_some()
    }

    /// Flush pending spans and stop the exporter.
    pub fn shutdown(self) {
        let Some(provider) = self.tracer_provider else {
            return;
        };

        if let Err(source) = provider.shutdown() {
            error!("failed to shutdown tracer provider: {source}");
        }
    }
}

fn init_subscriber<L>(
    config: &TelemetryConfig,
    fmt_layer: L,
    tracer_provider: Option<&SdkTracerProvider>,
) -> Result<(), TelemetryError>
where
    L: Layer<Registry> + Send + Sync + 'static,
{
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let subscriber = tracing_subscriber::registry().with(fmt_layer).with(filter);

    if let Some(tracer_provider) = tracer_provider {
        let tracer = tracer_provider.tracer(config.app_name.clone());
        subscriber
            .with(tracing_opentelemetry::layer().with_tracer(tracer))
            .try_init()?;
    } else {
        subscriber.try_init()?;
    }

    Ok(())
}
