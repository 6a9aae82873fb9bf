//! OTLP span export.

use opentelemetry::KeyValue;
use opentelemetry_otlp::{
    tonic_types::metadata::MetadataMap,
    WithExportConfig, WithTonicConfig,
};
use opentelemetry_sdk::{
    trace::{RandomIdGenerator, Sampler, SdkTracerProvider},
    Resource,
};

use crate::config::TelemetryConfig;

use super::TelemetryError;

/// gRPC metadata key the collector authenticates the license key with.
const LICENSE_KEY_HEADER: &str = "api-key";

pub(super) fn build_tracer_provider(
    config: &TelemetryConfig,
    endpoint: &str,
) -> Result<SdkTracerProvider, TelemetryError> {
    let resource = Resource::builder_empty()
        .with_service_name(config.app_name.clone())
        .with_attributes([KeyValue::new(
            "service.version",
            env!("CARGO_PKG_VERSION"),
        )])
        .build();

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint.to_string())
        .with_timeout(config.otlp_timeout)
        .with_metadata(license_metadata(config.license_key.as_deref())?)
        .build()?;

    Ok(SdkTracerProvider::builder()
        .with_sampler(Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(
            clamp_sample_ratio(config.sample_ratio),
        ))))
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource)
        .with_batch_exporter(exporter)
        .build())
}

fn license_metadata(license_key: Option<&str>) -> Result<MetadataMap, TelemetryError> {
    let mut metadata = MetadataMap::new();
    if let Some(key) = license_key {
        let value = key.parse().map_err(|_| TelemetryError::LicenseKey)?;
        metadata.insert(LICENSE_KEY_HEADER, value);
    }
    Ok(metadata)
}

fn clamp_sample_ratio(sample_ratio: f64) -> f64 {
    if sample_ratio.is_nan() {
        return 1.0;
    }
    sample_ratio.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_ratio_is_clamped() {
        assert_eq!(clamp_sample_ratio(1.5), 1.0);
        assert_eq!(clamp_sample_ratio(-0.2), 0.0);
        assert_eq!(clamp_sample_ratio(0.25), 0.25);
        assert_eq!(clamp_sample_ratio(f64::NAN), 1.0);
    }

    #[test]
    fn license_key_travels_as_metadata() {
        let metadata = license_metadata(Some("nr-key")).unwrap();
        assert_eq!(metadata.get(LICENSE_KEY_HEADER).unwrap().to_str().unwrap(), "nr-key");

        assert!(license_metadata(None).unwrap().is_empty());
        assert!(matches!(
            license_metadata(Some("bad\nkey")),
            Err(TelemetryError::LicenseKey)
        ));
    }
}
