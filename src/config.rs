use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context};
use sqlx::postgres::{PgConnectOptions, PgSslMode};

/// Which of the two deployed route layouts the router serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteLayout {
    /// `POST /products/`, `GET /products/`, `GET|PATCH|DELETE /products/:id`
    Products,
    /// `POST /`, `GET /`, `PATCH|DELETE /:id`
    Root,
}

impl FromStr for RouteLayout {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "products" | "a" => Ok(Self::Products),
            "root" | "b" => Ok(Self::Root),
            other => bail!("unknown route layout '{}' (expected 'products' or 'root')", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Full connection URL; takes precedence over the discrete options below.
    pub url: Option<String>,
    pub host: String,
    pub user: String,
    pub password: String,
    pub dbname: String,
    pub port: u16,
    pub sslmode: PgSslMode,
    pub timezone: String,
    pub max_connections: u32,
    pub max_lifetime: Duration,
    pub acquire_timeout: Duration,
}

impl DatabaseConfig {
    pub fn connect_options(&self) -> Result<PgConnectOptions, sqlx::Error> {
        let options = match &self.url {
            Some(url) => url.parse::<PgConnectOptions>()?,
            None => PgConnectOptions::new()
                .host(&self.host)
                .username(&self.user)
                .password(&self.password)
                .database(&self.dbname)
                .port(self.port)
                .ssl_mode(self.sslmode),
        };

        Ok(options.options([("TimeZone", self.timezone.as_str())]))
    }
}

/// Collector address used when only a license key is configured.
pub const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4317";

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub app_name: String,
    pub license_key: Option<String>,
    pub distributed_tracing: bool,
    pub otlp_endpoint: Option<String>,
    pub otlp_timeout: Duration,
    pub sample_ratio: f64,
}

impl TelemetryConfig {
    /// Where spans are exported, if anywhere. An explicit endpoint wins; a
    /// license key alone falls back to the local collector.
    pub fn exporter_endpoint(&self) -> Option<&str> {
        match (&self.otlp_endpoint, &self.license_key) {
            (Some(endpoint), _) => Some(endpoint.as_str()),
            (None, Some(_)) => Some(DEFAULT_OTLP_ENDPOINT),
            (None, None) => None,
        }
    }

    #[cfg(test)]
    pub fn for_tests(license_key: Option<&str>) -> Self {
        Self {
            app_name: "product-service-test".to_string(),
            license_key: license_key.map(str::to_string),
            distributed_tracing: true,
            otlp_endpoint: None,
            otlp_timeout: Duration::from_secs(1),
            sample_ratio: 1.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub route_layout: RouteLayout,
    pub database: DatabaseConfig,
    pub telemetry: TelemetryConfig,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup so tests don't have to mutate the process env.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let database = DatabaseConfig {
            url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            host: var("DB_HOST", "localhost"),
            user: var("DB_USER", "postgres"),
            password: var("DB_PASSWORD", ""),
            dbname: var("DB_NAME", "test"),
            port: var("DB_PORT", "5432")
                .parse()
                .context("DB_PORT must be a valid number")?,
            sslmode: var("DB_SSLMODE", "disable")
                .parse()
                .context("DB_SSLMODE must be one of disable, allow, prefer, require, verify-ca, verify-full")?,
            timezone: var("DB_TIMEZONE", "UTC"),
            max_connections: var("DB_MAX_CONNECTIONS", "10")
                .parse()
                .context("DB_MAX_CONNECTIONS must be a valid number")?,
            max_lifetime: Duration::from_secs(
                var("DB_MAX_LIFETIME_SECS", "10")
                    .parse()
                    .context("DB_MAX_LIFETIME_SECS must be a valid number")?,
            ),
            acquire_timeout: Duration::from_secs(
                var("DB_ACQUIRE_TIMEOUT_SECS", "30")
                    .parse()
                    .context("DB_ACQUIRE_TIMEOUT_SECS must be a valid number")?,
            ),
        };

        let telemetry = TelemetryConfig {
            app_name: var("TELEMETRY_APP_NAME", "product-service"),
            license_key: lookup("TELEMETRY_LICENSE_KEY").filter(|key| !key.trim().is_empty()),
            distributed_tracing: var("TELEMETRY_DISTRIBUTED_TRACING", "true")
                .parse()
                .context("TELEMETRY_DISTRIBUTED_TRACING must be true or false")?,
            otlp_endpoint: lookup("OTEL_EXPORTER_OTLP_ENDPOINT")
                .filter(|endpoint| !endpoint.trim().is_empty()),
            otlp_timeout: Duration::from_secs(
                var("OTEL_EXPORTER_OTLP_TIMEOUT_SECONDS", "10")
                    .parse()
                    .context("OTEL_EXPORTER_OTLP_TIMEOUT_SECONDS must be a valid number")?,
            ),
            sample_ratio: var("OTEL_TRACE_SAMPLE_RATIO", "1.0")
                .parse()
                .context("OTEL_TRACE_SAMPLE_RATIO must be a number between 0 and 1")?,
        };

        Ok(Self {
            host: var("HOST", "0.0.0.0"),
            port: var("PORT", "3000")
                .parse()
                .context("PORT must be a valid number")?,
            route_layout: var("ROUTE_LAYOUT", "products").parse()?,
            database,
            telemetry,
        })
    }
}
