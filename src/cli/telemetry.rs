use super::commands::logging::{LogFormat, Options};
use anyhow::{Context, Result, anyhow};
use base64ct::{Base64, Encoding};
use opentelemetry::propagation::TextMapCompositePropagator;
use opentelemetry::{KeyValue, global, trace::TracerProvider as _};
use opentelemetry_otlp::{WithExportConfig, WithTonicConfig};
use opentelemetry_sdk::{
    Resource,
    propagation::{BaggagePropagator, TraceContextPropagator},
    runtime,
    trace::{Tracer, TracerProvider},
};
use std::{env::var, sync::OnceLock, time::Duration};
use tonic::{
    metadata::{Ascii, Binary, MetadataKey, MetadataMap, MetadataValue},
    transport::ClientTlsConfig,
};
use tracing::{Level, debug};
use tracing_subscriber::{EnvFilter, Registry, fmt, layer::SubscriberExt};
use ulid::Ulid;
use url::Url;

const ENV_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";
const ENV_HEADERS: &str = "OTEL_EXPORTER_OTLP_HEADERS";
const ENV_INSTANCE_ID: &str = "OTEL_SERVICE_INSTANCE_ID";
const EXPORT_TIMEOUT: Duration = Duration::from_secs(3);

static TRACER_PROVIDER: OnceLock<TracerProvider> = OnceLock::new();

/// Where spans go, read from the standard OTLP environment variables.
#[derive(Debug)]
struct Exporter {
    endpoint: Url,
    metadata: MetadataMap,
    instance_id: String,
}

impl Exporter {
    /// `None` when no endpoint is configured; tracing stays local.
    fn from_env() -> Result<Option<Self>> {
        let Ok(raw) = var(ENV_ENDPOINT) else {
            return Ok(None);
        };
        let endpoint = endpoint(&raw)?;
        let metadata = match var(ENV_HEADERS) {
            Ok(headers) => metadata(&headers)?,
            Err(_) => MetadataMap::new(),
        };
        let instance_id = var(ENV_INSTANCE_ID).unwrap_or_else(|_| Ulid::new().to_string());
        Ok(Some(Self {
            endpoint,
            metadata,
            instance_id,
        }))
    }

    fn tls(&self) -> Option<ClientTlsConfig> {
        if self.endpoint.scheme() != "https" {
            return None;
        }
        let host = self.endpoint.host_str()?;
        Some(
            ClientTlsConfig::new()
                .domain_name(host.to_string())
                .with_native_roots(),
        )
    }

    fn tracer(self) -> Result<Tracer> {
        let mut builder = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(self.endpoint.as_str().trim_end_matches('/'))
            .with_timeout(EXPORT_TIMEOUT);
        if let Some(tls) = self.tls() {
            builder = builder.with_tls_config(tls);
        }
        if !self.metadata.is_empty() {
            builder = builder.with_metadata(self.metadata);
        }
        let exporter = builder.build()?;

        let provider = TracerProvider::builder()
            .with_batch_exporter(exporter, runtime::Tokio)
            .with_resource(Resource::new(vec![
                KeyValue::new("service.name", env!("CARGO_PKG_NAME")),
                KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                KeyValue::new("service.instance.id", self.instance_id),
            ]))
            .build();

        let _ = TRACER_PROVIDER.set(provider.clone());
        global::set_tracer_provider(provider.clone());
        global::set_text_map_propagator(TextMapCompositePropagator::new(vec![
            Box::new(TraceContextPropagator::new()),
            Box::new(BaggagePropagator::new()),
        ]));

        Ok(provider.tracer(env!("CARGO_PKG_NAME")))
    }
}

/// Bare `host:port` values default to https.
fn endpoint(raw: &str) -> Result<Url> {
    let raw = raw.trim();
    let candidate = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("https://{raw}")
    };
    let url = Url::parse(&candidate).with_context(|| format!("invalid {ENV_ENDPOINT}: {raw}"))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(anyhow!("{ENV_ENDPOINT} scheme must be http or https, got {scheme}")),
    }
}

/// Parses `key=value,key2=value2`. Keys ending in `-bin` carry base64 values.
fn metadata(headers: &str) -> Result<MetadataMap> {
    let mut map = MetadataMap::new();
    for pair in headers.split(',') {
        let Some((key, value)) = pair.split_once('=') else {
            if !pair.trim().is_empty() {
                debug!("ignoring malformed {ENV_HEADERS} entry");
            }
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();

        if key.ends_with("-bin") {
            let bytes = Base64::decode_vec(value)
                .map_err(|err| anyhow!("metadata {key} is not valid base64: {err}"))?;
            let key = MetadataKey::<Binary>::from_bytes(key.as_bytes())
                .map_err(|err| anyhow!("invalid metadata key {key}: {err}"))?;
            map.insert_bin(key, MetadataValue::from_bytes(&bytes));
        } else {
            let value: MetadataValue<Ascii> = value
                .parse()
                .map_err(|err| anyhow!("invalid metadata value for {key}: {err}"))?;
            let key = MetadataKey::<Ascii>::from_bytes(key.as_bytes())
                .map_err(|err| anyhow!("invalid metadata key {key}: {err}"))?;
            map.insert(key, value);
        }
    }
    Ok(map)
}

fn filter(level: Option<Level>) -> Result<EnvFilter> {
    Ok(EnvFilter::builder()
        .with_default_directive(level.unwrap_or(Level::ERROR).into())
        .from_env_lossy()
        .add_directive("hyper=error".parse()?)
        .add_directive("tokio=error".parse()?)
        // Statement logging duplicates the db.query spans.
        .add_directive("sqlx=warn".parse()?)
        .add_directive("opentelemetry_sdk=warn".parse()?))
}

/// Installs the global subscriber: stderr logs in the chosen format, plus an
/// OTLP/gRPC span exporter when `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
///
/// # Errors
///
/// Returns an error if the exporter settings are invalid or a subscriber is
/// already installed.
pub fn init(options: &Options) -> Result<()> {
    let (pretty, json) = match options.format {
        LogFormat::Pretty => (Some(fmt::layer().with_target(false).pretty()), None),
        LogFormat::Json => (
            None,
            Some(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_current_span(true)
                    .with_span_list(false),
            ),
        ),
    };

    let otel = Exporter::from_env()?
        .map(Exporter::tracer)
        .transpose()?
        .map(|tracer| tracing_opentelemetry::layer().with_tracer(tracer));

    let subscriber = Registry::default()
        .with(filter(options.level)?)
        .with(pretty)
        .with(json)
        .with(otel);
    tracing::subscriber::set_global_default(subscriber)?;

    Ok(())
}

/// Flushes pending spans; noop when no exporter was installed.
pub fn shutdown_tracer() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        debug!("shutting down tracer provider");
        let _ = provider.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_endpoint_defaults_to_https() -> Result<()> {
        let url = endpoint("otel.internal:4317")?;
        assert_eq!(url.scheme(), "https");
        assert_eq!(url.host_str(), Some("otel.internal"));
        assert_eq!(url.port(), Some(4317));

        assert_eq!(endpoint("http://localhost:4317")?.scheme(), "http");
        assert!(endpoint("ftp://collector").is_err());
        Ok(())
    }

    #[test]
    fn metadata_parses_ascii_pairs() -> Result<()> {
        let map = metadata("Authorization = Bearer abc , x-tenant=acme,malformed,")?;
        assert_eq!(map.len(), 2);
        assert_eq!(
            map.get("authorization").and_then(|v| v.to_str().ok()),
            Some("Bearer abc")
        );
        assert_eq!(map.get("x-tenant").and_then(|v| v.to_str().ok()), Some("acme"));
        Ok(())
    }

    #[test]
    fn metadata_decodes_binary_values() -> Result<()> {
        let map = metadata("trace-bin=YmluYXJ5")?;
        let value = map
            .get_bin("trace-bin")
            .ok_or_else(|| anyhow!("missing binary entry"))?;
        assert_eq!(value.to_bytes().map_err(|e| anyhow!("{e}"))?.as_ref(), b"binary");

        assert!(metadata("trace-bin=not base64!").is_err());
        Ok(())
    }

    #[test]
    fn exporter_disabled_without_endpoint() -> Result<()> {
        temp_env::with_vars_unset([ENV_ENDPOINT, ENV_HEADERS], || {
            assert!(Exporter::from_env()?.is_none());
            Ok(())
        })
    }

    #[test]
    fn exporter_reads_environment() -> Result<()> {
        temp_env::with_vars(
            [
                (ENV_ENDPOINT, Some("https://collector.example.com:4317/")),
                (ENV_HEADERS, Some("x-api-key=secret")),
                (ENV_INSTANCE_ID, Some("custodia-a")),
            ],
            || {
                let exporter = Exporter::from_env()?.ok_or_else(|| anyhow!("exporter expected"))?;
                assert_eq!(exporter.instance_id, "custodia-a");
                assert_eq!(exporter.metadata.len(), 1);
                assert!(exporter.tls().is_some());
                Ok(())
            },
        )
    }

    #[test]
    fn plain_http_endpoint_skips_tls() -> Result<()> {
        temp_env::with_vars(
            [(ENV_ENDPOINT, Some("http://localhost:4317")), (ENV_HEADERS, None)],
            || {
                let exporter = Exporter::from_env()?.ok_or_else(|| anyhow!("exporter expected"))?;
                assert!(exporter.tls().is_none());
                assert!(exporter.metadata.is_empty());
                Ok(())
            },
        )
    }

    #[test]
    fn shutdown_without_exporter_is_noop() {
        shutdown_tracer();
    }
}
