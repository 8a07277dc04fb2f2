//! Tracing initialisation, modeled on the teacher's
//! `utils::tracing_telemetry::init_tracing` helper: every binary calls this
//! once on start-up, tagged with its own component name, with an optional
//! Jaeger exporter layer wired in the same way the teacher's `core-agent`
//! binary does (`--jaeger <agent-endpoint>`, `--tracing-tags k=v,k2=v2`).

use opentelemetry::{sdk, trace::TraceError, KeyValue};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Parses a single `key=value` CLI argument into an OpenTelemetry resource
/// tag, for use with `structopt`'s `parse(try_from_str = ...)`.
pub fn parse_key_value(source: &str) -> Result<KeyValue, String> {
    let (key, value) = source
        .split_once('=')
        .ok_or_else(|| format!("tag '{}' is not in key=value form", source))?;
    Ok(KeyValue::new(key.to_string(), value.to_string()))
}

fn jaeger_tracer(component: &'static str, tags: Vec<KeyValue>, jaeger: &str) -> Result<sdk::trace::Tracer, TraceError> {
    opentelemetry_jaeger::new_agent_pipeline()
        .with_endpoint(jaeger)
        .with_service_name(component)
        .with_trace_config(sdk::trace::config().with_resource(sdk::Resource::new(tags)))
        .install_batch(opentelemetry::runtime::TokioCurrentThread)
}

/// Initialise a process-wide `tracing` subscriber: an env-filtered `fmt`
/// layer always, plus a Jaeger export layer when `jaeger` names an agent
/// endpoint (spec.md's ambient observability stack carries tracing
/// regardless of feature Non-goals).
pub fn init_tracing(component: &'static str, tracing_tags: Vec<KeyValue>, jaeger: Option<String>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter).with(fmt::layer().with_target(true));

    match jaeger {
        Some(endpoint) => match jaeger_tracer(component, tracing_tags, &endpoint) {
            Ok(tracer) => {
                let _ = registry.with(tracing_opentelemetry::layer().with_tracer(tracer)).try_init();
            }
            Err(err) => {
                let _ = registry.try_init();
                tracing::warn!(error = %err, "failed to install the Jaeger exporter; continuing without it");
            }
        },
        None => {
            let _ = registry.try_init();
        }
    }

    tracing::info!(component, "tracing initialised");
}

/// Flushes and shuts down the global tracer provider (spec.md ambient
/// observability stack's shutdown path), mirroring the teacher's
/// `opentelemetry::global::shutdown_tracer_provider()` call at the end of
/// every binary's `main`.
pub fn flush_tracing() {
    opentelemetry::global::shutdown_tracer_provider();
}
