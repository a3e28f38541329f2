use axum::http::HeaderValue;
use axum::response::{IntoResponse, Response};
use once_cell::sync::{Lazy, OnceCell};
use prometheus::{Encoder, Registry, TextEncoder};
use tracing::error;

static GLOBAL_REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);
static REGISTER_ONCE: OnceCell<()> = OnceCell::new();

pub fn register_metrics() {
    REGISTER_ONCE.get_or_init(|| {
        let registry = global_registry();
        formpilot_session_recovery::metrics::register_metrics(registry);
        formpilot_context_pool::metrics::register_metrics(registry);
    });
}

pub fn global_registry() -> &'static Registry {
    &GLOBAL_REGISTRY
}

/// Render the global registry in the Prometheus text exposition format.
pub async fn metrics_handler() -> Response {
    let encoder = TextEncoder::new();
    let format_type = encoder.format_type().to_string();
    let metric_families = global_registry().gather();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        error!(?err, "failed to encode prometheus metrics");
        return (
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            "metric encode error",
        )
            .into_response();
    }

    match (String::from_utf8(buffer), HeaderValue::from_str(&format_type)) {
        (Ok(body), Ok(content_type)) => {
            ([(axum::http::header::CONTENT_TYPE, content_type)], body).into_response()
        }
        (body, header) => {
            error!(body_err = body.is_err(), header_err = header.is_err(), "failed to render metrics response");
            (
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                "metric encode error",
            )
                .into_response()
        }
    }
}
