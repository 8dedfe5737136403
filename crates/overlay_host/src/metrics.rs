use axum::{response::IntoResponse, routing::get, Router};
use prometheus::{Encoder, Registry, TextEncoder};

/// `/metrics` route serving `registry` in the Prometheus text format.
pub fn router(registry: Registry) -> Router {
    Router::new().route(
        "/metrics",
        get(move || {
            let registry = registry.clone();
            async move {
                let families = registry.gather();
                let mut buf = Vec::new();
                if let Err(e) = TextEncoder::new().encode(&families, &mut buf) {
                    tracing::error!(error = %e, "Failed to encode metrics");
                }
                String::from_utf8_lossy(&buf).into_owned().into_response()
            }
        }),
    )
}
