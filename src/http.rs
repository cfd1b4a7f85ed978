// HTTP module - serves the metric store to Prometheus scrapers
//
// Routes:
// - GET /         static page pointing at the metrics endpoint
// - GET /metrics  text exposition of every gauge family

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::storage::MetricStore;

const INDEX_PAGE: &str = r#"<html>
<head><title>RabbitMQ Exporter</title></head>
<body>
<h1>RabbitMQ Exporter</h1>
<p><a href="/metrics">Metrics</a></p>
</body>
</html>
"#;

/// Builds the exporter's router around a shared store
pub fn app(store: Arc<MetricStore>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(store)
}

async fn index() -> Html<&'static str> {
    Html(INDEX_PAGE)
}

async fn metrics(State(store): State<Arc<MetricStore>>) -> Response {
    match store.encode() {
        Ok(body) => ([(header::CONTENT_TYPE, store.content_type())], body).into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}
