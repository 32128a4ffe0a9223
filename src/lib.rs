//! Provisions user identities into an LDAP directory.
//!
//! Users are created, read, updated and deleted through a small HTTP API.
//! Deletion can be soft: the entry stays in the directory with its active
//! flag cleared and disappears from every API operation.

#![forbid(unsafe_code)]

pub mod config;
pub mod directory;
pub mod error;
pub mod ldap;
pub mod provisioning;
mod router;
pub mod telemetry;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::{StatusCode, header};
use axum::routing::get;
use axum::{Router, middleware as AxumMiddleware};
pub use error::ServerError;
use metrics_exporter_prometheus::PrometheusHandle;
use tower::ServiceBuilder;
use tower_http::LatencyUnit;
use tower_http::request_id::{
    MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer,
};
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{
    DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer,
};

use provisioning::Provisioner;

/// MUST NEVER be used in production.
#[cfg(test)]
pub async fn make_request(
    app: Router,
    method: axum::http::Method,
    path: &str,
    body: String,
) -> axum::http::Response<axum::body::Body> {
    use axum::extract::Request;
    use tower::util::ServiceExt;

    app.oneshot(
        Request::builder()
            .method(method)
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json")
            .body(axum::body::Body::from(body))
            .unwrap(),
    )
    .await
    .unwrap()
}

/// State sharing between routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<config::Configuration>,
    pub provisioner: Arc<Provisioner>,
    pub metrics: Option<PrometheusHandle>,
}

/// Create router.
pub fn app(state: AppState) -> Router {
    let request_id = header::HeaderName::from_static("x-request-id");

    let middleware = ServiceBuilder::new()
        .layer(SetRequestIdLayer::new(request_id.clone(), MakeRequestUuid))
        // Add high level tracing/logging to all requests.
        .layer(
            TraceLayer::new_for_http()
                .on_body_chunk(
                    |chunk: &Bytes, latency: Duration, _span: &tracing::Span| {
                        tracing::trace!(
                            size_bytes = chunk.len(),
                            latency = ?latency,
                            "sending body chunk"
                        )
                    },
                )
                .make_span_with(
                    DefaultMakeSpan::new()
                        .include_headers(true)
                        .level(tracing::Level::INFO),
                )
                .on_request(DefaultOnRequest::new())
                .on_response(
                    DefaultOnResponse::new()
                        .include_headers(true)
                        .latency_unit(LatencyUnit::Micros),
                ),
        )
        .layer(PropagateRequestIdLayer::new(request_id))
        // Set a timeout.
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(30),
        ))
        // Remove sensitive headers from trace.
        .layer(SetSensitiveHeadersLayer::new([
            header::AUTHORIZATION,
            header::COOKIE,
        ]));

    Router::new()
        // `GET /status.json` goes to `status`.
        .route("/status.json", get(router::status::status))
        // `GET /metrics` goes to the Prometheus exporter.
        .route("/metrics", get(router::metrics::handler))
        .nest("/Users", router::users::router())
        .with_state(state)
        .route_layer(AxumMiddleware::from_fn(telemetry::track))
        .layer(middleware)
}

/// Initialize the application state.
pub async fn initialize_state(
    config: Arc<config::Configuration>,
) -> Result<AppState, ServerError> {
    let Some(ldap) = &config.ldap else {
        return Err(ServerError::Config(
            "missing `ldap` entry on `config.yaml` file".to_owned(),
        ));
    };
    if config.provisioning.base_dn.is_empty() {
        return Err(ServerError::Config(
            "missing `provisioning.base_dn` on `config.yaml` file".to_owned(),
        ));
    }

    let ldap_config = ldap
        .to_ldap_config()
        .map_err(|err| ServerError::Config(err.to_string()))?;
    tracing::info!(?ldap_config, "directory configured");

    let directory = Arc::new(ldap::LdapDirectory::new(ldap_config));
    let provisioner = Provisioner::new(
        directory,
        config.provisioning.to_provisioner_config(),
    );

    let metrics = if config.metrics {
        Some(
            telemetry::setup_metrics_recorder()
                .map_err(|err| ServerError::Config(err.to_string()))?,
        )
    } else {
        None
    };

    Ok(AppState {
        config,
        provisioner: Arc::new(provisioner),
        metrics,
    })
}
