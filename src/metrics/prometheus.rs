//! Prometheus metrics definitions and HTTP server

use std::net::SocketAddr;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram_vec, CounterVec,
    Encoder, Gauge, GaugeVec, HistogramVec, TextEncoder,
};
use tokio::net::TcpListener;
use tracing::{error, info};

lazy_static::lazy_static! {
    /// Total number of reconciliations
    pub static ref RECONCILIATIONS: CounterVec = register_counter_vec!(
        "apacheweb_operator_reconciliations_total",
        "Total number of reconciliations",
        &["kind"]
    ).expect("metric can be registered");

    /// Total number of reconciliation errors
    pub static ref RECONCILIATION_ERRORS: CounterVec = register_counter_vec!(
        "apacheweb_operator_reconciliation_errors_total",
        "Total number of reconciliation errors by error kind",
        &["kind", "error"]
    ).expect("metric can be registered");

    /// Reconciliation duration histogram
    pub static ref RECONCILE_DURATION: HistogramVec = register_histogram_vec!(
        "apacheweb_operator_reconcile_duration_seconds",
        "Duration of reconciliations in seconds",
        &["kind"],
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    ).expect("metric can be registered");

    /// Passes that found nothing to write
    pub static ref RECONCILE_SKIPS: CounterVec = register_counter_vec!(
        "apacheweb_operator_reconcile_skips_total",
        "Reconciliations skipped because the applied state was current",
        &["kind"]
    ).expect("metric can be registered");

    /// Child resources written
    pub static ref APPLIED_RESOURCES: CounterVec = register_counter_vec!(
        "apacheweb_operator_applied_resources_total",
        "Child resources applied by resource kind",
        &["resource"]
    ).expect("metric can be registered");

    /// Backends per load balancer
    pub static ref OBSERVED_ENDPOINTS: GaugeVec = register_gauge_vec!(
        "apacheweb_operator_observed_endpoints",
        "Backend endpoints written into the last applied configuration",
        &["namespace", "name", "ready"]
    ).expect("metric can be registered");

    /// Operator health (1 = healthy, 0 = unhealthy)
    pub static ref OPERATOR_HEALTH: Gauge = register_gauge!(
        "apacheweb_operator_health",
        "Operator health status (1 = healthy, 0 = unhealthy)"
    ).expect("metric can be registered");
}

/// Drop the per-ApacheWeb series of a deleted ApacheWeb
pub fn forget_web(namespace: &str, name: &str) {
    for ready in ["true", "false"] {
        // Absent series are fine, the ApacheWeb may never have been applied
        let _ = OBSERVED_ENDPOINTS.remove_label_values(&[namespace, name, ready]);
    }
}

/// Start the metrics HTTP server
pub async fn serve(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    OPERATOR_HEALTH.set(1.0);

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(handle_request))
                .await
            {
                error!("Error serving connection: {}", e);
            }
        });
    }
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let response = match req.uri().path() {
        "/metrics" => metrics_response(),
        "/healthz" | "/health" | "/readyz" | "/ready" => text_response(StatusCode::OK, "ok"),
        _ => text_response(StatusCode::NOT_FOUND, "Not Found"),
    };

    Ok(response)
}

/// Generate metrics response
fn metrics_response() -> Response<Full<Bytes>> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return text_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics");
    }

    let mut response = Response::new(Full::new(Bytes::from(buffer)));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(prometheus::TEXT_FORMAT));
    response
}

fn text_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
}
