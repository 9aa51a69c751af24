//! Local HTTP query interface
//!
//! Routes:
//! - `GET /peso`    - latest weight, or a failure message before the first reading
//! - `GET /status`  - app name and detected serial device
//! - `GET /metrics` - poll/dispatch counters in Prometheus text format
//!
//! Every response carries permissive CORS headers; the scale UI is served
//! from another origin.

use crate::domain::{LatestWeightCell, SerialPortHandle};
use crate::infra::stats::{Stats, StatsSnapshot};
use crate::io::port_locator::PortLocator;
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::json;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info};

const NO_READING_MESSAGE: &str = "Não foi possível ler a balança";
const PORT_NOT_DETECTED: &str = "não detectada";

/// Everything the routes read; shared by all connections
pub struct QueryState {
    app_name: String,
    version: String,
    latest: Arc<LatestWeightCell>,
    locator: Arc<PortLocator>,
    stats: Arc<Stats>,
}

impl QueryState {
    pub fn new(
        app_name: &str,
        latest: Arc<LatestWeightCell>,
        locator: Arc<PortLocator>,
        stats: Arc<Stats>,
    ) -> Self {
        Self {
            app_name: app_name.to_string(),
            version: format!("{}+{}", env!("CARGO_PKG_VERSION"), env!("GIT_HASH")),
            latest,
            locator,
            stats,
        }
    }
}

fn with_cors(builder: hyper::http::response::Builder) -> hyper::http::response::Builder {
    builder
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Methods", "GET, OPTIONS")
        .header("Access-Control-Allow-Headers", "*")
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response<Full<Bytes>> {
    with_cors(Response::builder())
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .expect("static response should not fail")
}

fn peso_body(state: &QueryState) -> serde_json::Value {
    match state.latest.get() {
        Some(peso) => json!({ "success": true, "peso": peso }),
        None => json!({ "success": false, "message": NO_READING_MESSAGE }),
    }
}

/// Cached device, or one discovery attempt on the blocking pool since
/// enumeration goes through udev and holds the locator lock
async fn detected_port(state: &QueryState) -> Option<SerialPortHandle> {
    if let Some(handle) = state.locator.cached() {
        return Some(handle);
    }

    let locator = state.locator.clone();
    match tokio::task::spawn_blocking(move || locator.locate()).await {
        Ok(handle) => handle,
        Err(e) => {
            error!(error = %e, "port_discovery_task_failed");
            None
        }
    }
}

fn status_body(state: &QueryState, port: Option<SerialPortHandle>) -> serde_json::Value {
    let porta = port
        .map(|handle| handle.to_string())
        .unwrap_or_else(|| PORT_NOT_DETECTED.to_string());

    json!({
        "success": true,
        "app": state.app_name,
        "porta": porta,
        "version": state.version,
    })
}

fn write_counter(output: &mut String, name: &str, help: &str, val: u64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} counter");
    let _ = writeln!(output, "{name} {val}");
}

fn write_gauge(output: &mut String, name: &str, help: &str, val: f64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} gauge");
    let _ = writeln!(output, "{name} {val}");
}

/// Format counters in Prometheus text exposition format
fn format_metrics(snap: &StatsSnapshot, state: &QueryState) -> String {
    let mut output = String::with_capacity(2048);

    write_counter(&mut output, "scale_bridge_ticks_total", "Poll ticks executed", snap.ticks);
    write_counter(
        &mut output,
        "scale_bridge_readings_total",
        "Ticks that produced a weight",
        snap.readings,
    );
    write_counter(
        &mut output,
        "scale_bridge_device_absent_total",
        "Ticks with no serial device detected",
        snap.device_absent,
    );
    write_counter(
        &mut output,
        "scale_bridge_transport_failures_total",
        "Ticks lost to serial open/read errors",
        snap.transport_failures,
    );
    write_counter(
        &mut output,
        "scale_bridge_parse_misses_total",
        "Ticks whose bytes held no weight",
        snap.parse_misses,
    );
    write_counter(
        &mut output,
        "scale_bridge_dispatches_ok_total",
        "Weights accepted by the remote API",
        snap.dispatches_ok,
    );
    write_counter(
        &mut output,
        "scale_bridge_dispatches_failed_total",
        "Weight POSTs that failed or timed out",
        snap.dispatches_failed,
    );
    write_counter(
        &mut output,
        "scale_bridge_dispatches_dropped_total",
        "Weights dropped because the dispatch queue was full",
        snap.dispatches_dropped,
    );
    write_gauge(
        &mut output,
        "scale_bridge_last_dispatch_latency_us",
        "Latency of the most recent POST in microseconds",
        snap.last_dispatch_latency_us as f64,
    );
    write_gauge(
        &mut output,
        "scale_bridge_uptime_seconds",
        "Seconds since start",
        snap.uptime_secs as f64,
    );
    write_gauge(
        &mut output,
        "scale_bridge_device_detected",
        "1 when a serial device has been selected",
        if state.locator.cached().is_some() { 1.0 } else { 0.0 },
    );
    if let Some(peso) = state.latest.get() {
        write_gauge(&mut output, "scale_bridge_weight_kg", "Latest weight read", peso.kg());
    }

    output
}

/// Route a request. Generic over the body, which is never read.
pub async fn handle_request<B>(
    req: Request<B>,
    state: Arc<QueryState>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    drop(req);
    debug!(method = %method, path = %path, "query_request");

    match (&method, path.as_str()) {
        (&Method::GET, "/peso") => Ok(json_response(StatusCode::OK, peso_body(&state))),
        (&Method::GET, "/status") => {
            let port = detected_port(&state).await;
            Ok(json_response(StatusCode::OK, status_body(&state, port)))
        }
        (&Method::GET, "/metrics") => {
            let body = format_metrics(&state.stats.snapshot(), &state);
            Ok(with_cors(Response::builder())
                .status(StatusCode::OK)
                .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
                .body(Full::new(Bytes::from(body)))
                .expect("static response should not fail"))
        }
        // CORS preflight
        (&Method::OPTIONS, _) => Ok(with_cors(Response::builder())
            .status(StatusCode::NO_CONTENT)
            .body(Full::new(Bytes::new()))
            .expect("static response should not fail")),
        _ => Ok(with_cors(Response::builder())
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from("Not Found")))
            .expect("static response should not fail")),
    }
}

/// Bound listener; binding is the only fatal startup step
pub struct QueryServer {
    listener: TcpListener,
    state: Arc<QueryState>,
}

impl QueryServer {
    pub async fn bind(
        bind_address: &str,
        port: u16,
        state: QueryState,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let addr: SocketAddr = format!("{bind_address}:{port}").parse()?;
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, state: Arc::new(state) })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until the shutdown signal flips to true or its sender is dropped
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let addr = self.local_addr().map(|a| a.to_string()).unwrap_or_default();
        info!(addr = %addr, app = %self.state.app_name, "query_server_started");

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => {
                            let io = TokioIo::new(stream);
                            let state = self.state.clone();

                            tokio::spawn(async move {
                                let service = service_fn(move |req| {
                                    let state = state.clone();
                                    async move { handle_request(req, state).await }
                                });

                                if let Err(e) = http1::Builder::new()
                                    .serve_connection(io, service)
                                    .await
                                {
                                    error!(error = %e, "query_http_error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "query_accept_error");
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("query_server_shutdown");
                        return;
                    }
                }
            }
        }
    }
}
