//! Mock remote API
//!
//! Stands in for the weight endpoint during bench tests with a real scale.
//!
//! Behavior:
//! 1. Listens on a configurable port (default 8080)
//! 2. Accepts `POST` on any path and logs the `{peso, timestamp}` body
//! 3. Optionally answers every Nth request with 500, or delays every response,
//!    to exercise the bridge's failure and timeout handling
//!
//! Usage:
//!   cargo run --bin mock_api -- --port 8080 --fail-every 3 --delay-ms 2500
//!   (point `dispatch.url` at http://localhost:8080/api/balanca/um)

use bytes::Bytes;
use clap::Parser;
use http_body_util::{BodyExt, Full};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

#[derive(Parser, Debug, Clone)]
#[command(name = "mock_api")]
#[command(about = "Mock remote weight API for local testing")]
struct Args {
    /// TCP port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Answer every Nth POST with HTTP 500 (0 = never)
    #[arg(long, default_value = "0")]
    fail_every: u64,

    /// Delay before answering each POST (ms)
    #[arg(long, default_value = "0")]
    delay_ms: u64,
}

#[derive(Debug, Deserialize)]
struct WeightBody {
    peso: f64,
    timestamp: i64,
}

async fn handle(
    req: Request<hyper::body::Incoming>,
    args: Arc<Args>,
    counter: Arc<AtomicU64>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    if req.method() != Method::POST {
        return Ok(Response::builder()
            .status(StatusCode::METHOD_NOT_ALLOWED)
            .body(Full::new(Bytes::new()))
            .expect("static response should not fail"));
    }

    let path = req.uri().path().to_string();
    let n = counter.fetch_add(1, Ordering::Relaxed) + 1;

    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(error = %e, "mock_api_body_read_failed");
            Bytes::new()
        }
    };

    match serde_json::from_slice::<WeightBody>(&body) {
        Ok(weight) => info!(n = n, path = %path, peso = weight.peso, timestamp = weight.timestamp, "weight_received"),
        Err(e) => warn!(n = n, path = %path, error = %e, body = %String::from_utf8_lossy(&body), "invalid_weight_body"),
    }

    if args.delay_ms > 0 {
        tokio::time::sleep(Duration::from_millis(args.delay_ms)).await;
    }

    let status = if args.fail_every > 0 && n % args.fail_every == 0 {
        warn!(n = n, "mock_api_injected_failure");
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    };

    Ok(Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(format!(r#"{{"ok":{}}}"#, status.is_success()))))
        .expect("static response should not fail"))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_target(false).init();

    let args = Arc::new(Args::parse());
    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = TcpListener::bind(addr).await?;
    let counter = Arc::new(AtomicU64::new(0));

    info!(
        port = args.port,
        fail_every = args.fail_every,
        delay_ms = args.delay_ms,
        "mock_api_listening"
    );

    loop {
        let (stream, _peer) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let args = args.clone();
        let counter = counter.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| handle(req, args.clone(), counter.clone()));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!(error = %e, "mock_api_http_error");
            }
        });
    }
}
