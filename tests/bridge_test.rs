//! End-to-end: scripted scale -> monitor -> remote API, with /peso served alongside

use async_trait::async_trait;
use httpmock::prelude::*;
use parking_lot::Mutex;
use scale_bridge::domain::{LatestWeightCell, SerialPortHandle};
use scale_bridge::infra::{Config, PortSelection, Stats};
use scale_bridge::io::{
    ByteSource, HttpDispatcher, PortEnumerator, PortLocator, QueryServer, QueryState, SerialReader,
};
use scale_bridge::services::{create_dispatch_worker, Monitor};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

struct OneUsbPort;

impl PortEnumerator for OneUsbPort {
    fn list_ports(&self) -> Result<Vec<String>, tokio_serial::Error> {
        Ok(vec!["/dev/ttyAMA0".to_string(), "/dev/ttyUSB0".to_string()])
    }
}

/// Replays bursts as the scale would emit them, then reports a read timeout
struct ScaleBursts(Mutex<VecDeque<&'static str>>);

#[async_trait]
impl ByteSource for ScaleBursts {
    async fn read_window(&self, device: &SerialPortHandle) -> std::io::Result<Vec<u8>> {
        assert_eq!(device.as_str(), "/dev/ttyUSB0");
        match self.0.lock().pop_front() {
            Some(burst) => Ok(burst.as_bytes().to_vec()),
            None => Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "no data")),
        }
    }
}

#[tokio::test]
async fn test_bridge_forwards_changes_and_serves_latest() {
    let api = MockServer::start_async().await;
    let first = api
        .mock_async(|when, then| {
            when.method(POST).path("/api/balanca/um").json_body_partial(r#"{"peso": 1.0}"#);
            then.status(200);
        })
        .await;
    let second = api
        .mock_async(|when, then| {
            when.method(POST).path("/api/balanca/um").json_body_partial(r#"{"peso": 2.5}"#);
            then.status(200);
        })
        .await;

    let config = Config::default();
    let locator = Arc::new(PortLocator::with_enumerator(
        OneUsbPort,
        PortSelection::Prefix,
        "/dev/ttyUSB",
    ));
    let bursts = ScaleBursts(Mutex::new(VecDeque::from([
        "= 001.000= 001.000= 001.000",
        "= 001.000= 001.0004",
        "\u{2}garbage",
        "= 001.000= 002.500",
        "= 002.500= 002.500",
    ])));
    let reader = SerialReader::with_source(locator.clone(), bursts);
    let latest = Arc::new(LatestWeightCell::new());
    let stats = Arc::new(Stats::new());

    let sink = Arc::new(HttpDispatcher::with_url(
        &api.url("/api/balanca/um"),
        Duration::from_secs(2),
    ));
    let (dispatch_tx, worker) = create_dispatch_worker(sink, stats.clone(), 8);
    let worker_handle = tokio::spawn(worker.run());

    let state = QueryState::new("Balanca Teste", latest.clone(), locator, stats.clone());
    let server = QueryServer::bind("127.0.0.1", 0, state).await.unwrap();
    let addr = server.local_addr().unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server_handle = tokio::spawn(server.run(shutdown_rx.clone()));
    let monitor = Monitor::new(&config, reader, latest, dispatch_tx, stats.clone())
        .with_poll_interval(Duration::from_millis(5));
    let monitor_handle = tokio::spawn(monitor.run(shutdown_rx));

    let deadline = Instant::now() + Duration::from_secs(5);
    while stats.snapshot().dispatches_ok < 2 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let peso: serde_json::Value =
        reqwest::get(format!("http://{addr}/peso")).await.unwrap().json().await.unwrap();
    assert_eq!(peso, serde_json::json!({"success": true, "peso": 2.5}));

    let status: serde_json::Value =
        reqwest::get(format!("http://{addr}/status")).await.unwrap().json().await.unwrap();
    assert_eq!(status["app"], "Balanca Teste");
    assert_eq!(status["porta"], "/dev/ttyUSB0");

    shutdown_tx.send(true).unwrap();
    monitor_handle.await.unwrap();
    server_handle.await.unwrap();
    worker_handle.await.unwrap();

    first.assert_hits_async(1).await;
    second.assert_hits_async(1).await;

    let snap = stats.snapshot();
    assert_eq!(snap.dispatches_ok, 2);
    assert_eq!(snap.dispatches_failed, 0);
    assert_eq!(snap.readings, 4);
    assert_eq!(snap.parse_misses, 1);
}
