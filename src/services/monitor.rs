//! Scale monitor - the poll loop
//!
//! Each tick: read one weight, publish it to the latest-weight cell, and
//! enqueue a dispatch when the change filter lets it through. A tick with no
//! reading leaves the cell untouched, so `/peso` keeps serving the last good
//! value. The loop sleeps a fixed interval between ticks and stops only on
//! the shutdown signal.

use crate::domain::{DispatchPayload, LatestWeightCell, WeightReading};
use crate::infra::config::Config;
use crate::infra::stats::Stats;
use crate::io::serial_reader::{ReadError, SerialReader};
use crate::services::change_filter::ChangeFilter;
use crate::services::dispatch_worker::DispatchCmd;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    /// Waiting for the next tick
    Idle,
    /// Reading the scale and deciding on dispatch
    Polling,
}

/// Result of a single poll tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickOutcome {
    /// New weight, handed to the dispatch worker
    Dispatched(WeightReading),
    /// New weight within the variation threshold of the last dispatch
    Unchanged(WeightReading),
    DeviceAbsent,
    TransportFailure,
    ParseMiss,
}

impl TickOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TickOutcome::Dispatched(_) => "dispatched",
            TickOutcome::Unchanged(_) => "unchanged",
            TickOutcome::DeviceAbsent => "device_absent",
            TickOutcome::TransportFailure => "transport_failure",
            TickOutcome::ParseMiss => "parse_miss",
        }
    }

    pub fn reading(&self) -> Option<WeightReading> {
        match self {
            TickOutcome::Dispatched(w) | TickOutcome::Unchanged(w) => Some(*w),
            _ => None,
        }
    }
}

pub struct Monitor {
    reader: SerialReader,
    filter: ChangeFilter,
    latest: Arc<LatestWeightCell>,
    dispatch_tx: mpsc::Sender<DispatchCmd>,
    stats: Arc<Stats>,
    poll_interval: Duration,
    stats_interval: Option<Duration>,
    state: MonitorState,
    /// Failure class of the previous tick, for logging transitions only once
    last_failure: Option<&'static str>,
}

impl Monitor {
    pub fn new(
        config: &Config,
        reader: SerialReader,
        latest: Arc<LatestWeightCell>,
        dispatch_tx: mpsc::Sender<DispatchCmd>,
        stats: Arc<Stats>,
    ) -> Self {
        let stats_interval = match config.stats_interval_secs() {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        Self {
            reader,
            filter: ChangeFilter::new(config.variation_threshold()),
            latest,
            dispatch_tx,
            stats,
            poll_interval: config.poll_interval(),
            stats_interval,
            state: MonitorState::Idle,
            last_failure: None,
        }
    }

    /// Override the pause between ticks
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    pub fn last_dispatched(&self) -> Option<WeightReading> {
        self.filter.last_dispatched()
    }

    /// Run one poll tick
    pub async fn tick(&mut self) -> TickOutcome {
        self.state = MonitorState::Polling;
        self.stats.record_tick();

        let outcome = match self.reader.try_read_weight().await {
            Ok(weight) => {
                self.stats.record_reading();
                self.latest.set(weight);

                if self.filter.consider(weight) {
                    self.enqueue_dispatch(weight);
                    TickOutcome::Dispatched(weight)
                } else {
                    TickOutcome::Unchanged(weight)
                }
            }
            Err(ReadError::DeviceAbsent) => {
                self.stats.record_device_absent();
                TickOutcome::DeviceAbsent
            }
            Err(e @ ReadError::Transport { .. }) => {
                self.stats.record_transport_failure();
                debug!(error = %e, "scale_transport_failure");
                TickOutcome::TransportFailure
            }
            Err(ReadError::ParseMiss { bytes }) => {
                self.stats.record_parse_miss();
                trace!(bytes = bytes, "scale_parse_miss");
                TickOutcome::ParseMiss
            }
        };

        self.log_transition(&outcome);
        self.state = MonitorState::Idle;
        outcome
    }

    fn enqueue_dispatch(&self, weight: WeightReading) {
        let cmd = DispatchCmd::new(DispatchPayload::now(weight));

        match self.dispatch_tx.try_send(cmd) {
            Ok(()) => {
                info!(peso = %weight, "weight_changed");
            }
            Err(TrySendError::Full(cmd)) => {
                self.stats.record_dispatch_dropped();
                warn!(peso = %cmd.payload.peso, "dispatch_queue_full");
            }
            Err(TrySendError::Closed(cmd)) => {
                self.stats.record_dispatch_dropped();
                warn!(peso = %cmd.payload.peso, "dispatch_worker_closed");
            }
        }
    }

    /// Log when the scale stops or starts producing readings, not on every tick
    fn log_transition(&mut self, outcome: &TickOutcome) {
        match outcome.reading() {
            Some(weight) => {
                if let Some(previous) = self.last_failure.take() {
                    info!(peso = %weight, after = previous, "scale_reading_resumed");
                }
            }
            None => {
                let kind = outcome.as_str();
                if self.last_failure != Some(kind) {
                    warn!(reason = kind, "scale_reading_unavailable");
                    self.last_failure = Some(kind);
                }
            }
        }
    }

    /// Start the poll loop; returns when the shutdown signal flips to true
    /// or its sender is dropped
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_interval_ms = %self.poll_interval.as_millis(),
            threshold = %self.filter.threshold(),
            "scale_monitor_started"
        );

        let mut last_stats_log = Instant::now();

        loop {
            if *shutdown.borrow() {
                break;
            }

            let outcome = self.tick().await;
            trace!(outcome = outcome.as_str(), "scale_tick");

            if let Some(every) = self.stats_interval {
                if last_stats_log.elapsed() >= every {
                    self.stats.snapshot().log();
                    last_stats_log = Instant::now();
                }
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        info!(last_dispatched = ?self.filter.last_dispatched().map(|w| w.kg()), "scale_monitor_shutdown");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SerialPortHandle;
    use crate::infra::config::PortSelection;
    use crate::io::dispatcher::{DispatchError, WeightSink};
    use crate::io::port_locator::{PortEnumerator, PortLocator};
    use crate::io::serial_reader::ByteSource;
    use crate::services::dispatch_worker::create_dispatch_worker;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::io::ErrorKind;

    struct FixedPorts(Vec<&'static str>);

    impl PortEnumerator for FixedPorts {
        fn list_ports(&self) -> Result<Vec<String>, tokio_serial::Error> {
            Ok(self.0.iter().map(|s| s.to_string()).collect())
        }
    }

    /// Plays back scripted windows, then times out forever
    struct ScriptedSource(Mutex<VecDeque<std::io::Result<Vec<u8>>>>);

    impl ScriptedSource {
        fn new(script: Vec<std::io::Result<&'static str>>) -> Self {
            Self(Mutex::new(script.into_iter().map(|r| r.map(|s| s.as_bytes().to_vec())).collect()))
        }
    }

    #[async_trait]
    impl ByteSource for ScriptedSource {
        async fn read_window(&self, _device: &SerialPortHandle) -> std::io::Result<Vec<u8>> {
            self.0
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(std::io::Error::new(ErrorKind::TimedOut, "no data")))
        }
    }

    struct FailingSink;

    #[async_trait]
    impl WeightSink for FailingSink {
        async fn send(&self, _payload: &DispatchPayload) -> Result<(), DispatchError> {
            Err(DispatchError::Status(502))
        }
    }

    fn io_err() -> std::io::Error {
        std::io::Error::new(ErrorKind::BrokenPipe, "device removed")
    }

    fn monitor(
        ports: Vec<&'static str>,
        script: Vec<std::io::Result<&'static str>>,
        queue: usize,
    ) -> (Monitor, mpsc::Receiver<DispatchCmd>, Arc<LatestWeightCell>, Arc<Stats>) {
        let locator =
            Arc::new(PortLocator::with_enumerator(FixedPorts(ports), PortSelection::First, ""));
        let reader = SerialReader::with_source(locator, ScriptedSource::new(script));
        let latest = Arc::new(LatestWeightCell::new());
        let stats = Arc::new(Stats::new());
        let (tx, rx) = mpsc::channel(queue);
        let monitor = Monitor::new(&Config::default(), reader, latest.clone(), tx, stats.clone());
        (monitor, rx, latest, stats)
    }

    fn drain(rx: &mut mpsc::Receiver<DispatchCmd>) -> Vec<f64> {
        let mut weights = Vec::new();
        while let Ok(cmd) = rx.try_recv() {
            weights.push(cmd.payload.peso.kg());
        }
        weights
    }

    #[tokio::test]
    async fn test_tick_dispatches_significant_changes_only() {
        let (mut monitor, mut rx, _, _) = monitor(
            vec!["/dev/ttyUSB0"],
            vec![Ok("= 001.000"), Ok("= 001.0005"), Ok("= 001.003")],
            8,
        );

        assert_eq!(monitor.tick().await, TickOutcome::Dispatched(WeightReading::new(1.0)));
        assert_eq!(monitor.tick().await, TickOutcome::Unchanged(WeightReading::new(1.0)));
        assert_eq!(monitor.tick().await, TickOutcome::Dispatched(WeightReading::new(1.003)));

        assert_eq!(drain(&mut rx), vec![1.0, 1.003]);
        assert_eq!(monitor.last_dispatched(), Some(WeightReading::new(1.003)));
        assert_eq!(monitor.state(), MonitorState::Idle);
    }

    #[tokio::test]
    async fn test_latest_survives_failed_ticks() {
        let (mut monitor, _rx, latest, stats) = monitor(
            vec!["/dev/ttyUSB0"],
            vec![Ok("= 002.500"), Err(io_err()), Ok("=== garbage"), Ok("")],
            8,
        );

        assert_eq!(latest.get(), None);
        monitor.tick().await;
        assert_eq!(latest.get(), Some(WeightReading::new(2.5)));

        assert_eq!(monitor.tick().await, TickOutcome::TransportFailure);
        assert_eq!(monitor.tick().await, TickOutcome::ParseMiss);
        assert_eq!(monitor.tick().await, TickOutcome::ParseMiss);
        assert_eq!(latest.get(), Some(WeightReading::new(2.5)));

        let snap = stats.snapshot();
        assert_eq!(snap.ticks, 4);
        assert_eq!(snap.readings, 1);
        assert_eq!(snap.transport_failures, 1);
        assert_eq!(snap.parse_misses, 2);
    }

    #[tokio::test]
    async fn test_no_device_leaves_latest_empty() {
        let (mut monitor, mut rx, latest, stats) = monitor(vec![], vec![Ok("= 001.000")], 8);

        assert_eq!(monitor.tick().await, TickOutcome::DeviceAbsent);
        assert_eq!(latest.get(), None);
        assert!(drain(&mut rx).is_empty());
        assert_eq!(stats.snapshot().device_absent, 1);
    }

    #[tokio::test]
    async fn test_full_queue_drops_but_still_advances_filter() {
        let (mut monitor, mut rx, _, stats) = monitor(
            vec!["/dev/ttyUSB0"],
            vec![Ok("= 001.000"), Ok("= 002.000"), Ok("= 002.000")],
            1,
        );

        assert!(matches!(monitor.tick().await, TickOutcome::Dispatched(_)));
        assert!(matches!(monitor.tick().await, TickOutcome::Dispatched(_)));
        // Same value again: already the reference even though its dispatch was dropped
        assert!(matches!(monitor.tick().await, TickOutcome::Unchanged(_)));

        assert_eq!(drain(&mut rx), vec![1.0]);
        assert_eq!(stats.snapshot().dispatches_dropped, 1);
    }

    #[tokio::test]
    async fn test_dispatch_failures_do_not_stop_the_loop() {
        let locator = Arc::new(PortLocator::with_enumerator(
            FixedPorts(vec!["/dev/ttyUSB0"]),
            PortSelection::First,
            "",
        ));
        let script: Vec<std::io::Result<&'static str>> = vec![
            Ok("= 001.000"),
            Ok("= 002.000"),
            Ok("= 003.000"),
            Ok("= 004.000"),
        ];
        let reader = SerialReader::with_source(locator, ScriptedSource::new(script));
        let latest = Arc::new(LatestWeightCell::new());
        let stats = Arc::new(Stats::new());
        let (tx, worker) = create_dispatch_worker(Arc::new(FailingSink), stats.clone(), 8);
        let worker_handle = tokio::spawn(worker.run());

        let monitor = Monitor::new(&Config::default(), reader, latest.clone(), tx, stats.clone())
            .with_poll_interval(Duration::from_millis(5));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let monitor_handle = tokio::spawn(monitor.run(shutdown_rx));

        let deadline = Instant::now() + Duration::from_secs(5);
        while stats.snapshot().ticks < 8 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        shutdown_tx.send(true).unwrap();
        monitor_handle.await.unwrap();
        // Monitor owned the only sender; the worker drains and stops
        worker_handle.await.unwrap();

        let snap = stats.snapshot();
        assert!(snap.ticks >= 8);
        assert_eq!(snap.dispatches_failed, 4);
        assert_eq!(snap.dispatches_ok, 0);
        assert_eq!(latest.get(), Some(WeightReading::new(4.0)));
    }

    #[tokio::test]
    async fn test_run_returns_when_shutdown_sender_dropped() {
        let (monitor, _rx, _, _) = monitor(vec![], vec![], 1);
        let monitor = monitor.with_poll_interval(Duration::from_secs(3600));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(monitor.run(shutdown_rx));

        drop(shutdown_tx);
        tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    }
}
