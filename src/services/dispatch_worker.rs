//! Dispatch worker - sends weights off the poll loop
//!
//! The monitor enqueues payloads via a bounded mpsc channel and never waits
//! on the network. The worker performs one POST per payload; failures are
//! logged and counted, never retried.

use crate::domain::DispatchPayload;
use crate::infra::stats::Stats;
use crate::io::dispatcher::WeightSink;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// A dispatch waiting for the worker
#[derive(Debug)]
pub struct DispatchCmd {
    pub payload: DispatchPayload,
    /// When the command was enqueued (for queue delay measurement)
    pub enqueued_at: Instant,
}

impl DispatchCmd {
    pub fn new(payload: DispatchPayload) -> Self {
        Self { payload, enqueued_at: Instant::now() }
    }
}

/// Worker that drains dispatch commands until every sender is dropped
pub struct DispatchWorker {
    sink: Arc<dyn WeightSink>,
    cmd_rx: mpsc::Receiver<DispatchCmd>,
    stats: Arc<Stats>,
}

impl DispatchWorker {
    pub fn new(
        sink: Arc<dyn WeightSink>,
        cmd_rx: mpsc::Receiver<DispatchCmd>,
        stats: Arc<Stats>,
    ) -> Self {
        Self { sink, cmd_rx, stats }
    }

    /// Run the worker, processing commands until the channel closes
    pub async fn run(mut self) {
        info!("dispatch_worker_started");

        while let Some(cmd) = self.cmd_rx.recv().await {
            let queue_delay_us = cmd.enqueued_at.elapsed().as_micros() as u64;
            let send_start = Instant::now();
            let result = self.sink.send(&cmd.payload).await;
            let send_us = send_start.elapsed().as_micros() as u64;

            self.stats.record_dispatch(result.is_ok(), send_us);

            if let Err(e) = result {
                warn!(
                    peso = %cmd.payload.peso,
                    timestamp = %cmd.payload.timestamp,
                    queue_delay_us = %queue_delay_us,
                    send_us = %send_us,
                    error = %e,
                    "weight_dispatch_failed"
                );
            }
        }

        info!("dispatch_worker_stopped");
    }
}

/// Create a dispatch channel and worker
///
/// Returns the sender (for the monitor) and the worker (to be spawned)
pub fn create_dispatch_worker(
    sink: Arc<dyn WeightSink>,
    stats: Arc<Stats>,
    buffer_size: usize,
) -> (mpsc::Sender<DispatchCmd>, DispatchWorker) {
    let (cmd_tx, cmd_rx) = mpsc::channel(buffer_size.max(1));
    let worker = DispatchWorker::new(sink, cmd_rx, stats);
    (cmd_tx, worker)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::WeightReading;
    use crate::io::dispatcher::DispatchError;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Records payloads; fails every payload heavier than `fail_above`
    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<DispatchPayload>>,
        fail_above: Option<f64>,
    }

    #[async_trait]
    impl WeightSink for RecordingSink {
        async fn send(&self, payload: &DispatchPayload) -> Result<(), DispatchError> {
            self.sent.lock().push(*payload);
            match self.fail_above {
                Some(limit) if payload.peso.kg() > limit => Err(DispatchError::Status(500)),
                _ => Ok(()),
            }
        }
    }

    #[tokio::test]
    async fn test_worker_sends_in_order_and_counts() {
        let sink = Arc::new(RecordingSink { fail_above: Some(2.0), ..Default::default() });
        let stats = Arc::new(Stats::new());
        let (tx, worker) = create_dispatch_worker(sink.clone(), stats.clone(), 8);

        for (i, w) in [1.0, 3.0, 1.5].into_iter().enumerate() {
            let payload = DispatchPayload::new(WeightReading::new(w), 100 + i as i64);
            tx.send(DispatchCmd::new(payload)).await.unwrap();
        }
        drop(tx);
        worker.run().await;

        let sent = sink.sent.lock();
        let weights: Vec<f64> = sent.iter().map(|p| p.peso.kg()).collect();
        assert_eq!(weights, vec![1.0, 3.0, 1.5]);

        let snap = stats.snapshot();
        assert_eq!(snap.dispatches_ok, 2);
        assert_eq!(snap.dispatches_failed, 1);
    }
}
