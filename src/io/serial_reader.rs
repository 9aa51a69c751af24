//! Scale reader - one isolated serial transaction per poll tick
//!
//! Each read opens the port, waits for the scale to fill the input buffer,
//! takes everything waiting, keeps the newest bytes, and drops the port
//! before parsing.
//! Nothing is held across ticks, so an unplugged or flaky adapter only costs
//! the current tick.

use crate::domain::{SerialPortHandle, WeightReading};
use crate::infra::config::Config;
use crate::io::frame_parser::{self, decode_latin1};
use crate::io::port_locator::PortLocator;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::time::Instant;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, trace};

/// Why a tick produced no weight
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("no serial device detected")]
    DeviceAbsent,
    #[error("serial transport failed on {device}: {source}")]
    Transport {
        device: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no weight found in {bytes} bytes")]
    ParseMiss { bytes: usize },
}

/// Byte stream the scale is read from
#[async_trait]
pub trait ByteSource: Send + Sync {
    /// Open `device`, read one window of bytes, release the device
    async fn read_window(&self, device: &SerialPortHandle) -> std::io::Result<Vec<u8>>;
}

/// Serial port transport (8N1 at the configured baud rate)
#[derive(Debug, Clone)]
pub struct TokioSerialSource {
    baud: u32,
    read_timeout: Duration,
    settle_delay: Duration,
    max_bytes: usize,
}

impl TokioSerialSource {
    pub fn new(config: &Config) -> Self {
        Self {
            baud: config.baud(),
            read_timeout: config.read_timeout(),
            settle_delay: config.settle_delay(),
            max_bytes: config.max_read_bytes(),
        }
    }
}

#[async_trait]
impl ByteSource for TokioSerialSource {
    async fn read_window(&self, device: &SerialPortHandle) -> std::io::Result<Vec<u8>> {
        let mut port = tokio_serial::new(device.as_str(), self.baud)
            .timeout(self.read_timeout)
            .open_native_async()?;

        tokio::time::sleep(self.settle_delay).await;

        let waiting = tokio_serial::SerialPort::bytes_to_read(&port)? as usize;
        let want = read_len(waiting, self.max_bytes);

        let mut buf = vec![0u8; want];
        let mut filled = 0;
        let deadline = Instant::now() + self.read_timeout;

        while filled < want {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            match tokio::time::timeout(remaining, port.read(&mut buf[filled..])).await {
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => filled += n,
                Ok(Err(e)) if e.kind() == ErrorKind::TimedOut => break,
                Ok(Err(e)) => return Err(e),
                Err(_) => break,
            }
        }

        buf.truncate(filled);
        trace!(device = %device, waiting = waiting, read = filled, "serial_window_read");
        Ok(recent_tail(buf, self.max_bytes))
    }
}

/// Bytes to request: everything the driver holds, or one full window when
/// it reports nothing yet
fn read_len(waiting: usize, max_bytes: usize) -> usize {
    if waiting == 0 {
        max_bytes
    } else {
        waiting
    }
}

/// Newest `max_bytes` of a window. The scale appends samples, so the tail
/// holds the latest one.
fn recent_tail(mut buf: Vec<u8>, max_bytes: usize) -> Vec<u8> {
    let start = buf.len().saturating_sub(max_bytes);
    buf.drain(..start);
    buf
}

pub struct SerialReader {
    locator: Arc<PortLocator>,
    source: Box<dyn ByteSource>,
}

impl SerialReader {
    pub fn new(config: &Config, locator: Arc<PortLocator>) -> Self {
        Self::with_source(locator, TokioSerialSource::new(config))
    }

    pub fn with_source<S: ByteSource + 'static>(locator: Arc<PortLocator>, source: S) -> Self {
        Self { locator, source: Box::new(source) }
    }

    /// Read one weight, reporting why nothing was read
    pub async fn try_read_weight(&self) -> Result<WeightReading, ReadError> {
        let device = self.locator.locate().ok_or(ReadError::DeviceAbsent)?;

        let bytes = self
            .source
            .read_window(&device)
            .await
            .map_err(|source| ReadError::Transport { device: device.to_string(), source })?;

        debug!(device = %device, len = bytes.len(), raw = ?decode_latin1(&bytes), "serial_raw_frame");

        frame_parser::parse(&bytes).ok_or(ReadError::ParseMiss { bytes: bytes.len() })
    }

    /// Read one weight; every failure is an absent reading
    pub async fn read_weight(&self) -> Option<WeightReading> {
        match self.try_read_weight().await {
            Ok(weight) => Some(weight),
            Err(e) => {
                debug!(error = %e, "serial_no_reading");
                None
            }
        }
    }
}
