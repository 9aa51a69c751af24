//! Serial device discovery
//!
//! The first successful discovery is cached for the process lifetime and is
//! never re-queried, even if the device later disappears. "No device" is a
//! normal outcome and leaves the cache empty so the next call retries.
//!
//! Selection policy is explicit (`serial.selection` in config):
//! - `first`  - first enumerated port (single USB adapter on Windows hosts)
//! - `prefix` - first port whose path starts with `serial.prefix`
//!   (`/dev/ttyUSB` on the Raspberry Pi, which also exposes `/dev/ttyAMA*`)

use crate::domain::SerialPortHandle;
use crate::infra::config::{Config, PortSelection};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

/// Source of candidate serial device paths
pub trait PortEnumerator: Send + Sync {
    fn list_ports(&self) -> Result<Vec<String>, tokio_serial::Error>;
}

/// Enumerates the ports the OS currently reports
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPorts;

impl PortEnumerator for SystemPorts {
    fn list_ports(&self) -> Result<Vec<String>, tokio_serial::Error> {
        Ok(tokio_serial::available_ports()?.into_iter().map(|p| p.port_name).collect())
    }
}

pub struct PortLocator {
    enumerator: Box<dyn PortEnumerator>,
    selection: PortSelection,
    prefix: String,
    /// Held across enumeration so concurrent first calls cache a single result
    cached: Mutex<Option<SerialPortHandle>>,
}

impl PortLocator {
    /// Build from config. A fixed `serial.device` is cached up front and
    /// enumeration never runs.
    pub fn new(config: &Config) -> Self {
        let locator = Self::with_enumerator(
            SystemPorts,
            config.port_selection().clone(),
            config.port_prefix(),
        );
        if let Some(device) = config.serial_device() {
            info!(device = %device, "serial_port_fixed");
            *locator.cached.lock() = Some(SerialPortHandle::new(device));
        }
        locator
    }

    pub fn with_enumerator<E: PortEnumerator + 'static>(
        enumerator: E,
        selection: PortSelection,
        prefix: &str,
    ) -> Self {
        Self {
            enumerator: Box::new(enumerator),
            selection,
            prefix: prefix.to_string(),
            cached: Mutex::new(None),
        }
    }

    /// Return the cached device, discovering it on first success
    pub fn locate(&self) -> Option<SerialPortHandle> {
        let mut cached = self.cached.lock();
        if let Some(handle) = cached.as_ref() {
            return Some(handle.clone());
        }

        let ports = match self.enumerator.list_ports() {
            Ok(ports) => ports,
            Err(e) => {
                warn!(error = %e, "serial_port_enumeration_failed");
                return None;
            }
        };

        let Some(path) = select_port(&ports, &self.selection, &self.prefix) else {
            debug!(
                available = ports.len(),
                selection = ?self.selection,
                prefix = %self.prefix,
                "serial_port_not_found"
            );
            return None;
        };

        let handle = SerialPortHandle::new(path);
        info!(device = %handle, selection = ?self.selection, "serial_port_detected");
        *cached = Some(handle.clone());
        Some(handle)
    }

    /// Cached device without triggering discovery
    pub fn cached(&self) -> Option<SerialPortHandle> {
        self.cached.lock().clone()
    }
}

/// Apply the selection policy to an enumeration result
pub fn select_port<'a>(
    ports: &'a [String],
    selection: &PortSelection,
    prefix: &str,
) -> Option<&'a str> {
    match selection {
        PortSelection::First => ports.first(),
        PortSelection::Prefix => ports.iter().find(|p| p.starts_with(prefix)),
    }
    .map(String::as_str)
}
