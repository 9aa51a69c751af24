//! Shared types for the scale bridge

use parking_lot::RwLock;
use serde::Serialize;

/// Path of the serial device the scale is attached to (e.g. `/dev/ttyUSB0`, `COM3`)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SerialPortHandle(String);

impl SerialPortHandle {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SerialPortHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Weight in kilograms as reported by the scale
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct WeightReading(f64);

impl WeightReading {
    /// Wrap a value as-is
    pub const fn new(kg: f64) -> Self {
        Self(kg)
    }

    /// Round to 3 decimal places (grams). Returns None for NaN/infinite input.
    ///
    /// Rounds the exact binary value through decimal formatting; scaling by
    /// 1000 first would turn 1.0005 (stored as 1.000499..) into 1000.5.
    pub fn rounded(kg: f64) -> Option<Self> {
        if !kg.is_finite() {
            return None;
        }
        format!("{kg:.3}").parse().ok().map(WeightReading)
    }

    pub fn kg(self) -> f64 {
        self.0
    }

    /// Absolute difference to another reading
    pub fn delta(self, other: WeightReading) -> f64 {
        (self.0 - other.0).abs()
    }
}

impl std::fmt::Display for WeightReading {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.3}", self.0)
    }
}

/// Body POSTed to the remote API for each dispatch
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DispatchPayload {
    pub peso: WeightReading,
    /// Seconds since the Unix epoch
    pub timestamp: i64,
}

impl DispatchPayload {
    pub fn new(peso: WeightReading, timestamp: i64) -> Self {
        Self { peso, timestamp }
    }

    /// Stamp a reading with the current wall clock
    pub fn now(peso: WeightReading) -> Self {
        Self::new(peso, chrono::Utc::now().timestamp())
    }
}

/// Most recent successful reading, shared between the monitor (single writer)
/// and the query server (readers)
#[derive(Debug, Default)]
pub struct LatestWeightCell {
    inner: RwLock<Option<WeightReading>>,
}

impl LatestWeightCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, reading: WeightReading) {
        *self.inner.write() = Some(reading);
    }

    pub fn get(&self) -> Option<WeightReading> {
        *self.inner.read()
    }
}
