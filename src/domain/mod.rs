//! Domain models - core types shared across the bridge
//!
//! - `SerialPortHandle` - the discovered scale device
//! - `WeightReading` - one parsed weight, 3-decimal precision
//! - `DispatchPayload` - body sent to the remote API
//! - `LatestWeightCell` - most recent reading, read by the query server

pub mod types;

pub use types::{DispatchPayload, LatestWeightCell, SerialPortHandle, WeightReading};
