//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `port_locator` - Serial device discovery and caching
//! - `frame_parser` - Raw scale bytes to weight
//! - `serial_reader` - One serial transaction per poll tick
//! - `dispatcher` - HTTP POST of weights to the remote API
//! - `query_server` - Local HTTP query interface (`/peso`, `/status`, `/metrics`)

pub mod dispatcher;
pub mod frame_parser;
pub mod port_locator;
pub mod query_server;
pub mod serial_reader;

// Re-export commonly used types
pub use dispatcher::{DispatchError, HttpDispatcher, WeightSink};
pub use port_locator::{PortEnumerator, PortLocator, SystemPorts};
pub use query_server::{QueryServer, QueryState};
pub use serial_reader::{ByteSource, ReadError, SerialReader, TokioSerialSource};
