//! Services - polling and dispatch logic
//!
//! This module contains the core services:
//! - `monitor` - Poll loop: read, publish latest weight, filter, enqueue dispatch
//! - `change_filter` - Variation threshold against the last dispatched weight
//! - `dispatch_worker` - Async worker that POSTs weights off the poll loop

pub mod change_filter;
pub mod dispatch_worker;
pub mod monitor;

// Re-export commonly used types
pub use change_filter::ChangeFilter;
pub use dispatch_worker::{create_dispatch_worker, DispatchCmd, DispatchWorker};
pub use monitor::{Monitor, MonitorState, TickOutcome};
