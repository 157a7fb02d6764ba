//! # MarkerLink Diagnostics
//!
//! Logging setup, connectivity analysis and transport statistics monitoring
//! for MarkerLink sessions.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod connection_analyzer;
pub mod debug_logger;
pub mod network_profiler;

// Re-export main types
pub use connection_analyzer::{ConnectionAnalyzer, ConnectionHealth, ConnectivityReport};
pub use debug_logger::{DebugLogger, DEFAULT_DIRECTIVE};
pub use network_profiler::{NetworkConditions, StatsMonitor, StatsSample};
