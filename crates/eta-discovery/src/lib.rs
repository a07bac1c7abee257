//! ETA Discovery - Walking a controller's endpoint tree
//!
//! This crate drives the client in bulk:
//! - A bounded fetcher that caps in-flight requests to a small, fixed set of limits
//! - A scanner for full discovery passes and value-only refreshes
//! - An error monitor that polls the active error list and emits edge events

pub mod fetcher;
pub mod monitor;
pub mod scanner;

pub use fetcher::{fetch_all, BatchOutcome, ConcurrencyLimit, LimitError};
pub use monitor::{ErrorMonitor, DEFAULT_ERROR_POLL_INTERVAL};
pub use scanner::{
    DiscoveryEvent, DiscoveryReport, DiscoveryScanner, EndpointFailure, FetchStage, RefreshMode,
    ScanError, ScanStats, ScannerConfig, ValueRefresh,
};
