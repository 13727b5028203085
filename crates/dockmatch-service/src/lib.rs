//! dockmatch service layer
//!
//! Runs the pure match engine at scale:
//! - [`MatchPool`]: bounded worker pool with per-match timeouts
//! - [`SingleFlightCache`]: one computation per fingerprint key
//! - [`DescriptorSource`]: loads descriptors and build specs
//! - [`report`]: digest-verified match report artifacts
//! - [`METRICS`]: process-wide counters

pub mod cache;
pub mod error;
pub mod metrics;
pub mod pool;
pub mod report;
pub mod source;

pub use cache::{CacheKey, SingleFlightCache};
pub use error::{Result, ServiceError};
pub use metrics::METRICS;
pub use pool::{MatchOutcome, MatchPool, MatchRequest, PoolConfig};
pub use report::{read_report, write_report, MatchReport, REPORT_SCHEMA_VERSION};
pub use source::{BatchEntry, BatchManifest, DescriptorSource, FsDescriptorSource};
