//! Statistics pipeline: daily aggregation, baselines, trend analysis
//!
//! All computation in this module is pure (samples in, record out); the
//! scheduler actor owns when things run, the [`archive`] owns what the
//! latest records are. Nothing here touches the ingest path.

pub mod aggregate;
pub mod archive;
pub mod baseline;
pub mod stats;
pub mod trend;

pub use aggregate::DailyAggregate;
pub use archive::AnalyticsArchive;
pub use baseline::Baseline;
pub use trend::TrendAnalysis;
