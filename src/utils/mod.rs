//! # Utility Modules
//!
//! Supporting utilities for compression, dedup, logging and metrics.
//!
//! ## Components
//! - **Compression**: Zero-coding of packet bodies with an expansion limit
//! - **Sequence Archive**: Bounded FIFO of recent inbound sequences for dedup
//! - **Logging**: `tracing-subscriber` setup from `LoggingConfig`
//! - **Metrics**: Thread-safe transport counters

pub mod compression;
pub mod logging;
pub mod metrics;
pub mod sequence_archive;

pub use metrics::{Metrics, MetricsSnapshot};
pub use sequence_archive::SequenceArchive;
