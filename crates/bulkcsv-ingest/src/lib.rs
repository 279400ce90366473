//! bulkcsv ingest library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Streams a CSV file into a document store. A blocking [`CsvSource`] reads
//! the file and hands the header, rows and per-line errors to an
//! [`Orchestrator`] over bounded channels; the orchestrator zips each row
//! with the header into a [`Document`] and stores it through a
//! [`DocumentSink`], one at a time and in file order.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use bulkcsv_ingest::sink::{self, SinkConfig};
//! use bulkcsv_ingest::{CsvSource, Orchestrator, TracingReporter};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let reporter = Arc::new(TracingReporter);
//!     let sink = sink::connect(&SinkConfig::new("mongodb://localhost:27017", "bulkcsv", "processed_data")).await?;
//!
//!     let summary = Orchestrator::new(sink, reporter.clone())
//!         .ingest(CsvSource::new("input.csv", reporter))
//!         .await?;
//!     println!("{summary}");
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod config;
pub mod document;
pub mod error;
pub mod orchestrator;
pub mod reporter;
pub mod sink;
pub mod source;
pub mod summary;

pub use config::{IngestConfig, SummaryFormat};
pub use document::{transform, Document, Header, SourceRow, TransformError};
pub use error::{ConfigError, IngestError, Result};
pub use orchestrator::{Orchestrator, OrchestratorOptions};
pub use reporter::{CollectingReporter, PipelineEvent, Reporter, TracingReporter};
pub use sink::{DocumentSink, MemorySink, SinkConfig, SinkError, StoreError};
pub use source::{CsvSource, SourceError};
pub use summary::{RunCounters, RunSummary, Termination};
