//! Structured pipeline events
//!
//! The source and orchestrator never log directly. They emit
//! [`PipelineEvent`]s to a [`Reporter`], which decides how to surface them.
//! [`TracingReporter`] is what the binary uses; [`CollectingReporter`] keeps
//! events in memory so callers can inspect exactly what happened.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::summary::RunSummary;

/// Where in the run a recoverable parse error was observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorStage {
    /// While rows were still being consumed
    Drain,
    /// Flushed from the error conduit after the source finished
    AfterDrain,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    SourceOpening {
        path: PathBuf,
    },
    SourceExhausted {
        path: PathBuf,
        lines: u64,
    },
    HeaderReceived {
        fields: Vec<String>,
    },
    DrainStarted {
        destination: String,
    },
    RowStored {
        record: u64,
        line: u64,
    },
    RowRejected {
        record: u64,
        line: u64,
        expected: usize,
        actual: usize,
        fields: Vec<String>,
    },
    StoreFailed {
        record: u64,
        line: u64,
        error: String,
    },
    ParseError {
        stage: ErrorStage,
        line: Option<u64>,
        error: String,
    },
    IdleHeartbeat {
        records_seen: u64,
        idle_windows: u32,
    },
    StallDetected {
        idle: Duration,
    },
    IdleLimitReached {
        idle_windows: u32,
    },
    ShutdownRequested,
    SourcePanicked {
        error: String,
    },
    Finished(RunSummary),
}

pub trait Reporter: Send + Sync {
    fn report(&self, event: &PipelineEvent);
}

/// Forwards events to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn report(&self, event: &PipelineEvent) {
        match event {
            PipelineEvent::SourceOpening { path } => {
                info!(path = %path.display(), "Opening CSV file");
            },
            PipelineEvent::SourceExhausted { path, lines } => {
                info!(path = %path.display(), lines, "Finished reading CSV file");
            },
            PipelineEvent::HeaderReceived { fields } => {
                info!(columns = fields.len(), header = ?fields, "Received CSV header");
            },
            PipelineEvent::DrainStarted { destination } => {
                info!(%destination, "Starting data insertion");
            },
            PipelineEvent::RowStored { record, line } => {
                debug!(record, line, "Stored record");
            },
            PipelineEvent::RowRejected {
                record,
                line,
                expected,
                actual,
                fields,
            } => {
                warn!(
                    record,
                    line,
                    expected,
                    actual,
                    row = ?fields,
                    "Skipping record: field count does not match header"
                );
            },
            PipelineEvent::StoreFailed { record, line, error } => {
                error!(record, line, %error, "Failed to store record");
            },
            PipelineEvent::ParseError { stage, line, error } => match stage {
                ErrorStage::Drain => warn!(?line, %error, "Non-critical error during CSV processing"),
                ErrorStage::AfterDrain => {
                    warn!(?line, %error, "Post-drain error from CSV processing")
                },
            },
            PipelineEvent::IdleHeartbeat {
                records_seen,
                idle_windows,
            } => {
                info!(records_seen, idle_windows, "No new events this window; still processing");
            },
            PipelineEvent::StallDetected { idle } => {
                warn!(
                    idle_secs = idle.as_secs_f64(),
                    "Timed out waiting for data; assuming CSV processing is stalled or finished"
                );
            },
            PipelineEvent::IdleLimitReached { idle_windows } => {
                warn!(idle_windows, "Idle window limit reached; ending drain");
            },
            PipelineEvent::ShutdownRequested => {
                warn!("Shutdown requested; stopping after the current record");
            },
            PipelineEvent::SourcePanicked { error } => {
                error!(%error, "CSV reader task failed");
            },
            PipelineEvent::Finished(summary) => {
                info!(
                    records_seen = summary.counters.records_seen,
                    stored = summary.counters.stored,
                    rejected = summary.counters.rejected,
                    termination = ?summary.termination,
                    "Ingestion finished: {summary}"
                );
            },
        }
    }
}

/// Records every event in order
#[derive(Debug, Default, Clone)]
pub struct CollectingReporter {
    events: Arc<Mutex<Vec<PipelineEvent>>>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events reported so far
    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }

    pub fn count(&self, predicate: impl Fn(&PipelineEvent) -> bool) -> usize {
        self.events().iter().filter(|event| predicate(event)).count()
    }
}

impl Reporter for CollectingReporter {
    fn report(&self, event: &PipelineEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_collecting_reporter_keeps_order() {
        let reporter = CollectingReporter::new();
        reporter.report(&PipelineEvent::HeaderReceived {
            fields: vec!["a".into()],
        });
        reporter.report(&PipelineEvent::RowStored { record: 1, line: 2 });

        let events = reporter.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], PipelineEvent::HeaderReceived { .. }));
        assert_eq!(events[1], PipelineEvent::RowStored { record: 1, line: 2 });
    }
}
