//! Consumer half of the pipeline
//!
//! The orchestrator runs in two phases:
//!
//! 1. **Await header.** Wait for the header, a fatal source error or the
//!    header timeout. Anything but a header ends the run with an
//!    [`IngestError`].
//! 2. **Drain.** Select over rows, recoverable errors and an idle window that
//!    is re-armed on every event. Rows are transformed and stored one at a
//!    time, in file order. The phase ends when the row channel closes, or when
//!    an idle window passes with nothing seen yet. Once rows have been seen an
//!    idle window is only a heartbeat, unless `max_idle_windows` caps it.
//!
//! After the drain the source task is awaited and the error conduit is
//! flushed, so the summary is the last thing reported.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::channel::{pipeline_channels, PipelineReceivers};
use crate::document::{transform, Header, SourceRow, TransformError};
use crate::error::{IngestError, Result};
use crate::reporter::{ErrorStage, PipelineEvent, Reporter};
use crate::sink::DocumentSink;
use crate::source::{CsvSource, SourceError};
use crate::summary::{RunCounters, RunSummary, Termination};

pub const DEFAULT_HEADER_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorOptions {
    /// Deadline for the header; expiry is fatal
    pub header_timeout: Duration,
    /// Idle window during the drain, re-armed on every event
    pub idle_timeout: Duration,
    /// Consecutive idle windows tolerated after activity. `0` means no limit.
    pub max_idle_windows: u32,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            header_timeout: DEFAULT_HEADER_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            max_idle_windows: 0,
        }
    }
}

pub struct Orchestrator {
    sink: Arc<dyn DocumentSink>,
    reporter: Arc<dyn Reporter>,
    options: OrchestratorOptions,
}

impl Orchestrator {
    pub fn new(sink: Arc<dyn DocumentSink>, reporter: Arc<dyn Reporter>) -> Self {
        Self {
            sink,
            reporter,
            options: OrchestratorOptions::default(),
        }
    }

    pub fn with_options(mut self, options: OrchestratorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &OrchestratorOptions {
        &self.options
    }

    /// Wire up the channels, start `source` and drain it into the sink
    pub async fn ingest(&self, source: CsvSource) -> Result<RunSummary> {
        self.ingest_until(source, std::future::pending::<()>()).await
    }

    /// Like [`Orchestrator::ingest`], stopping early once `shutdown` resolves
    pub async fn ingest_until<F>(&self, source: CsvSource, shutdown: F) -> Result<RunSummary>
    where
        F: Future<Output = ()>,
    {
        let (senders, receivers) = pipeline_channels();
        let handle = source.spawn(senders);
        self.run_until(receivers, handle, shutdown).await
    }

    /// Consume an already running source
    pub async fn run(&self, receivers: PipelineReceivers, source: JoinHandle<()>) -> Result<RunSummary> {
        self.run_until(receivers, source, std::future::pending::<()>()).await
    }

    pub async fn run_until<F>(
        &self,
        receivers: PipelineReceivers,
        source: JoinHandle<()>,
        shutdown: F,
    ) -> Result<RunSummary>
    where
        F: Future<Output = ()>,
    {
        let PipelineReceivers {
            header,
            rows,
            mut errors,
        } = receivers;
        tokio::pin!(shutdown);

        // On failure the receivers drop here and the source stops at its next send
        let header = self.await_header(header, &mut errors, &mut shutdown).await?;
        self.reporter.report(&PipelineEvent::HeaderReceived {
            fields: header.fields().to_vec(),
        });

        let (counters, termination) = self.drain(&header, rows, &mut errors, &mut shutdown).await;
        self.finish_source(source, errors).await;

        let summary = RunSummary {
            counters,
            termination,
        };
        self.reporter.report(&PipelineEvent::Finished(summary));
        Ok(summary)
    }

    async fn await_header<F>(
        &self,
        mut header: oneshot::Receiver<Header>,
        errors: &mut mpsc::Receiver<SourceError>,
        shutdown: &mut std::pin::Pin<&mut F>,
    ) -> Result<Header>
    where
        F: Future<Output = ()>,
    {
        let deadline = tokio::time::sleep(self.options.header_timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                biased;

                received = &mut header => {
                    return match received {
                        Ok(header) => Ok(header),
                        // A fatal error is always queued before the header sender drops
                        Err(_) => Err(match errors.try_recv() {
                            Ok(err) => IngestError::Source(err),
                            Err(_) => IngestError::HeaderChannelClosed,
                        }),
                    };
                },
                Some(err) = errors.recv() => {
                    if err.is_fatal() {
                        return Err(IngestError::Source(err));
                    }
                    self.report_parse_error(ErrorStage::Drain, &err);
                },
                () = &mut deadline => {
                    return Err(IngestError::HeaderTimeout(self.options.header_timeout));
                },
                () = shutdown.as_mut() => {
                    return Err(IngestError::Cancelled);
                },
            }
        }
    }

    async fn drain<F>(
        &self,
        header: &Header,
        mut rows: mpsc::Receiver<SourceRow>,
        errors: &mut mpsc::Receiver<SourceError>,
        shutdown: &mut std::pin::Pin<&mut F>,
    ) -> (RunCounters, Termination)
    where
        F: Future<Output = ()>,
    {
        self.reporter.report(&PipelineEvent::DrainStarted {
            destination: self.sink.describe(),
        });

        let mut counters = RunCounters::default();
        let mut idle_windows: u32 = 0;
        let mut errors_open = true;

        let termination = loop {
            tokio::select! {
                row = rows.recv() => match row {
                    Some(row) => {
                        idle_windows = 0;
                        self.handle_row(header, row, &mut counters).await;
                    },
                    None => break Termination::Completed,
                },
                err = errors.recv(), if errors_open => match err {
                    Some(err) => {
                        idle_windows = 0;
                        self.report_parse_error(ErrorStage::Drain, &err);
                    },
                    None => errors_open = false,
                },
                () = tokio::time::sleep(self.options.idle_timeout) => {
                    if !counters.has_activity() {
                        self.reporter.report(&PipelineEvent::StallDetected {
                            idle: self.options.idle_timeout,
                        });
                        break Termination::Stalled;
                    }

                    idle_windows = idle_windows.saturating_add(1);
                    self.reporter.report(&PipelineEvent::IdleHeartbeat {
                        records_seen: counters.records_seen,
                        idle_windows,
                    });
                    if self.options.max_idle_windows > 0 && idle_windows >= self.options.max_idle_windows {
                        self.reporter.report(&PipelineEvent::IdleLimitReached { idle_windows });
                        break Termination::Stalled;
                    }
                },
                () = shutdown.as_mut() => {
                    self.reporter.report(&PipelineEvent::ShutdownRequested);
                    break Termination::Cancelled;
                },
            }
        };

        // `rows` drops here, releasing a source blocked on a send
        (counters, termination)
    }

    async fn handle_row(&self, header: &Header, row: SourceRow, counters: &mut RunCounters) {
        counters.records_seen += 1;
        let record = counters.records_seen;

        let document = match transform(header.fields(), &row.fields) {
            Ok(document) => document,
            Err(TransformError::LengthMismatch { expected, actual }) => {
                counters.rejected += 1;
                self.reporter.report(&PipelineEvent::RowRejected {
                    record,
                    line: row.line,
                    expected,
                    actual,
                    fields: row.fields,
                });
                return;
            },
        };

        match self.sink.store(&document).await {
            Ok(_) => {
                counters.stored += 1;
                self.reporter.report(&PipelineEvent::RowStored {
                    record,
                    line: row.line,
                });
            },
            Err(e) => {
                counters.rejected += 1;
                self.reporter.report(&PipelineEvent::StoreFailed {
                    record,
                    line: row.line,
                    error: e.to_string(),
                });
            },
        }
    }

    /// Wait for the source to release the file, then flush the error conduit.
    ///
    /// Errors are consumed while waiting so a source blocked on a full
    /// conduit can still finish.
    async fn finish_source(&self, mut source: JoinHandle<()>, mut errors: mpsc::Receiver<SourceError>) {
        let mut errors_open = true;
        let joined = loop {
            tokio::select! {
                joined = &mut source => break joined,
                err = errors.recv(), if errors_open => match err {
                    Some(err) => self.report_parse_error(ErrorStage::AfterDrain, &err),
                    None => errors_open = false,
                },
            }
        };

        if let Err(e) = joined {
            self.reporter.report(&PipelineEvent::SourcePanicked { error: e.to_string() });
        }

        while let Some(err) = errors.recv().await {
            self.report_parse_error(ErrorStage::AfterDrain, &err);
        }
    }

    fn report_parse_error(&self, stage: ErrorStage, err: &SourceError) {
        self.reporter.report(&PipelineEvent::ParseError {
            stage,
            line: err.line(),
            error: err.to_string(),
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::channel::SourceChannels;
    use crate::document::Document;
    use crate::reporter::CollectingReporter;
    use crate::sink::MemorySink;
    use crate::source::RowError;
    use std::path::PathBuf;

    fn strings(fields: &[&str]) -> Vec<String> {
        fields.iter().map(|f| f.to_string()).collect()
    }

    fn row(line: u64, fields: &[&str]) -> SourceRow {
        SourceRow::new(line, strings(fields))
    }

    fn bad_line(line: u64) -> SourceError {
        SourceError::Row {
            path: PathBuf::from("input.csv"),
            line,
            source: RowError::BareQuote { field: 2 },
        }
    }

    struct Harness {
        sink: MemorySink,
        reporter: CollectingReporter,
        orchestrator: Orchestrator,
    }

    fn harness(sink: MemorySink, options: OrchestratorOptions) -> Harness {
        let reporter = CollectingReporter::new();
        let orchestrator =
            Orchestrator::new(Arc::new(sink.clone()), Arc::new(reporter.clone())).with_options(options);
        Harness {
            sink,
            reporter,
            orchestrator,
        }
    }

    /// Stand-in for the CSV source, driven from an async task
    fn spawn_source<F, Fut>(script: F) -> (PipelineReceivers, JoinHandle<()>)
    where
        F: FnOnce(SourceChannels) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (senders, receivers) = pipeline_channels();
        (receivers, tokio::spawn(script(senders)))
    }

    fn ids(documents: &[Document]) -> Vec<String> {
        documents.iter().map(|d| d.get("ID").unwrap().to_string()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_drains_rows_in_order() {
        let h = harness(MemorySink::new(), OrchestratorOptions::default());
        let (receivers, source) = spawn_source(|tx| async move {
            tx.header.send(Header::new(strings(&["ID", "Name", "Value"]))).unwrap();
            for (line, id) in [(2, "1"), (3, "2"), (4, "3")] {
                tx.rows.send(row(line, &[id, "n", "v"])).await.unwrap();
            }
        });

        let summary = h.orchestrator.run(receivers, source).await.unwrap();

        assert_eq!(summary.termination, Termination::Completed);
        assert_eq!(summary.to_string(), "3 seen, 3 stored, 0 rejected");
        assert_eq!(ids(&h.sink.documents()), vec!["1", "2", "3"]);
        assert!(matches!(h.reporter.events().last(), Some(PipelineEvent::Finished(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mismatched_and_refused_rows_are_rejected() {
        let sink = MemorySink::new().rejecting(|doc| (doc.get("ID") == Some("3")).then(|| "duplicate key".to_string()));
        let h = harness(sink, OrchestratorOptions::default());
        let (receivers, source) = spawn_source(|tx| async move {
            tx.header.send(Header::new(strings(&["ID", "Name"]))).unwrap();
            tx.rows.send(row(2, &["1", "a"])).await.unwrap();
            tx.rows.send(row(3, &["2"])).await.unwrap();
            tx.rows.send(row(4, &["3", "c"])).await.unwrap();
        });

        let summary = h.orchestrator.run(receivers, source).await.unwrap();

        assert_eq!(summary.counters.records_seen, 3);
        assert_eq!(summary.counters.stored, 1);
        assert_eq!(summary.counters.rejected, 2);
        assert_eq!(summary.counters.total(), summary.counters.records_seen);
        assert_eq!(ids(&h.sink.documents()), vec!["1"]);

        let events = h.reporter.events();
        assert!(events.contains(&PipelineEvent::RowRejected {
            record: 2,
            line: 3,
            expected: 2,
            actual: 1,
            fields: strings(&["2"]),
        }));
        assert_eq!(h.reporter.count(|e| matches!(e, PipelineEvent::StoreFailed { record: 3, line: 4, .. })), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parse_errors_are_reported_not_counted() {
        let h = harness(MemorySink::new(), OrchestratorOptions::default());
        let (receivers, source) = spawn_source(|tx| async move {
            tx.header.send(Header::new(strings(&["ID"]))).unwrap();
            tx.errors.send(bad_line(2)).await.unwrap();
            tx.rows.send(row(3, &["1"])).await.unwrap();
            tx.errors.send(bad_line(4)).await.unwrap();
            tx.errors.send(bad_line(5)).await.unwrap();
        });

        let summary = h.orchestrator.run(receivers, source).await.unwrap();

        assert_eq!(summary.to_string(), "1 seen, 1 stored, 0 rejected");
        let lines: Vec<Option<u64>> = h
            .reporter
            .events()
            .into_iter()
            .filter_map(|e| match e {
                PipelineEvent::ParseError { line, .. } => Some(line),
                _ => None,
            })
            .collect();
        assert_eq!(lines.len(), 3);
        assert!(lines.iter().all(Option::is_some));

        // Every error is flushed before the summary
        let events = h.reporter.events();
        let finished = events.iter().position(|e| matches!(e, PipelineEvent::Finished(_))).unwrap();
        assert_eq!(finished, events.len() - 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_header_timeout_is_fatal() {
        let h = harness(MemorySink::new(), OrchestratorOptions::default());
        let (receivers, source) = spawn_source(|tx| async move {
            tx.rows.closed().await;
            drop(tx);
        });

        let err = h.orchestrator.run(receivers, source).await.unwrap_err();

        assert!(matches!(err, IngestError::HeaderTimeout(d) if d == DEFAULT_HEADER_TIMEOUT));
        assert!(h.sink.is_empty());
        assert_eq!(h.reporter.count(|e| matches!(e, PipelineEvent::Finished(_))), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_source_error_is_the_cause() {
        let h = harness(MemorySink::new(), OrchestratorOptions::default());
        let (receivers, source) = spawn_source(|tx| async move {
            tx.errors
                .send(SourceError::Empty {
                    path: PathBuf::from("input.csv"),
                })
                .await
                .unwrap();
        });

        let err = h.orchestrator.run(receivers, source).await.unwrap_err();
        assert!(matches!(err, IngestError::Source(SourceError::Empty { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_header_channel_closed_without_cause() {
        let h = harness(MemorySink::new(), OrchestratorOptions::default());
        let (receivers, source) = spawn_source(|tx| async move { drop(tx) });

        let err = h.orchestrator.run(receivers, source).await.unwrap_err();
        assert!(matches!(err, IngestError::HeaderChannelClosed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_without_activity_stalls() {
        let h = harness(MemorySink::new(), OrchestratorOptions::default());
        let (receivers, source) = spawn_source(|tx| async move {
            tx.header.send(Header::new(strings(&["ID"]))).unwrap();
            // Hold the row channel open until the consumer hangs up
            tx.rows.closed().await;
        });

        let started = tokio::time::Instant::now();
        let summary = h.orchestrator.run(receivers, source).await.unwrap();

        assert_eq!(summary.termination, Termination::Stalled);
        assert_eq!(summary.to_string(), "0 seen, 0 stored, 0 rejected");
        assert!(started.elapsed() >= DEFAULT_IDLE_TIMEOUT);
        assert_eq!(
            h.reporter.count(|e| matches!(e, PipelineEvent::StallDetected { .. })),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_after_activity_is_a_heartbeat() {
        let h = harness(MemorySink::new(), OrchestratorOptions::default());
        let (receivers, source) = spawn_source(|tx| async move {
            tx.header.send(Header::new(strings(&["ID"]))).unwrap();
            tx.rows.send(row(2, &["1"])).await.unwrap();
            tokio::time::sleep(Duration::from_secs(75)).await;
            tx.rows.send(row(3, &["2"])).await.unwrap();
        });

        let summary = h.orchestrator.run(receivers, source).await.unwrap();

        assert_eq!(summary.termination, Termination::Completed);
        assert_eq!(summary.to_string(), "2 seen, 2 stored, 0 rejected");
        let heartbeats: Vec<u32> = h
            .reporter
            .events()
            .into_iter()
            .filter_map(|e| match e {
                PipelineEvent::IdleHeartbeat { idle_windows, .. } => Some(idle_windows),
                _ => None,
            })
            .collect();
        assert_eq!(heartbeats, vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_idle_windows_ends_drain() {
        let options = OrchestratorOptions {
            max_idle_windows: 2,
            ..OrchestratorOptions::default()
        };
        let h = harness(MemorySink::new(), options);
        let (receivers, source) = spawn_source(|tx| async move {
            tx.header.send(Header::new(strings(&["ID"]))).unwrap();
            tx.rows.send(row(2, &["1"])).await.unwrap();
            tx.rows.closed().await;
        });

        let summary = h.orchestrator.run(receivers, source).await.unwrap();

        assert_eq!(summary.termination, Termination::Stalled);
        assert_eq!(summary.counters.stored, 1);
        assert!(h
            .reporter
            .events()
            .contains(&PipelineEvent::IdleLimitReached { idle_windows: 2 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_drain_still_summarizes() {
        let h = harness(MemorySink::new(), OrchestratorOptions::default());
        let (receivers, source) = spawn_source(|tx| async move {
            tx.header.send(Header::new(strings(&["ID"]))).unwrap();
            tx.rows.send(row(2, &["1"])).await.unwrap();
            tx.rows.closed().await;
        });

        let shutdown = tokio::time::sleep(Duration::from_secs(5));
        let summary = h.orchestrator.run_until(receivers, source, shutdown).await.unwrap();

        assert_eq!(summary.termination, Termination::Cancelled);
        assert_eq!(summary.counters.stored, 1);
        assert_eq!(h.reporter.count(|e| *e == PipelineEvent::ShutdownRequested), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_source_panic_is_reported() {
        let h = harness(MemorySink::new(), OrchestratorOptions::default());
        let (receivers, source) = spawn_source(|tx| async move {
            tx.header.send(Header::new(strings(&["ID"]))).unwrap();
            tx.rows.send(row(2, &["1"])).await.unwrap();
            panic!("reader exploded");
        });

        let summary = h.orchestrator.run(receivers, source).await.unwrap();

        assert_eq!(summary.counters.stored, 1);
        assert_eq!(h.reporter.count(|e| matches!(e, PipelineEvent::SourcePanicked { .. })), 1);
    }
}
