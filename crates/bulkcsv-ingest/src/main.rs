//! bulkcsv-ingest - stream a CSV file into a document store

use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use bulkcsv_common::logging::{init_logging, LogConfig, LogLevel};
use bulkcsv_ingest::{sink, CsvSource, IngestConfig, Orchestrator, RunSummary, SummaryFormat, TracingReporter};
use clap::Parser;
use tracing::{error, info, Instrument};
use uuid::Uuid;

#[tokio::main]
async fn main() {
    // Variables already set in the environment win over .env
    dotenvy::dotenv().ok();

    let config = IngestConfig::parse();

    let log_level = if config.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("bulkcsv-ingest")
        .build();

    // Environment variables take precedence over the flags
    let guard = match log_config.merge_env().and_then(|config| init_logging(&config)) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Warning: logging disabled: {e}");
            None
        },
    };

    let span = tracing::info_span!("ingest", run_id = %Uuid::new_v4());
    let code = match run(config).instrument(span).await {
        Ok(()) => 0,
        Err(e) => {
            error!(error = format!("{e:#}"), "Ingestion failed");
            eprintln!("Error: {e:#}");
            1
        },
    };

    drop(guard);
    process::exit(code);
}

async fn run(config: IngestConfig) -> Result<()> {
    config.validate().context("Invalid configuration")?;
    config.log_effective();

    let sink = sink::connect(&config.sink_config())
        .await
        .context("Failed to connect to the document store")?;

    let reporter = Arc::new(TracingReporter);
    let source = CsvSource::new(config.csv_file.clone(), reporter.clone()).with_delimiter(config.delimiter);
    let orchestrator = Orchestrator::new(sink.clone(), reporter).with_options(config.orchestrator_options());

    let summary = match orchestrator.ingest_until(source, shutdown_signal()).await {
        Ok(summary) => summary,
        Err(e) => {
            sink.close().await;
            return Err(e).context("CSV ingestion aborted");
        },
    };

    print_summary(&summary, config.summary_format)?;
    sink.close().await;

    info!("Ingestion complete");
    Ok(())
}

/// Resolves on Ctrl-C; never resolves if the handler cannot be installed
async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

fn print_summary(summary: &RunSummary, format: SummaryFormat) -> Result<()> {
    match format {
        SummaryFormat::Text => println!("{summary}"),
        SummaryFormat::Json => {
            let json = serde_json::to_string(summary).context("Failed to serialize summary")?;
            println!("{json}");
        },
    }
    Ok(())
}
