//! Command-line and environment configuration
//!
//! Every setting can come from a flag or a `BULKCSV_*` environment variable
//! (a `.env` file is loaded first by the binary). The camelCase aliases keep
//! older invocations such as `--csvFile data.csv` working.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing::info;

use crate::error::ConfigError;
use crate::orchestrator::OrchestratorOptions;
use crate::sink::{redact_endpoint, SinkConfig};

// ============================================================================
// Defaults
// ============================================================================

pub const DEFAULT_CSV_FILE: &str = "input.csv";
pub const DEFAULT_MONGO_URI: &str = "mongodb://localhost:27017";
pub const DEFAULT_DB_NAME: &str = "bulkcsv";
pub const DEFAULT_COLLECTION_NAME: &str = "processed_data";

/// How the final summary is printed on stdout
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum SummaryFormat {
    /// `N seen, N stored, N rejected`
    #[default]
    Text,
    /// One JSON object
    Json,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "bulkcsv-ingest")]
#[command(author, version, about = "Stream a CSV file into a document store")]
pub struct IngestConfig {
    /// CSV file to read; the first line is the header
    #[arg(long, alias = "csvFile", env = "BULKCSV_CSV_FILE", default_value = DEFAULT_CSV_FILE)]
    pub csv_file: PathBuf,

    /// Document store endpoint (mongodb://, mongodb+srv://, postgres:// or memory://)
    #[arg(long, alias = "mongoURI", env = "BULKCSV_MONGO_URI", default_value = DEFAULT_MONGO_URI)]
    pub mongo_uri: String,

    /// Database (or Postgres schema) to write to
    #[arg(long, alias = "dbName", env = "BULKCSV_DB_NAME", default_value = DEFAULT_DB_NAME)]
    pub db_name: String,

    /// Collection (or Postgres table) to write to
    #[arg(
        long,
        alias = "collectionName",
        env = "BULKCSV_COLLECTION_NAME",
        default_value = DEFAULT_COLLECTION_NAME
    )]
    pub collection_name: String,

    /// Field delimiter, a single ASCII character
    #[arg(long, env = "BULKCSV_DELIMITER", default_value = ",", value_parser = parse_delimiter)]
    pub delimiter: u8,

    /// Seconds to wait for the header before giving up
    #[arg(long, env = "BULKCSV_HEADER_TIMEOUT_SECS", default_value_t = 10)]
    pub header_timeout_secs: u64,

    /// Seconds without any event before the drain checks for a stall
    #[arg(long, env = "BULKCSV_IDLE_TIMEOUT_SECS", default_value_t = 30)]
    pub idle_timeout_secs: u64,

    /// Stop after this many consecutive idle windows once rows were seen (0 = never)
    #[arg(long, env = "BULKCSV_MAX_IDLE_WINDOWS", default_value_t = 0)]
    pub max_idle_windows: u32,

    /// Seconds allowed for connecting to the store
    #[arg(long, env = "BULKCSV_CONNECT_TIMEOUT_SECS", default_value_t = 10)]
    pub connect_timeout_secs: u64,

    /// Seconds allowed for each insert
    #[arg(long, env = "BULKCSV_STORE_TIMEOUT_SECS", default_value_t = 5)]
    pub store_timeout_secs: u64,

    /// Summary output format
    #[arg(long, env = "BULKCSV_SUMMARY_FORMAT", value_enum, default_value_t = SummaryFormat::Text)]
    pub summary_format: SummaryFormat,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

/// Accept exactly one ASCII character usable as a CSV delimiter
pub fn parse_delimiter(value: &str) -> Result<u8, ConfigError> {
    match value.as_bytes() {
        [b] if b.is_ascii() && !matches!(*b, b'"' | b'\r' | b'\n') => Ok(*b),
        _ => Err(ConfigError::InvalidDelimiter(value.to_string())),
    }
}

impl IngestConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.csv_file.as_os_str().is_empty() {
            return Err(ConfigError::Empty("CSV file path"));
        }
        for (name, value) in [
            ("store endpoint", &self.mongo_uri),
            ("database name", &self.db_name),
            ("collection name", &self.collection_name),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Empty(name));
            }
        }
        for (name, secs) in [
            ("header timeout", self.header_timeout_secs),
            ("idle timeout", self.idle_timeout_secs),
            ("connect timeout", self.connect_timeout_secs),
            ("store timeout", self.store_timeout_secs),
        ] {
            if secs == 0 {
                return Err(ConfigError::ZeroTimeout(name));
            }
        }
        parse_delimiter(&char::from(self.delimiter).to_string())?;
        Ok(())
    }

    pub fn sink_config(&self) -> SinkConfig {
        SinkConfig {
            endpoint: self.mongo_uri.clone(),
            namespace: self.db_name.clone(),
            collection: self.collection_name.clone(),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            store_timeout: Duration::from_secs(self.store_timeout_secs),
        }
    }

    pub fn orchestrator_options(&self) -> OrchestratorOptions {
        OrchestratorOptions {
            header_timeout: Duration::from_secs(self.header_timeout_secs),
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            max_idle_windows: self.max_idle_windows,
        }
    }

    /// Log the effective settings, with credentials masked
    pub fn log_effective(&self) {
        info!(
            csv_file = %self.csv_file.display(),
            endpoint = %redact_endpoint(&self.mongo_uri),
            database = %self.db_name,
            collection = %self.collection_name,
            delimiter = %char::from(self.delimiter),
            header_timeout_secs = self.header_timeout_secs,
            idle_timeout_secs = self.idle_timeout_secs,
            max_idle_windows = self.max_idle_windows,
            connect_timeout_secs = self.connect_timeout_secs,
            store_timeout_secs = self.store_timeout_secs,
            "Effective configuration"
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> IngestConfig {
        IngestConfig::try_parse_from(std::iter::once("bulkcsv-ingest").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]);
        assert_eq!(config.csv_file, PathBuf::from(DEFAULT_CSV_FILE));
        assert_eq!(config.mongo_uri, DEFAULT_MONGO_URI);
        assert_eq!(config.delimiter, b',');
        assert_eq!(config.orchestrator_options(), OrchestratorOptions::default());

        let sink = config.sink_config();
        assert_eq!(sink.target(), "bulkcsv.processed_data");
        assert_eq!(sink.connect_timeout, Duration::from_secs(10));
        assert_eq!(sink.store_timeout, Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_camel_case_aliases() {
        let config = parse(&[
            "--csvFile",
            "data.csv",
            "--mongoURI",
            "memory://",
            "--dbName",
            "staging",
            "--collectionName",
            "rows",
        ]);
        assert_eq!(config.csv_file, PathBuf::from("data.csv"));
        assert_eq!(config.mongo_uri, "memory://");
        assert_eq!(config.sink_config().target(), "staging.rows");
    }

    #[test]
    fn test_timeouts_and_format() {
        let config = parse(&[
            "--header-timeout-secs",
            "2",
            "--idle-timeout-secs",
            "3",
            "--max-idle-windows",
            "4",
            "--summary-format",
            "json",
            "--delimiter",
            ";",
        ]);
        let options = config.orchestrator_options();
        assert_eq!(options.header_timeout, Duration::from_secs(2));
        assert_eq!(options.idle_timeout, Duration::from_secs(3));
        assert_eq!(options.max_idle_windows, 4);
        assert_eq!(config.summary_format, SummaryFormat::Json);
        assert_eq!(config.delimiter, b';');
    }

    #[test]
    fn test_parse_delimiter() {
        assert_eq!(parse_delimiter("\t").unwrap(), b'\t');
        assert_eq!(parse_delimiter("|").unwrap(), b'|');
        assert!(parse_delimiter("").is_err());
        assert!(parse_delimiter(",,").is_err());
        assert!(parse_delimiter("\"").is_err());
        assert!(parse_delimiter("\n").is_err());
        assert!(parse_delimiter("§").is_err());

        let result = IngestConfig::try_parse_from(["bulkcsv-ingest", "--delimiter", "ab"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_zero_timeouts_and_blanks() {
        let mut config = parse(&["--idle-timeout-secs", "0"]);
        assert_eq!(config.validate(), Err(ConfigError::ZeroTimeout("idle timeout")));

        config.idle_timeout_secs = 30;
        config.collection_name = "  ".to_string();
        assert_eq!(config.validate(), Err(ConfigError::Empty("collection name")));
    }
}
